//! The bill lifecycle actor.
//!
//! One tokio task per bill id. The task owns the `Bill`; everything else talks
//! to it through a [`BillHandle`].

mod bill_actor;
mod handle;

pub use bill_actor::BillActor;
pub use handle::BillHandle;
pub(crate) use handle::mailbox;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use fees_billing::Bill;
use fees_core::{BillId, DomainError, LineItemId};

use crate::effects::EffectError;
use crate::gateway::GatewayError;
use crate::history::HistoryError;

/// Creation parameters, journaled as the first history entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateBill {
    /// Generated when absent.
    pub bill_id: Option<BillId>,
    pub customer_id: String,
    pub currency: String,
}

impl CreateBill {
    pub fn new(customer_id: impl Into<String>, currency: impl Into<String>) -> Self {
        Self {
            bill_id: None,
            customer_id: customer_id.into(),
            currency: currency.into(),
        }
    }

    pub fn with_bill_id(mut self, bill_id: impl Into<BillId>) -> Self {
        self.bill_id = Some(bill_id.into());
        self
    }
}

/// Payload of an AddLineItem command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItemRequest {
    /// Callers that redeliver should supply one; generated when absent.
    pub line_item_id: Option<LineItemId>,
    pub description: String,
    pub amount: Decimal,
}

impl LineItemRequest {
    pub fn new(description: impl Into<String>, amount: Decimal) -> Self {
        Self {
            line_item_id: None,
            description: description.into(),
            amount,
        }
    }

    pub fn with_id(mut self, line_item_id: impl Into<LineItemId>) -> Self {
        self.line_item_id = Some(line_item_id.into());
        self
    }
}

/// Normal end of an actor's processing loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActorExit {
    /// The bill reached CLOSED; this is its final snapshot.
    Closed(Bill),
    /// The host asked the actor to stop between commands. The bill is still
    /// open and can be recovered from history.
    Stopped(Bill),
}

impl ActorExit {
    pub fn bill(&self) -> &Bill {
        match self {
            ActorExit::Closed(bill) | ActorExit::Stopped(bill) => bill,
        }
    }

    pub fn into_bill(self) -> Bill {
        match self {
            ActorExit::Closed(bill) | ActorExit::Stopped(bill) => bill,
        }
    }
}

/// Fatal actor failure. Never a normal close.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ActorError {
    /// The initial bill upsert failed; the bill was not created.
    #[error("bill initialization failed: {0}")]
    Initialize(GatewayError),

    /// The aggregate rejected a command the actor had no reason to expect a
    /// rejection for (bill id mismatch, broken invariant).
    #[error("bill state rejected: {0}")]
    Domain(DomainError),

    #[error("history journal failed: {0}")]
    History(#[from] HistoryError),

    #[error("replay diverged from history: {0}")]
    NonDeterminism(String),

    #[error("actor task panicked: {0}")]
    Panicked(String),
}

impl From<EffectError> for ActorError {
    fn from(err: EffectError) -> Self {
        match err {
            EffectError::NonDeterminism { .. } => ActorError::NonDeterminism(err.to_string()),
            EffectError::Serialization(msg) => ActorError::History(HistoryError::Corrupt(msg)),
        }
    }
}

/// Terminal result published by an actor task.
pub type ActorOutcome = Result<ActorExit, ActorError>;
