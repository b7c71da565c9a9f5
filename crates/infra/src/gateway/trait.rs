use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

use fees_billing::BillStatus;
use fees_core::{BillId, LineItemId};

/// Insert-or-update of the bill header row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpsertBill {
    pub id: BillId,
    pub customer_id: String,
    pub currency: String,
    pub status: BillStatus,
    pub created_at: DateTime<Utc>,
}

/// Insert of a single line item row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveLineItem {
    pub id: LineItemId,
    pub bill_id: BillId,
    pub description: String,
    pub amount: Decimal,
    pub created_at: DateTime<Utc>,
}

/// Final update of the bill header when it closes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalizeBill {
    pub id: BillId,
    pub status: BillStatus,
    pub total_amount: Decimal,
    pub closed_at: DateTime<Utc>,
}

/// Gateway failure.
///
/// Serializable because the outcome of every gateway call is journaled and
/// handed back unchanged when an actor is rebuilt from history.
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum GatewayError {
    #[error("database error: {0}")]
    Database(String),

    #[error("row not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("timed out after {after_ms}ms")]
    Timeout { after_ms: u64 },

    #[error("gateway unavailable: {0}")]
    Unavailable(String),
}

/// Write contract of the relational store.
///
/// Implementations are free to be slow or to fail; callers bound every call
/// with a timeout and decide per operation whether a failure matters.
#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    /// Insert the bill, or update it preserving `total_amount` and `created_at`.
    async fn upsert_bill(&self, params: UpsertBill) -> Result<(), GatewayError>;

    /// Plain insert. A second insert of the same id fails with `Conflict`.
    async fn save_line_item(&self, params: SaveLineItem) -> Result<(), GatewayError>;

    async fn finalize_bill(&self, params: FinalizeBill) -> Result<(), GatewayError>;
}

#[async_trait]
impl<G> PersistenceGateway for Arc<G>
where
    G: PersistenceGateway + ?Sized,
{
    async fn upsert_bill(&self, params: UpsertBill) -> Result<(), GatewayError> {
        (**self).upsert_bill(params).await
    }

    async fn save_line_item(&self, params: SaveLineItem) -> Result<(), GatewayError> {
        (**self).save_line_item(params).await
    }

    async fn finalize_bill(&self, params: FinalizeBill) -> Result<(), GatewayError> {
        (**self).finalize_bill(params).await
    }
}
