use tokio::sync::{mpsc, oneshot, watch};

use fees_billing::Bill;
use fees_core::BillId;

use super::{ActorExit, ActorOutcome, LineItemRequest};
use crate::command_dispatcher::CommandDispatcher;
use crate::registry::RegistryError;

/// Build the mailboxes of one actor.
///
/// Returns the client handle, the dispatcher the actor reads from, and the
/// sender on which the actor's supervisor publishes the terminal outcome.
pub(crate) fn mailbox(
    bill_id: BillId,
    capacity: usize,
    shutdown_rx: watch::Receiver<bool>,
) -> (
    BillHandle,
    CommandDispatcher,
    watch::Sender<Option<ActorOutcome>>,
) {
    let capacity = capacity.max(1);
    let (add_line_item_tx, add_line_item_rx) = mpsc::channel(capacity);
    let (close_tx, close_rx) = mpsc::channel(capacity);
    let (query_tx, query_rx) = mpsc::channel(capacity);
    let (outcome_tx, outcome_rx) = watch::channel(None);

    let handle = BillHandle {
        bill_id,
        add_line_item_tx,
        close_tx,
        query_tx,
        outcome_rx,
    };
    let dispatcher = CommandDispatcher::new(add_line_item_rx, close_rx, query_rx, shutdown_rx);
    (handle, dispatcher, outcome_tx)
}

/// Client side of a bill actor. Cheap to clone.
///
/// Commands are fire-and-forget: `Ok(())` means the command was delivered to
/// the mailbox, not that it changed the bill. Use [`BillHandle::details`] to
/// observe the result.
#[derive(Debug, Clone)]
pub struct BillHandle {
    bill_id: BillId,
    add_line_item_tx: mpsc::Sender<LineItemRequest>,
    close_tx: mpsc::Sender<()>,
    query_tx: mpsc::Sender<oneshot::Sender<Bill>>,
    outcome_rx: watch::Receiver<Option<ActorOutcome>>,
}

impl BillHandle {
    pub fn bill_id(&self) -> &BillId {
        &self.bill_id
    }

    /// Whether the actor is still accepting input.
    pub fn is_live(&self) -> bool {
        self.outcome_rx.borrow().is_none()
    }

    /// Terminal outcome, once the actor has finished.
    pub fn outcome(&self) -> Option<ActorOutcome> {
        (*self.outcome_rx.borrow()).clone()
    }

    pub async fn add_line_item(&self, request: LineItemRequest) -> Result<(), RegistryError> {
        if self.add_line_item_tx.send(request).await.is_ok() {
            return Ok(());
        }
        self.rejected_send().await
    }

    pub async fn close(&self) -> Result<(), RegistryError> {
        if self.close_tx.send(()).await.is_ok() {
            return Ok(());
        }
        self.rejected_send().await
    }

    /// Point-in-time snapshot of the bill.
    ///
    /// Once the actor has finished, the snapshot it finished with is returned.
    pub async fn details(&self) -> Result<Bill, RegistryError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.query_tx.send(reply_tx).await.is_ok() {
            if let Ok(bill) = reply_rx.await {
                return Ok(bill);
            }
        }

        match self.wait_outcome().await? {
            Ok(exit) => Ok(exit.into_bill()),
            Err(source) => Err(RegistryError::Failed {
                bill_id: self.bill_id.clone(),
                source,
            }),
        }
    }

    /// Wait until the bill is closed and return its final snapshot.
    pub async fn wait_closed(&self) -> Result<Bill, RegistryError> {
        match self.wait_outcome().await? {
            Ok(ActorExit::Closed(bill)) => Ok(bill),
            Ok(ActorExit::Stopped(_)) => Err(RegistryError::ActorUnavailable(self.bill_id.clone())),
            Err(source) => Err(RegistryError::Failed {
                bill_id: self.bill_id.clone(),
                source,
            }),
        }
    }

    /// A closed bill swallows late commands, like the actor itself would.
    async fn rejected_send(&self) -> Result<(), RegistryError> {
        match self.wait_outcome().await? {
            Ok(ActorExit::Closed(_)) => Ok(()),
            _ => Err(RegistryError::ActorUnavailable(self.bill_id.clone())),
        }
    }

    async fn wait_outcome(&self) -> Result<ActorOutcome, RegistryError> {
        let mut outcome_rx = self.outcome_rx.clone();
        let outcome = outcome_rx
            .wait_for(|outcome| outcome.is_some())
            .await
            .map(|outcome| (*outcome).clone())
            .map_err(|_| RegistryError::ActorUnavailable(self.bill_id.clone()))?;

        outcome.ok_or_else(|| RegistryError::ActorUnavailable(self.bill_id.clone()))
    }
}
