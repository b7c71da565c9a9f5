//! Input selection for a bill actor.
//!
//! The dispatcher owns the receiving side of the actor's mailboxes and hands
//! the actor exactly one ready input at a time:
//!
//! ```text
//! journaled inputs (replay)  ──┐
//! AddLineItem mailbox (FIFO) ──┤
//! Close mailbox (FIFO)       ──┼──► next() ──► actor processes to completion
//! Query mailbox              ──┤
//! shutdown signal            ──┘
//! ```
//!
//! ## Tie-break
//!
//! Live selection is a plain `tokio::select!` without `biased;`. When inputs of
//! several kinds are ready at once, tokio picks one at random. Ordering is only
//! guaranteed within a kind. Whatever was picked is journaled, so a replay
//! yields the same interleaving.
//!
//! Queries and shutdown are not journaled: neither changes the bill.

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info};

use fees_billing::Bill;

use crate::actor::LineItemRequest;
use crate::effects::{EffectError, EffectLog};

/// A command accepted by the actor, as journaled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BillInput {
    AddLineItem(LineItemRequest),
    Close,
}

impl BillInput {
    pub fn kind(&self) -> &'static str {
        match self {
            BillInput::AddLineItem(_) => "add_line_item",
            BillInput::Close => "close",
        }
    }
}

/// What the dispatcher selected.
#[derive(Debug)]
pub enum Selected {
    Input(BillInput),
    Query(oneshot::Sender<Bill>),
    Shutdown,
    /// Every sender is gone; no input can arrive any more.
    Disconnected,
}

enum Ready {
    AddLineItem(LineItemRequest),
    Close,
    Query(oneshot::Sender<Bill>),
    ShutdownChanged(bool),
    Disconnected,
}

/// Receiving side of one actor's mailboxes.
#[derive(Debug)]
pub struct CommandDispatcher {
    add_line_item_rx: mpsc::Receiver<LineItemRequest>,
    close_rx: mpsc::Receiver<()>,
    query_rx: mpsc::Receiver<oneshot::Sender<Bill>>,
    shutdown_rx: watch::Receiver<bool>,
    shutdown_live: bool,
}

impl CommandDispatcher {
    pub(crate) fn new(
        add_line_item_rx: mpsc::Receiver<LineItemRequest>,
        close_rx: mpsc::Receiver<()>,
        query_rx: mpsc::Receiver<oneshot::Sender<Bill>>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            add_line_item_rx,
            close_rx,
            query_rx,
            shutdown_rx,
            shutdown_live: true,
        }
    }

    /// Next input for the actor.
    ///
    /// Journaled inputs come first, in journal order. After that, live inputs
    /// are selected and recorded into `log` so the choice is committed with the
    /// step that processes it.
    pub async fn next(&mut self, log: &mut EffectLog) -> Result<Selected, EffectError> {
        if let Some(input) = log.next_replayed_input::<BillInput>()? {
            debug!(input = input.kind(), "replaying journaled input");
            return Ok(Selected::Input(input));
        }

        loop {
            if self.shutdown_live && *self.shutdown_rx.borrow() {
                return Ok(Selected::Shutdown);
            }

            let ready = tokio::select! {
                Some(request) = self.add_line_item_rx.recv() => Ready::AddLineItem(request),
                Some(()) = self.close_rx.recv() => Ready::Close,
                Some(reply) = self.query_rx.recv() => Ready::Query(reply),
                changed = self.shutdown_rx.changed(), if self.shutdown_live => {
                    Ready::ShutdownChanged(changed.is_ok())
                }
                else => Ready::Disconnected,
            };

            let input = match ready {
                Ready::AddLineItem(request) => BillInput::AddLineItem(request),
                Ready::Close => BillInput::Close,
                Ready::Query(reply) => return Ok(Selected::Query(reply)),
                Ready::ShutdownChanged(true) => continue,
                Ready::ShutdownChanged(false) => {
                    // Sender dropped: nobody can request a shutdown any more.
                    self.shutdown_live = false;
                    continue;
                }
                Ready::Disconnected => return Ok(Selected::Disconnected),
            };

            log.record_input(&input)?;
            return Ok(Selected::Input(input));
        }
    }

    /// Stop accepting input once the bill is closed.
    ///
    /// Queued queries are answered with the final snapshot; queued commands
    /// are dropped, which is what the actor would have done with them anyway.
    pub fn drain_closed(&mut self, bill: &Bill) {
        self.add_line_item_rx.close();
        self.close_rx.close();
        self.query_rx.close();

        let mut ignored = 0usize;
        while let Ok(request) = self.add_line_item_rx.try_recv() {
            debug!(line_item_id = ?request.line_item_id, "dropping line item queued behind close");
            ignored += 1;
        }
        while self.close_rx.try_recv().is_ok() {
            ignored += 1;
        }
        while let Ok(reply) = self.query_rx.try_recv() {
            let _ = reply.send(bill.clone());
        }

        if ignored > 0 {
            info!(ignored, "ignoring commands received after close");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fees_core::{AggregateRoot, BillId, LineItemId};
    use rust_decimal::Decimal;

    struct Senders {
        add: mpsc::Sender<LineItemRequest>,
        close: mpsc::Sender<()>,
        query: mpsc::Sender<oneshot::Sender<Bill>>,
        shutdown: watch::Sender<bool>,
    }

    fn dispatcher() -> (CommandDispatcher, Senders) {
        let (add, add_rx) = mpsc::channel(8);
        let (close, close_rx) = mpsc::channel(8);
        let (query, query_rx) = mpsc::channel(8);
        let (shutdown, shutdown_rx) = watch::channel(false);
        (
            CommandDispatcher::new(add_rx, close_rx, query_rx, shutdown_rx),
            Senders {
                add,
                close,
                query,
                shutdown,
            },
        )
    }

    fn request(id: &str) -> LineItemRequest {
        LineItemRequest {
            line_item_id: Some(LineItemId::new(id)),
            description: "svc".to_string(),
            amount: Decimal::ONE,
        }
    }

    #[tokio::test]
    async fn same_kind_inputs_are_fifo_and_journaled() {
        let (mut dispatcher, senders) = dispatcher();
        let mut log = EffectLog::live();

        senders.add.send(request("L1")).await.unwrap();
        senders.add.send(request("L2")).await.unwrap();

        for expected in ["L1", "L2"] {
            match dispatcher.next(&mut log).await.unwrap() {
                Selected::Input(BillInput::AddLineItem(r)) => {
                    assert_eq!(r.line_item_id, Some(LineItemId::new(expected)));
                }
                other => panic!("unexpected selection: {other:?}"),
            }
        }
        assert!(log.has_pending());
    }

    #[tokio::test]
    async fn queries_are_not_journaled() {
        let (mut dispatcher, senders) = dispatcher();
        let mut log = EffectLog::live();

        let (tx, _rx) = oneshot::channel();
        senders.query.send(tx).await.unwrap();

        assert!(matches!(
            dispatcher.next(&mut log).await.unwrap(),
            Selected::Query(_)
        ));
        assert!(!log.has_pending());
    }

    #[tokio::test]
    async fn shutdown_signal_is_selected() {
        let (mut dispatcher, senders) = dispatcher();
        let mut log = EffectLog::live();

        senders.shutdown.send(true).unwrap();
        assert!(matches!(
            dispatcher.next(&mut log).await.unwrap(),
            Selected::Shutdown
        ));
    }

    #[tokio::test]
    async fn dropped_senders_disconnect() {
        let (mut dispatcher, senders) = dispatcher();
        let mut log = EffectLog::live();
        drop(senders);

        assert!(matches!(
            dispatcher.next(&mut log).await.unwrap(),
            Selected::Disconnected
        ));
    }

    #[tokio::test]
    async fn drain_answers_queued_queries_with_final_snapshot() {
        let (mut dispatcher, senders) = dispatcher();
        let (tx, rx) = oneshot::channel();
        senders.query.send(tx).await.unwrap();
        senders.add.send(request("late")).await.unwrap();

        let bill = Bill::empty(BillId::new("B1"));
        dispatcher.drain_closed(&bill);

        assert_eq!(rx.await.unwrap().id(), &BillId::new("B1"));
        assert!(senders.add.send(request("later")).await.is_err());
    }
}
