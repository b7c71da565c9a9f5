use std::future::Future;
use std::time::Duration;

use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use fees_billing::{AddLineItem, Bill, BillCommand, BillEvent, BillStatus, CloseBill, OpenBill};
use fees_core::{Aggregate, AggregateRoot, BillId, LineItemId};
use fees_events::{Command, Event};

use super::{ActorError, ActorExit, CreateBill, LineItemRequest};
use crate::command_dispatcher::{BillInput, CommandDispatcher, Selected};
use crate::config::RuntimeConfig;
use crate::effects::EffectLog;
use crate::gateway::{FinalizeBill, GatewayError, PersistenceGateway, SaveLineItem, UpsertBill};
use crate::history::{HistoryStore, StoredEntry};

/// Sequential state machine for a single bill.
///
/// The actor is the only writer of its `Bill`. Commands are processed one at
/// a time; each step's journal entries are committed before the next input is
/// selected, so queries never see a half-processed command.
pub struct BillActor<G, S> {
    bill: Bill,
    gateway: G,
    history: S,
    log: EffectLog,
    config: RuntimeConfig,
}

impl<G, S> BillActor<G, S>
where
    G: PersistenceGateway,
    S: HistoryStore,
{
    /// Create a new bill.
    ///
    /// The initial upsert must succeed. On failure nothing is journaled and the
    /// error is returned to the creator.
    pub async fn initialize(
        params: CreateBill,
        gateway: G,
        history: S,
        config: RuntimeConfig,
    ) -> Result<Self, ActorError> {
        let mut log = EffectLog::live();
        log.record_started(&params)?;

        let mut actor = Self::open(params, gateway, history, config, log).await?;
        actor.log.commit(&actor.history, actor.bill.id())?;

        info!(
            bill_id = %actor.bill.id(),
            customer_id = %actor.bill.customer_id(),
            currency = %actor.bill.currency(),
            "bill opened"
        );
        Ok(actor)
    }

    /// Rebuild an actor from its journal.
    ///
    /// Only the creation step is replayed here; journaled commands are replayed
    /// by [`BillActor::run`] before it listens to live mailboxes.
    pub async fn recover(
        stream: Vec<StoredEntry>,
        gateway: G,
        history: S,
        config: RuntimeConfig,
    ) -> Result<Self, ActorError> {
        let (params, log) = EffectLog::from_history::<CreateBill>(stream)?;
        let actor = Self::open(params, gateway, history, config, log).await?;
        debug!(bill_id = %actor.bill.id(), "bill restored from history");
        Ok(actor)
    }

    async fn open(
        params: CreateBill,
        gateway: G,
        history: S,
        config: RuntimeConfig,
        mut log: EffectLog,
    ) -> Result<Self, ActorError> {
        let bill_id = match params.bill_id {
            Some(id) => id,
            None => log.side_effect("bill_id", BillId::generate)?,
        };
        let created_at = log.now("created_at")?;

        let mut bill = Bill::empty(bill_id.clone());
        let events = bill
            .handle(&BillCommand::OpenBill(OpenBill {
                bill_id: bill_id.clone(),
                customer_id: params.customer_id.clone(),
                currency: params.currency.clone(),
                occurred_at: created_at,
            }))
            .map_err(ActorError::Domain)?;
        apply_all(&mut bill, &events);

        let upsert = UpsertBill {
            id: bill_id.clone(),
            customer_id: params.customer_id,
            currency: params.currency,
            status: BillStatus::Open,
            created_at,
        };
        let outcome = call_activity(
            &mut log,
            config.activity_timeout,
            "upsert_bill",
            gateway.upsert_bill(upsert),
        )
        .await?;
        if let Err(err) = outcome {
            error!(bill_id = %bill_id, error = %err, "initial bill upsert failed; bill not created");
            return Err(ActorError::Initialize(err));
        }

        Ok(Self {
            bill,
            gateway,
            history,
            log,
            config,
        })
    }

    pub fn bill(&self) -> &Bill {
        &self.bill
    }

    /// Process inputs until the bill closes, the host stops it, or a fault occurs.
    pub async fn run(mut self, mut dispatcher: CommandDispatcher) -> Result<ActorExit, ActorError> {
        loop {
            match dispatcher.next(&mut self.log).await? {
                Selected::Input(input) => {
                    self.handle_input(input).await?;
                    if self.bill.status() == BillStatus::Closed {
                        dispatcher.drain_closed(&self.bill);
                        return Ok(ActorExit::Closed(self.bill));
                    }
                }
                Selected::Query(reply) => self.handle_query(reply),
                Selected::Shutdown => {
                    info!(bill_id = %self.bill.id(), "shutdown requested; stopping between commands");
                    return Ok(ActorExit::Stopped(self.bill));
                }
                Selected::Disconnected => {
                    debug!(bill_id = %self.bill.id(), "all handles dropped; stopping");
                    return Ok(ActorExit::Stopped(self.bill));
                }
            }
        }
    }

    async fn handle_input(&mut self, input: BillInput) -> Result<(), ActorError> {
        match input {
            BillInput::AddLineItem(request) => self.handle_add_line_item(request).await?,
            BillInput::Close => self.handle_close().await?,
        }
        self.log.commit(&self.history, self.bill.id())?;
        Ok(())
    }

    async fn handle_add_line_item(&mut self, request: LineItemRequest) -> Result<(), ActorError> {
        if !self.bill.is_open() {
            warn!(bill_id = %self.bill.id(), "ignoring line item for bill that is not open");
            return Ok(());
        }

        let line_item_id = match request.line_item_id {
            Some(id) => id,
            None => self.log.side_effect("line_item_id", LineItemId::generate)?,
        };
        if self.bill.contains_line_item(&line_item_id) {
            info!(
                bill_id = %self.bill.id(),
                line_item_id = %line_item_id,
                "duplicate line item; ignoring"
            );
            return Ok(());
        }
        let occurred_at = self.log.now("line_item_added_at")?;

        let command = BillCommand::AddLineItem(AddLineItem {
            bill_id: self.bill.id().clone(),
            line_item_id: line_item_id.clone(),
            description: request.description.clone(),
            amount: request.amount,
            occurred_at,
        });
        let events = match self.bill.handle(&command) {
            Ok(events) => events,
            Err(err) if err.is_conflict() => {
                info!(
                    bill_id = %command.target_bill_id(),
                    command = command.command_type(),
                    reason = %err,
                    "command rejected; ignoring"
                );
                return Ok(());
            }
            Err(err) => return Err(ActorError::Domain(err)),
        };
        apply_all(&mut self.bill, &events);
        self.bill.check_invariants().map_err(ActorError::Domain)?;

        debug!(
            bill_id = %self.bill.id(),
            line_item_id = %line_item_id,
            amount = %request.amount,
            total_amount = %self.bill.total_amount(),
            "line item added"
        );

        let save = SaveLineItem {
            id: line_item_id.clone(),
            bill_id: self.bill.id().clone(),
            description: request.description,
            amount: request.amount,
            created_at: occurred_at,
        };
        let outcome = call_activity(
            &mut self.log,
            self.config.activity_timeout,
            "save_line_item",
            self.gateway.save_line_item(save),
        )
        .await?;
        if let Err(err) = outcome {
            // Best effort: the actor's state stays authoritative.
            error!(
                bill_id = %self.bill.id(),
                line_item_id = %line_item_id,
                error = %err,
                "failed to persist line item"
            );
        }
        Ok(())
    }

    async fn handle_close(&mut self) -> Result<(), ActorError> {
        if !self.bill.is_open() {
            info!(bill_id = %self.bill.id(), "bill already closed; ignoring close");
            return Ok(());
        }

        let closed_at = self.log.now("closed_at")?;
        let total_amount = self.bill.line_items_total();

        let finalize = FinalizeBill {
            id: self.bill.id().clone(),
            status: BillStatus::Closed,
            total_amount,
            closed_at,
        };
        let outcome = call_activity(
            &mut self.log,
            self.config.activity_timeout,
            "finalize_bill",
            self.gateway.finalize_bill(finalize),
        )
        .await?;
        if let Err(err) = outcome {
            error!(
                bill_id = %self.bill.id(),
                total_amount = %total_amount,
                error = %err,
                "failed to persist final bill; closing anyway"
            );
        }

        let events = self
            .bill
            .handle(&BillCommand::CloseBill(CloseBill {
                bill_id: self.bill.id().clone(),
                occurred_at: closed_at,
            }))
            .map_err(ActorError::Domain)?;
        apply_all(&mut self.bill, &events);
        self.bill.check_invariants().map_err(ActorError::Domain)?;

        info!(
            bill_id = %self.bill.id(),
            total_amount = %self.bill.total_amount(),
            line_items = self.bill.line_items().len(),
            "bill closed"
        );
        Ok(())
    }

    fn handle_query(&self, reply: oneshot::Sender<Bill>) {
        // The caller may have given up waiting.
        let _ = reply.send(self.bill.clone());
    }
}

fn apply_all(bill: &mut Bill, events: &[BillEvent]) {
    for event in events {
        bill.apply(event);
        debug!(event_type = event.event_type(), version = bill.version(), "event applied");
    }
}

/// Run one gateway call as a recorded effect, bounded by `timeout`.
///
/// While replaying, `call` is dropped unpolled and the journaled outcome is
/// returned instead.
async fn call_activity<F>(
    log: &mut EffectLog,
    timeout: Duration,
    name: &str,
    call: F,
) -> Result<Result<(), GatewayError>, ActorError>
where
    F: Future<Output = Result<(), GatewayError>>,
{
    let after_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
    let outcome = log
        .side_effect_async(name, || async move {
            match tokio::time::timeout(timeout, call).await {
                Ok(result) => result,
                Err(_) => Err(GatewayError::Timeout { after_ms }),
            }
        })
        .await?;
    Ok(outcome)
}
