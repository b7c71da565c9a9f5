//! Bill actor registry: at most one live actor per bill id.
//!
//! The registry creates actors, routes commands and queries to them by bill
//! id, restores them from history after a restart and stops them on shutdown.
//! Each actor task runs under a supervisor that turns a panic into
//! [`ActorError::Panicked`] and publishes the terminal outcome to every
//! [`BillHandle`].

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError};

use thiserror::Error;
use tokio::sync::{Mutex, RwLock, watch};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tracing::{Instrument, error, info, info_span, warn};

use fees_billing::{Bill, BillStatus};
use fees_core::{AggregateRoot, BillId};

use crate::actor::{ActorError, ActorExit, ActorOutcome, BillActor, BillHandle, CreateBill, mailbox};
use crate::config::RuntimeConfig;
use crate::gateway::PersistenceGateway;
use crate::history::{HistoryError, HistoryStore};

type SharedGateway = Arc<dyn PersistenceGateway>;
type SharedHistory = Arc<dyn HistoryStore>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("bill creation failed: {0}")]
    Create(ActorError),

    #[error("bill not found: {0}")]
    NotFound(BillId),

    #[error("bill already exists: {0}")]
    AlreadyExists(BillId),

    /// The bill's actor is not accepting input (stopped, or never started).
    #[error("bill actor unavailable: {0}")]
    ActorUnavailable(BillId),

    #[error("bill actor {bill_id} failed: {source}")]
    Failed { bill_id: BillId, source: ActorError },

    #[error("history unavailable: {0}")]
    History(#[from] HistoryError),
}

/// Result of [`BillRegistry::recover`].
#[derive(Debug, Default, Clone)]
pub struct RecoveryReport {
    /// Bills whose actor was rebuilt and restarted.
    pub recovered: Vec<BillId>,
    /// Bills already live in this registry.
    pub skipped: Vec<BillId>,
    pub failed: Vec<(BillId, ActorError)>,
}

pub struct BillRegistry {
    gateway: SharedGateway,
    history: SharedHistory,
    config: RuntimeConfig,
    bills: RwLock<HashMap<BillId, BillHandle>>,
    /// Ids whose creation is in flight and not yet registered in `bills`.
    reserved: std::sync::Mutex<HashSet<BillId>>,
    supervisors: Mutex<JoinSet<()>>,
    shutdown_tx: watch::Sender<bool>,
}

/// Holds a bill id in `reserved` until dropped.
struct Reservation<'a> {
    reserved: &'a std::sync::Mutex<HashSet<BillId>>,
    bill_id: BillId,
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        self.reserved
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.bill_id);
    }
}

impl BillRegistry {
    pub fn new(gateway: SharedGateway, history: SharedHistory, config: RuntimeConfig) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            gateway,
            history,
            config,
            bills: RwLock::new(HashMap::new()),
            reserved: std::sync::Mutex::new(HashSet::new()),
            supervisors: Mutex::new(JoinSet::new()),
            shutdown_tx,
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Create a bill and start its actor.
    ///
    /// Fails without registering anything when the initial upsert fails. The
    /// id is reserved before the actor is initialized, so of two racing
    /// creators only one reaches the gateway; the other gets `AlreadyExists`.
    pub async fn create_bill(&self, params: CreateBill) -> Result<BillHandle, RegistryError> {
        let _reservation = match &params.bill_id {
            Some(id) => Some(self.reserve(id).await?),
            None => None,
        };

        let actor = BillActor::initialize(
            params,
            self.gateway.clone(),
            self.history.clone(),
            self.config.clone(),
        )
        .await
        .map_err(RegistryError::Create)?;

        Ok(self.spawn(actor).await)
    }

    /// Handle of a registered bill, live or finished.
    pub async fn handle(&self, bill_id: &BillId) -> Result<BillHandle, RegistryError> {
        self.bills
            .read()
            .await
            .get(bill_id)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(bill_id.clone()))
    }

    pub async fn details(&self, bill_id: &BillId) -> Result<Bill, RegistryError> {
        self.handle(bill_id).await?.details().await
    }

    /// Snapshots of every registered bill, optionally filtered by status,
    /// oldest first.
    pub async fn list(&self, status: Option<BillStatus>) -> Vec<Bill> {
        let handles: Vec<BillHandle> = self.bills.read().await.values().cloned().collect();

        let mut bills = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.details().await {
                Ok(bill) if status.is_none_or(|s| bill.status() == s) => bills.push(bill),
                Ok(_) => {}
                Err(err) => {
                    warn!(bill_id = %handle.bill_id(), error = %err, "skipping bill in listing");
                }
            }
        }
        bills.sort_by(|a, b| {
            a.created_at()
                .cmp(&b.created_at())
                .then_with(|| a.id().cmp(b.id()))
        });
        bills
    }

    /// Rebuild every journaled bill that is not already registered.
    ///
    /// Journaled steps are replayed through the actor code with their recorded
    /// outcomes; no gateway call is re-issued for them.
    pub async fn recover(&self) -> Result<RecoveryReport, RegistryError> {
        let mut report = RecoveryReport::default();

        for bill_id in self.history.bill_ids()? {
            let Ok(_reservation) = self.reserve(&bill_id).await else {
                report.skipped.push(bill_id);
                continue;
            };

            let stream = self.history.load(&bill_id)?;
            let restored = BillActor::recover(
                stream,
                self.gateway.clone(),
                self.history.clone(),
                self.config.clone(),
            )
            .await;

            match restored {
                Ok(actor) => {
                    self.spawn(actor).await;
                    report.recovered.push(bill_id);
                }
                Err(err) => {
                    error!(bill_id = %bill_id, error = %err, "failed to recover bill");
                    report.failed.push((bill_id, err));
                }
            }
        }

        info!(
            recovered = report.recovered.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            "bill recovery finished"
        );
        Ok(report)
    }

    /// Ask every actor to stop between commands and wait for them.
    pub async fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);

        let mut supervisors = std::mem::take(&mut *self.supervisors.lock().await);
        let count = supervisors.len();
        while let Some(joined) = supervisors.join_next().await {
            if let Err(err) = joined {
                warn!(error = %err, "bill actor supervisor did not finish cleanly");
            }
        }
        info!(actors = count, "bill registry shut down");
    }

    /// Number of actor tasks not yet finished.
    pub async fn active_actors(&self) -> usize {
        let mut supervisors = self.supervisors.lock().await;
        reap_finished(&mut supervisors);
        supervisors.len()
    }

    /// Claim `bill_id` for creation or recovery.
    ///
    /// The `bills` read guard is held across both checks so a concurrent
    /// `spawn` cannot move the id from `reserved` to `bills` in between.
    async fn reserve(&self, bill_id: &BillId) -> Result<Reservation<'_>, RegistryError> {
        let bills = self.bills.read().await;
        let mut reserved = self.reserved.lock().unwrap_or_else(PoisonError::into_inner);

        if bills.contains_key(bill_id) || !reserved.insert(bill_id.clone()) {
            return Err(RegistryError::AlreadyExists(bill_id.clone()));
        }
        Ok(Reservation {
            reserved: &self.reserved,
            bill_id: bill_id.clone(),
        })
    }

    async fn spawn(&self, actor: BillActor<SharedGateway, SharedHistory>) -> BillHandle {
        let bill_id = actor.bill().id().clone();
        let (handle, dispatcher, outcome_tx) = mailbox(
            bill_id.clone(),
            self.config.mailbox_capacity,
            self.shutdown_tx.subscribe(),
        );

        let span = info_span!("bill_actor", bill_id = %bill_id, runtime = %self.config.name);
        let task = tokio::spawn(actor.run(dispatcher).instrument(span.clone()));

        {
            let mut supervisors = self.supervisors.lock().await;
            reap_finished(&mut supervisors);
            supervisors.spawn(supervise(task, outcome_tx).instrument(span));
        }
        self.bills.write().await.insert(bill_id, handle.clone());
        handle
    }
}

/// Drop supervisors that already published their outcome.
fn reap_finished(supervisors: &mut JoinSet<()>) {
    while let Some(joined) = supervisors.try_join_next() {
        if let Err(err) = joined {
            warn!(error = %err, "bill actor supervisor did not finish cleanly");
        }
    }
}

async fn supervise(
    task: JoinHandle<Result<ActorExit, ActorError>>,
    outcome_tx: watch::Sender<Option<ActorOutcome>>,
) {
    let outcome = match task.await {
        Ok(outcome) => outcome,
        Err(join_err) => Err(ActorError::Panicked(join_error_message(join_err))),
    };

    match &outcome {
        Ok(ActorExit::Closed(bill)) => {
            info!(total_amount = %bill.total_amount(), "bill actor completed");
        }
        Ok(ActorExit::Stopped(_)) => info!("bill actor stopped"),
        Err(err) => error!(error = %err, "bill actor failed"),
    }

    outcome_tx.send_replace(Some(outcome));
}

fn join_error_message(err: JoinError) -> String {
    if !err.is_panic() {
        return err.to_string();
    }
    let payload = err.into_panic();
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
