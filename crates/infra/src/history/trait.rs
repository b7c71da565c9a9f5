use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

use fees_core::{BillId, ExpectedVersion};
use std::sync::Arc;

/// One journaled fact about a bill actor's execution.
///
/// The journal holds everything needed to rebuild an actor by re-running its
/// code: the creation parameters, every input the dispatcher selected (in the
/// order it selected them) and the value of every recorded effect. Payloads
/// are opaque JSON so the store stays independent of the actor's types.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HistoryEntry {
    /// Creation parameters, always the first entry of a stream.
    Started { params: JsonValue },
    /// A command selected by the dispatcher.
    InputAccepted { input: JsonValue },
    /// The value produced by a recorded effect (id, clock read, gateway outcome).
    EffectRecorded { name: String, value: JsonValue },
}

impl HistoryEntry {
    pub fn kind(&self) -> &'static str {
        match self {
            HistoryEntry::Started { .. } => "started",
            HistoryEntry::InputAccepted { .. } => "input_accepted",
            HistoryEntry::EffectRecorded { .. } => "effect_recorded",
        }
    }
}

/// A journaled entry with its position in the bill's stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEntry {
    pub bill_id: BillId,

    /// Monotonically increasing position in the stream, starting at 1.
    pub sequence_number: u64,

    pub entry: HistoryEntry,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HistoryError {
    #[error("optimistic concurrency check failed: {0}")]
    Concurrency(String),

    #[error("corrupt history: {0}")]
    Corrupt(String),

    #[error("history store unavailable: {0}")]
    Unavailable(String),
}

/// Append-only, per-bill history journal.
///
/// Implementations must:
/// - append a batch atomically (all entries or none)
/// - enforce optimistic concurrency against the current stream version
/// - assign `sequence_number`s starting at `current_version + 1`
/// - return streams in sequence order
pub trait HistoryStore: Send + Sync {
    fn append(
        &self,
        bill_id: &BillId,
        entries: Vec<HistoryEntry>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEntry>, HistoryError>;

    /// Load the full stream for a bill; empty when the bill was never journaled.
    fn load(&self, bill_id: &BillId) -> Result<Vec<StoredEntry>, HistoryError>;

    /// Every bill id with a non-empty stream.
    fn bill_ids(&self) -> Result<Vec<BillId>, HistoryError>;
}

impl<S> HistoryStore for Arc<S>
where
    S: HistoryStore + ?Sized,
{
    fn append(
        &self,
        bill_id: &BillId,
        entries: Vec<HistoryEntry>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEntry>, HistoryError> {
        (**self).append(bill_id, entries, expected_version)
    }

    fn load(&self, bill_id: &BillId) -> Result<Vec<StoredEntry>, HistoryError> {
        (**self).load(bill_id)
    }

    fn bill_ids(&self) -> Result<Vec<BillId>, HistoryError> {
        (**self).bill_ids()
    }
}
