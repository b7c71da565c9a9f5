//! Recorded effects: the one place where a bill actor touches the outside world.
//!
//! Anything that is not a pure function of the actor's inputs (a generated id,
//! a clock read, the outcome of a gateway call) goes through
//! [`EffectLog::side_effect`] / [`EffectLog::side_effect_async`]. Live, the
//! closure runs once and its value is buffered for the journal. While
//! replaying, the journaled value is returned and the closure never runs.
//!
//! Entries produced by one step are buffered until [`EffectLog::commit`]
//! appends them as a single batch.

use std::collections::VecDeque;
use std::future::Future;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

use fees_core::{BillId, ExpectedVersion};

use crate::history::{HistoryEntry, HistoryError, HistoryStore, StoredEntry};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EffectError {
    /// Replayed code asked for something other than what the journal holds.
    #[error("non-deterministic replay: expected {expected}, journal has {found}")]
    NonDeterminism { expected: String, found: String },

    #[error("effect serialization failed: {0}")]
    Serialization(String),
}

fn to_json<T: Serialize>(value: &T) -> Result<serde_json::Value, EffectError> {
    serde_json::to_value(value).map_err(|e| EffectError::Serialization(e.to_string()))
}

fn from_json<T: DeserializeOwned>(value: serde_json::Value) -> Result<T, EffectError> {
    serde_json::from_value(value).map_err(|e| EffectError::Serialization(e.to_string()))
}

fn describe(entry: &HistoryEntry) -> String {
    match entry {
        HistoryEntry::EffectRecorded { name, .. } => format!("effect '{name}'"),
        other => other.kind().to_string(),
    }
}

/// Per-actor journal cursor.
#[derive(Debug, Default)]
pub struct EffectLog {
    replay: VecDeque<HistoryEntry>,
    pending: Vec<HistoryEntry>,
    committed_version: u64,
}

impl EffectLog {
    /// Log for a brand-new actor with no history.
    pub fn live() -> Self {
        Self::default()
    }

    /// Log positioned at the start of a journaled stream.
    ///
    /// Returns the creation parameters from the leading `Started` entry.
    pub fn from_history<P: DeserializeOwned>(
        stream: Vec<StoredEntry>,
    ) -> Result<(P, Self), EffectError> {
        let committed_version = stream.last().map(|e| e.sequence_number).unwrap_or(0);
        let mut replay: VecDeque<HistoryEntry> = stream.into_iter().map(|e| e.entry).collect();

        let params = match replay.pop_front() {
            Some(HistoryEntry::Started { params }) => from_json(params)?,
            Some(other) => {
                return Err(EffectError::NonDeterminism {
                    expected: "started".to_string(),
                    found: describe(&other),
                });
            }
            None => {
                return Err(EffectError::NonDeterminism {
                    expected: "started".to_string(),
                    found: "empty stream".to_string(),
                });
            }
        };

        Ok((
            params,
            Self {
                replay,
                pending: Vec::new(),
                committed_version,
            },
        ))
    }

    pub fn is_replaying(&self) -> bool {
        !self.replay.is_empty()
    }

    /// Version of the stream as last committed (or loaded).
    pub fn committed_version(&self) -> u64 {
        self.committed_version
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Journal the creation parameters of a live actor.
    pub fn record_started<P: Serialize>(&mut self, params: &P) -> Result<(), EffectError> {
        self.pending.push(HistoryEntry::Started {
            params: to_json(params)?,
        });
        Ok(())
    }

    /// Journal an input selected from a live mailbox.
    pub fn record_input<I: Serialize>(&mut self, input: &I) -> Result<(), EffectError> {
        self.pending.push(HistoryEntry::InputAccepted {
            input: to_json(input)?,
        });
        Ok(())
    }

    /// Next journaled input, or `None` once replay has caught up.
    ///
    /// Fails when the journal still holds effects the replayed code did not
    /// ask for.
    pub fn next_replayed_input<I: DeserializeOwned>(&mut self) -> Result<Option<I>, EffectError> {
        match self.replay.pop_front() {
            None => Ok(None),
            Some(HistoryEntry::InputAccepted { input }) => from_json(input).map(Some),
            Some(other) => Err(EffectError::NonDeterminism {
                expected: "input".to_string(),
                found: describe(&other),
            }),
        }
    }

    /// Recorded synchronous effect.
    pub fn side_effect<T, F>(&mut self, name: &str, f: F) -> Result<T, EffectError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> T,
    {
        if let Some(recorded) = self.take_recorded(name)? {
            return Ok(recorded);
        }
        let value = f();
        self.push_effect(name, &value)?;
        Ok(value)
    }

    /// Recorded asynchronous effect (gateway calls).
    pub async fn side_effect_async<T, F, Fut>(&mut self, name: &str, f: F) -> Result<T, EffectError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        if let Some(recorded) = self.take_recorded(name)? {
            return Ok(recorded);
        }
        let value = f().await;
        self.push_effect(name, &value)?;
        Ok(value)
    }

    /// Recorded clock read.
    pub fn now(&mut self, name: &str) -> Result<DateTime<Utc>, EffectError> {
        self.side_effect(name, Utc::now)
    }

    /// Append everything buffered since the last commit as one batch.
    pub fn commit<S>(&mut self, store: &S, bill_id: &BillId) -> Result<(), HistoryError>
    where
        S: HistoryStore + ?Sized,
    {
        if self.pending.is_empty() {
            return Ok(());
        }
        let batch = std::mem::take(&mut self.pending);
        let appended = store.append(
            bill_id,
            batch,
            ExpectedVersion::Exact(self.committed_version),
        )?;
        if let Some(last) = appended.last() {
            self.committed_version = last.sequence_number;
        }
        Ok(())
    }

    fn take_recorded<T: DeserializeOwned>(&mut self, name: &str) -> Result<Option<T>, EffectError> {
        let Some(front) = self.replay.front() else {
            return Ok(None);
        };
        match front {
            HistoryEntry::EffectRecorded { name: recorded, .. } if recorded == name => {}
            other => {
                return Err(EffectError::NonDeterminism {
                    expected: format!("effect '{name}'"),
                    found: describe(other),
                });
            }
        }
        match self.replay.pop_front() {
            Some(HistoryEntry::EffectRecorded { value, .. }) => from_json(value).map(Some),
            _ => Ok(None),
        }
    }

    fn push_effect<T: Serialize>(&mut self, name: &str, value: &T) -> Result<(), EffectError> {
        self.pending.push(HistoryEntry::EffectRecorded {
            name: name.to_string(),
            value: to_json(value)?,
        });
        Ok(())
    }
}
