use std::collections::HashMap;
use std::sync::RwLock;

use fees_core::{BillId, ExpectedVersion};

use super::r#trait::{HistoryEntry, HistoryError, HistoryStore, StoredEntry};

/// In-memory history journal.
///
/// Survives actor restarts within one process, which is what recovery tests
/// need; it does not survive the process.
#[derive(Debug, Default)]
pub struct InMemoryHistoryStore {
    streams: RwLock<HashMap<BillId, Vec<StoredEntry>>>,
}

impl InMemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn current_version(stream: &[StoredEntry]) -> u64 {
        stream.last().map(|e| e.sequence_number).unwrap_or(0)
    }
}

impl HistoryStore for InMemoryHistoryStore {
    fn append(
        &self,
        bill_id: &BillId,
        entries: Vec<HistoryEntry>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEntry>, HistoryError> {
        if entries.is_empty() {
            return Ok(vec![]);
        }

        let mut streams = self
            .streams
            .write()
            .map_err(|_| HistoryError::Unavailable("lock poisoned".to_string()))?;

        let stream = streams.entry(bill_id.clone()).or_default();
        let current = Self::current_version(stream);

        if !expected_version.matches(current) {
            return Err(HistoryError::Concurrency(format!(
                "bill {bill_id}: expected {expected_version:?}, found {current}"
            )));
        }

        if current == 0 && !matches!(entries[0], HistoryEntry::Started { .. }) {
            return Err(HistoryError::Corrupt(format!(
                "bill {bill_id}: stream must start with a started entry, got {}",
                entries[0].kind()
            )));
        }

        let mut next = current + 1;
        let mut committed = Vec::with_capacity(entries.len());
        for entry in entries {
            let stored = StoredEntry {
                bill_id: bill_id.clone(),
                sequence_number: next,
                entry,
            };
            next += 1;
            stream.push(stored.clone());
            committed.push(stored);
        }

        Ok(committed)
    }

    fn load(&self, bill_id: &BillId) -> Result<Vec<StoredEntry>, HistoryError> {
        let streams = self
            .streams
            .read()
            .map_err(|_| HistoryError::Unavailable("lock poisoned".to_string()))?;

        Ok(streams.get(bill_id).cloned().unwrap_or_default())
    }

    fn bill_ids(&self) -> Result<Vec<BillId>, HistoryError> {
        let streams = self
            .streams
            .read()
            .map_err(|_| HistoryError::Unavailable("lock poisoned".to_string()))?;

        let mut ids: Vec<BillId> = streams
            .iter()
            .filter(|(_, stream)| !stream.is_empty())
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        Ok(ids)
    }
}
