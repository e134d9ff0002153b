//! In-memory tracker store using `DashMap`.
//!
//! This is the default backend - records are lost on process restart.
//! For persistence, use `JsonlTrackerStore`.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::{ExperimentRecord, TrackerStore};
use crate::search::TrialId;
use crate::{Error, Result};

/// In-memory tracker store using a lock-free concurrent hashmap.
///
/// Append-only: a second record for the same trial is rejected through the
/// map's entry API, so concurrent writers cannot race a read-modify-write.
#[derive(Debug, Default)]
pub struct MemoryTrackerStore {
    records: DashMap<(String, TrialId), ExperimentRecord>,
}

impl MemoryTrackerStore {
    /// Create a new in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the number of records in the store.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Check if the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl TrackerStore for MemoryTrackerStore {
    fn append(&self, record: &ExperimentRecord) -> Result<()> {
        let key = (record.study().to_string(), record.trial_id());
        match self.records.entry(key) {
            Entry::Occupied(_) => Err(Error::StorageError(format!(
                "record for trial {} of study '{}' already written",
                record.trial_id(),
                record.study()
            ))),
            Entry::Vacant(slot) => {
                slot.insert(record.clone());
                Ok(())
            }
        }
    }

    fn load_all(&self) -> Result<Vec<ExperimentRecord>> {
        let mut records: Vec<ExperimentRecord> =
            self.records.iter().map(|r| r.value().clone()).collect();
        records.sort_by(|a, b| (a.study(), a.trial_id()).cmp(&(b.study(), b.trial_id())));
        Ok(records)
    }
}
