//! Experiment Tracker - the study's durable trial log

use std::path::Path;
use std::sync::Arc;

use tracing::debug;

use super::{export, ExperimentRecord, TrackerStore};
use crate::search::{Direction, TrialStatus};
use crate::{Error, Result};

/// Append-only log of every trial of one study, backed by a `TrackerStore`.
///
/// The tracker is shared (`Arc`) between the search controller and
/// reporting code; all methods take `&self`.
pub struct ExperimentTracker {
    study: String,
    direction: Direction,
    store: Arc<dyn TrackerStore>,
}

impl std::fmt::Debug for ExperimentTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExperimentTracker")
            .field("study", &self.study)
            .field("direction", &self.direction)
            .finish_non_exhaustive()
    }
}

impl ExperimentTracker {
    /// Create a tracker for `study` over an existing store.
    #[must_use]
    pub fn new(study: impl Into<String>, direction: Direction, store: Arc<dyn TrackerStore>) -> Self {
        Self {
            study: study.into(),
            direction,
            store,
        }
    }

    /// Name of the tracked study.
    #[must_use]
    pub fn study(&self) -> &str {
        &self.study
    }

    /// Optimization direction used by `best_so_far`.
    #[must_use]
    pub const fn direction(&self) -> Direction {
        self.direction
    }

    /// Check that the store holds no records for this study yet.
    ///
    /// Trial ids restart at 0 in every new study, so tracking a fresh study
    /// under a name the store already knows would reject every append and
    /// leave the old rows answering for the new run.
    ///
    /// # Errors
    ///
    /// Returns `Error::Validation` if the study name is taken, or
    /// `Error::StorageError` if the store cannot be read.
    pub fn ensure_unused(&self) -> Result<()> {
        let existing = self.records()?.len();
        if existing > 0 {
            return Err(Error::Validation(format!(
                "study '{}' already has {existing} records in the tracker store\n\
                 Use a different study name or a new tracker file",
                self.study
            )));
        }
        Ok(())
    }

    /// Append a terminal trial record.
    ///
    /// # Errors
    ///
    /// Returns `Error::StorageError` if the store is unreachable or the trial
    /// was already recorded.
    pub fn record(&self, record: &ExperimentRecord) -> Result<()> {
        self.store.append(record)?;
        debug!(
            study = %self.study,
            trial = record.trial_id(),
            status = %record.status(),
            "trial recorded"
        );
        Ok(())
    }

    /// All records of this study in trial-id order.
    ///
    /// # Errors
    ///
    /// Returns `Error::StorageError` if the store cannot be read.
    pub fn records(&self) -> Result<Vec<ExperimentRecord>> {
        let mut records: Vec<ExperimentRecord> = self
            .store
            .load_all()?
            .into_iter()
            .filter(|r| r.study() == self.study)
            .collect();
        records.sort_by_key(ExperimentRecord::trial_id);
        Ok(records)
    }

    /// Completed record with the extremal final metric (ties: lowest trial id).
    ///
    /// # Errors
    ///
    /// Returns `Error::StorageError` if the store cannot be read.
    pub fn best_so_far(&self) -> Result<Option<ExperimentRecord>> {
        let mut best: Option<(f64, ExperimentRecord)> = None;
        for record in self.records()? {
            if record.status() != TrialStatus::Completed {
                continue;
            }
            let Some(metric) = record.final_metric() else {
                continue;
            };
            // records() is id-ordered, so strict improvement keeps the lowest id on ties
            match &best {
                Some((incumbent, _)) if !self.direction.is_better(metric, *incumbent) => {}
                _ => best = Some((metric, record)),
            }
        }
        Ok(best.map(|(_, record)| record))
    }

    /// Number of records with the given status.
    ///
    /// # Errors
    ///
    /// Returns `Error::StorageError` if the store cannot be read.
    pub fn count(&self, status: TrialStatus) -> Result<usize> {
        Ok(self
            .records()?
            .iter()
            .filter(|r| r.status() == status)
            .count())
    }

    /// Write a columnar summary of this study's trials to a Parquet file.
    ///
    /// Returns the number of rows written.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read or the file cannot be written.
    pub fn export_parquet(&self, path: &Path) -> Result<usize> {
        let records = self.records()?;
        export::write_parquet(&records, path)?;
        Ok(records.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::experiment::MemoryTrackerStore;
    use crate::search::{HyperparameterSet, SearchSpace, TrialId};

    fn params() -> HyperparameterSet {
        HyperparameterSet::new(&SearchSpace::default(), 1e-3, 0.2, 64, 16, 5).unwrap()
    }

    fn completed(study: &str, id: TrialId, metric: f64) -> ExperimentRecord {
        ExperimentRecord::builder(study, id, params(), TrialStatus::Completed)
            .metric(metric)
            .final_metric(metric)
            .build()
    }

    fn tracker(direction: Direction) -> ExperimentTracker {
        ExperimentTracker::new("s", direction, Arc::new(MemoryTrackerStore::new()))
    }

    #[test]
    fn test_best_so_far_empty() {
        assert!(tracker(Direction::Maximize).best_so_far().unwrap().is_none());
    }

    #[test]
    fn test_best_so_far_ignores_non_completed() {
        let t = tracker(Direction::Maximize);
        t.record(&completed("s", 0, 0.4)).unwrap();
        t.record(
            &ExperimentRecord::builder("s", 1, params(), TrialStatus::Pruned)
                .metric(0.9)
                .build(),
        )
        .unwrap();
        assert_eq!(t.best_so_far().unwrap().unwrap().trial_id(), 0);
    }

    #[test]
    fn test_best_so_far_tie_lowest_id() {
        let t = tracker(Direction::Minimize);
        t.record(&completed("s", 3, 0.2)).unwrap();
        t.record(&completed("s", 1, 0.2)).unwrap();
        t.record(&completed("s", 2, 0.5)).unwrap();
        assert_eq!(t.best_so_far().unwrap().unwrap().trial_id(), 1);
    }

    #[test]
    fn test_record_is_append_only() {
        let t = tracker(Direction::Maximize);
        t.record(&completed("s", 0, 0.4)).unwrap();
        assert!(matches!(
            t.record(&completed("s", 0, 0.8)),
            Err(Error::StorageError(_))
        ));
        assert_eq!(t.count(TrialStatus::Completed).unwrap(), 1);
    }

    #[test]
    fn test_records_scoped_to_study() {
        let store = Arc::new(MemoryTrackerStore::new());
        let a = ExperimentTracker::new("a", Direction::Maximize, store.clone());
        let b = ExperimentTracker::new("b", Direction::Maximize, store);
        a.record(&completed("a", 0, 0.4)).unwrap();
        b.record(&completed("b", 0, 0.9)).unwrap();
        assert_eq!(a.records().unwrap().len(), 1);
        assert!((a.best_so_far().unwrap().unwrap().final_metric().unwrap() - 0.4).abs() < 1e-12);
    }

    #[test]
    fn test_ensure_unused_rejects_known_study() {
        let t = tracker(Direction::Maximize);
        assert!(t.ensure_unused().is_ok());
        t.record(&completed("s", 0, 0.4)).unwrap();
        assert!(matches!(t.ensure_unused(), Err(Error::Validation(_))));
    }
}
