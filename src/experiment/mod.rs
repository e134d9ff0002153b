//! Experiment Tracking
//!
//! Durable, append-only record of every trial a study runs, plus the
//! artifact summary written by the finalizer.
//!
//! ## Schema Overview
//!
//! ```text
//! ExperimentRecord (1 per trial, written once at a terminal status)
//!     │
//!     └──< MetricRecord (N) [one per epoch, time-series]
//!
//! ArtifactRecord [CAS hash of the finalized artifact]
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use std::sync::Arc;
//! use edge_tune::experiment::{ExperimentRecord, ExperimentTracker, MemoryTrackerStore};
//! use edge_tune::search::{Direction, HyperparameterSet, SearchSpace, TrialStatus};
//!
//! let tracker = ExperimentTracker::new(
//!     "edge-study",
//!     Direction::Maximize,
//!     Arc::new(MemoryTrackerStore::new()),
//! );
//!
//! let params = HyperparameterSet::new(&SearchSpace::default(), 1e-3, 0.2, 128, 32, 10)?;
//! let record = ExperimentRecord::builder("edge-study", 0, params, TrialStatus::Completed)
//!     .metric(0.61)
//!     .metric(0.74)
//!     .final_metric(0.74)
//!     .build();
//! tracker.record(&record)?;
//!
//! assert_eq!(tracker.best_so_far()?.map(|r| r.trial_id()), Some(0));
//! # Ok::<(), edge_tune::Error>(())
//! ```

mod artifact_record;
mod experiment_record;
pub mod export;
mod memory;
mod metric_record;
mod store;
mod tracker;

pub use artifact_record::ArtifactRecord;
pub use experiment_record::{ExperimentRecord, ExperimentRecordBuilder};
pub use memory::MemoryTrackerStore;
pub use metric_record::MetricRecord;
pub use store::{JsonlTrackerStore, TrackerStore};
pub use tracker::ExperimentTracker;
