//! Experiment Tracker Tests
//!
//! Record schema, store backends, best-so-far queries and Parquet export.

use std::fs::File;
use std::sync::Arc;

use edge_tune::experiment::{
    ExperimentRecord, ExperimentTracker, JsonlTrackerStore, MemoryTrackerStore, TrackerStore,
};
use edge_tune::search::{
    Direction, HyperparameterSet, NopPruner, RandomSampler, SearchController, SearchSpace, Study,
    TrialStatus,
};
use edge_tune::{Error, Result};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use rayon::prelude::*;

fn params(learning_rate: f64) -> HyperparameterSet {
    HyperparameterSet::new(&SearchSpace::default(), learning_rate, 0.2, 128, 32, 10).unwrap()
}

fn completed(study: &str, id: u64, metric: f64) -> ExperimentRecord {
    ExperimentRecord::builder(study, id, params(1e-3), TrialStatus::Completed)
        .metric(metric / 2.0)
        .metric(metric)
        .final_metric(metric)
        .build()
}

fn tracker(direction: Direction) -> ExperimentTracker {
    ExperimentTracker::new("study", direction, Arc::new(MemoryTrackerStore::new()))
}

// =============================================================================
// Record schema
// =============================================================================

#[test]
fn test_record_json_field_names() {
    let record = ExperimentRecord::builder("study", 4, params(1e-2), TrialStatus::Failed)
        .metric(0.3)
        .failure_reason("loss diverged")
        .build();

    let json = serde_json::to_value(&record).unwrap();
    assert_eq!(json["study"], "study");
    assert_eq!(json["trial_id"], 4);
    assert_eq!(json["status"], "FAILED");
    assert_eq!(json["failure_reason"], "loss diverged");
    assert_eq!(json["params"]["dense_neurons"], 128);
    assert_eq!(json["metrics"][0]["epoch"], 0);
    assert!(json["final_metric"].is_null());

    let back: ExperimentRecord = serde_json::from_value(json).unwrap();
    assert_eq!(back, record);
}

// =============================================================================
// Best so far
// =============================================================================

#[test]
fn test_best_so_far_minimize() {
    let tracker = tracker(Direction::Minimize);
    for (id, metric) in [(0, 0.4), (1, 0.2), (2, 0.3), (3, 0.2)] {
        tracker.record(&completed("study", id, metric)).unwrap();
    }
    let best = tracker.best_so_far().unwrap().unwrap();
    assert_eq!(best.trial_id(), 1);
    assert_eq!(best.final_metric(), Some(0.2));
}

#[test]
fn test_best_so_far_skips_pruned_with_higher_values() {
    let tracker = tracker(Direction::Maximize);
    tracker.record(&completed("study", 0, 0.5)).unwrap();
    tracker
        .record(
            &ExperimentRecord::builder("study", 1, params(1e-3), TrialStatus::Pruned)
                .metric(0.9)
                .build(),
        )
        .unwrap();
    assert_eq!(tracker.best_so_far().unwrap().unwrap().trial_id(), 0);
    assert_eq!(tracker.count(TrialStatus::Pruned).unwrap(), 1);
}

// =============================================================================
// Stores
// =============================================================================

#[test]
fn test_memory_store_concurrent_appends() {
    let store = Arc::new(MemoryTrackerStore::new());
    (0..64u64).into_par_iter().for_each(|id| {
        store.append(&completed("study", id, 0.5)).unwrap();
    });
    assert_eq!(store.len(), 64);

    let tracker = ExperimentTracker::new("study", Direction::Maximize, store);
    let ids: Vec<u64> = tracker.records().unwrap().iter().map(ExperimentRecord::trial_id).collect();
    assert_eq!(ids, (0..64).collect::<Vec<_>>());
}

#[test]
fn test_jsonl_store_shared_between_studies() {
    let dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn TrackerStore> =
        Arc::new(JsonlTrackerStore::open(dir.path().join("log.jsonl")).unwrap());
    let a = ExperimentTracker::new("a", Direction::Maximize, Arc::clone(&store));
    let b = ExperimentTracker::new("b", Direction::Maximize, Arc::clone(&store));

    a.record(&completed("a", 0, 0.1)).unwrap();
    b.record(&completed("b", 0, 0.9)).unwrap();
    assert_eq!(a.records().unwrap().len(), 1);
    assert_eq!(a.best_so_far().unwrap().unwrap().final_metric(), Some(0.1));
    assert_eq!(store.load_all().unwrap().len(), 2);
}

/// Run a two-trial study named `name` whose trials finish with `metric`.
fn run_study(store: Arc<dyn TrackerStore>, name: &str, metric: f64) -> Arc<ExperimentTracker> {
    let tracker = Arc::new(ExperimentTracker::new(name, Direction::Maximize, store));
    tracker.ensure_unused().unwrap();
    let study = Study::new(name, Direction::Maximize, SearchSpace::default()).unwrap();
    let controller = SearchController::builder(study)
        .sampler(RandomSampler::with_seed(3))
        .pruner(NopPruner)
        .tracker(Arc::clone(&tracker))
        .build();
    for _ in 0..2 {
        let handle = controller.propose_trial().unwrap();
        controller.start_trial(handle.id).unwrap();
        controller.report_epoch(handle.id, 0, metric).unwrap();
        controller
            .finish_trial(handle.id, TrialStatus::Completed, Some(metric))
            .unwrap();
    }
    tracker
}

#[test]
fn test_second_run_on_same_log_needs_new_study_name() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("trials.jsonl");
    let open = || -> Arc<dyn TrackerStore> { Arc::new(JsonlTrackerStore::open(&path).unwrap()) };

    run_study(open(), "edge-study", 0.4);

    // Reopened log: the old name is refused before any trial runs.
    let stale = ExperimentTracker::new("edge-study", Direction::Maximize, open());
    assert!(matches!(stale.ensure_unused(), Err(Error::Validation(_))));

    let second = run_study(open(), "edge-study-2", 0.7);
    let records = second.records().unwrap();
    assert_eq!(records.len(), 2);
    assert!(records.iter().all(|r| r.final_metric() == Some(0.7)));
    assert_eq!(second.best_so_far().unwrap().unwrap().final_metric(), Some(0.7));
    assert_eq!(stale.records().unwrap().len(), 2);
    assert_eq!(open().load_all().unwrap().len(), 4);
}

/// Store that rejects every write.
struct UnreachableStore;

impl TrackerStore for UnreachableStore {
    fn append(&self, _record: &ExperimentRecord) -> Result<()> {
        Err(Error::StorageError("disk unplugged".to_string()))
    }

    fn load_all(&self) -> Result<Vec<ExperimentRecord>> {
        Err(Error::StorageError("disk unplugged".to_string()))
    }
}

#[test]
fn test_tracker_failure_does_not_block_search() {
    let tracker = Arc::new(ExperimentTracker::new(
        "degraded",
        Direction::Maximize,
        Arc::new(UnreachableStore),
    ));
    let study = Study::new("degraded", Direction::Maximize, SearchSpace::default()).unwrap();
    let controller = SearchController::builder(study)
        .sampler(RandomSampler::with_seed(4))
        .pruner(NopPruner)
        .tracker(tracker)
        .build();

    let handle = controller.propose_trial().unwrap();
    controller.start_trial(handle.id).unwrap();
    controller.report_epoch(handle.id, 0, 0.7).unwrap();
    controller
        .finish_trial(handle.id, TrialStatus::Completed, Some(0.7))
        .unwrap();

    assert_eq!(controller.study().best_trial().map(|t| t.id()), Some(handle.id));
    assert!(controller.tracker().unwrap().records().is_err());
}

// =============================================================================
// Parquet export
// =============================================================================

#[test]
fn test_export_parquet_reads_back() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("trials.parquet");
    let tracker = tracker(Direction::Maximize);
    tracker.record(&completed("study", 0, 0.6)).unwrap();
    tracker.record(&completed("study", 1, 0.8)).unwrap();
    tracker
        .record(
            &ExperimentRecord::builder("study", 2, params(5e-2), TrialStatus::Failed)
                .failure_reason("nan")
                .build(),
        )
        .unwrap();

    assert_eq!(tracker.export_parquet(&path).unwrap(), 3);

    let reader = ParquetRecordBatchReaderBuilder::try_new(File::open(&path).unwrap())
        .unwrap()
        .build()
        .unwrap();
    let rows: usize = reader.map(|batch| batch.unwrap().num_rows()).sum();
    assert_eq!(rows, 3);
}
