//! End-to-end pipeline: image folder -> search -> finalize -> serve
//!
//! Uses the bundled `EdgeClassifier` on a tiny synthetic dataset written to
//! a temporary directory.

mod common;

use std::path::Path;
use std::sync::Arc;

use common::png_bytes;
use edge_tune::config::DataConfig;
use edge_tune::experiment::{ExperimentTracker, JsonlTrackerStore, TrackerStore};
use edge_tune::model::{list_labeled_images, Dataset, EdgeClassifierBuilder, Preprocessor};
use edge_tune::search::{
    Direction, ParameterDomain, PercentilePruner, RandomSampler, SearchController, SearchSpace,
    Study, TrialStatus,
};
use edge_tune::{Finalizer, InferenceService, TrialExecutor};

fn write_class(root: &Path, name: &str, rgb: [u8; 3], count: u8) {
    let dir = root.join(name);
    std::fs::create_dir_all(&dir).unwrap();
    for i in 0..count {
        let shade = [
            rgb[0].saturating_add(i),
            rgb[1].saturating_add(i),
            rgb[2].saturating_add(i),
        ];
        std::fs::write(dir.join(format!("{i:02}.png")), png_bytes(12, 12, shade)).unwrap();
    }
}

fn small_space() -> SearchSpace {
    SearchSpace {
        learning_rate: ParameterDomain::LogUniform {
            low: 1e-2,
            high: 1e-1,
        },
        dropout_rate: ParameterDomain::Uniform {
            low: 0.0,
            high: 0.1,
        },
        dense_neurons: ParameterDomain::IntUniform { low: 8, high: 16 },
        batch_size: ParameterDomain::Categorical {
            choices: vec![4.0],
        },
        epochs: ParameterDomain::IntUniform { low: 3, high: 5 },
    }
}

#[test]
fn test_folder_to_prediction() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("data");
    write_class(&root, "water", [10, 30, 200], 6);
    write_class(&root, "desert", [220, 190, 120], 6);
    std::fs::write(root.join("water").join("notes.txt"), "not an image").unwrap();
    std::fs::write(root.join("desert").join("broken.png"), b"truncated").unwrap();

    // Non-image files are not listed; the broken PNG is listed but skipped on load.
    assert_eq!(list_labeled_images(&root).unwrap().len(), 13);

    let dataset = Dataset::load(&DataConfig {
        root: root.clone(),
        image_size: 16,
        validation_fraction: 0.34,
        augment: false,
        ..DataConfig::default()
    })
    .unwrap();
    assert_eq!(dataset.labels().names(), ["desert", "water"]);
    assert_eq!(dataset.train().len() + dataset.validation().len(), 12);
    assert_eq!(dataset.validation().len(), 4);

    let log = dir.path().join("trials.jsonl");
    let store: Arc<dyn TrackerStore> = Arc::new(JsonlTrackerStore::open(&log).unwrap());
    let tracker = Arc::new(ExperimentTracker::new("pipeline", Direction::Maximize, store));
    let study = Study::new("pipeline", Direction::Maximize, small_space()).unwrap();
    let controller = SearchController::builder(study)
        .sampler(RandomSampler::with_seed(42))
        .pruner(PercentilePruner::median(2))
        .tracker(Arc::clone(&tracker))
        .build();

    let executor = TrialExecutor::new(EdgeClassifierBuilder::default()).with_seed(42);
    let summary = controller.optimize(&executor, &dataset, 4, 2).unwrap();
    assert_eq!(summary.trials, 4);
    assert!(summary.completed >= 1);
    assert_eq!(tracker.records().unwrap().len(), 4);
    assert_eq!(
        tracker.count(TrialStatus::Completed).unwrap(),
        summary.completed
    );

    let parquet = dir.path().join("trials.parquet");
    assert_eq!(tracker.export_parquet(&parquet).unwrap(), 4);

    let artifact_path = dir.path().join("best_model.json");
    let artifact = Finalizer::new(EdgeClassifierBuilder::default(), 42)
        .finalize(&controller.study(), &dataset, &artifact_path)
        .unwrap();
    assert_eq!(Some(artifact.trial_id()), summary.best_trial);
    assert!((0.0..=1.0).contains(&artifact.final_metric()));

    let service = InferenceService::load(
        &artifact_path,
        &EdgeClassifierBuilder::default(),
        Preprocessor::new(16).unwrap(),
    )
    .unwrap();
    let label = service.predict(&png_bytes(20, 20, [12, 32, 205])).unwrap();
    assert!(label == "water" || label == "desert");
}

#[test]
fn test_finalization_is_deterministic() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("data");
    write_class(&root, "cloudy", [200, 200, 200], 4);
    write_class(&root, "green_area", [30, 140, 40], 4);
    let dataset = Dataset::load(&DataConfig {
        root,
        image_size: 8,
        validation_fraction: 0.25,
        ..DataConfig::default()
    })
    .unwrap();

    let study = Study::new("det", Direction::Maximize, small_space()).unwrap();
    let controller = SearchController::builder(study)
        .sampler(RandomSampler::with_seed(1))
        .build();
    let executor = TrialExecutor::new(EdgeClassifierBuilder::default()).with_seed(1);
    controller.optimize(&executor, &dataset, 2, 1).unwrap();
    let study = controller.study();

    let finalizer = Finalizer::new(EdgeClassifierBuilder::default(), 99);
    let a = finalizer
        .finalize(&study, &dataset, &dir.path().join("a.json"))
        .unwrap();
    let b = finalizer
        .finalize(&study, &dataset, &dir.path().join("b.json"))
        .unwrap();
    assert_eq!(a.weights_sha256(), b.weights_sha256());
    assert_eq!(a.final_metric(), b.final_metric());
}
