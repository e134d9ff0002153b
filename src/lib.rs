//! # edge-tune: Budgeted Hyperparameter Search for Edge Image Classifiers
//!
//! **Version**: 0.1.0
//!
//! edge-tune trains a small image classifier under a fixed trial budget,
//! stops unpromising trials early, persists the best configuration as a
//! versioned artifact and serves predictions from it.
//!
//! ```text
//! DatasetSource -> Preprocessor -> TrialExecutor <-> SearchController <-> ExperimentTracker
//!                                                          |
//!                                                      Finalizer -> Artifact -> InferenceService
//! ```
//!
//! ## Design Principles (Toyota Way Aligned)
//!
//! - **Muda elimination**: Percentile pruning stops trials that trail their peers
//! - **Jidoka**: A diverging trial fails alone; the study carries on
//! - **Poka-Yoke safety**: Hyperparameters are bound-checked at construction;
//!   artifacts are versioned and checksummed
//! - **Heijunka**: Trials share a fixed-size worker pool
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use std::path::Path;
//! use edge_tune::config::DataConfig;
//! use edge_tune::model::{Dataset, EdgeClassifierBuilder};
//! use edge_tune::search::{Direction, RandomSampler, SearchController, SearchSpace, Study};
//! use edge_tune::{Finalizer, TrialExecutor};
//!
//! let dataset = Dataset::load(&DataConfig::default())?;
//! let study = Study::new("edge-study", Direction::Maximize, SearchSpace::default())?;
//! let controller = SearchController::builder(study)
//!     .sampler(RandomSampler::with_seed(42))
//!     .build();
//!
//! let executor = TrialExecutor::new(EdgeClassifierBuilder::default()).with_seed(42);
//! let summary = controller.optimize(&executor, &dataset, 100, 4)?;
//! println!("best trial: {:?}", summary.best_trial);
//!
//! Finalizer::new(EdgeClassifierBuilder::default(), 42)
//!     .finalize(&controller.study(), &dataset, Path::new("best_model.json"))?;
//! # Ok::<(), edge_tune::Error>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod artifact;
pub mod config;
pub mod error;
pub mod executor;
pub mod experiment;
pub mod finalizer;
pub mod logging;
pub mod model;
pub mod search;
pub mod serve;

pub use artifact::{Artifact, SCHEMA_VERSION};
pub use error::{Error, Result};
pub use executor::TrialExecutor;
pub use finalizer::Finalizer;
pub use serve::InferenceService;
