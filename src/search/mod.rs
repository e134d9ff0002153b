//! Hyperparameter search
//!
//! Toyota Way: Heijunka (Level the workload)
//!
//! A study spends a fixed trial budget on a fixed-size worker pool. Trials
//! that fall behind their peers at the same epoch are pruned so the budget
//! goes to promising configurations.
//!
//! ## Lifecycle
//!
//! ```text
//! propose_trial ──> PENDING ──start_trial──> RUNNING ──┬─ report_epoch: PRUNE ──> PRUNED
//!                                                      ├─ finish_trial(Completed) ──> COMPLETED
//!                                                      └─ finish_trial(Failed) ──> FAILED
//! ```
//!
//! Terminal states are final; any other transition is `Error::InvalidState`.

mod controller;
mod pruner;
mod sampler;
mod space;
mod study;
mod trial;

pub use controller::{SearchController, SearchControllerBuilder, StudySummary};
pub use pruner::{NopPruner, PercentilePruner, PruneDecision, Pruner};
pub use sampler::{sample_hyperparameters, RandomSampler, Sampler};
pub use space::{HyperparameterSet, ParameterDomain, SearchSpace};
pub use study::{Direction, Study};
pub use trial::{Trial, TrialHandle, TrialId, TrialStatus};
