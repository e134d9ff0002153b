//! Search Controller - owner of the study
//!
//! The study is the only shared mutable state of a search. It lives behind a
//! single mutex, so proposals, epoch reports and terminal transitions are
//! linearizable: a pruning decision reads its peers under the same lock that
//! appended the observation.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::pruner::{PercentilePruner, PruneDecision, Pruner};
use super::sampler::{RandomSampler, Sampler};
use super::study::Study;
use super::trial::{Trial, TrialHandle, TrialId, TrialStatus};
use crate::executor::TrialExecutor;
use crate::experiment::{ExperimentRecord, ExperimentTracker};
use crate::model::{ClassifierBuilder, Dataset};
use crate::{Error, Result};

struct Inner {
    study: Study,
    sampler: Box<dyn Sampler>,
}

/// Proposes trials, applies the pruning policy and tracks the best trial.
pub struct SearchController {
    inner: Mutex<Inner>,
    pruner: Box<dyn Pruner>,
    tracker: Option<Arc<ExperimentTracker>>,
}

impl std::fmt::Debug for SearchController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchController")
            .field("tracker", &self.tracker)
            .finish_non_exhaustive()
    }
}

impl SearchController {
    /// Start building a controller around `study`.
    #[must_use]
    pub fn builder(study: Study) -> SearchControllerBuilder {
        SearchControllerBuilder::new(study)
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // Transitions validate before assigning, so a poisoned study is still consistent.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sample a hyperparameter set and register a new Pending trial.
    ///
    /// # Errors
    ///
    /// Returns `Error::Validation` if the sampler produces an invalid set.
    pub fn propose_trial(&self) -> Result<TrialHandle> {
        let mut inner = self.lock();
        let Inner { study, sampler } = &mut *inner;
        let params = sampler.sample(study.space())?;
        let handle = study.create_trial(params);
        debug!(trial = handle.id, params = %handle.params.to_json(), "trial proposed");
        Ok(handle)
    }

    /// Pending -> Running.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidState` for an unknown or already started trial.
    pub fn start_trial(&self, id: TrialId) -> Result<()> {
        self.lock().study.trial_mut(id)?.start()?;
        info!(trial = id, "trial started");
        Ok(())
    }

    /// Record the metric of `epoch` (0-based, contiguous) and decide whether
    /// the trial continues.
    ///
    /// On `Prune` the trial is already marked Pruned when this returns.
    ///
    /// # Errors
    ///
    /// Returns `Error::Validation` for a non-finite metric and
    /// `Error::InvalidState` for an out-of-order epoch or a trial that is not
    /// running.
    pub fn report_epoch(&self, id: TrialId, epoch: usize, metric: f64) -> Result<PruneDecision> {
        let pruned = {
            let mut inner = self.lock();
            let study = &mut inner.study;
            study.trial_mut(id)?.report(epoch, metric)?;

            let trial = study
                .trial(id)
                .ok_or_else(|| Error::InvalidState(format!("unknown trial {id}")))?;
            match self.pruner.decide(study, trial, epoch) {
                PruneDecision::Continue => None,
                PruneDecision::Prune => {
                    study.trial_mut(id)?.prune()?;
                    Some(snapshot(study, id)?)
                }
            }
        };

        debug!(trial = id, epoch, metric, "epoch reported");
        match pruned {
            None => Ok(PruneDecision::Continue),
            Some(record) => {
                info!(trial = id, epoch, metric, "trial pruned");
                self.forward(&record);
                Ok(PruneDecision::Prune)
            }
        }
    }

    /// Move a running trial to Completed (with `final_metric`) or Failed.
    ///
    /// # Errors
    ///
    /// Returns `Error::Validation` if a completion lacks a finite metric and
    /// `Error::InvalidState` for any other status or an illegal transition.
    pub fn finish_trial(
        &self,
        id: TrialId,
        status: TrialStatus,
        final_metric: Option<f64>,
    ) -> Result<()> {
        match status {
            TrialStatus::Completed => {
                let metric = final_metric.ok_or_else(|| {
                    Error::Validation(format!("trial {id} completed without a final metric"))
                })?;
                self.complete(id, metric)
            }
            TrialStatus::Failed => self.fail_trial(id, "failed"),
            other => Err(Error::InvalidState(format!(
                "finish_trial cannot set trial {id} to {other}"
            ))),
        }
    }

    fn complete(&self, id: TrialId, metric: f64) -> Result<()> {
        let record = {
            let mut inner = self.lock();
            let study = &mut inner.study;
            study.trial_mut(id)?.complete(metric)?;
            study.note_completed(id);
            snapshot(study, id)?
        };
        info!(trial = id, metric, "trial completed");
        self.forward(&record);
        Ok(())
    }

    /// Mark a trial Failed with a reason.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidState` if the trial is unknown or already terminal.
    pub fn fail_trial(&self, id: TrialId, reason: impl Into<String>) -> Result<()> {
        let reason = reason.into();
        let record = {
            let mut inner = self.lock();
            let study = &mut inner.study;
            study.trial_mut(id)?.fail(reason.clone())?;
            snapshot(study, id)?
        };
        warn!(trial = id, reason = %reason, "trial failed");
        self.forward(&record);
        Ok(())
    }

    /// Tracker failures degrade the log, never the study.
    fn forward(&self, record: &ExperimentRecord) {
        if let Some(tracker) = &self.tracker {
            if let Err(e) = tracker.record(record) {
                warn!(trial = record.trial_id(), error = %e, "failed to record trial");
            }
        }
    }

    /// Consistent copy of the study.
    #[must_use]
    pub fn study(&self) -> Study {
        self.lock().study.clone()
    }

    /// The attached tracker, if any.
    #[must_use]
    pub fn tracker(&self) -> Option<&Arc<ExperimentTracker>> {
        self.tracker.as_ref()
    }

    /// Run `n_trials` trials on a pool of `workers` threads.
    ///
    /// Failed and pruned trials never abort the study.
    ///
    /// # Errors
    ///
    /// Returns `Error::Validation` if `n_trials` or `workers` is zero, and
    /// `Error::Other` if the worker pool cannot be created.
    pub fn optimize<B: ClassifierBuilder>(
        &self,
        executor: &TrialExecutor<B>,
        dataset: &Dataset,
        n_trials: usize,
        workers: usize,
    ) -> Result<StudySummary> {
        if n_trials == 0 {
            return Err(Error::Validation("trial budget must be positive".to_string()));
        }
        if workers == 0 {
            return Err(Error::Validation("worker count must be positive".to_string()));
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("trial-worker-{i}"))
            .build()
            .map_err(|e| Error::Other(format!("Failed to build worker pool: {e}")))?;

        info!(n_trials, workers, "starting search");
        pool.install(|| {
            (0..n_trials).into_par_iter().for_each(|_| {
                let handle = match self.propose_trial() {
                    Ok(handle) => handle,
                    Err(e) => {
                        warn!(error = %e, "failed to propose trial");
                        return;
                    }
                };
                if let Err(e) = executor.execute(self, &handle, dataset) {
                    warn!(trial = handle.id, error = %e, "trial bookkeeping failed");
                }
            });
        });

        let summary = StudySummary::from_study(&self.lock().study);
        info!(
            completed = summary.completed,
            pruned = summary.pruned,
            failed = summary.failed,
            best_trial = ?summary.best_trial,
            best_metric = ?summary.best_metric,
            "search finished"
        );
        Ok(summary)
    }
}

fn snapshot(study: &Study, id: TrialId) -> Result<ExperimentRecord> {
    study
        .trial(id)
        .map(|trial| ExperimentRecord::from_trial(study.name(), trial))
        .ok_or_else(|| Error::InvalidState(format!("unknown trial {id}")))
}

/// Builder for `SearchController`.
///
/// Defaults: seeded-from-entropy `RandomSampler`, median `PercentilePruner`
/// with a two-epoch warm-up, no tracker.
pub struct SearchControllerBuilder {
    study: Study,
    sampler: Box<dyn Sampler>,
    pruner: Box<dyn Pruner>,
    tracker: Option<Arc<ExperimentTracker>>,
}

impl SearchControllerBuilder {
    /// Create a builder with default policies.
    #[must_use]
    pub fn new(study: Study) -> Self {
        Self {
            study,
            sampler: Box::new(RandomSampler::from_entropy()),
            pruner: Box::new(PercentilePruner::default()),
            tracker: None,
        }
    }

    /// Use `sampler` for proposals.
    #[must_use]
    pub fn sampler(mut self, sampler: impl Sampler + 'static) -> Self {
        self.sampler = Box::new(sampler);
        self
    }

    /// Use `pruner` for epoch decisions.
    #[must_use]
    pub fn pruner(mut self, pruner: impl Pruner + 'static) -> Self {
        self.pruner = Box::new(pruner);
        self
    }

    /// Forward terminal trials to `tracker`.
    #[must_use]
    pub fn tracker(mut self, tracker: Arc<ExperimentTracker>) -> Self {
        self.tracker = Some(tracker);
        self
    }

    /// Build the controller.
    #[must_use]
    pub fn build(self) -> SearchController {
        SearchController {
            inner: Mutex::new(Inner {
                study: self.study,
                sampler: self.sampler,
            }),
            pruner: self.pruner,
            tracker: self.tracker,
        }
    }
}

/// Outcome counts of a study.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudySummary {
    /// Study name
    pub study: String,
    /// Trials created
    pub trials: usize,
    /// Trials that completed
    pub completed: usize,
    /// Trials stopped by the pruner
    pub pruned: usize,
    /// Trials that failed
    pub failed: usize,
    /// Best completed trial
    pub best_trial: Option<TrialId>,
    /// Final metric of the best trial
    pub best_metric: Option<f64>,
}

impl StudySummary {
    /// Summarize `study`.
    #[must_use]
    pub fn from_study(study: &Study) -> Self {
        let best = study.best_trial();
        Self {
            study: study.name().to_string(),
            trials: study.trials().len(),
            completed: study.count(TrialStatus::Completed),
            pruned: study.count(TrialStatus::Pruned),
            failed: study.count(TrialStatus::Failed),
            best_trial: best.map(Trial::id),
            best_metric: best.and_then(Trial::final_metric),
        }
    }
}
