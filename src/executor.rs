//! Trial Executor - drives one classifier through training
//!
//! Toyota Way: Jidoka (stop on defect)
//!
//! A trial that hits a numerical failure, a classifier error or its time
//! budget stops and is marked Failed. The failure is contained here: the
//! study and the other trials carry on.

use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::model::{Classifier, ClassifierBuilder, Dataset};
use crate::search::{PruneDecision, SearchController, TrialHandle, TrialStatus};
use crate::{Error, Result};

enum Outcome {
    Completed(f64),
    Pruned,
}

/// Runs trials proposed by a [`SearchController`].
#[derive(Debug, Clone)]
pub struct TrialExecutor<B> {
    builder: B,
    timeout: Option<Duration>,
    base_seed: u64,
}

impl<B: ClassifierBuilder> TrialExecutor<B> {
    /// Executor building models with `builder`, no timeout, seed 0.
    #[must_use]
    pub const fn new(builder: B) -> Self {
        Self {
            builder,
            timeout: None,
            base_seed: 0,
        }
    }

    /// Fail trials that run longer than `timeout` (checked per epoch).
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Base seed; trial `id` trains with `base_seed + id`.
    #[must_use]
    pub fn with_seed(mut self, base_seed: u64) -> Self {
        self.base_seed = base_seed;
        self
    }

    /// The classifier builder.
    #[must_use]
    pub const fn builder(&self) -> &B {
        &self.builder
    }

    /// Seed used for the trial with `id`.
    #[must_use]
    pub const fn seed_for(&self, id: u64) -> u64 {
        self.base_seed.wrapping_add(id)
    }

    /// Run `handle` to a terminal status.
    ///
    /// Training failures are absorbed: the trial is marked Failed and
    /// `Ok(TrialStatus::Failed)` is returned.
    ///
    /// # Errors
    ///
    /// Returns an error only if the controller rejects the start or terminal
    /// transition (e.g. the trial was already started).
    pub fn execute(
        &self,
        controller: &SearchController,
        handle: &TrialHandle,
        dataset: &Dataset,
    ) -> Result<TrialStatus> {
        controller.start_trial(handle.id)?;

        match self.train(controller, handle, dataset) {
            Ok(Outcome::Completed(metric)) => {
                controller.finish_trial(handle.id, TrialStatus::Completed, Some(metric))?;
                Ok(TrialStatus::Completed)
            }
            Ok(Outcome::Pruned) => Ok(TrialStatus::Pruned),
            Err(e) => {
                if e.is_trial_local() {
                    info!(trial = handle.id, error = %e, "trial stopped");
                } else {
                    warn!(trial = handle.id, error = %e, "trial errored");
                }
                controller.fail_trial(handle.id, e.to_string())?;
                Ok(TrialStatus::Failed)
            }
        }
    }

    fn train(
        &self,
        controller: &SearchController,
        handle: &TrialHandle,
        dataset: &Dataset,
    ) -> Result<Outcome> {
        let started = Instant::now();
        let seed = self.seed_for(handle.id);
        let mut model = self
            .builder
            .build(&handle.params, dataset.labels().len(), seed)?;

        let mut last = None;
        for epoch in 0..handle.params.epochs() as usize {
            let samples = dataset.training_samples(epoch, seed);
            let loss = model.train_epoch(&samples)?;
            if !loss.is_finite() {
                return Err(Error::TrialFailure(format!(
                    "non-finite training loss at epoch {epoch}"
                )));
            }
            let metric = model.evaluate(dataset.validation())?;
            if !metric.is_finite() {
                return Err(Error::TrialFailure(format!(
                    "non-finite validation metric at epoch {epoch}"
                )));
            }
            if let Some(limit) = self.timeout {
                if started.elapsed() >= limit {
                    return Err(Error::TrialFailure(format!(
                        "exceeded {limit:?} time budget at epoch {epoch}"
                    )));
                }
            }

            debug!(trial = handle.id, epoch, loss, metric, "epoch finished");
            if controller.report_epoch(handle.id, epoch, metric)? == PruneDecision::Prune {
                return Ok(Outcome::Pruned);
            }
            last = Some(metric);
        }

        last.map(Outcome::Completed)
            .ok_or_else(|| Error::TrialFailure("no epochs were run".to_string()))
    }
}
