//! Finalizer - retrain the best configuration and persist it

use std::path::Path;

use tracing::info;

use crate::artifact::Artifact;
use crate::model::{Classifier, ClassifierBuilder, Dataset};
use crate::search::Study;
use crate::{Error, Result};

/// Turns a finished study into a served artifact.
#[derive(Debug, Clone)]
pub struct Finalizer<B> {
    builder: B,
    seed: u64,
}

impl<B: ClassifierBuilder> Finalizer<B> {
    /// Finalizer training with `builder` from `seed`.
    #[must_use]
    pub const fn new(builder: B, seed: u64) -> Self {
        Self { builder, seed }
    }

    /// Retrain the study's best hyperparameters for their full epoch budget
    /// (no pruning) and write the resulting artifact to `path`.
    ///
    /// Output depends only on the seed, the best trial and the dataset.
    ///
    /// # Errors
    ///
    /// - `Error::NoCompletedTrials` if no trial completed (nothing is written)
    /// - `Error::TrialFailure` if the final training run diverges or its
    ///   validation metric is not finite
    /// - `Error::Io` if the artifact cannot be written
    pub fn finalize(&self, study: &Study, dataset: &Dataset, path: &Path) -> Result<Artifact> {
        let best = study.best_trial().ok_or(Error::NoCompletedTrials)?;
        let params = best.params();
        info!(
            trial = best.id(),
            search_metric = ?best.final_metric(),
            params = %params.to_json(),
            "finalizing best trial"
        );

        let mut model = self
            .builder
            .build(params, dataset.labels().len(), self.seed)?;
        for epoch in 0..params.epochs() as usize {
            let loss = model.train_epoch(&dataset.training_samples(epoch, self.seed))?;
            if !loss.is_finite() {
                return Err(Error::TrialFailure(format!(
                    "non-finite loss at epoch {epoch} during finalization"
                )));
            }
        }
        let metric = model.evaluate(dataset.validation())?;
        if !metric.is_finite() {
            return Err(Error::TrialFailure(format!(
                "non-finite validation metric {metric} after finalization"
            )));
        }

        let artifact = Artifact::new(
            best.id(),
            params.clone(),
            dataset.labels().clone(),
            metric,
            model.serialize()?,
        );
        artifact.save(path)?.verify()?;
        info!(path = %path.display(), metric, "finalization complete");
        Ok(artifact)
    }
}
