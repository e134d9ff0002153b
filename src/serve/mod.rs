//! Inference Service
//!
//! Loads exactly one artifact at startup and answers predictions from it.
//! The service is immutable after construction; share it with `Arc` and call
//! [`InferenceService::predict`] from as many threads as needed.

#[cfg(feature = "server")]
pub mod http;

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use crate::artifact::Artifact;
use crate::model::{argmax, Classifier, ClassifierBuilder, LabelMapping, Preprocessor};
use crate::search::{HyperparameterSet, TrialId};
use crate::{Error, Result};

/// Response body of the health check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Health {
    /// Always `"ok"` for a constructed service
    pub status: &'static str,
}

/// Summary of the loaded artifact.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArtifactSummary {
    /// Artifact schema version
    pub schema_version: u32,
    /// Source trial
    pub trial_id: TrialId,
    /// Validation metric of the final model
    pub final_metric: f64,
    /// Hyperparameters of the final model
    pub hyperparameters: HyperparameterSet,
    /// Class names in output order
    pub labels: Vec<String>,
    /// When the artifact was written
    pub created_at: DateTime<Utc>,
}

/// Stateless predictor over one loaded artifact.
#[derive(Debug)]
pub struct InferenceService<M> {
    model: M,
    labels: LabelMapping,
    preprocessor: Preprocessor,
    summary: ArtifactSummary,
}

impl<M: Classifier> InferenceService<M> {
    /// Load the artifact at `path` and restore its model with `builder`.
    ///
    /// # Errors
    ///
    /// Fails fast on a missing or malformed file, an unsupported schema
    /// version, a checksum mismatch or undecodable weights.
    pub fn load<B>(path: &Path, builder: &B, preprocessor: Preprocessor) -> Result<Self>
    where
        B: ClassifierBuilder<Model = M>,
    {
        let artifact = Artifact::load(path)?;
        let service = Self::from_artifact(&artifact, builder, preprocessor)?;
        info!(
            path = %path.display(),
            trial = artifact.trial_id(),
            labels = ?artifact.label_mapping().names(),
            "artifact loaded"
        );
        Ok(service)
    }

    /// Build a service from an in-memory artifact.
    ///
    /// # Errors
    ///
    /// Returns an error if the weights cannot be deserialized.
    pub fn from_artifact<B>(artifact: &Artifact, builder: &B, preprocessor: Preprocessor) -> Result<Self>
    where
        B: ClassifierBuilder<Model = M>,
    {
        let model = builder.deserialize(artifact.weights())?;
        Ok(Self::new(model, artifact, preprocessor))
    }

    /// Wrap an already restored model.
    #[must_use]
    pub fn new(model: M, artifact: &Artifact, preprocessor: Preprocessor) -> Self {
        let summary = ArtifactSummary {
            schema_version: artifact.schema_version(),
            trial_id: artifact.trial_id(),
            final_metric: artifact.final_metric(),
            hyperparameters: artifact.hyperparameters().clone(),
            labels: artifact.label_mapping().names().to_vec(),
            created_at: artifact.created_at(),
        };
        Self {
            model,
            labels: artifact.label_mapping().clone(),
            preprocessor,
            summary,
        }
    }

    /// Classify raw image bytes into a label name.
    ///
    /// # Errors
    ///
    /// - `Error::InvalidImage` if the bytes are not a supported image; the
    ///   model is not invoked in that case
    /// - `Error::Other` if the model output does not match the label mapping
    pub fn predict(&self, bytes: &[u8]) -> Result<String> {
        let tensor = self.preprocessor.load_and_normalize_bytes(bytes)?;
        let scores = self.model.forward(&tensor)?;
        if scores.len() != self.labels.len() {
            return Err(Error::Other(format!(
                "model produced {} scores for {} labels",
                scores.len(),
                self.labels.len()
            )));
        }
        argmax(&scores)
            .and_then(|i| self.labels.name_of(i))
            .map(str::to_string)
            .ok_or_else(|| Error::Other("model produced no finite score".to_string()))
    }

    /// Liveness.
    #[must_use]
    pub const fn health(&self) -> Health {
        Health { status: "ok" }
    }

    /// Summary of the loaded artifact.
    #[must_use]
    pub const fn metadata(&self) -> &ArtifactSummary {
        &self.summary
    }

    /// The frozen label mapping.
    #[must_use]
    pub const fn labels(&self) -> &LabelMapping {
        &self.labels
    }
}
