//! Finalized model artifact
//!
//! ## File format
//!
//! A single JSON document:
//!
//! ```text
//! {
//!   "schema_version": 1,
//!   "trial_id": 17,
//!   "created_at": "2026-10-19T08:00:00Z",
//!   "hyperparameters": { "learning_rate": ..., "dropout_rate": ..., ... },
//!   "label_mapping": ["cloudy", "desert", "green_area", "water"],
//!   "final_metric": 0.93,
//!   "weights_sha256": "<hex>",
//!   "weights": "<hex>"
//! }
//! ```
//!
//! Readers check `schema_version` before any other field, then verify the
//! weights against `weights_sha256`. Writers go through a temporary file and
//! a rename, so a reader never observes a partially written artifact.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::info;

use crate::experiment::ArtifactRecord;
use crate::model::LabelMapping;
use crate::search::{HyperparameterSet, TrialId};
use crate::{Error, Result};

/// Artifact schema version written and accepted by this build.
pub const SCHEMA_VERSION: u32 = 1;

/// Serialized classifier plus everything needed to serve it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    schema_version: u32,
    trial_id: TrialId,
    created_at: DateTime<Utc>,
    hyperparameters: HyperparameterSet,
    label_mapping: LabelMapping,
    final_metric: f64,
    weights_sha256: String,
    #[serde(with = "hex")]
    weights: Vec<u8>,
}

fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

impl Artifact {
    /// Package trained weights with their metadata.
    #[must_use]
    pub fn new(
        trial_id: TrialId,
        hyperparameters: HyperparameterSet,
        label_mapping: LabelMapping,
        final_metric: f64,
        weights: Vec<u8>,
    ) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            trial_id,
            created_at: Utc::now(),
            hyperparameters,
            label_mapping,
            final_metric,
            weights_sha256: sha256_hex(&weights),
            weights,
        }
    }

    /// Schema version of this artifact.
    #[must_use]
    pub const fn schema_version(&self) -> u32 {
        self.schema_version
    }

    /// Trial whose hyperparameters produced the weights.
    #[must_use]
    pub const fn trial_id(&self) -> TrialId {
        self.trial_id
    }

    /// Creation timestamp.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Hyperparameters used for the final training run.
    #[must_use]
    pub const fn hyperparameters(&self) -> &HyperparameterSet {
        &self.hyperparameters
    }

    /// Frozen class mapping.
    #[must_use]
    pub const fn label_mapping(&self) -> &LabelMapping {
        &self.label_mapping
    }

    /// Validation metric of the final model.
    #[must_use]
    pub const fn final_metric(&self) -> f64 {
        self.final_metric
    }

    /// Hex SHA-256 of the weights.
    #[must_use]
    pub fn weights_sha256(&self) -> &str {
        &self.weights_sha256
    }

    /// Serialized classifier weights.
    #[must_use]
    pub fn weights(&self) -> &[u8] {
        &self.weights
    }

    /// Write the artifact atomically to `path`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if the file cannot be written or renamed into place.
    pub fn save(&self, path: &Path) -> Result<ArtifactRecord> {
        let bytes = serde_json::to_vec_pretty(self)?;
        let tmp = temp_path(path);

        let write = || -> Result<()> {
            let mut file = File::create(&tmp)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
            fs::rename(&tmp, path)?;
            Ok(())
        };
        if let Err(e) = write() {
            let _ = fs::remove_file(&tmp);
            return Err(e);
        }

        let record = ArtifactRecord::for_bytes(self.trial_id, path, &bytes);
        info!(
            path = %path.display(),
            trial = self.trial_id,
            hash = record.cas_hash(),
            bytes = record.size_bytes(),
            "artifact written"
        );
        Ok(record)
    }

    /// Read and verify an artifact.
    ///
    /// # Errors
    ///
    /// - `Error::Io` / `Error::Json` if the file is missing or malformed
    /// - `Error::SchemaVersion` if it was written by an unsupported schema
    /// - `Error::StorageError` if the weights do not match their checksum
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = fs::read(path)?;
        Self::from_json_bytes(&bytes)
    }

    /// Parse and verify an artifact document.
    ///
    /// # Errors
    ///
    /// As for [`Artifact::load`], minus I/O.
    pub fn from_json_bytes(bytes: &[u8]) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_slice(bytes)?;
        let found = value
            .get("schema_version")
            .and_then(serde_json::Value::as_u64)
            .ok_or_else(|| Error::StorageError("artifact has no schema_version".to_string()))?;
        if found != u64::from(SCHEMA_VERSION) {
            return Err(Error::SchemaVersion {
                found: u32::try_from(found).unwrap_or(u32::MAX),
                supported: SCHEMA_VERSION,
            });
        }

        let artifact: Self = serde_json::from_value(value)?;
        let actual = sha256_hex(&artifact.weights);
        if actual != artifact.weights_sha256 {
            return Err(Error::StorageError(format!(
                "artifact weights checksum mismatch (expected {}, found {actual})",
                artifact.weights_sha256
            )));
        }
        Ok(artifact)
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map_or_else(|| "artifact".into(), |n| n.to_string_lossy().into_owned());
    path.with_file_name(format!(".{name}.tmp"))
}
