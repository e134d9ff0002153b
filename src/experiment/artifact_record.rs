//! Artifact Record - content-addressed summary of a persisted artifact
//!
//! The `cas_hash` is `algorithm:hex_digest` over the exact file bytes, e.g.
//! `sha256:e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855`.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::search::TrialId;
use crate::{Error, Result};

const CAS_PREFIX: &str = "sha256:";

fn cas_hash_of(bytes: &[u8]) -> String {
    format!("{CAS_PREFIX}{}", hex::encode(Sha256::digest(bytes)))
}

/// Where a finalized artifact landed and what it hashed to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArtifactRecord {
    trial_id: TrialId,
    path: PathBuf,
    cas_hash: String,
    size_bytes: u64,
    created_at: DateTime<Utc>,
}

impl ArtifactRecord {
    /// Describe the file at `path` whose content is `bytes`.
    #[must_use]
    pub fn for_bytes(trial_id: TrialId, path: impl Into<PathBuf>, bytes: &[u8]) -> Self {
        Self {
            trial_id,
            path: path.into(),
            cas_hash: cas_hash_of(bytes),
            size_bytes: bytes.len() as u64,
            created_at: Utc::now(),
        }
    }

    /// Trial whose hyperparameters produced the artifact.
    #[must_use]
    pub const fn trial_id(&self) -> TrialId {
        self.trial_id
    }

    /// Artifact location.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `sha256:<hex>` of the file.
    #[must_use]
    pub fn cas_hash(&self) -> &str {
        &self.cas_hash
    }

    /// File size.
    #[must_use]
    pub const fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    /// When the record was made.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Re-hash the file on disk and compare.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if the file cannot be read and
    /// `Error::StorageError` if its content changed since the record was made.
    pub fn verify(&self) -> Result<()> {
        let bytes = fs::read(&self.path)?;
        let actual = cas_hash_of(&bytes);
        if actual != self.cas_hash {
            return Err(Error::StorageError(format!(
                "{} changed on disk: recorded {}, found {actual}",
                self.path.display(),
                self.cas_hash
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_for_bytes_hashes_content() {
        let record = ArtifactRecord::for_bytes(2, "best_model.json", b"");
        assert_eq!(record.trial_id(), 2);
        assert_eq!(record.path(), Path::new("best_model.json"));
        assert_eq!(
            record.cas_hash(),
            "sha256:e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(record.size_bytes(), 0);
    }

    #[test]
    fn test_verify_detects_modification() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");
        fs::write(&path, b"{}").unwrap();
        let record = ArtifactRecord::for_bytes(0, &path, b"{}");
        assert!(record.verify().is_ok());

        fs::write(&path, b"{\"tampered\":true}").unwrap();
        assert!(matches!(record.verify(), Err(Error::StorageError(_))));
    }
}
