//! Error types for edge-tune
//!
//! Toyota Way: Clear error messages with actionable guidance (Respect for People)
//!
//! Failure scope by variant:
//! - `TrialFailure`: local to one trial, absorbed by the trial executor
//! - `StorageError`: tracker degradation, logged by the search controller
//! - `InvalidImage`: per request at the serving boundary
//! - `NoCompletedTrials` / `SchemaVersion`: fatal to finalization / serving startup

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// edge-tune error types
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed search bound or out-of-range hyperparameter value
    #[error("Validation error: {0}")]
    Validation(String),

    /// Undecodable or unsupported image content
    #[error("Invalid image: {0}")]
    InvalidImage(String),

    /// Numerical instability while training a trial
    #[error("Trial failure: {0}")]
    TrialFailure(String),

    /// Finalization requested before any trial completed
    #[error("No completed trials: the study has nothing to finalize")]
    NoCompletedTrials,

    /// Tracker or artifact storage failure
    #[error("Storage error: {0}")]
    StorageError(String),

    /// Artifact written by an incompatible schema
    #[error("Unsupported artifact schema version {found} (supported: {supported})\nRe-run finalization with this build to regenerate the artifact")]
    SchemaVersion {
        /// Version found in the artifact
        found: u32,
        /// Version this build reads and writes
        supported: u32,
    },

    /// Illegal trial state transition or unknown trial
    #[error("Invalid trial state: {0}")]
    InvalidState(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Arrow error
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// Parquet error
    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether this error is scoped to a single trial and must not abort a study.
    #[must_use]
    pub const fn is_trial_local(&self) -> bool {
        matches!(self, Self::TrialFailure(_) | Self::Validation(_))
    }
}
