//! Configuration for the `tune` and `serve` commands
//!
//! Both configs load from JSON files; any missing field takes its default.
//! Command-line flags override file values in the binary.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::model::{Augmenter, DEFAULT_IMAGE_SIZE};
use crate::search::{Direction, PercentilePruner, SearchSpace};
use crate::{Error, Result};

fn from_json_file<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        Error::Validation(format!("Failed to read config {}: {e}", path.display()))
    })?;
    serde_json::from_str(&text)
        .map_err(|e| Error::Validation(format!("Invalid config {}: {e}", path.display())))
}

/// Where the dataset lives and how it is split and augmented.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    /// Root with one subdirectory per class
    pub root: PathBuf,
    /// Square side images are resized to
    pub image_size: u32,
    /// Share of each class held out for validation
    pub validation_fraction: f64,
    /// Seed of the stratified split
    pub split_seed: u64,
    /// Apply random rotation/translation to training images each epoch
    pub augment: bool,
    /// Augmentation bounds
    pub augmentation: Augmenter,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("data"),
            image_size: DEFAULT_IMAGE_SIZE,
            validation_fraction: 0.2,
            split_seed: 42,
            augment: true,
            augmentation: Augmenter::default(),
        }
    }
}

impl DataConfig {
    /// Check value ranges.
    ///
    /// # Errors
    ///
    /// Returns `Error::Validation` on the first out-of-range value.
    pub fn validate(&self) -> Result<()> {
        if self.image_size == 0 {
            return Err(Error::Validation("image_size must be positive".to_string()));
        }
        if !(self.validation_fraction > 0.0 && self.validation_fraction < 1.0) {
            return Err(Error::Validation(
                "validation_fraction must lie in (0, 1)".to_string(),
            ));
        }
        self.augmentation.validate()
    }
}

/// Settings of a search-and-finalize run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TuneConfig {
    /// Study name, used to scope tracker records
    pub study_name: String,
    /// Whether the validation metric is maximized or minimized
    pub direction: Direction,
    /// Hyperparameter search space
    pub space: SearchSpace,
    /// Trial budget
    pub trials: usize,
    /// Concurrent trials
    pub workers: usize,
    /// Early-stopping policy
    pub pruner: PercentilePruner,
    /// Per-trial wall-clock limit
    pub trial_timeout_secs: Option<u64>,
    /// Seed for sampling, training and finalization
    pub seed: u64,
    /// Dataset settings
    pub data: DataConfig,
    /// JSON-lines trial log (in-memory if unset)
    pub tracker_path: Option<PathBuf>,
    /// Parquet trial summary written after the search
    pub summary_parquet: Option<PathBuf>,
    /// Where the finalized artifact is written
    pub artifact_path: PathBuf,
}

impl Default for TuneConfig {
    fn default() -> Self {
        Self {
            study_name: "edge-study".to_string(),
            direction: Direction::Maximize,
            space: SearchSpace::default(),
            trials: 100,
            workers: 1,
            pruner: PercentilePruner::default(),
            trial_timeout_secs: None,
            seed: 42,
            data: DataConfig::default(),
            tracker_path: None,
            summary_parquet: None,
            artifact_path: PathBuf::from("best_model.json"),
        }
    }
}

impl TuneConfig {
    /// Load from a JSON file and validate.
    ///
    /// # Errors
    ///
    /// Returns `Error::Validation` if the file is unreadable, malformed or
    /// out of range.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let config: Self = from_json_file(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Check every section.
    ///
    /// # Errors
    ///
    /// Returns `Error::Validation` on the first invalid value.
    pub fn validate(&self) -> Result<()> {
        if self.trials == 0 {
            return Err(Error::Validation("trials must be positive".to_string()));
        }
        if self.workers == 0 {
            return Err(Error::Validation("workers must be positive".to_string()));
        }
        if self.trial_timeout_secs == Some(0) {
            return Err(Error::Validation(
                "trial_timeout_secs must be positive".to_string(),
            ));
        }
        self.space.validate()?;
        self.pruner.validate()?;
        self.data.validate()
    }

    /// Per-trial timeout as a `Duration`.
    #[must_use]
    pub fn trial_timeout(&self) -> Option<Duration> {
        self.trial_timeout_secs.map(Duration::from_secs)
    }
}

/// Settings of the prediction server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServeConfig {
    /// Artifact to load at startup
    pub artifact: PathBuf,
    /// Listen address
    pub address: SocketAddr,
    /// Square side request images are resized to
    pub image_size: u32,
}

impl Default for ServeConfig {
    fn default() -> Self {
        Self {
            artifact: PathBuf::from("best_model.json"),
            address: SocketAddr::from(([0, 0, 0, 0], 8000)),
            image_size: DEFAULT_IMAGE_SIZE,
        }
    }
}

impl ServeConfig {
    /// Load from a JSON file and validate.
    ///
    /// # Errors
    ///
    /// Returns `Error::Validation` if the file is unreadable or malformed.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let config: Self = from_json_file(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges.
    ///
    /// # Errors
    ///
    /// Returns `Error::Validation` if `image_size` is zero.
    pub fn validate(&self) -> Result<()> {
        if self.image_size == 0 {
            return Err(Error::Validation("image_size must be positive".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_reference_setup() {
        let c = TuneConfig::default();
        assert_eq!(c.trials, 100);
        assert_eq!(c.data.image_size, 224);
        assert!((c.data.validation_fraction - 0.2).abs() < f64::EPSILON);
        assert_eq!(c.data.split_seed, 42);
        assert!(c.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tune.json");
        std::fs::write(
            &path,
            r#"{
                "trials": 5,
                "direction": "minimize",
                "space": {
                    "learning_rate": {"kind": "log_uniform", "low": 0.0001, "high": 0.1},
                    "dropout_rate": {"kind": "uniform", "low": 0.1, "high": 0.5},
                    "dense_neurons": {"kind": "int_uniform", "low": 64, "high": 256},
                    "batch_size": {"kind": "categorical", "choices": [16, 32, 64]},
                    "epochs": {"kind": "int_uniform", "low": 5, "high": 50}
                },
                "data": {"root": "/tmp/edge-data"}
            }"#,
        )
        .unwrap();

        let c = TuneConfig::from_json_file(&path).unwrap();
        assert_eq!(c.trials, 5);
        assert_eq!(c.direction, Direction::Minimize);
        assert_eq!(c.space, SearchSpace::default());
        assert_eq!(c.data.root, PathBuf::from("/tmp/edge-data"));
        assert_eq!(c.data.image_size, 224);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut c = TuneConfig {
            trials: 0,
            ..TuneConfig::default()
        };
        assert!(c.validate().is_err());
        c.trials = 1;
        c.data.validation_fraction = 1.0;
        assert!(c.validate().is_err());
    }

    #[test]
    fn test_serve_config_defaults() {
        let c = ServeConfig::default();
        assert_eq!(c.address.port(), 8000);
        assert!(c.validate().is_ok());
    }
}
