//! Pruning policies - early termination of unpromising trials
//!
//! Toyota Way: Muda (Waste Elimination)
//!
//! Compute spent on a configuration that is already behind its peers at the
//! same epoch is waste. The pruner compares one trial's trajectory against
//! finished peers and signals PRUNE at an epoch boundary.

use serde::{Deserialize, Serialize};

use super::study::{Direction, Study};
use super::trial::{Trial, TrialStatus};
use crate::{Error, Result};

/// Outcome of an epoch report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PruneDecision {
    /// Keep training.
    Continue,
    /// Stop now; the trial is marked Pruned.
    Prune,
}

/// Decides whether a running trial should stop after an epoch.
///
/// Called with the study lock held, after the epoch's observation has been
/// appended to `trial`, so every decision sees one consistent snapshot.
pub trait Pruner: Send + Sync {
    /// Decide for `trial` at `epoch` (0-based).
    fn decide(&self, study: &Study, trial: &Trial, epoch: usize) -> PruneDecision;
}

/// Never prunes.
#[derive(Debug, Clone, Copy, Default)]
pub struct NopPruner;

impl Pruner for NopPruner {
    fn decide(&self, _study: &Study, _trial: &Trial, _epoch: usize) -> PruneDecision {
        PruneDecision::Continue
    }
}

/// Percentile pruner.
///
/// Keeps trials that sit in the top `percentile` percent of peer trajectories
/// at the same epoch index. Peers are the other trials that finished
/// (Completed or Pruned) and have an observation at that epoch. No decision
/// is made during the first `warmup_epochs` epochs or with fewer than
/// `min_peers` peers. The study's first-created trial is never pruned, even
/// when later trials finish ahead of it on other workers.
///
/// With `percentile = 50` this is a median rule.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PercentilePruner {
    percentile: f64,
    warmup_epochs: usize,
    #[serde(default = "default_min_peers")]
    min_peers: usize,
}

const fn default_min_peers() -> usize {
    1
}

impl Default for PercentilePruner {
    fn default() -> Self {
        Self {
            percentile: 50.0,
            warmup_epochs: 2,
            min_peers: 1,
        }
    }
}

impl PercentilePruner {
    /// Create a percentile pruner.
    ///
    /// # Errors
    ///
    /// Returns `Error::Validation` unless `0 <= percentile <= 100`.
    pub fn new(percentile: f64, warmup_epochs: usize) -> Result<Self> {
        let pruner = Self {
            percentile,
            warmup_epochs,
            min_peers: 1,
        };
        pruner.validate()?;
        Ok(pruner)
    }

    /// Median pruner with the given warm-up.
    #[must_use]
    pub const fn median(warmup_epochs: usize) -> Self {
        Self {
            percentile: 50.0,
            warmup_epochs,
            min_peers: 1,
        }
    }

    /// Require at least `n` peers before pruning (clamped to 1).
    #[must_use]
    pub fn with_min_peers(mut self, n: usize) -> Self {
        self.min_peers = n.max(1);
        self
    }

    /// Percentile of peers that is kept.
    #[must_use]
    pub const fn percentile(&self) -> f64 {
        self.percentile
    }

    /// Epochs that always run before a decision is made.
    #[must_use]
    pub const fn warmup_epochs(&self) -> usize {
        self.warmup_epochs
    }

    /// Minimum number of peers required to prune.
    #[must_use]
    pub const fn min_peers(&self) -> usize {
        self.min_peers
    }

    /// Check the percentile range.
    ///
    /// # Errors
    ///
    /// Returns `Error::Validation` on a percentile outside `[0, 100]`.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=100.0).contains(&self.percentile) {
            return Err(Error::Validation(format!(
                "pruner percentile {} must lie in [0, 100]",
                self.percentile
            )));
        }
        Ok(())
    }

    /// Threshold a trial must reach at this epoch, or `None` if no decision applies.
    #[must_use]
    pub fn threshold(&self, study: &Study, trial: &Trial, epoch: usize) -> Option<f64> {
        if epoch < self.warmup_epochs {
            return None;
        }
        if study.trials().first().map(Trial::id) == Some(trial.id()) {
            return None;
        }

        let mut peers: Vec<f64> = study
            .trials()
            .iter()
            .filter(|t| t.id() != trial.id())
            .filter(|t| matches!(t.status(), TrialStatus::Completed | TrialStatus::Pruned))
            .filter_map(|t| t.value_at(epoch))
            .collect();
        if peers.len() < self.min_peers.max(1) {
            return None;
        }
        peers.sort_by(f64::total_cmp);

        let keep = self.percentile / 100.0;
        let q = match study.direction() {
            Direction::Maximize => 1.0 - keep,
            Direction::Minimize => keep,
        };
        Some(quantile(&peers, q))
    }
}

impl Pruner for PercentilePruner {
    fn decide(&self, study: &Study, trial: &Trial, epoch: usize) -> PruneDecision {
        let (Some(value), Some(threshold)) =
            (trial.value_at(epoch), self.threshold(study, trial, epoch))
        else {
            return PruneDecision::Continue;
        };

        let behind = match study.direction() {
            Direction::Maximize => value < threshold,
            Direction::Minimize => value > threshold,
        };
        if behind {
            PruneDecision::Prune
        } else {
            PruneDecision::Continue
        }
    }
}

/// Linear-interpolation quantile of an ascending, non-empty slice.
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
fn quantile(sorted: &[f64], q: f64) -> f64 {
    let q = q.clamp(0.0, 1.0);
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}
