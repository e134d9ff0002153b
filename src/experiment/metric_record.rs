//! Metric Record - one per-epoch observation of a trial

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::search::TrialId;

/// Validation metric reported by a trial at the end of one epoch.
///
/// A trial's records are contiguous in `epoch` from 0; the pruner compares
/// trials at equal epoch indices.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricRecord {
    trial_id: TrialId,
    epoch: u64,
    value: f64,
    timestamp: DateTime<Utc>,
}

impl MetricRecord {
    /// Observation of `value` at `epoch`, reported now.
    #[must_use]
    pub fn new(trial_id: TrialId, epoch: u64, value: f64) -> Self {
        Self::at(trial_id, epoch, value, Utc::now())
    }

    /// Observation with a known report time (copied from a live trial).
    #[must_use]
    pub const fn at(trial_id: TrialId, epoch: u64, value: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            trial_id,
            epoch,
            value,
            timestamp,
        }
    }

    /// Reporting trial.
    #[must_use]
    pub const fn trial_id(&self) -> TrialId {
        self.trial_id
    }

    /// 0-based epoch index.
    #[must_use]
    pub const fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Validation metric.
    #[must_use]
    pub const fn value(&self) -> f64 {
        self.value
    }

    /// Report time.
    #[must_use]
    pub const fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}
