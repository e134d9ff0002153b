//! Trial - one training attempt with a fixed hyperparameter assignment

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::space::HyperparameterSet;
use crate::{Error, Result};

/// Monotonic trial identifier, unique within a study.
pub type TrialId = u64;

/// Lifecycle status of a trial.
///
/// `Pending -> Running -> {Completed | Failed | Pruned}`; terminal states are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrialStatus {
    /// Proposed, not yet started.
    Pending,
    /// Training in progress.
    Running,
    /// Stopped early by the pruning policy.
    Pruned,
    /// Trained for every epoch; has a final metric.
    Completed,
    /// Numerical failure, timeout or classifier error.
    Failed,
}

impl TrialStatus {
    /// Whether no further transition is allowed.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Pruned | Self::Completed | Self::Failed)
    }

    /// Status name as stored in tracker exports.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Pruned => "PRUNED",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for TrialStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The executor's view of a trial: identity and the assignment to train with.
#[derive(Debug, Clone, PartialEq)]
pub struct TrialHandle {
    /// Trial identifier
    pub id: TrialId,
    /// Hyperparameters to build the classifier from
    pub params: HyperparameterSet,
}

/// A trial owned by the study.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Trial {
    id: TrialId,
    params: HyperparameterSet,
    intermediate: Vec<f64>,
    reported_at: Vec<DateTime<Utc>>,
    status: TrialStatus,
    final_metric: Option<f64>,
    failure_reason: Option<String>,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
}

impl Trial {
    /// Create a new trial in Pending status.
    #[must_use]
    pub fn new(id: TrialId, params: HyperparameterSet) -> Self {
        Self {
            id,
            params,
            intermediate: Vec::new(),
            reported_at: Vec::new(),
            status: TrialStatus::Pending,
            final_metric: None,
            failure_reason: None,
            created_at: Utc::now(),
            started_at: None,
            ended_at: None,
        }
    }

    /// Get the trial ID.
    #[must_use]
    pub const fn id(&self) -> TrialId {
        self.id
    }

    /// Get the hyperparameter assignment.
    #[must_use]
    pub const fn params(&self) -> &HyperparameterSet {
        &self.params
    }

    /// Per-epoch validation metrics, indexed by epoch.
    #[must_use]
    pub fn intermediate(&self) -> &[f64] {
        &self.intermediate
    }

    /// Wall-clock time of each epoch report, parallel to [`Trial::intermediate`].
    #[must_use]
    pub fn reported_at(&self) -> &[DateTime<Utc>] {
        &self.reported_at
    }

    /// Metric observed at `epoch`, if the trial got that far.
    #[must_use]
    pub fn value_at(&self, epoch: usize) -> Option<f64> {
        self.intermediate.get(epoch).copied()
    }

    /// Get the current status.
    #[must_use]
    pub const fn status(&self) -> TrialStatus {
        self.status
    }

    /// Final metric; `Some` only when Completed.
    #[must_use]
    pub const fn final_metric(&self) -> Option<f64> {
        self.final_metric
    }

    /// Why the trial failed, if it did.
    #[must_use]
    pub fn failure_reason(&self) -> Option<&str> {
        self.failure_reason.as_deref()
    }

    /// Get the creation timestamp.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Get the start timestamp, if the trial has started.
    #[must_use]
    pub const fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    /// Get the end timestamp, if the trial reached a terminal status.
    #[must_use]
    pub const fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.ended_at
    }

    /// Handle for the executor.
    #[must_use]
    pub fn handle(&self) -> TrialHandle {
        TrialHandle {
            id: self.id,
            params: self.params.clone(),
        }
    }

    /// Pending -> Running.
    pub(crate) fn start(&mut self) -> Result<()> {
        self.expect_status(TrialStatus::Pending, "start")?;
        self.status = TrialStatus::Running;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    /// Append the metric for `epoch`; epochs must arrive in order from 0.
    pub(crate) fn report(&mut self, epoch: usize, value: f64) -> Result<()> {
        self.expect_status(TrialStatus::Running, "report")?;
        if epoch != self.intermediate.len() {
            return Err(Error::InvalidState(format!(
                "trial {} expected epoch {} but got {epoch}",
                self.id,
                self.intermediate.len()
            )));
        }
        if !value.is_finite() {
            return Err(Error::Validation(format!(
                "trial {} reported non-finite metric {value} at epoch {epoch}",
                self.id
            )));
        }
        self.intermediate.push(value);
        self.reported_at.push(Utc::now());
        Ok(())
    }

    /// Running -> Pruned.
    pub(crate) fn prune(&mut self) -> Result<()> {
        self.finish(TrialStatus::Pruned, None, None)
    }

    /// Running -> Completed.
    pub(crate) fn complete(&mut self, metric: f64) -> Result<()> {
        if !metric.is_finite() {
            return Err(Error::Validation(format!(
                "trial {} cannot complete with non-finite metric {metric}",
                self.id
            )));
        }
        self.finish(TrialStatus::Completed, Some(metric), None)
    }

    /// Pending | Running -> Failed.
    ///
    /// A trial can fail before it starts (e.g. the classifier cannot be built).
    pub(crate) fn fail(&mut self, reason: impl Into<String>) -> Result<()> {
        if self.status == TrialStatus::Pending {
            self.started_at = Some(Utc::now());
            self.status = TrialStatus::Running;
        }
        self.finish(TrialStatus::Failed, None, Some(reason.into()))
    }

    fn finish(
        &mut self,
        status: TrialStatus,
        metric: Option<f64>,
        reason: Option<String>,
    ) -> Result<()> {
        self.expect_status(TrialStatus::Running, status.as_str())?;
        self.status = status;
        self.final_metric = metric;
        self.failure_reason = reason;
        self.ended_at = Some(Utc::now());
        Ok(())
    }

    fn expect_status(&self, expected: TrialStatus, action: &str) -> Result<()> {
        if self.status == expected {
            Ok(())
        } else {
            Err(Error::InvalidState(format!(
                "trial {} cannot {action} from {}",
                self.id, self.status
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::SearchSpace;

    fn trial() -> Trial {
        let params = HyperparameterSet::new(&SearchSpace::default(), 1e-3, 0.2, 64, 16, 5).unwrap();
        Trial::new(0, params)
    }

    #[test]
    fn test_trial_lifecycle() {
        let mut t = trial();
        assert_eq!(t.status(), TrialStatus::Pending);
        t.start().unwrap();
        t.report(0, 0.4).unwrap();
        t.report(1, 0.6).unwrap();
        t.complete(0.6).unwrap();
        assert_eq!(t.status(), TrialStatus::Completed);
        assert_eq!(t.final_metric(), Some(0.6));
        assert!(t.ended_at().unwrap() >= t.started_at().unwrap());
    }

    #[test]
    fn test_terminal_states_are_final() {
        let mut t = trial();
        t.start().unwrap();
        t.prune().unwrap();
        assert!(matches!(t.complete(0.9), Err(Error::InvalidState(_))));
        assert!(matches!(t.fail("late"), Err(Error::InvalidState(_))));
        assert!(t.report(0, 0.1).is_err());
        assert_eq!(t.status(), TrialStatus::Pruned);
        assert_eq!(t.final_metric(), None);
    }

    #[test]
    fn test_epochs_must_be_contiguous() {
        let mut t = trial();
        t.start().unwrap();
        assert!(t.report(1, 0.5).is_err());
        t.report(0, 0.5).unwrap();
        assert!(t.report(0, 0.5).is_err());
    }

    #[test]
    fn test_fail_before_start() {
        let mut t = trial();
        t.fail("build error").unwrap();
        assert_eq!(t.status(), TrialStatus::Failed);
        assert_eq!(t.failure_reason(), Some("build error"));
    }

    #[test]
    fn test_non_finite_completion_rejected() {
        let mut t = trial();
        t.start().unwrap();
        assert!(t.complete(f64::NAN).is_err());
        assert_eq!(t.status(), TrialStatus::Running);
    }
}
