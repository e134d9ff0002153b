//! Experiment Record - the persisted outcome of one trial

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::MetricRecord;
use crate::search::{HyperparameterSet, Trial, TrialId, TrialStatus};

/// Experiment Record represents one trial as written to the tracker.
///
/// Records are written once, when the trial reaches a terminal status, and
/// never rewritten afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExperimentRecord {
    study: String,
    trial_id: TrialId,
    params: HyperparameterSet,
    metrics: Vec<MetricRecord>,
    status: TrialStatus,
    final_metric: Option<f64>,
    failure_reason: Option<String>,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
}

impl ExperimentRecord {
    /// Snapshot a trial into a record.
    #[must_use]
    pub fn from_trial(study: impl Into<String>, trial: &Trial) -> Self {
        let metrics = trial
            .intermediate()
            .iter()
            .zip(trial.reported_at())
            .enumerate()
            .map(|(epoch, (value, at))| MetricRecord::at(trial.id(), epoch as u64, *value, *at))
            .collect();

        Self {
            study: study.into(),
            trial_id: trial.id(),
            params: trial.params().clone(),
            metrics,
            status: trial.status(),
            final_metric: trial.final_metric(),
            failure_reason: trial.failure_reason().map(str::to_string),
            created_at: trial.created_at(),
            started_at: trial.started_at(),
            ended_at: trial.ended_at(),
        }
    }

    /// Create a builder for constructing a record without a live trial.
    #[must_use]
    pub fn builder(
        study: impl Into<String>,
        trial_id: TrialId,
        params: HyperparameterSet,
        status: TrialStatus,
    ) -> ExperimentRecordBuilder {
        ExperimentRecordBuilder::new(study, trial_id, params, status)
    }

    /// Get the study name.
    #[must_use]
    pub fn study(&self) -> &str {
        &self.study
    }

    /// Get the trial ID.
    #[must_use]
    pub const fn trial_id(&self) -> TrialId {
        self.trial_id
    }

    /// Get the hyperparameters.
    #[must_use]
    pub const fn params(&self) -> &HyperparameterSet {
        &self.params
    }

    /// Get the metric history, ordered by epoch.
    #[must_use]
    pub fn metrics(&self) -> &[MetricRecord] {
        &self.metrics
    }

    /// Get the terminal status.
    #[must_use]
    pub const fn status(&self) -> TrialStatus {
        self.status
    }

    /// Get the final metric (Completed trials only).
    #[must_use]
    pub const fn final_metric(&self) -> Option<f64> {
        self.final_metric
    }

    /// Get the failure reason, if any.
    #[must_use]
    pub fn failure_reason(&self) -> Option<&str> {
        self.failure_reason.as_deref()
    }

    /// Get the creation timestamp.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Get the start timestamp.
    #[must_use]
    pub const fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    /// Get the end timestamp.
    #[must_use]
    pub const fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.ended_at
    }
}

/// Builder for `ExperimentRecord`.
#[derive(Debug)]
pub struct ExperimentRecordBuilder {
    record: ExperimentRecord,
}

impl ExperimentRecordBuilder {
    /// Create a new builder with required fields.
    #[must_use]
    pub fn new(
        study: impl Into<String>,
        trial_id: TrialId,
        params: HyperparameterSet,
        status: TrialStatus,
    ) -> Self {
        Self {
            record: ExperimentRecord {
                study: study.into(),
                trial_id,
                params,
                metrics: Vec::new(),
                status,
                final_metric: None,
                failure_reason: None,
                created_at: Utc::now(),
                started_at: None,
                ended_at: None,
            },
        }
    }

    /// Append the next epoch's metric.
    #[must_use]
    pub fn metric(mut self, value: f64) -> Self {
        let epoch = self.record.metrics.len() as u64;
        self.record
            .metrics
            .push(MetricRecord::new(self.record.trial_id, epoch, value));
        self
    }

    /// Set the final metric.
    #[must_use]
    pub const fn final_metric(mut self, value: f64) -> Self {
        self.record.final_metric = Some(value);
        self
    }

    /// Set the failure reason.
    #[must_use]
    pub fn failure_reason(mut self, reason: impl Into<String>) -> Self {
        self.record.failure_reason = Some(reason.into());
        self
    }

    /// Set a custom creation timestamp (useful for deserialization/testing).
    #[must_use]
    pub const fn created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.record.created_at = created_at;
        self
    }

    /// Build the `ExperimentRecord`.
    #[must_use]
    pub fn build(self) -> ExperimentRecord {
        self.record
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::SearchSpace;

    fn params() -> HyperparameterSet {
        HyperparameterSet::new(&SearchSpace::default(), 1e-3, 0.2, 64, 16, 5).unwrap()
    }

    #[test]
    fn test_from_trial_copies_history() {
        let mut trial = Trial::new(4, params());
        trial.start().unwrap();
        trial.report(0, 0.3).unwrap();
        trial.report(1, 0.5).unwrap();
        trial.complete(0.5).unwrap();

        let record = ExperimentRecord::from_trial("study", &trial);
        assert_eq!(record.trial_id(), 4);
        assert_eq!(record.status(), TrialStatus::Completed);
        assert_eq!(record.metrics().len(), 2);
        assert_eq!(record.metrics()[1].epoch(), 1);
        assert_eq!(record.final_metric(), Some(0.5));
    }

    #[test]
    fn test_builder_numbers_epochs() {
        let record = ExperimentRecord::builder("s", 1, params(), TrialStatus::Pruned)
            .metric(0.1)
            .metric(0.2)
            .build();
        let epochs: Vec<u64> = record.metrics().iter().map(MetricRecord::epoch).collect();
        assert_eq!(epochs, vec![0, 1]);
        assert!(record.final_metric().is_none());
    }
}
