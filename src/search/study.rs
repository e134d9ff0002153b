//! Study - the search session and its best-trial bookkeeping

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use super::space::{HyperparameterSet, SearchSpace};
use super::trial::{Trial, TrialHandle, TrialId, TrialStatus};
use crate::{Error, Result};

/// Optimization direction of the study metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Larger is better (e.g. validation accuracy)
    #[default]
    Maximize,
    /// Smaller is better (e.g. validation loss)
    Minimize,
}

impl Direction {
    /// Whether `candidate` is strictly better than `incumbent`.
    #[must_use]
    pub fn is_better(self, candidate: f64, incumbent: f64) -> bool {
        match self {
            Self::Maximize => candidate > incumbent,
            Self::Minimize => candidate < incumbent,
        }
    }

    /// Ordering where `Less` means "better", for sorting best-first.
    #[must_use]
    pub fn rank(self, a: f64, b: f64) -> Ordering {
        let ord = a.partial_cmp(&b).unwrap_or(Ordering::Equal);
        match self {
            Self::Maximize => ord.reverse(),
            Self::Minimize => ord,
        }
    }
}

/// A search session: space, direction and every trial in creation order.
#[derive(Debug, Clone)]
pub struct Study {
    name: String,
    direction: Direction,
    space: SearchSpace,
    trials: Vec<Trial>,
    /// Index into `trials` of the best completed trial.
    best: Option<usize>,
}

impl Study {
    /// Create an empty study.
    ///
    /// # Errors
    ///
    /// Returns `Error::Validation` if the search space is malformed.
    pub fn new(name: impl Into<String>, direction: Direction, space: SearchSpace) -> Result<Self> {
        space.validate()?;
        Ok(Self {
            name: name.into(),
            direction,
            space,
            trials: Vec::new(),
            best: None,
        })
    }

    /// Study name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Optimization direction.
    #[must_use]
    pub const fn direction(&self) -> Direction {
        self.direction
    }

    /// Search space the study samples from.
    #[must_use]
    pub const fn space(&self) -> &SearchSpace {
        &self.space
    }

    /// All trials in creation order.
    #[must_use]
    pub fn trials(&self) -> &[Trial] {
        &self.trials
    }

    /// Look up a trial by ID.
    #[must_use]
    pub fn trial(&self, id: TrialId) -> Option<&Trial> {
        usize::try_from(id)
            .ok()
            .and_then(|idx| self.trials.get(idx))
            .filter(|t| t.id() == id)
    }

    /// Number of trials with the given status.
    #[must_use]
    pub fn count(&self, status: TrialStatus) -> usize {
        self.trials.iter().filter(|t| t.status() == status).count()
    }

    /// The completed trial with the extremal final metric (ties: earliest created).
    #[must_use]
    pub fn best_trial(&self) -> Option<&Trial> {
        self.best.map(|idx| &self.trials[idx])
    }

    /// Full scan for the best trial, independent of the cache.
    #[must_use]
    pub fn recompute_best(&self) -> Option<&Trial> {
        let mut best: Option<&Trial> = None;
        for trial in &self.trials {
            let Some(metric) = trial.final_metric() else {
                continue;
            };
            if trial.status() != TrialStatus::Completed {
                continue;
            }
            match best.and_then(Trial::final_metric) {
                Some(incumbent) if !self.direction.is_better(metric, incumbent) => {}
                _ => best = Some(trial),
            }
        }
        best
    }

    pub(crate) fn create_trial(&mut self, params: HyperparameterSet) -> TrialHandle {
        let id = self.trials.len() as TrialId;
        let trial = Trial::new(id, params);
        let handle = trial.handle();
        self.trials.push(trial);
        handle
    }

    pub(crate) fn trial_mut(&mut self, id: TrialId) -> Result<&mut Trial> {
        usize::try_from(id)
            .ok()
            .and_then(|idx| self.trials.get_mut(idx))
            .filter(|t| t.id() == id)
            .ok_or_else(|| Error::InvalidState(format!("unknown trial {id}")))
    }

    /// Fold a newly completed trial into the best-trial cache.
    pub(crate) fn note_completed(&mut self, id: TrialId) {
        let Some(idx) = usize::try_from(id).ok().filter(|i| *i < self.trials.len()) else {
            return;
        };
        let Some(metric) = self.trials[idx].final_metric() else {
            return;
        };
        let replace = match self.best {
            None => true,
            Some(best_idx) => {
                let incumbent = self.trials[best_idx].final_metric().unwrap_or(metric);
                // Workers finish out of order; an equal metric from an
                // earlier trial still wins the tie.
                self.direction.is_better(metric, incumbent)
                    || (metric.partial_cmp(&incumbent) == Some(Ordering::Equal) && idx < best_idx)
            }
        };
        if replace {
            self.best = Some(idx);
        }
    }
}
