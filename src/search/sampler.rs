//! Hyperparameter samplers

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::space::{HyperparameterSet, SearchSpace};
use crate::{Error, Result};

/// Proposes hyperparameter assignments for new trials.
///
/// Implementations may be adaptive (e.g. TPE) as long as every returned set
/// satisfies the bounds of `space`; [`HyperparameterSet::new`] enforces that.
pub trait Sampler: Send {
    /// Produce the assignment for the next trial.
    ///
    /// # Errors
    ///
    /// Returns `Error::Validation` if the space cannot produce a valid set.
    fn sample(&mut self, space: &SearchSpace) -> Result<HyperparameterSet>;
}

/// Independent draw of every field from its domain.
///
/// # Errors
///
/// Returns `Error::Validation` if a drawn integer does not fit in `u32`
/// (only possible for spaces that skipped [`SearchSpace::validate`]).
pub fn sample_hyperparameters<R: Rng + ?Sized>(
    space: &SearchSpace,
    rng: &mut R,
) -> Result<HyperparameterSet> {
    let learning_rate = space.learning_rate.sample(rng);
    let dropout_rate = space.dropout_rate.sample(rng);
    let dense_neurons = to_u32("dense_neurons", space.dense_neurons.sample(rng))?;
    let batch_size = to_u32("batch_size", space.batch_size.sample(rng))?;
    let epochs = to_u32("epochs", space.epochs.sample(rng))?;

    HyperparameterSet::new(
        space,
        learning_rate,
        dropout_rate,
        dense_neurons,
        batch_size,
        epochs,
    )
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn to_u32(name: &str, value: f64) -> Result<u32> {
    if value.fract() != 0.0 || value < 0.0 || value > f64::from(u32::MAX) {
        return Err(Error::Validation(format!(
            "{name}: sampled value {value} is not a valid unsigned integer"
        )));
    }
    Ok(value as u32)
}

/// Seeded random search.
#[derive(Debug, Clone)]
pub struct RandomSampler {
    rng: StdRng,
}

impl RandomSampler {
    /// Create a sampler with a fixed seed (reproducible proposals).
    #[must_use]
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Create a sampler seeded from the OS.
    #[must_use]
    pub fn from_entropy() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }
}

impl Default for RandomSampler {
    fn default() -> Self {
        Self::from_entropy()
    }
}

impl Sampler for RandomSampler {
    fn sample(&mut self, space: &SearchSpace) -> Result<HyperparameterSet> {
        sample_hyperparameters(space, &mut self.rng)
    }
}
