//! Search space and validated hyperparameter sets

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Sampling domain of a single hyperparameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ParameterDomain {
    /// Uniform real range `[low, high]`
    Uniform {
        /// Lower bound (inclusive)
        low: f64,
        /// Upper bound (inclusive)
        high: f64,
    },
    /// Log-uniform real range `[low, high]`, `low > 0`
    LogUniform {
        /// Lower bound (inclusive)
        low: f64,
        /// Upper bound (inclusive)
        high: f64,
    },
    /// Uniform integer range `[low, high]`
    IntUniform {
        /// Lower bound (inclusive)
        low: i64,
        /// Upper bound (inclusive)
        high: i64,
    },
    /// One of a fixed set of values
    Categorical {
        /// Allowed values
        choices: Vec<f64>,
    },
}

impl ParameterDomain {
    /// Draw one value from the domain.
    ///
    /// The domain must have passed [`ParameterDomain::validate`].
    #[allow(clippy::cast_precision_loss)]
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        match self {
            Self::Uniform { low, high } => {
                if low == high {
                    *low
                } else {
                    rng.gen_range(*low..=*high)
                }
            }
            Self::LogUniform { low, high } => {
                if low == high {
                    return *low;
                }
                let value = rng.gen_range(low.ln()..=high.ln()).exp();
                // exp(ln(x)) can land one ulp outside the range
                value.clamp(*low, *high)
            }
            Self::IntUniform { low, high } => rng.gen_range(*low..=*high) as f64,
            Self::Categorical { choices } => choices[rng.gen_range(0..choices.len())],
        }
    }

    /// Check whether a value lies inside the domain.
    #[must_use]
    #[allow(clippy::cast_precision_loss, clippy::float_cmp)]
    pub fn contains(&self, value: f64) -> bool {
        if !value.is_finite() {
            return false;
        }
        match self {
            Self::Uniform { low, high } | Self::LogUniform { low, high } => {
                value >= *low && value <= *high
            }
            Self::IntUniform { low, high } => {
                value.fract() == 0.0 && value >= *low as f64 && value <= *high as f64
            }
            Self::Categorical { choices } => choices.iter().any(|c| *c == value),
        }
    }

    /// Smallest value the domain can produce.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn min_value(&self) -> f64 {
        match self {
            Self::Uniform { low, .. } | Self::LogUniform { low, .. } => *low,
            Self::IntUniform { low, .. } => *low as f64,
            Self::Categorical { choices } => choices.iter().copied().fold(f64::INFINITY, f64::min),
        }
    }

    /// Largest value the domain can produce.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn max_value(&self) -> f64 {
        match self {
            Self::Uniform { high, .. } | Self::LogUniform { high, .. } => *high,
            Self::IntUniform { high, .. } => *high as f64,
            Self::Categorical { choices } => {
                choices.iter().copied().fold(f64::NEG_INFINITY, f64::max)
            }
        }
    }

    /// Whether every value of the domain is an integer.
    #[must_use]
    #[allow(clippy::float_cmp)]
    pub fn is_integral(&self) -> bool {
        match self {
            Self::IntUniform { .. } => true,
            Self::Categorical { choices } => choices.iter().all(|c| c.fract() == 0.0),
            Self::Uniform { low, high } => low == high && low.fract() == 0.0,
            Self::LogUniform { .. } => false,
        }
    }

    /// Replace either bound, keeping the kind of domain.
    ///
    /// A categorical domain keeps only the choices inside the new bounds.
    /// The result is not validated; call [`ParameterDomain::validate`].
    ///
    /// # Errors
    ///
    /// Returns `Error::Validation` if an integer domain gets a fractional bound.
    #[allow(clippy::cast_possible_truncation, clippy::float_cmp)]
    pub fn with_bounds(self, low: Option<f64>, high: Option<f64>) -> Result<Self> {
        let whole = |v: f64| {
            if v.is_finite() && v.fract() == 0.0 {
                Ok(v as i64)
            } else {
                Err(Error::Validation(format!("integer bound {v} is not a whole number")))
            }
        };
        Ok(match self {
            Self::Uniform { low: l, high: h } => Self::Uniform {
                low: low.unwrap_or(l),
                high: high.unwrap_or(h),
            },
            Self::LogUniform { low: l, high: h } => Self::LogUniform {
                low: low.unwrap_or(l),
                high: high.unwrap_or(h),
            },
            Self::IntUniform { low: l, high: h } => Self::IntUniform {
                low: low.map(whole).transpose()?.unwrap_or(l),
                high: high.map(whole).transpose()?.unwrap_or(h),
            },
            Self::Categorical { choices } => Self::Categorical {
                choices: choices
                    .into_iter()
                    .filter(|c| low.map_or(true, |lo| *c >= lo) && high.map_or(true, |hi| *c <= hi))
                    .collect(),
            },
        })
    }

    /// Validate the domain's own shape (ordering, finiteness, emptiness).
    ///
    /// # Errors
    ///
    /// Returns `Error::Validation` naming `name` when the domain is malformed.
    pub fn validate(&self, name: &str) -> Result<()> {
        match self {
            Self::Uniform { low, high } | Self::LogUniform { low, high } => {
                if !low.is_finite() || !high.is_finite() {
                    return Err(invalid(name, "bounds must be finite"));
                }
                if low > high {
                    return Err(invalid(name, &format!("low {low} exceeds high {high}")));
                }
                if matches!(self, Self::LogUniform { .. }) && *low <= 0.0 {
                    return Err(invalid(name, "log-uniform bounds must be positive"));
                }
            }
            Self::IntUniform { low, high } => {
                if low > high {
                    return Err(invalid(name, &format!("low {low} exceeds high {high}")));
                }
            }
            Self::Categorical { choices } => {
                if choices.is_empty() {
                    return Err(invalid(name, "categorical domain has no choices"));
                }
                if choices.iter().any(|c| !c.is_finite()) {
                    return Err(invalid(name, "categorical choices must be finite"));
                }
            }
        }
        Ok(())
    }
}

fn invalid(name: &str, reason: &str) -> Error {
    Error::Validation(format!("{name}: {reason}"))
}

/// Search space: one domain per tunable field of a [`HyperparameterSet`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchSpace {
    /// Optimizer step size
    pub learning_rate: ParameterDomain,
    /// Dropout applied to the pooled features
    pub dropout_rate: ParameterDomain,
    /// Width of the dense hidden layer
    pub dense_neurons: ParameterDomain,
    /// Mini-batch size
    pub batch_size: ParameterDomain,
    /// Number of training epochs
    pub epochs: ParameterDomain,
}

impl Default for SearchSpace {
    fn default() -> Self {
        Self {
            learning_rate: ParameterDomain::LogUniform {
                low: 1e-4,
                high: 1e-1,
            },
            dropout_rate: ParameterDomain::Uniform {
                low: 0.1,
                high: 0.5,
            },
            dense_neurons: ParameterDomain::IntUniform { low: 64, high: 256 },
            batch_size: ParameterDomain::Categorical {
                choices: vec![16.0, 32.0, 64.0],
            },
            epochs: ParameterDomain::IntUniform { low: 5, high: 50 },
        }
    }
}

impl SearchSpace {
    /// Validate every domain plus the per-field constraints of [`HyperparameterSet`].
    ///
    /// # Errors
    ///
    /// Returns `Error::Validation` on the first malformed bound.
    pub fn validate(&self) -> Result<()> {
        for (name, domain) in self.fields() {
            domain.validate(name)?;
        }

        if self.learning_rate.min_value() <= 0.0 {
            return Err(invalid("learning_rate", "must be strictly positive"));
        }
        if self.dropout_rate.min_value() < 0.0 || self.dropout_rate.max_value() >= 1.0 {
            return Err(invalid("dropout_rate", "must lie in [0, 1)"));
        }
        for (name, domain) in [
            ("dense_neurons", &self.dense_neurons),
            ("batch_size", &self.batch_size),
            ("epochs", &self.epochs),
        ] {
            if !domain.is_integral() {
                return Err(invalid(name, "must be an integer domain"));
            }
            if domain.min_value() < 1.0 {
                return Err(invalid(name, "must be at least 1"));
            }
            if domain.max_value() > f64::from(u32::MAX) {
                return Err(invalid(name, "exceeds u32 range"));
            }
        }
        Ok(())
    }

    /// Domains paired with their field names, in declaration order.
    #[must_use]
    pub fn fields(&self) -> [(&'static str, &ParameterDomain); 5] {
        [
            ("learning_rate", &self.learning_rate),
            ("dropout_rate", &self.dropout_rate),
            ("dense_neurons", &self.dense_neurons),
            ("batch_size", &self.batch_size),
            ("epochs", &self.epochs),
        ]
    }
}

/// Immutable, bound-checked hyperparameter assignment for one trial.
///
/// Only constructible through [`HyperparameterSet::new`] (or deserialization of
/// an artifact that was written from one), so a value in hand is always valid
/// for the space it was created against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HyperparameterSet {
    learning_rate: f64,
    dropout_rate: f64,
    dense_neurons: u32,
    batch_size: u32,
    epochs: u32,
}

impl HyperparameterSet {
    /// Create a hyperparameter set, checking every field against `space`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Validation` if any field falls outside its domain.
    pub fn new(
        space: &SearchSpace,
        learning_rate: f64,
        dropout_rate: f64,
        dense_neurons: u32,
        batch_size: u32,
        epochs: u32,
    ) -> Result<Self> {
        let values = [
            learning_rate,
            dropout_rate,
            f64::from(dense_neurons),
            f64::from(batch_size),
            f64::from(epochs),
        ];
        for ((name, domain), value) in space.fields().into_iter().zip(values) {
            if !domain.contains(value) {
                return Err(invalid(name, &format!("value {value} is outside {domain:?}")));
            }
        }
        Ok(Self {
            learning_rate,
            dropout_rate,
            dense_neurons,
            batch_size,
            epochs,
        })
    }

    /// Optimizer step size.
    #[must_use]
    pub const fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    /// Dropout rate in `[0, 1)`.
    #[must_use]
    pub const fn dropout_rate(&self) -> f64 {
        self.dropout_rate
    }

    /// Dense layer width.
    #[must_use]
    pub const fn dense_neurons(&self) -> u32 {
        self.dense_neurons
    }

    /// Mini-batch size.
    #[must_use]
    pub const fn batch_size(&self) -> u32 {
        self.batch_size
    }

    /// Epoch budget.
    #[must_use]
    pub const fn epochs(&self) -> u32 {
        self.epochs
    }

    /// Flat JSON view, used for logging and tracker exports.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "learning_rate": self.learning_rate,
            "dropout_rate": self.dropout_rate,
            "dense_neurons": self.dense_neurons,
            "batch_size": self.batch_size,
            "epochs": self.epochs,
        })
    }
}
