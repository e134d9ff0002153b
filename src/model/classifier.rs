//! Classifier capability consumed by the trial executor, finalizer and
//! inference service.

use super::dataset::Sample;
use super::preprocess::ImageTensor;
use crate::search::HyperparameterSet;
use crate::Result;

/// A trainable image classifier.
///
/// Shared read-only across request threads once loaded for inference, so
/// implementations must be `Send + Sync`.
pub trait Classifier: Send + Sync {
    /// Run one training pass over `samples`; returns the mean training loss.
    ///
    /// # Errors
    ///
    /// Returns `Error::TrialFailure` on numerical instability (non-finite loss).
    fn train_epoch(&mut self, samples: &[Sample]) -> Result<f64>;

    /// Accuracy on `samples`, in `[0, 1]`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Validation` if `samples` is empty.
    fn evaluate(&self, samples: &[Sample]) -> Result<f64>;

    /// Class scores for one image, indexed by label.
    ///
    /// # Errors
    ///
    /// Returns an error if the tensor does not fit the model.
    fn forward(&self, tensor: &ImageTensor) -> Result<Vec<f32>>;

    /// Serialize the learned weights.
    ///
    /// # Errors
    ///
    /// Returns an error if the weights cannot be encoded.
    fn serialize(&self) -> Result<Vec<u8>>;
}

/// Factory for a [`Classifier`] type.
pub trait ClassifierBuilder: Send + Sync {
    /// Concrete model type.
    type Model: Classifier;

    /// Fresh, untrained model for `params` over `num_classes` outputs.
    ///
    /// All randomness (initialization, dropout, shuffling) derives from `seed`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Validation` if the configuration cannot be built.
    fn build(&self, params: &HyperparameterSet, num_classes: usize, seed: u64)
        -> Result<Self::Model>;

    /// Restore a model from [`Classifier::serialize`] output.
    ///
    /// # Errors
    ///
    /// Returns `Error::StorageError` if the bytes are not a valid encoding.
    fn deserialize(&self, bytes: &[u8]) -> Result<Self::Model>;
}

/// Index of the largest score; the first one wins ties.
#[must_use]
pub fn argmax(scores: &[f32]) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (i, &s) in scores.iter().enumerate() {
        match best {
            Some((_, b)) if s <= b || s.is_nan() => {}
            _ if s.is_nan() => {}
            _ => best = Some((i, s)),
        }
    }
    best.map(|(i, _)| i)
}
