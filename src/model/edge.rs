//! `EdgeClassifier` - frozen pooling features + trainable dense head
//!
//! ## Architecture
//!
//! ```text
//! ImageTensor (H x W x 3)
//!   └─ frozen features: GRID x GRID cell means per channel + per-channel std
//!        └─ dropout (inverted, training only)
//!             └─ dense(dense_neurons) + ReLU
//!                  └─ dense(num_classes) + softmax
//! ```
//!
//! Only the head is trained (mini-batch SGD on softmax cross-entropy). The
//! feature extractor has no parameters, which keeps trials cheap enough to
//! run many of them on edge hardware.
//!
//! ## Weight encoding
//!
//! Little-endian: `b"EDGE"`, `u32` format version, `u32` grid, `u32` hidden
//! width, `u32` classes, then `w1 | b1 | w2 | b2` as `f32`.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use trueno::vector::Vector;

use super::classifier::{argmax, Classifier, ClassifierBuilder};
use super::dataset::Sample;
use super::preprocess::{ImageTensor, CHANNELS};
use crate::search::HyperparameterSet;
use crate::{Error, Result};

/// Default pooling grid side.
pub const DEFAULT_GRID: usize = 4;

const MAGIC: &[u8; 4] = b"EDGE";
const FORMAT_VERSION: u32 = 1;
const HEADER_LEN: usize = 4 + 4 * 4;

/// Frozen feature vector of `tensor`: `grid * grid * 3` cell means followed
/// by the 3 per-channel standard deviations.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn extract_features(tensor: &ImageTensor, grid: usize) -> Vec<f32> {
    let (w, h) = (tensor.width() as usize, tensor.height() as usize);
    let data = tensor.data();
    let mut features = Vec::with_capacity(feature_len(grid));

    for gy in 0..grid {
        let (y0, y1) = (gy * h / grid, (gy + 1) * h / grid);
        for gx in 0..grid {
            let (x0, x1) = (gx * w / grid, (gx + 1) * w / grid);
            let mut sum = [0.0f32; CHANNELS];
            for y in y0..y1 {
                let row = &data[(y * w + x0) * CHANNELS..(y * w + x1) * CHANNELS];
                for px in row.chunks_exact(CHANNELS) {
                    for c in 0..CHANNELS {
                        sum[c] += px[c];
                    }
                }
            }
            let n = (y1 - y0) * (x1 - x0);
            features.extend(sum.map(|s| if n == 0 { 0.0 } else { s / n as f32 }));
        }
    }

    let n = (w * h) as f32;
    let mut mean = [0.0f32; CHANNELS];
    let mut sq = [0.0f32; CHANNELS];
    for px in data.chunks_exact(CHANNELS) {
        for c in 0..CHANNELS {
            mean[c] += px[c];
            sq[c] += px[c] * px[c];
        }
    }
    for c in 0..CHANNELS {
        let std = if n > 0.0 {
            let m = mean[c] / n;
            (sq[c] / n - m * m).max(0.0).sqrt()
        } else {
            0.0
        };
        features.push(std);
    }
    features
}

const fn feature_len(grid: usize) -> usize {
    grid * grid * CHANNELS + CHANNELS
}

/// y += a * x, on trueno's SIMD kernels.
fn axpy(a: f32, x: &[f32], y: &mut [f32]) -> Result<()> {
    let result = Vector::from_slice(x)
        .scale(a)
        .and_then(|ax| ax.add(&Vector::from_slice(y)))
        .map_err(|e| Error::Other(format!("SIMD kernel failed: {e}")))?;
    y.copy_from_slice(result.as_slice());
    Ok(())
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn softmax(logits: &mut [f32]) {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let mut total = 0.0;
    for v in logits.iter_mut() {
        *v = (*v - max).exp();
        total += *v;
    }
    for v in logits.iter_mut() {
        *v /= total;
    }
}

/// Trainable head over frozen pooling features.
#[derive(Debug, Clone)]
pub struct EdgeClassifier {
    grid: usize,
    hidden: usize,
    classes: usize,
    w1: Vec<f32>,
    b1: Vec<f32>,
    w2: Vec<f32>,
    b2: Vec<f32>,
    learning_rate: f32,
    dropout_rate: f32,
    batch_size: usize,
    rng: StdRng,
}

/// Per-batch gradient accumulators, same layout as the weights.
struct Gradients {
    w1: Vec<f32>,
    b1: Vec<f32>,
    w2: Vec<f32>,
    b2: Vec<f32>,
}

impl EdgeClassifier {
    fn features(&self) -> usize {
        feature_len(self.grid)
    }

    /// Number of output classes.
    #[must_use]
    pub const fn num_classes(&self) -> usize {
        self.classes
    }

    /// Width of the hidden layer.
    #[must_use]
    pub const fn hidden_units(&self) -> usize {
        self.hidden
    }

    /// Hidden pre-activations and activations for a feature vector.
    fn hidden_layer(&self, x: &[f32]) -> (Vec<f32>, Vec<f32>) {
        let f = self.features();
        let z1: Vec<f32> = (0..self.hidden)
            .map(|j| self.b1[j] + dot(&self.w1[j * f..(j + 1) * f], x))
            .collect();
        let h = z1.iter().map(|z| z.max(0.0)).collect();
        (z1, h)
    }

    fn logits(&self, h: &[f32]) -> Vec<f32> {
        (0..self.classes)
            .map(|c| self.b2[c] + dot(&self.w2[c * self.hidden..(c + 1) * self.hidden], h))
            .collect()
    }

    fn check_input(&self, x: &[f32]) -> Result<()> {
        if x.len() == self.features() {
            Ok(())
        } else {
            Err(Error::Validation(format!(
                "feature length {} does not match model input {}",
                x.len(),
                self.features()
            )))
        }
    }

    /// Accumulate the gradient of one sample; returns its loss.
    fn backprop(&mut self, sample: &Sample, grads: &mut Gradients) -> Result<f32> {
        let mut x = extract_features(sample.tensor(), self.grid);
        self.check_input(&x)?;
        if x.iter().any(|v| !v.is_finite()) {
            return Err(Error::TrialFailure("non-finite input features".to_string()));
        }
        if self.dropout_rate > 0.0 {
            let keep = 1.0 - self.dropout_rate;
            for v in &mut x {
                *v = if self.rng.gen::<f32>() < self.dropout_rate {
                    0.0
                } else {
                    *v / keep
                };
            }
        }

        let (z1, h) = self.hidden_layer(&x);
        let mut probs = self.logits(&h);
        softmax(&mut probs);

        let label = sample.label();
        if label >= self.classes {
            return Err(Error::Validation(format!(
                "label {label} outside {} classes",
                self.classes
            )));
        }
        if !probs[label].is_finite() {
            return Err(Error::TrialFailure("non-finite activations".to_string()));
        }
        let loss = -probs[label].max(1e-12).ln();

        let mut dz2 = probs;
        dz2[label] -= 1.0;
        for (c, &d) in dz2.iter().enumerate() {
            grads.b2[c] += d;
            axpy(d, &h, &mut grads.w2[c * self.hidden..(c + 1) * self.hidden])?;
        }

        let f = self.features();
        for j in 0..self.hidden {
            if z1[j] <= 0.0 {
                continue;
            }
            let dz1: f32 = (0..self.classes)
                .map(|c| self.w2[c * self.hidden + j] * dz2[c])
                .sum();
            grads.b1[j] += dz1;
            axpy(dz1, &x, &mut grads.w1[j * f..(j + 1) * f])?;
        }
        Ok(loss)
    }

    #[allow(clippy::cast_precision_loss)]
    fn apply(&mut self, grads: &Gradients, batch_len: usize) -> Result<()> {
        let step = -self.learning_rate / batch_len as f32;
        axpy(step, &grads.w1, &mut self.w1)?;
        axpy(step, &grads.b1, &mut self.b1)?;
        axpy(step, &grads.w2, &mut self.w2)?;
        axpy(step, &grads.b2, &mut self.b2)?;
        let weights = [&self.w1, &self.b1, &self.w2, &self.b2];
        if weights.iter().any(|w| w.iter().any(|v| !v.is_finite())) {
            return Err(Error::TrialFailure("weights diverged".to_string()));
        }
        Ok(())
    }
}

impl Classifier for EdgeClassifier {
    #[allow(clippy::cast_precision_loss)]
    fn train_epoch(&mut self, samples: &[Sample]) -> Result<f64> {
        if samples.is_empty() {
            return Err(Error::Validation("empty training set".to_string()));
        }
        let mut order: Vec<usize> = (0..samples.len()).collect();
        order.shuffle(&mut self.rng);

        let mut total = 0.0f64;
        for batch in order.chunks(self.batch_size.max(1)) {
            let mut grads = Gradients {
                w1: vec![0.0; self.w1.len()],
                b1: vec![0.0; self.b1.len()],
                w2: vec![0.0; self.w2.len()],
                b2: vec![0.0; self.b2.len()],
            };
            for &i in batch {
                total += f64::from(self.backprop(&samples[i], &mut grads)?);
            }
            if !total.is_finite() {
                return Err(Error::TrialFailure("non-finite training loss".to_string()));
            }
            self.apply(&grads, batch.len())?;
        }

        let loss = total / samples.len() as f64;
        if loss.is_finite() {
            Ok(loss)
        } else {
            Err(Error::TrialFailure("non-finite training loss".to_string()))
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn evaluate(&self, samples: &[Sample]) -> Result<f64> {
        if samples.is_empty() {
            return Err(Error::Validation("empty evaluation set".to_string()));
        }
        let mut correct = 0usize;
        for sample in samples {
            if argmax(&self.forward(sample.tensor())?) == Some(sample.label()) {
                correct += 1;
            }
        }
        Ok(correct as f64 / samples.len() as f64)
    }

    fn forward(&self, tensor: &ImageTensor) -> Result<Vec<f32>> {
        let x = extract_features(tensor, self.grid);
        self.check_input(&x)?;
        let (_, h) = self.hidden_layer(&x);
        let mut scores = self.logits(&h);
        softmax(&mut scores);
        Ok(scores)
    }

    fn serialize(&self) -> Result<Vec<u8>> {
        let header = [self.grid, self.hidden, self.classes]
            .iter()
            .map(|&v| {
                u32::try_from(v).map_err(|_| Error::Other(format!("dimension {v} exceeds u32")))
            })
            .collect::<Result<Vec<u32>>>()?;

        let params = self.w1.len() + self.b1.len() + self.w2.len() + self.b2.len();
        let mut bytes = Vec::with_capacity(HEADER_LEN + params * 4);
        bytes.extend_from_slice(MAGIC);
        bytes.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        for v in header {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        for v in self.w1.iter().chain(&self.b1).chain(&self.w2).chain(&self.b2) {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        Ok(bytes)
    }
}

/// Builds [`EdgeClassifier`]s.
#[derive(Debug, Clone, Copy)]
pub struct EdgeClassifierBuilder {
    grid: usize,
}

impl Default for EdgeClassifierBuilder {
    fn default() -> Self {
        Self { grid: DEFAULT_GRID }
    }
}

impl EdgeClassifierBuilder {
    /// Builder with a custom pooling grid.
    ///
    /// # Errors
    ///
    /// Returns `Error::Validation` if `grid` is zero.
    pub fn with_grid(grid: usize) -> Result<Self> {
        if grid == 0 {
            return Err(Error::Validation("pooling grid must be positive".to_string()));
        }
        Ok(Self { grid })
    }

    /// Pooling grid side.
    #[must_use]
    pub const fn grid(&self) -> usize {
        self.grid
    }
}

#[allow(clippy::cast_precision_loss)]
fn xavier(rng: &mut StdRng, fan_in: usize, fan_out: usize) -> Vec<f32> {
    let limit = (6.0 / (fan_in + fan_out) as f32).sqrt();
    (0..fan_in * fan_out)
        .map(|_| rng.gen_range(-limit..limit))
        .collect()
}

impl ClassifierBuilder for EdgeClassifierBuilder {
    type Model = EdgeClassifier;

    #[allow(clippy::cast_possible_truncation)]
    fn build(&self, params: &HyperparameterSet, num_classes: usize, seed: u64) -> Result<EdgeClassifier> {
        if num_classes == 0 {
            return Err(Error::Validation("classifier needs at least one class".to_string()));
        }
        let features = feature_len(self.grid);
        let hidden = params.dense_neurons() as usize;
        let mut rng = StdRng::seed_from_u64(seed);
        let w1 = xavier(&mut rng, features, hidden);
        let w2 = xavier(&mut rng, hidden, num_classes);

        Ok(EdgeClassifier {
            grid: self.grid,
            hidden,
            classes: num_classes,
            w1,
            b1: vec![0.0; hidden],
            w2,
            b2: vec![0.0; num_classes],
            learning_rate: params.learning_rate() as f32,
            dropout_rate: params.dropout_rate() as f32,
            batch_size: params.batch_size() as usize,
            rng,
        })
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<EdgeClassifier> {
        let corrupt = |why: &str| Error::StorageError(format!("invalid model weights: {why}"));
        if bytes.len() < HEADER_LEN || &bytes[..4] != MAGIC {
            return Err(corrupt("missing header"));
        }
        let word = |i: usize| {
            let start = 4 + i * 4;
            u32::from_le_bytes([bytes[start], bytes[start + 1], bytes[start + 2], bytes[start + 3]])
        };
        if word(0) != FORMAT_VERSION {
            return Err(corrupt(&format!("unsupported format version {}", word(0))));
        }
        let (grid, hidden, classes) = (word(1) as usize, word(2) as usize, word(3) as usize);
        if grid == 0 || hidden == 0 || classes == 0 {
            return Err(corrupt("zero dimension"));
        }

        let overflow = || corrupt("dimensions overflow");
        let features = grid
            .checked_mul(grid)
            .and_then(|g| g.checked_mul(CHANNELS))
            .and_then(|g| g.checked_add(CHANNELS))
            .ok_or_else(overflow)?;
        let sizes = [
            features.checked_mul(hidden).ok_or_else(overflow)?,
            hidden,
            hidden.checked_mul(classes).ok_or_else(overflow)?,
            classes,
        ];
        let expected = sizes
            .iter()
            .try_fold(0usize, |acc, n| acc.checked_add(*n))
            .and_then(|n| n.checked_mul(4))
            .and_then(|n| n.checked_add(HEADER_LEN))
            .ok_or_else(overflow)?;
        if bytes.len() != expected {
            return Err(corrupt(&format!(
                "expected {expected} bytes, found {}",
                bytes.len()
            )));
        }

        let mut values = bytes[HEADER_LEN..]
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]));
        let mut take = |n: usize| values.by_ref().take(n).collect::<Vec<f32>>();
        let (w1, b1, w2, b2) = (take(sizes[0]), take(sizes[1]), take(sizes[2]), take(sizes[3]));

        Ok(EdgeClassifier {
            grid,
            hidden,
            classes,
            w1,
            b1,
            w2,
            b2,
            learning_rate: 0.0,
            dropout_rate: 0.0,
            batch_size: 1,
            rng: StdRng::seed_from_u64(0),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::SearchSpace;

    fn params(lr: f64, dropout: f64) -> HyperparameterSet {
        HyperparameterSet::new(&SearchSpace::default(), lr, dropout, 64, 16, 5).unwrap()
    }

    /// Two trivially separable classes: dark red vs bright blue images.
    fn toy_samples() -> Vec<Sample> {
        (0..24)
            .map(|i| {
                let jitter = (i % 6) as f32 * 0.02;
                if i % 2 == 0 {
                    Sample::new(ImageTensor::filled(8, 8, [0.8 + jitter, 0.1, 0.1]), 0)
                } else {
                    Sample::new(ImageTensor::filled(8, 8, [0.1, 0.1, 0.8 + jitter]), 1)
                }
            })
            .collect()
    }

    #[test]
    fn test_feature_layout() {
        let t = ImageTensor::filled(8, 8, [0.2, 0.4, 0.6]);
        let f = extract_features(&t, 4);
        assert_eq!(f.len(), 51);
        assert!((f[0] - 0.2).abs() < 1e-6);
        assert!((f[47] - 0.6).abs() < 1e-6);
        assert!(f[48..].iter().all(|s| s.abs() < 1e-3));
    }

    #[test]
    fn test_features_on_tiny_image() {
        let t = ImageTensor::filled(2, 2, [1.0, 1.0, 1.0]);
        let f = extract_features(&t, 4);
        assert_eq!(f.len(), 51);
        assert!(f.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_forward_is_distribution() {
        let model = EdgeClassifierBuilder::default()
            .build(&params(1e-2, 0.1), 4, 1)
            .unwrap();
        let scores = model.forward(&ImageTensor::filled(8, 8, [0.3, 0.3, 0.3])).unwrap();
        assert_eq!(scores.len(), 4);
        assert!((scores.iter().sum::<f32>() - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_learns_separable_classes() {
        let samples = toy_samples();
        let mut model = EdgeClassifierBuilder::default()
            .build(&params(0.1, 0.1), 2, 3)
            .unwrap();
        for _ in 0..40 {
            model.train_epoch(&samples).unwrap();
        }
        assert!(model.evaluate(&samples).unwrap() > 0.95);
    }

    #[test]
    fn test_seeded_training_is_deterministic() {
        let samples = toy_samples();
        let builder = EdgeClassifierBuilder::default();
        let mut a = builder.build(&params(0.05, 0.3), 2, 11).unwrap();
        let mut b = builder.build(&params(0.05, 0.3), 2, 11).unwrap();
        for _ in 0..3 {
            a.train_epoch(&samples).unwrap();
            b.train_epoch(&samples).unwrap();
        }
        assert_eq!(a.serialize().unwrap(), b.serialize().unwrap());
    }

    #[test]
    fn test_serialize_round_trip() {
        let builder = EdgeClassifierBuilder::default();
        let mut model = builder.build(&params(0.05, 0.2), 3, 5).unwrap();
        model.train_epoch(&toy_samples()).unwrap();

        let restored = builder.deserialize(&model.serialize().unwrap()).unwrap();
        let probe = ImageTensor::filled(8, 8, [0.7, 0.2, 0.1]);
        assert_eq!(model.forward(&probe).unwrap(), restored.forward(&probe).unwrap());
    }

    #[test]
    fn test_deserialize_rejects_garbage() {
        let builder = EdgeClassifierBuilder::default();
        assert!(matches!(builder.deserialize(b"EDGE"), Err(Error::StorageError(_))));
        assert!(matches!(
            builder.deserialize(&[0u8; 64]),
            Err(Error::StorageError(_))
        ));

        let mut bytes = builder
            .build(&params(0.05, 0.2), 2, 5)
            .unwrap()
            .serialize()
            .unwrap();
        bytes.pop();
        assert!(matches!(builder.deserialize(&bytes), Err(Error::StorageError(_))));
    }

    #[test]
    fn test_deserialize_rejects_overflowing_dimensions() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(MAGIC);
        for word in [FORMAT_VERSION, u32::MAX, u32::MAX, u32::MAX] {
            bytes.extend_from_slice(&word.to_le_bytes());
        }
        bytes.extend_from_slice(&[0u8; 16]);
        assert!(matches!(
            EdgeClassifierBuilder::default().deserialize(&bytes),
            Err(Error::StorageError(_))
        ));
    }

    #[test]
    fn test_non_finite_input_fails_trial() {
        let mut model = EdgeClassifierBuilder::default()
            .build(&params(0.05, 0.1), 2, 0)
            .unwrap();
        let mut samples = toy_samples();
        samples.push(Sample::new(ImageTensor::filled(8, 8, [f32::NAN, 0.1, 0.1]), 0));
        assert!(matches!(
            model.train_epoch(&samples),
            Err(Error::TrialFailure(_))
        ));
    }
}
