//! Shared fixtures: scripted classifiers and tiny in-memory datasets.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use edge_tune::model::{Classifier, ClassifierBuilder, Dataset, ImageTensor, LabelMapping, Sample};
use edge_tune::search::HyperparameterSet;
use edge_tune::{Error, Result};

/// Validation metric the scripted model reports after `epoch` (0-based).
///
/// Rises with the epoch and with the learning rate, so higher learning
/// rates dominate at every epoch.
pub fn scripted_metric(learning_rate: f64, epoch: usize) -> f64 {
    let progress = 1.0 - 1.0 / (epoch as f64 + 2.0);
    (progress * (0.5 + 4.0 * learning_rate)).min(1.0)
}

/// Classifier whose metric curve is a pure function of its hyperparameters.
#[derive(Debug)]
pub struct ScriptedModel {
    learning_rate: f64,
    epochs_trained: usize,
    fail: bool,
    nan_metric: bool,
    scores: Vec<f32>,
    forward_calls: Arc<AtomicUsize>,
}

impl Classifier for ScriptedModel {
    fn train_epoch(&mut self, _samples: &[Sample]) -> Result<f64> {
        if self.fail {
            return Err(Error::TrialFailure("loss diverged".to_string()));
        }
        self.epochs_trained += 1;
        Ok(1.0 / self.epochs_trained as f64)
    }

    fn evaluate(&self, samples: &[Sample]) -> Result<f64> {
        if samples.is_empty() {
            return Err(Error::Validation("empty evaluation set".to_string()));
        }
        if self.nan_metric {
            return Ok(f64::NAN);
        }
        Ok(scripted_metric(
            self.learning_rate,
            self.epochs_trained.saturating_sub(1),
        ))
    }

    fn forward(&self, _tensor: &ImageTensor) -> Result<Vec<f32>> {
        self.forward_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.scores.clone())
    }

    fn serialize(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(&self.scores)?)
    }
}

/// Builds [`ScriptedModel`]s; trials above `fail_above_lr` diverge and
/// `nan_metric` models evaluate to NaN.
#[derive(Debug, Clone, Default)]
pub struct ScriptedBuilder {
    pub scores: Vec<f32>,
    pub fail_above_lr: Option<f64>,
    pub nan_metric: bool,
    pub forward_calls: Arc<AtomicUsize>,
}

impl ScriptedBuilder {
    pub fn with_scores(scores: Vec<f32>) -> Self {
        Self {
            scores,
            ..Self::default()
        }
    }

    pub fn failing_above(learning_rate: f64) -> Self {
        Self {
            fail_above_lr: Some(learning_rate),
            ..Self::default()
        }
    }

    pub fn forward_count(&self) -> usize {
        self.forward_calls.load(Ordering::SeqCst)
    }
}

impl ClassifierBuilder for ScriptedBuilder {
    type Model = ScriptedModel;

    fn build(&self, params: &HyperparameterSet, num_classes: usize, _seed: u64) -> Result<ScriptedModel> {
        let scores = if self.scores.is_empty() {
            vec![0.0; num_classes]
        } else {
            self.scores.clone()
        };
        Ok(ScriptedModel {
            learning_rate: params.learning_rate(),
            epochs_trained: 0,
            fail: self
                .fail_above_lr
                .is_some_and(|limit| params.learning_rate() > limit),
            nan_metric: self.nan_metric,
            scores,
            forward_calls: Arc::clone(&self.forward_calls),
        })
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<ScriptedModel> {
        let scores: Vec<f32> = serde_json::from_slice(bytes)
            .map_err(|e| Error::StorageError(format!("bad scripted weights: {e}")))?;
        Ok(ScriptedModel {
            learning_rate: 0.0,
            epochs_trained: 0,
            fail: false,
            nan_metric: false,
            scores,
            forward_calls: Arc::clone(&self.forward_calls),
        })
    }
}

/// Two flat-colour classes, four images each, half held out.
pub fn tiny_dataset() -> Dataset {
    let labels = LabelMapping::new(vec!["dark".to_string(), "light".to_string()]).unwrap();
    let mut samples = Vec::new();
    for i in 0..4 {
        let shade = i as f32 * 0.02;
        samples.push(Sample::new(ImageTensor::filled(4, 4, [shade; 3]), 0));
        samples.push(Sample::new(ImageTensor::filled(4, 4, [0.9 - shade; 3]), 1));
    }
    Dataset::from_samples(labels, samples, 0.5, 7, None).unwrap()
}

/// Encode a solid-colour PNG.
pub fn png_bytes(width: u32, height: u32, rgb: [u8; 3]) -> Vec<u8> {
    let img = image::RgbImage::from_pixel(width, height, image::Rgb(rgb));
    let mut out = std::io::Cursor::new(Vec::new());
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut out, image::ImageFormat::Png)
        .unwrap();
    out.into_inner()
}
