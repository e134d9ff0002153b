//! Labeled image datasets
//!
//! Layout on disk is one subdirectory per class:
//!
//! ```text
//! root/
//! ├── cloudy/      *.jpg | *.jpeg | *.png
//! ├── desert/
//! ├── green_area/
//! └── water/
//! ```
//!
//! Class names are sorted to form the [`LabelMapping`], which is frozen into
//! the finalized artifact and never re-derived at serving time.

use std::borrow::Cow;
use std::path::{Path, PathBuf};

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rayon::prelude::*;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::preprocess::{Augmenter, ImageTensor, Preprocessor};
use crate::config::DataConfig;
use crate::{Error, Result};

const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

/// Enumerate `(path, label)` pairs under `root`, deterministically ordered.
///
/// # Errors
///
/// Returns `Error::Io` if `root` cannot be read.
pub fn list_labeled_images(root: &Path) -> Result<Vec<(PathBuf, String)>> {
    let mut class_dirs = Vec::new();
    for entry in std::fs::read_dir(root)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            if let Some(name) = entry.file_name().to_str() {
                class_dirs.push(name.to_string());
            }
        }
    }
    class_dirs.sort();

    let mut pairs = Vec::new();
    for class in class_dirs {
        let mut files: Vec<PathBuf> = std::fs::read_dir(root.join(&class))?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.is_file() && has_image_extension(p))
            .collect();
        files.sort();
        pairs.extend(files.into_iter().map(|p| (p, class.clone())));
    }
    Ok(pairs)
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
}

/// Bijection between class names and output indices.
///
/// Serialized as the ordered list of names; index `i` is the `i`-th name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct LabelMapping {
    names: Vec<String>,
    #[serde(skip)]
    index: FxHashMap<String, usize>,
}

impl LabelMapping {
    /// Mapping over `names` in the given order.
    ///
    /// # Errors
    ///
    /// Returns `Error::Validation` for an empty list or duplicate names.
    pub fn new(names: Vec<String>) -> Result<Self> {
        if names.is_empty() {
            return Err(Error::Validation("label mapping is empty".to_string()));
        }
        let mut index = FxHashMap::default();
        for (i, name) in names.iter().enumerate() {
            if index.insert(name.clone(), i).is_some() {
                return Err(Error::Validation(format!("duplicate label '{name}'")));
            }
        }
        Ok(Self { names, index })
    }

    /// Mapping over the sorted unique labels of `labels`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Validation` if `labels` is empty.
    pub fn from_labels<'a>(labels: impl IntoIterator<Item = &'a str>) -> Result<Self> {
        let mut names: Vec<String> = labels.into_iter().map(str::to_string).collect();
        names.sort();
        names.dedup();
        Self::new(names)
    }

    /// Index of `name`, if present (case-sensitive).
    #[must_use]
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    /// Name at `index`, if in range.
    #[must_use]
    pub fn name_of(&self, index: usize) -> Option<&str> {
        self.names.get(index).map(String::as_str)
    }

    /// Names in index order.
    #[must_use]
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Number of classes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Always false for a constructed mapping.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

impl TryFrom<Vec<String>> for LabelMapping {
    type Error = Error;

    fn try_from(names: Vec<String>) -> Result<Self> {
        Self::new(names)
    }
}

impl From<LabelMapping> for Vec<String> {
    fn from(mapping: LabelMapping) -> Self {
        mapping.names
    }
}

/// One preprocessed image and its class index.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    tensor: ImageTensor,
    label: usize,
}

impl Sample {
    /// Pair a tensor with its label index.
    #[must_use]
    pub const fn new(tensor: ImageTensor, label: usize) -> Self {
        Self { tensor, label }
    }

    /// Preprocessed image.
    #[must_use]
    pub const fn tensor(&self) -> &ImageTensor {
        &self.tensor
    }

    /// Class index.
    #[must_use]
    pub const fn label(&self) -> usize {
        self.label
    }
}

/// Preprocessed dataset with a fixed stratified train/validation split.
#[derive(Debug, Clone)]
pub struct Dataset {
    labels: LabelMapping,
    train: Vec<Sample>,
    validation: Vec<Sample>,
    augmenter: Option<Augmenter>,
}

impl Dataset {
    /// Load and split the dataset rooted at `config.root`.
    ///
    /// Files that fail to decode are skipped with a warning.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if the tree cannot be listed and
    /// `Error::Validation` if no classes, no images or an empty split remain.
    pub fn load(config: &DataConfig) -> Result<Self> {
        config.validate()?;
        let pairs = list_labeled_images(&config.root)?;
        let labels = LabelMapping::from_labels(pairs.iter().map(|(_, l)| l.as_str()))
            .map_err(|_| {
                Error::Validation(format!(
                    "no class directories with images under {}",
                    config.root.display()
                ))
            })?;

        let pre = Preprocessor::new(config.image_size)?;
        let samples: Vec<Sample> = pairs
            .par_iter()
            .filter_map(|(path, label)| match pre.load_and_normalize_path(path) {
                Ok(tensor) => labels.index_of(label).map(|i| Sample::new(tensor, i)),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping unreadable image");
                    None
                }
            })
            .collect();

        info!(
            root = %config.root.display(),
            classes = labels.len(),
            images = samples.len(),
            skipped = pairs.len() - samples.len(),
            "dataset loaded"
        );

        let augmenter = config.augment.then_some(config.augmentation);
        Self::from_samples(
            labels,
            samples,
            config.validation_fraction,
            config.split_seed,
            augmenter,
        )
    }

    /// Split already-preprocessed samples.
    ///
    /// Each class contributes `round(n * validation_fraction)` samples to
    /// validation, chosen by a shuffle seeded with `split_seed`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Validation` if a label is out of range or either split
    /// ends up empty.
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub fn from_samples(
        labels: LabelMapping,
        samples: Vec<Sample>,
        validation_fraction: f64,
        split_seed: u64,
        augmenter: Option<Augmenter>,
    ) -> Result<Self> {
        if let Some(bad) = samples.iter().find(|s| s.label >= labels.len()) {
            return Err(Error::Validation(format!(
                "sample label {} outside mapping of {} classes",
                bad.label,
                labels.len()
            )));
        }

        let mut by_class: Vec<Vec<Sample>> = vec![Vec::new(); labels.len()];
        for sample in samples {
            by_class[sample.label].push(sample);
        }

        let mut rng = StdRng::seed_from_u64(split_seed);
        let mut train = Vec::new();
        let mut validation = Vec::new();
        for mut class in by_class {
            class.shuffle(&mut rng);
            let n_val = ((class.len() as f64) * validation_fraction).round() as usize;
            let n_val = n_val.min(class.len().saturating_sub(1));
            validation.extend(class.drain(..n_val));
            train.extend(class);
        }

        if train.is_empty() || validation.is_empty() {
            return Err(Error::Validation(format!(
                "split produced {} training and {} validation samples; add more images",
                train.len(),
                validation.len()
            )));
        }

        Ok(Self {
            labels,
            train,
            validation,
            augmenter,
        })
    }

    /// Class mapping derived from the directory names.
    #[must_use]
    pub const fn labels(&self) -> &LabelMapping {
        &self.labels
    }

    /// Training split (unaugmented).
    #[must_use]
    pub fn train(&self) -> &[Sample] {
        &self.train
    }

    /// Validation split.
    #[must_use]
    pub fn validation(&self) -> &[Sample] {
        &self.validation
    }

    /// Training samples for one epoch, augmented when enabled.
    ///
    /// The perturbation depends only on `(seed, epoch, sample index)`.
    #[must_use]
    pub fn training_samples(&self, epoch: usize, seed: u64) -> Cow<'_, [Sample]> {
        let Some(augmenter) = self.augmenter else {
            return Cow::Borrowed(&self.train);
        };
        let base = seed.wrapping_add((epoch as u64).wrapping_mul(self.train.len() as u64));
        let augmented = self
            .train
            .par_iter()
            .enumerate()
            .map(|(i, s)| {
                let mut rng = StdRng::seed_from_u64(base.wrapping_add(i as u64));
                Sample::new(augmenter.augment(&s.tensor, &mut rng), s.label)
            })
            .collect();
        Cow::Owned(augmented)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn samples(per_class: usize, classes: usize) -> Vec<Sample> {
        (0..classes)
            .flat_map(|c| {
                (0..per_class).map(move |i| {
                    Sample::new(ImageTensor::filled(2, 2, [i as f32 / 100.0, 0.0, 0.0]), c)
                })
            })
            .collect()
    }

    fn mapping(n: usize) -> LabelMapping {
        LabelMapping::new((0..n).map(|i| format!("c{i}")).collect()).unwrap()
    }

    #[test]
    fn test_label_mapping_sorted_unique() {
        let m = LabelMapping::from_labels(["water", "cloudy", "water", "desert"]).unwrap();
        assert_eq!(m.names(), ["cloudy", "desert", "water"]);
        assert_eq!(m.index_of("water"), Some(2));
        assert_eq!(m.index_of("Water"), None);
        assert_eq!(m.name_of(1), Some("desert"));
        assert_eq!(m.name_of(3), None);
    }

    #[test]
    fn test_label_mapping_serde() {
        let m = LabelMapping::from_labels(["b", "a"]).unwrap();
        let json = serde_json::to_string(&m).unwrap();
        assert_eq!(json, r#"["a","b"]"#);
        let back: LabelMapping = serde_json::from_str(&json).unwrap();
        assert_eq!(back.index_of("b"), Some(1));

        assert!(serde_json::from_str::<LabelMapping>(r#"["a","a"]"#).is_err());
        assert!(serde_json::from_str::<LabelMapping>("[]").is_err());
    }

    #[test]
    fn test_stratified_split() {
        let ds = Dataset::from_samples(mapping(4), samples(10, 4), 0.2, 42, None).unwrap();
        assert_eq!(ds.validation().len(), 8);
        assert_eq!(ds.train().len(), 32);
        for class in 0..4 {
            assert_eq!(ds.validation().iter().filter(|s| s.label() == class).count(), 2);
        }
    }

    #[test]
    fn test_split_is_seeded() {
        let a = Dataset::from_samples(mapping(2), samples(10, 2), 0.2, 42, None).unwrap();
        let b = Dataset::from_samples(mapping(2), samples(10, 2), 0.2, 42, None).unwrap();
        assert_eq!(a.validation(), b.validation());
    }

    #[test]
    fn test_split_rejects_empty_validation() {
        assert!(matches!(
            Dataset::from_samples(mapping(2), samples(1, 2), 0.2, 42, None),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_training_samples_augmentation() {
        let plain = Dataset::from_samples(mapping(2), samples(5, 2), 0.2, 1, None).unwrap();
        assert!(matches!(plain.training_samples(0, 0), Cow::Borrowed(_)));

        let aug =
            Dataset::from_samples(mapping(2), samples(5, 2), 0.2, 1, Some(Augmenter::default()))
                .unwrap();
        let epoch0 = aug.training_samples(0, 9);
        assert_eq!(epoch0.len(), aug.train().len());
        assert_eq!(epoch0.as_ref(), aug.training_samples(0, 9).as_ref());
    }

    #[test]
    fn test_list_labeled_images() {
        let dir = tempfile::tempdir().unwrap();
        for (class, files) in [("water", vec!["b.PNG", "a.jpg", "notes.txt"]), ("cloudy", vec!["x.jpeg"])] {
            std::fs::create_dir(dir.path().join(class)).unwrap();
            for f in files {
                std::fs::write(dir.path().join(class).join(f), b"").unwrap();
            }
        }
        std::fs::write(dir.path().join("stray.jpg"), b"").unwrap();

        let pairs = list_labeled_images(dir.path()).unwrap();
        let names: Vec<(String, &str)> = pairs
            .iter()
            .map(|(p, l)| (p.file_name().unwrap().to_string_lossy().into_owned(), l.as_str()))
            .collect();
        assert_eq!(
            names,
            vec![
                ("x.jpeg".to_string(), "cloudy"),
                ("a.jpg".to_string(), "water"),
                ("b.PNG".to_string(), "water"),
            ]
        );
    }
}
