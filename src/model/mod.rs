//! Model capabilities: preprocessing, datasets and classifiers
//!
//! The search and serving layers only talk to the [`Classifier`] and
//! [`ClassifierBuilder`] traits; [`EdgeClassifier`] is the bundled
//! implementation.

mod classifier;
pub mod dataset;
mod edge;
pub mod preprocess;

pub use classifier::{argmax, Classifier, ClassifierBuilder};
pub use dataset::{list_labeled_images, Dataset, LabelMapping, Sample};
pub use edge::{extract_features, EdgeClassifier, EdgeClassifierBuilder, DEFAULT_GRID};
pub use preprocess::{Augmenter, ImageTensor, Preprocessor, DEFAULT_IMAGE_SIZE};
