//! Crop recommendation from soil and climate readings.
//!
//! A [`PredictionService`] is built once from two artifacts, a label mapping
//! and a random-forest classifier, and then answers any number of
//! [`FeatureVector`] lookups without further I/O.

pub mod commands;
pub mod config;
pub mod error;
pub mod features;
pub mod labels;
pub mod model;
pub mod service;

pub use error::{PredictionError, Result};
pub use features::{FeatureVector, Number, FEATURE_COUNT, FEATURE_NAMES};
pub use labels::{LabelMapping, ReverseLabelMapping};
pub use model::{Classifier, ForestArtifact, RandomForest};
pub use service::PredictionService;
