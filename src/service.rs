use rayon::prelude::*;
use tracing::{debug, info};

use crate::config::State;
use crate::error::{PredictionError, Result};
use crate::features::{FeatureVector, Number};
use crate::labels::{LabelMapping, ReverseLabelMapping};
use crate::model::{Classifier, RandomForest};

/// Loaded classifier plus label lookup. Immutable once built, so one handle
/// can serve any number of threads.
pub struct PredictionService<C = RandomForest> {
    classifier: C,
    labels: ReverseLabelMapping,
}

impl PredictionService<RandomForest> {
    /// Loads the label mapping and classifier named by `state`.
    pub fn initialize(state: &State) -> Result<Self> {
        let mapping = LabelMapping::load(&state.label_mapping_path)?;
        let classifier = RandomForest::load(&state.model_path, &state.model_key)?;
        let service = Self::from_parts(classifier, mapping)?;
        info!(
            "Prediction service ready: {} crops, model '{}'",
            service.labels.len(),
            state.model_path
        );
        Ok(service)
    }
}

impl<C: Classifier> PredictionService<C> {
    pub fn from_parts(classifier: C, mapping: LabelMapping) -> Result<Self> {
        let labels = mapping.reverse()?;
        Ok(Self { classifier, labels })
    }

    pub fn predict(&self, features: &FeatureVector) -> Result<String> {
        let predicted = self.classifier.predict(std::slice::from_ref(features));
        let index = match predicted.as_slice() {
            [index] => *index,
            other => {
                return Err(PredictionError::PredictionCountMismatch {
                    expected: 1,
                    got: other.len(),
                })
            }
        };
        let crop = self.resolve(index)?;
        debug!("Predicted class {} ({}) for {:?}", index, crop, features.values());
        Ok(crop)
    }

    /// Validates raw inputs in column order, then predicts.
    pub fn predict_values(&self, values: &[Number]) -> Result<String> {
        let features = FeatureVector::new(values)?;
        self.predict(&features)
    }

    /// Predicts each row independently, in parallel; results keep input order.
    pub fn predict_batch(&self, rows: &[FeatureVector]) -> Vec<Result<String>> {
        rows.par_iter().map(|row| self.predict(row)).collect()
    }

    /// Crop names in class-index order.
    pub fn crop_names(&self) -> impl Iterator<Item = (usize, &str)> {
        self.labels.iter()
    }

    fn resolve(&self, index: usize) -> Result<String> {
        self.labels
            .get(index)
            .map(str::to_string)
            .ok_or(PredictionError::UnknownClassIndex(index))
    }
}
