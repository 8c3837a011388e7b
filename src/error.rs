use std::path::PathBuf;

use thiserror::Error;

/// Everything that can go wrong while loading artifacts or recommending a crop.
#[derive(Error, Debug)]
pub enum PredictionError {
    #[error("artifact not found at '{}'", path.display())]
    ArtifactNotFound { path: PathBuf },
    #[error("artifact at '{}' is corrupt: {reason}", path.display())]
    ArtifactCorrupt { path: PathBuf, reason: String },
    #[error("class index {index} is assigned to both '{first}' and '{second}'")]
    DuplicateIndex {
        index: usize,
        first: String,
        second: String,
    },
    #[error("invalid feature vector: {0}")]
    InvalidFeatureVector(String),
    #[error("model predicted class index {0}, which the label mapping does not define")]
    UnknownClassIndex(usize),
    #[error("classifier returned {got} predictions for {expected} rows")]
    PredictionCountMismatch { expected: usize, got: usize },
}

impl PredictionError {
    pub(crate) fn corrupt(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        PredictionError::ArtifactCorrupt {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Map a read failure onto the artifact taxonomy.
    pub(crate) fn from_io(path: impl Into<PathBuf>, err: std::io::Error) -> Self {
        let path = path.into();
        if err.kind() == std::io::ErrorKind::NotFound {
            PredictionError::ArtifactNotFound { path }
        } else {
            PredictionError::corrupt(path, format!("unreadable: {}", err))
        }
    }

    /// Artifact problems: retrying or re-prompting for input will not help.
    /// Only `InvalidFeatureVector` and `UnknownClassIndex` are per-call.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            PredictionError::ArtifactNotFound { .. }
                | PredictionError::ArtifactCorrupt { .. }
                | PredictionError::DuplicateIndex { .. }
                | PredictionError::PredictionCountMismatch { .. }
        )
    }
}

pub type Result<T, E = PredictionError> = std::result::Result<T, E>;
