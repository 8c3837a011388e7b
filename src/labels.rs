use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;

use tracing::debug;

use crate::error::{PredictionError, Result};

/// Crop name to class index, as written by the training run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelMapping {
    forward: HashMap<String, usize>,
}

/// Class index to crop name. Only built through [`LabelMapping::reverse`],
/// so every index here maps back to exactly one name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReverseLabelMapping {
    by_index: BTreeMap<usize, String>,
}

impl LabelMapping {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        debug!("Loading label mapping from {}", path.display());

        let raw = fs::read_to_string(path).map_err(|e| PredictionError::from_io(path, e))?;
        let forward: HashMap<String, usize> = serde_json::from_str(&raw).map_err(|e| {
            PredictionError::corrupt(path, format!("expected a flat name -> index object: {}", e))
        })?;
        if forward.is_empty() {
            return Err(PredictionError::corrupt(path, "mapping is empty"));
        }

        debug!("Loaded {} labels from {}", forward.len(), path.display());
        Ok(Self { forward })
    }

    pub fn from_pairs<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, usize)>,
        S: Into<String>,
    {
        Self {
            forward: pairs.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.forward.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.forward.len()
    }

    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, usize)> {
        self.forward.iter().map(|(k, &v)| (k.as_str(), v))
    }

    pub fn reverse(&self) -> Result<ReverseLabelMapping> {
        // Sorted by name so the reported collision does not depend on hash order.
        let mut pairs: Vec<_> = self.iter().collect();
        pairs.sort_unstable();

        let mut by_index = BTreeMap::new();
        for (name, index) in pairs {
            if let Some(first) = by_index.insert(index, name.to_string()) {
                return Err(PredictionError::DuplicateIndex {
                    index,
                    first,
                    second: name.to_string(),
                });
            }
        }
        Ok(ReverseLabelMapping { by_index })
    }
}

impl ReverseLabelMapping {
    pub fn get(&self, index: usize) -> Option<&str> {
        self.by_index.get(&index).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.by_index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_index.is_empty()
    }

    /// Entries in ascending index order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &str)> {
        self.by_index.iter().map(|(&i, name)| (i, name.as_str()))
    }
}
