use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::{PredictionError, Result};
use crate::features::{FeatureVector, Number, FEATURE_COUNT};

/// Anything that turns feature rows into class indices. Implementations must
/// be safe to evaluate from several threads at once.
pub trait Classifier: Send + Sync {
    /// One predicted class index per row, in row order.
    fn predict(&self, rows: &[FeatureVector]) -> Vec<usize>;
}

/// On-disk layout of one fitted tree: parallel per-node arrays in preorder.
/// A node whose `children_left` is negative is a leaf.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct TreeArrays {
    pub children_left: Vec<i64>,
    pub children_right: Vec<i64>,
    pub feature: Vec<i64>,
    pub threshold: Vec<Number>,
    /// Per-class weights at each node; only leaf rows are read.
    pub value: Vec<Vec<Number>>,
}

/// On-disk layout of the whole ensemble, stored under a key in the artifact.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct ForestArtifact {
    pub n_features: usize,
    /// Class index for each position of a leaf's weight vector.
    #[serde(default)]
    pub classes: Option<Vec<usize>>,
    pub trees: Vec<TreeArrays>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArtifactFormat {
    Json,
    Bincode,
}

impl ArtifactFormat {
    fn from_path(path: &Path) -> Self {
        if is_bincode_path(path) {
            ArtifactFormat::Bincode
        } else {
            ArtifactFormat::Json
        }
    }
}

/// Artifacts ending in `.bin` are read as bincode; everything else as JSON.
pub fn is_bincode_path(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some("bin")
}

impl ForestArtifact {
    pub fn read<P: AsRef<Path>>(path: P, key: &str) -> Result<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path).map_err(|e| PredictionError::from_io(path, e))?;

        match ArtifactFormat::from_path(path) {
            ArtifactFormat::Json => {
                let root: Value = serde_json::from_slice(&bytes)
                    .map_err(|e| PredictionError::corrupt(path, format!("invalid JSON: {}", e)))?;
                let entry = root.get(key).ok_or_else(|| missing_key(path, key))?;
                ForestArtifact::deserialize(entry).map_err(|e| {
                    PredictionError::corrupt(path, format!("'{}' is not a forest: {}", key, e))
                })
            }
            ArtifactFormat::Bincode => {
                let mut root: BTreeMap<String, ForestArtifact> =
                    bincode::deserialize(&bytes).map_err(|e| {
                        PredictionError::corrupt(path, format!("invalid bincode: {}", e))
                    })?;
                root.remove(key).ok_or_else(|| missing_key(path, key))
            }
        }
    }

    /// Encodes the artifact in the layout [`ForestArtifact::read`] expects
    /// for `.bin` files.
    pub fn encode_bincode(&self, key: &str) -> bincode::Result<Vec<u8>> {
        let mut root = BTreeMap::new();
        root.insert(key.to_string(), self);
        bincode::serialize(&root)
    }
}

fn missing_key(path: &Path, key: &str) -> PredictionError {
    PredictionError::corrupt(path, format!("no object under key '{}'", key))
}

#[derive(Debug, Clone)]
enum Node {
    Split {
        feature: usize,
        threshold: Number,
        left: usize,
        right: usize,
    },
    /// Normalized class distribution.
    Leaf(Vec<Number>),
}

#[derive(Debug, Clone)]
struct DecisionTree {
    nodes: Vec<Node>,
}

impl DecisionTree {
    fn from_arrays(arrays: &TreeArrays, n_classes: usize) -> std::result::Result<Self, String> {
        let n = arrays.children_left.len();
        if n == 0 {
            return Err("tree has no nodes".to_string());
        }
        if arrays.children_right.len() != n
            || arrays.feature.len() != n
            || arrays.threshold.len() != n
            || arrays.value.len() != n
        {
            return Err("node arrays have different lengths".to_string());
        }

        let child = |parent: usize, raw: i64| -> std::result::Result<usize, String> {
            // Preorder layout: children always follow their parent, so walks terminate.
            match usize::try_from(raw) {
                Ok(c) if c > parent && c < n => Ok(c),
                _ => Err(format!("node {} has invalid child {}", parent, raw)),
            }
        };

        let mut nodes = Vec::with_capacity(n);
        for i in 0..n {
            if arrays.children_left[i] < 0 {
                let weights = &arrays.value[i];
                if weights.len() != n_classes {
                    return Err(format!(
                        "leaf {} has {} class weights, expected {}",
                        i,
                        weights.len(),
                        n_classes
                    ));
                }
                if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
                    return Err(format!("leaf {} has a negative or non-finite weight", i));
                }
                let total: Number = weights.iter().sum();
                if total <= 0.0 {
                    return Err(format!("leaf {} has no weight", i));
                }
                nodes.push(Node::Leaf(weights.iter().map(|w| w / total).collect()));
            } else {
                let feature = usize::try_from(arrays.feature[i])
                    .ok()
                    .filter(|&f| f < FEATURE_COUNT)
                    .ok_or_else(|| {
                        format!("node {} splits on unknown feature {}", i, arrays.feature[i])
                    })?;
                let threshold = arrays.threshold[i];
                if !threshold.is_finite() {
                    return Err(format!("node {} has a non-finite threshold", i));
                }
                nodes.push(Node::Split {
                    feature,
                    threshold,
                    left: child(i, arrays.children_left[i])?,
                    right: child(i, arrays.children_right[i])?,
                });
            }
        }
        Ok(Self { nodes })
    }

    fn leaf_for(&self, row: &[Number; FEATURE_COUNT]) -> &[Number] {
        let mut idx = 0;
        loop {
            match &self.nodes[idx] {
                Node::Leaf(distribution) => return distribution,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    // Trees were fit on single-precision inputs.
                    let x = row[*feature] as f32 as Number;
                    idx = if x <= *threshold { *left } else { *right };
                }
            }
        }
    }
}

/// Soft-voting random forest evaluated natively from a [`ForestArtifact`].
#[derive(Debug, Clone)]
pub struct RandomForest {
    classes: Vec<usize>,
    trees: Vec<DecisionTree>,
}

impl RandomForest {
    pub fn load<P: AsRef<Path>>(path: P, key: &str) -> Result<Self> {
        let path = path.as_ref();
        debug!("Loading classifier '{}' from {}", key, path.display());
        let artifact = ForestArtifact::read(path, key)?;
        let forest = Self::from_artifact(&artifact)
            .map_err(|reason| PredictionError::corrupt(path, reason))?;
        debug!(
            "Loaded forest with {} trees over {} classes",
            forest.trees.len(),
            forest.classes.len()
        );
        Ok(forest)
    }

    pub fn from_artifact(artifact: &ForestArtifact) -> std::result::Result<Self, String> {
        if artifact.n_features != FEATURE_COUNT {
            return Err(format!(
                "model expects {} features, expected {}",
                artifact.n_features, FEATURE_COUNT
            ));
        }
        let first = artifact.trees.first().ok_or_else(|| "forest has no trees".to_string())?;

        let classes = match &artifact.classes {
            Some(classes) => classes.clone(),
            None => {
                let width = first
                    .children_left
                    .iter()
                    .zip(&first.value)
                    .find(|(left, _)| **left < 0)
                    .map(|(_, v)| v.len())
                    .ok_or_else(|| "tree 0 has no leaves".to_string())?;
                (0..width).collect()
            }
        };
        if classes.is_empty() {
            return Err("forest has no classes".to_string());
        }

        let trees = artifact
            .trees
            .iter()
            .enumerate()
            .map(|(i, t)| {
                DecisionTree::from_arrays(t, classes.len())
                    .map_err(|e| format!("tree {}: {}", i, e))
            })
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(Self { classes, trees })
    }

    pub fn classes(&self) -> &[usize] {
        &self.classes
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    fn predict_row(&self, row: &FeatureVector) -> usize {
        let mut votes = vec![0.0; self.classes.len()];
        for tree in &self.trees {
            for (acc, p) in votes.iter_mut().zip(tree.leaf_for(row.values())) {
                *acc += p;
            }
        }
        // First maximum wins ties.
        let mut best = 0;
        for (i, v) in votes.iter().enumerate() {
            if *v > votes[best] {
                best = i;
            }
        }
        self.classes[best]
    }
}

impl Classifier for RandomForest {
    fn predict(&self, rows: &[FeatureVector]) -> Vec<usize> {
        rows.iter().map(|row| self.predict_row(row)).collect()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    /// Two-class stump on nitrogen: N <= 50 votes for `classes[1]`, otherwise `classes[0]`.
    pub(crate) fn stump(classes: Option<Vec<usize>>) -> ForestArtifact {
        ForestArtifact {
            n_features: FEATURE_COUNT,
            classes,
            trees: vec![TreeArrays {
                children_left: vec![1, -1, -1],
                children_right: vec![2, -1, -1],
                feature: vec![0, -2, -2],
                threshold: vec![50.0, -2.0, -2.0],
                value: vec![vec![5.0, 5.0], vec![0.0, 3.0], vec![4.0, 1.0]],
            }],
        }
    }

    fn row(n: Number) -> FeatureVector {
        FeatureVector::new(&[n, 40.0, 40.0, 25.0, 80.0, 6.5, 200.0]).unwrap()
    }

    #[test]
    fn stump_splits_on_threshold() {
        let forest = RandomForest::from_artifact(&stump(None)).unwrap();
        assert_eq!(forest.classes(), &[0, 1]);
        assert_eq!(forest.predict(&[row(30.0), row(50.0), row(80.0)]), vec![1, 1, 0]);
    }

    #[test]
    fn classes_remap_positions() {
        let forest = RandomForest::from_artifact(&stump(Some(vec![3, 9]))).unwrap();
        assert_eq!(forest.predict(&[row(10.0), row(90.0)]), vec![9, 3]);
    }

    #[test]
    fn soft_vote_uses_normalized_leaves() {
        // Raw counts favour class 0 (101 vs 3); normalized votes favour class 1 (1.33 vs 1.67).
        let leaf = |weights: Vec<Number>| TreeArrays {
            children_left: vec![-1],
            children_right: vec![-1],
            feature: vec![-2],
            threshold: vec![-2.0],
            value: vec![weights],
        };
        let artifact = ForestArtifact {
            n_features: FEATURE_COUNT,
            classes: None,
            trees: vec![leaf(vec![100.0, 0.0]), leaf(vec![1.0, 2.0]), leaf(vec![0.0, 1.0])],
        };
        let forest = RandomForest::from_artifact(&artifact).unwrap();
        assert_eq!(forest.n_trees(), 3);
        assert_eq!(forest.predict(&[row(0.0)]), vec![1]);
    }

    #[test]
    fn ties_go_to_first_class() {
        let mut artifact = stump(None);
        artifact.trees[0].value[1] = vec![2.0, 2.0];
        let forest = RandomForest::from_artifact(&artifact).unwrap();
        assert_eq!(forest.predict(&[row(10.0)]), vec![0]);
    }

    #[test]
    fn rejects_malformed_forests() {
        let mut wrong_width = stump(None);
        wrong_width.n_features = 6;

        let mut no_trees = stump(None);
        no_trees.trees.clear();

        let mut cycle = stump(None);
        cycle.trees[0].children_left[0] = 0;

        let mut out_of_range = stump(None);
        out_of_range.trees[0].children_right[0] = 7;

        let mut bad_feature = stump(None);
        bad_feature.trees[0].feature[0] = 7;

        let mut short_leaf = stump(None);
        short_leaf.trees[0].value[2] = vec![1.0];

        let mut empty_leaf = stump(None);
        empty_leaf.trees[0].value[2] = vec![0.0, 0.0];

        let mut ragged = stump(None);
        ragged.trees[0].threshold.pop();

        let mut nan_threshold = stump(None);
        nan_threshold.trees[0].threshold[0] = Number::NAN;

        let mut negative_weight = stump(None);
        negative_weight.trees[0].value[1] = vec![-1.0, 2.0];

        for artifact in [
            wrong_width,
            no_trees,
            cycle,
            out_of_range,
            bad_feature,
            short_leaf,
            empty_leaf,
            ragged,
            nan_threshold,
            negative_weight,
        ] {
            assert!(RandomForest::from_artifact(&artifact).is_err());
        }
    }

    #[test]
    fn inputs_are_rounded_to_single_precision_before_splitting() {
        let forest = RandomForest::from_artifact(&stump(None)).unwrap();
        // 50.000000001 rounds to exactly 50.0 in f32, so it goes left like 50.0 does.
        assert_eq!(forest.predict(&[row(50.000000001)]), vec![1]);
        // 50.00001 survives rounding and goes right.
        assert_eq!(forest.predict(&[row(50.00001)]), vec![0]);
    }

    #[test]
    fn only_bin_extension_means_bincode() {
        assert!(is_bincode_path(Path::new("artifacts/rf.bin")));
        assert!(!is_bincode_path(Path::new("rf.json")));
        assert!(!is_bincode_path(Path::new("rf.bin.json")));
        assert!(!is_bincode_path(Path::new("rf")));
    }

    #[test]
    fn reads_json_under_key_and_ignores_other_keys() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        let doc = json!({ "model": stump(None), "scaler": null, "trained_on": "2024-05-01" });
        file.write_all(doc.to_string().as_bytes()).unwrap();

        let forest = RandomForest::load(file.path(), "model").unwrap();
        assert_eq!(forest.predict(&[row(90.0)]), vec![0]);
    }

    #[test]
    fn missing_key_is_corrupt() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        file.write_all(json!({ "pipeline": stump(None) }).to_string().as_bytes()).unwrap();

        let err = RandomForest::load(file.path(), "model").unwrap_err();
        assert!(matches!(err, PredictionError::ArtifactCorrupt { .. }));
        assert!(err.to_string().contains("'model'"));
    }

    #[test]
    fn bincode_artifact_loads_like_json() {
        let mut file = tempfile::Builder::new().suffix(".bin").tempfile().unwrap();
        file.write_all(&stump(Some(vec![1, 0])).encode_bincode("model").unwrap()).unwrap();

        let artifact = ForestArtifact::read(file.path(), "model").unwrap();
        assert_eq!(artifact, stump(Some(vec![1, 0])));
        let forest = RandomForest::load(file.path(), "model").unwrap();
        assert_eq!(forest.predict(&[row(10.0)]), vec![0]);
    }

    #[test]
    fn garbage_bincode_is_corrupt() {
        let mut file = tempfile::Builder::new().suffix(".bin").tempfile().unwrap();
        file.write_all(b"\x01\x02\x03").unwrap();
        let err = ForestArtifact::read(file.path(), "model").unwrap_err();
        assert!(matches!(err, PredictionError::ArtifactCorrupt { .. }));
    }

    #[test]
    fn missing_model_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("crop_recommender_rf.json");
        let err = RandomForest::load(path, "model").unwrap_err();
        assert!(matches!(err, PredictionError::ArtifactNotFound { .. }));
    }
}
