//! Ensemble stage
//!
//! Combines the per-classifier label columns into the final `ensemble`
//! column with a gradient boosted tree model stored in XGBoost's JSON
//! format. Without a model the OpenOceans label is taken as final.

use super::classifier::{ClassifierOutput, PhotonClassifier};
use crate::types::{
    BathyError, BathyResult, BeamInfo, ClassifierKind, PhotonFrame, BATHYMETRY, SEA_SURFACE,
    UNCLASSIFIED,
};
use ndarray::{Array2, ArrayView1};
use serde::{Deserialize, Deserializer, Serialize};
use std::path::{Path, PathBuf};

/// Version recorded in the output metadata
pub const ENSEMBLE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Label columns fed to the model after `ortho_h` and `surface_h`
pub const FEATURE_LABELS: [ClassifierKind; 6] = [
    ClassifierKind::Qtrees,
    ClassifierKind::CShelph,
    ClassifierKind::MedianFilter,
    ClassifierKind::BathyPathFinder,
    ClassifierKind::OpenOceansPP,
    ClassifierKind::Coastnet,
];

/// Width of a feature row
pub const NUM_FEATURES: usize = 2 + FEATURE_LABELS.len();

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EnsembleParams {
    /// XGBoost JSON model; the OpenOceans label is used when absent
    pub ensemble_model_filename: Option<PathBuf>,
}

#[derive(Deserialize)]
struct ModelFile {
    learner: Learner,
}

#[derive(Deserialize)]
struct Learner {
    learner_model_param: LearnerModelParam,
    gradient_booster: GradientBooster,
}

#[derive(Deserialize)]
struct LearnerModelParam {
    base_score: String,
    #[serde(default)]
    num_class: Option<String>,
}

#[derive(Deserialize)]
struct GradientBooster {
    model: BoosterModel,
}

#[derive(Deserialize)]
struct BoosterModel {
    trees: Vec<RegressionTree>,
    tree_info: Vec<usize>,
}

/// One tree in XGBoost's flat array layout
#[derive(Debug, Clone, Deserialize)]
struct RegressionTree {
    left_children: Vec<i32>,
    right_children: Vec<i32>,
    split_indices: Vec<usize>,
    split_conditions: Vec<f64>,
    #[serde(deserialize_with = "flags")]
    default_left: Vec<bool>,
}

/// `default_left` is written as booleans or as 0/1 depending on the version
fn flags<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<bool>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Int(i64),
    }
    let raw = Vec::<Flag>::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .map(|f| match f {
            Flag::Bool(b) => b,
            Flag::Int(i) => i != 0,
        })
        .collect())
}

impl RegressionTree {
    fn validate(&self, n_features: usize) -> BathyResult<()> {
        let n = self.left_children.len();
        if n == 0
            || self.right_children.len() != n
            || self.split_indices.len() != n
            || self.split_conditions.len() != n
            || self.default_left.len() != n
        {
            return Err(BathyError::InvalidInput(
                "ensemble model tree arrays have inconsistent lengths".to_string(),
            ));
        }
        for node in 0..n {
            let (left, right) = (self.left_children[node], self.right_children[node]);
            if left == -1 {
                continue;
            }
            let in_range = |child: i32| child > node as i32 && (child as usize) < n;
            if !in_range(left) || !in_range(right) {
                return Err(BathyError::InvalidInput(format!(
                    "ensemble model node {} has invalid children {} {}",
                    node, left, right
                )));
            }
            if self.split_indices[node] >= n_features {
                return Err(BathyError::InvalidInput(format!(
                    "ensemble model splits on feature {}, only {} available",
                    self.split_indices[node], n_features
                )));
            }
        }
        Ok(())
    }

    /// Leaf value reached by `features`; missing values follow `default_left`
    fn leaf(&self, features: ArrayView1<f64>) -> f64 {
        let mut node = 0;
        while self.left_children[node] != -1 {
            let x = features[self.split_indices[node]];
            let go_left = if x.is_nan() {
                self.default_left[node]
            } else {
                x < self.split_conditions[node]
            };
            node = if go_left {
                self.left_children[node] as usize
            } else {
                self.right_children[node] as usize
            };
        }
        self.split_conditions[node]
    }
}

/// Gradient boosted tree classifier loaded from XGBoost JSON
#[derive(Debug, Clone)]
pub struct TreeEnsemble {
    trees: Vec<RegressionTree>,
    tree_class: Vec<usize>,
    base_margin: Vec<f64>,
    num_class: usize,
}

impl TreeEnsemble {
    pub fn load<P: AsRef<Path>>(path: P) -> BathyResult<Self> {
        let path = path.as_ref();
        log::info!("Loading ensemble model from: {}", path.display());
        let text = std::fs::read_to_string(path).map_err(|e| {
            BathyError::InvalidInput(format!("Cannot read ensemble model {}: {}", path.display(), e))
        })?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> BathyResult<Self> {
        let file: ModelFile = serde_json::from_str(text)
            .map_err(|e| BathyError::InvalidInput(format!("Malformed ensemble model: {}", e)))?;
        let param = file.learner.learner_model_param;
        let model = file.learner.gradient_booster.model;

        let declared = param
            .num_class
            .as_deref()
            .map(|s| s.trim().parse::<usize>())
            .transpose()
            .map_err(|e| BathyError::InvalidInput(format!("Bad num_class: {}", e)))?
            .unwrap_or(0);
        // 0 or 1 declared classes is a binary logistic model with one margin
        let num_class = declared.max(2);
        let n_margins = if declared <= 1 { 1 } else { declared };

        let scores = parse_base_score(&param.base_score)?;
        let base_margin = if n_margins == 1 {
            let p = scores.first().copied().unwrap_or(0.5).clamp(1e-16, 1.0 - 1e-16);
            vec![(p / (1.0 - p)).ln()]
        } else {
            (0..n_margins)
                .map(|c| scores.get(c).or(scores.first()).copied().unwrap_or(0.0))
                .collect()
        };

        if model.tree_info.len() != model.trees.len() {
            return Err(BathyError::InvalidInput(format!(
                "ensemble model has {} trees but {} tree_info entries",
                model.trees.len(),
                model.tree_info.len()
            )));
        }
        if let Some(bad) = model.tree_info.iter().find(|c| **c >= n_margins) {
            return Err(BathyError::InvalidInput(format!(
                "ensemble model tree assigned to class {} of {}",
                bad, n_margins
            )));
        }
        for tree in &model.trees {
            tree.validate(NUM_FEATURES)?;
        }

        log::debug!(
            "Ensemble model: {} trees, {} classes",
            model.trees.len(),
            num_class
        );
        Ok(Self {
            trees: model.trees,
            tree_class: model.tree_info,
            base_margin,
            num_class,
        })
    }

    pub fn num_class(&self) -> usize {
        self.num_class
    }

    /// Class probabilities for one feature row
    pub fn predict_proba(&self, features: ArrayView1<f64>) -> Vec<f64> {
        let mut margin = self.base_margin.clone();
        for (tree, class) in self.trees.iter().zip(&self.tree_class) {
            margin[*class] += tree.leaf(features);
        }
        if margin.len() == 1 {
            let p = 1.0 / (1.0 + (-margin[0]).exp());
            return vec![1.0 - p, p];
        }
        let max = margin.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let exp: Vec<f64> = margin.iter().map(|m| (m - max).exp()).collect();
        let total: f64 = exp.iter().sum();
        exp.into_iter().map(|e| e / total).collect()
    }

    /// Final labels and bathymetry probability for every row
    pub fn predict(&self, features: &Array2<f64>) -> (Vec<i8>, Vec<f64>) {
        let mut labels = Vec::with_capacity(features.nrows());
        let mut confidence = Vec::with_capacity(features.nrows());
        for row in features.rows() {
            let proba = self.predict_proba(row);
            let mut best = 0;
            for (c, p) in proba.iter().enumerate() {
                if *p > proba[best] {
                    best = c;
                }
            }
            labels.push(class_code(best));
            confidence.push(proba.get(1).copied().unwrap_or(0.0));
        }
        (labels, confidence)
    }
}

/// `base_score` is a plain number or a bracketed list of numbers
fn parse_base_score(raw: &str) -> BathyResult<Vec<f64>> {
    raw.trim()
        .trim_start_matches('[')
        .trim_end_matches(']')
        .split(',')
        .filter(|s| !s.trim().is_empty())
        .map(|s| {
            s.trim()
                .parse::<f64>()
                .map_err(|e| BathyError::InvalidInput(format!("Bad base_score {}: {}", raw, e)))
        })
        .collect()
}

/// Model class index to photon class
fn class_code(class: usize) -> i8 {
    match class {
        1 => BATHYMETRY,
        2 => SEA_SURFACE,
        _ => UNCLASSIFIED,
    }
}

/// Feature rows in model order; missing label columns are NaN
pub fn feature_matrix(frame: &PhotonFrame) -> Array2<f64> {
    let n = frame.len();
    let mut features = Array2::<f64>::from_elem((n, NUM_FEATURES), f64::NAN);
    for i in 0..n {
        features[[i, 0]] = frame.ortho_h[i];
        features[[i, 1]] = frame.surface_h[i];
    }
    for (k, kind) in FEATURE_LABELS.iter().enumerate() {
        if let Some(column) = frame.label(*kind) {
            for (i, label) in column.iter().enumerate() {
                features[[i, 2 + k]] = *label as f64;
            }
        }
    }
    features
}

/// Final-label stage of the ensemble runner
pub struct EnsembleClassifier {
    model: Option<TreeEnsemble>,
}

impl EnsembleClassifier {
    pub fn new(params: &EnsembleParams) -> BathyResult<Self> {
        let model = match &params.ensemble_model_filename {
            Some(path) => Some(TreeEnsemble::load(path)?),
            None => {
                log::info!("No ensemble model configured, using OpenOceans labels as final");
                None
            }
        };
        Ok(Self { model })
    }

    pub fn with_model(model: TreeEnsemble) -> Self {
        Self { model: Some(model) }
    }

    pub fn classify_frame(&self, frame: &PhotonFrame) -> ClassifierOutput {
        if let Some(model) = &self.model {
            let (labels, confidence) = model.predict(&feature_matrix(frame));
            return ClassifierOutput {
                labels,
                confidence: Some(confidence),
            };
        }
        let labels = match frame.label(ClassifierKind::OpenOceans) {
            Some(labels) => labels.to_vec(),
            None => frame
                .class_ph
                .iter()
                .map(|c| match *c {
                    BATHYMETRY | SEA_SURFACE => *c,
                    _ => UNCLASSIFIED,
                })
                .collect(),
        };
        ClassifierOutput::labels(labels)
    }
}

impl PhotonClassifier for EnsembleClassifier {
    fn kind(&self) -> ClassifierKind {
        ClassifierKind::Ensemble
    }

    fn classify(&self, _beam: &BeamInfo, frame: PhotonFrame) -> BathyResult<ClassifierOutput> {
        Ok(self.classify_frame(&frame))
    }
}
