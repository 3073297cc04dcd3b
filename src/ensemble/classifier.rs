use serde::{Deserialize, Serialize};

use crate::error::{ensure_binary_labels, ensure_same_len, EngineError, EngineResult};

use super::boosting::{BoostingConfig, GradientBoostingClassifier};
use super::forest::{ForestConfig, RandomForestClassifier};
use super::logistic::{LogisticClassifier, LogisticConfig};

/// Binary classifier producing positive-class probabilities.
pub trait Classifier {
    fn fit(&mut self, x: &[Vec<f64>], y: &[u8]) -> EngineResult<()>;

    fn predict_proba_row(&self, row: &[f64]) -> EngineResult<f64>;

    fn is_fitted(&self) -> bool;

    /// Accuracy at the 0.5 cut.
    fn score(&self, x: &[Vec<f64>], y: &[u8]) -> EngineResult<f64> {
        ensure_same_len("scoring data", x.len(), y.len())?;
        let mut correct = 0usize;
        for (row, label) in x.iter().zip(y) {
            let pred = u8::from(self.predict_proba_row(row)? >= 0.5);
            if pred == *label {
                correct += 1;
            }
        }
        Ok(correct as f64 / y.len() as f64)
    }
}

/// Validates a design matrix and labels; returns the feature width.
pub(crate) fn validate_training_set(x: &[Vec<f64>], y: &[u8]) -> EngineResult<usize> {
    ensure_same_len("training data", x.len(), y.len())?;
    ensure_binary_labels(y)?;
    validate_rows(x)
}

pub(crate) fn validate_rows(x: &[Vec<f64>]) -> EngineResult<usize> {
    let width = x.first().map(Vec::len).unwrap_or(0);
    if width == 0 {
        return Err(EngineError::InvalidInput("rows have no features".to_string()));
    }
    for (i, row) in x.iter().enumerate() {
        if row.len() != width {
            return Err(EngineError::InvalidInput(format!(
                "row {} has {} features, expected {}",
                i,
                row.len(),
                width
            )));
        }
        if row.iter().any(|v| !v.is_finite()) {
            return Err(EngineError::InvalidInput(format!("row {} has non-finite values", i)));
        }
    }
    Ok(width)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ClassifierKind {
    Logistic,
    RandomForest,
    GradientBoosting,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    pub kind: ClassifierKind,
    pub n_estimators: usize,
    pub max_depth: usize,
    pub min_samples_leaf: usize,
    pub learning_rate: f64,
    pub epochs: usize,
    pub l2: f64,
    pub seed: u64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            kind: ClassifierKind::Logistic,
            n_estimators: 50,
            max_depth: 6,
            min_samples_leaf: 2,
            learning_rate: 0.1,
            epochs: 300,
            l2: 1e-3,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifierSpec {
    pub id: String,
    #[serde(flatten)]
    pub config: ClassifierConfig,
}

pub fn default_classifier_specs() -> Vec<ClassifierSpec> {
    vec![
        ClassifierSpec {
            id: "logistic".to_string(),
            config: ClassifierConfig::default(),
        },
        ClassifierSpec {
            id: "random-forest".to_string(),
            config: ClassifierConfig {
                kind: ClassifierKind::RandomForest,
                ..ClassifierConfig::default()
            },
        },
        ClassifierSpec {
            id: "gradient-boosting".to_string(),
            config: ClassifierConfig {
                kind: ClassifierKind::GradientBoosting,
                max_depth: 3,
                ..ClassifierConfig::default()
            },
        },
    ]
}

pub fn build_classifier_models(specs: &[ClassifierSpec]) -> Vec<(String, ClassifierModel)> {
    specs
        .iter()
        .map(|spec| {
            let cfg = spec.config;
            let model = match cfg.kind {
                ClassifierKind::Logistic => {
                    ClassifierModel::Logistic(LogisticClassifier::new(LogisticConfig {
                        learning_rate: cfg.learning_rate,
                        epochs: cfg.epochs,
                        l2: cfg.l2,
                    }))
                }
                ClassifierKind::RandomForest => {
                    ClassifierModel::RandomForest(RandomForestClassifier::new(ForestConfig {
                        n_trees: cfg.n_estimators,
                        max_depth: cfg.max_depth,
                        min_samples_leaf: cfg.min_samples_leaf,
                        seed: cfg.seed,
                    }))
                }
                ClassifierKind::GradientBoosting => ClassifierModel::GradientBoosting(
                    GradientBoostingClassifier::new(BoostingConfig {
                        n_estimators: cfg.n_estimators,
                        learning_rate: cfg.learning_rate,
                        max_depth: cfg.max_depth,
                        min_samples_leaf: cfg.min_samples_leaf,
                        seed: cfg.seed,
                    }),
                ),
            };
            (spec.id.clone(), model)
        })
        .collect()
}

#[derive(Debug, Clone)]
pub enum ClassifierModel {
    Logistic(LogisticClassifier),
    RandomForest(RandomForestClassifier),
    GradientBoosting(GradientBoostingClassifier),
}

impl ClassifierModel {
    pub fn kind(&self) -> ClassifierKind {
        match self {
            Self::Logistic(_) => ClassifierKind::Logistic,
            Self::RandomForest(_) => ClassifierKind::RandomForest,
            Self::GradientBoosting(_) => ClassifierKind::GradientBoosting,
        }
    }
}

impl Classifier for ClassifierModel {
    fn fit(&mut self, x: &[Vec<f64>], y: &[u8]) -> EngineResult<()> {
        match self {
            Self::Logistic(m) => m.fit(x, y),
            Self::RandomForest(m) => m.fit(x, y),
            Self::GradientBoosting(m) => m.fit(x, y),
        }
    }

    fn predict_proba_row(&self, row: &[f64]) -> EngineResult<f64> {
        match self {
            Self::Logistic(m) => m.predict_proba_row(row),
            Self::RandomForest(m) => m.predict_proba_row(row),
            Self::GradientBoosting(m) => m.predict_proba_row(row),
        }
    }

    fn is_fitted(&self) -> bool {
        match self {
            Self::Logistic(m) => m.is_fitted(),
            Self::RandomForest(m) => m.is_fitted(),
            Self::GradientBoosting(m) => m.is_fitted(),
        }
    }
}
