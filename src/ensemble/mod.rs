pub mod boosting;
pub mod classifier;
pub mod forest;
pub mod logistic;
pub mod tree;

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::{ensure_same_len, EngineError, EngineResult};
use crate::indicator::stats::{mean, population_std};

pub use classifier::{
    build_classifier_models, default_classifier_specs, Classifier, ClassifierConfig,
    ClassifierKind, ClassifierModel, ClassifierSpec,
};

/// Ranges at or below this count as unanimous.
pub const DISAGREEMENT_RANGE_FLOOR: f64 = 0.1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VotingMode {
    Soft,
    /// Explicit weights, or per-model training accuracy when `None`.
    Weighted {
        #[serde(default)]
        weights: Option<Vec<f64>>,
    },
}

impl Default for VotingMode {
    fn default() -> Self {
        Self::Soft
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnsembleConfig {
    pub voting: VotingMode,
    pub models: Vec<ClassifierSpec>,
}

impl Default for EnsembleConfig {
    fn default() -> Self {
        Self {
            voting: VotingMode::Soft,
            models: default_classifier_specs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnsembleMetrics {
    pub prediction: u8,
    pub proba_mean: f64,
    pub proba_std: f64,
    pub disagreement_score: f64,
    pub individual_probas: BTreeMap<String, f64>,
    pub votes: BTreeMap<String, u8>,
}

/// `range / max(range, 0.1)` above the floor, 0 otherwise. Saturates at 1 as soon as
/// the spread exceeds the floor; gate thresholds are tuned against this scale.
pub fn disagreement_score(probas: &[f64]) -> f64 {
    let (lo, hi) = probas
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), p| (lo.min(*p), hi.max(*p)));
    if probas.is_empty() {
        return 0.0;
    }
    let range = hi - lo;
    if range > DISAGREEMENT_RANGE_FLOOR {
        range / range.max(DISAGREEMENT_RANGE_FLOOR)
    } else {
        0.0
    }
}

#[derive(Debug, Clone)]
pub struct EnsembleEngine {
    models: Vec<(String, ClassifierModel)>,
    voting: VotingMode,
    weights: Vec<f64>,
    n_features: Option<usize>,
}

impl EnsembleEngine {
    pub fn new(specs: &[ClassifierSpec], voting: VotingMode) -> EngineResult<Self> {
        if specs.is_empty() {
            return Err(EngineError::InvalidParameter(
                "ensemble needs at least one model".to_string(),
            ));
        }
        let mut seen = HashSet::new();
        for spec in specs {
            if !seen.insert(spec.id.as_str()) {
                return Err(EngineError::InvalidParameter(format!(
                    "duplicate model id '{}'",
                    spec.id
                )));
            }
        }
        let n = specs.len();
        let weights = match &voting {
            VotingMode::Weighted {
                weights: Some(explicit),
            } => normalize_weights(explicit, n)?,
            _ => vec![1.0 / n as f64; n],
        };
        Ok(Self {
            models: build_classifier_models(specs),
            voting,
            weights,
            n_features: None,
        })
    }

    pub fn from_config(cfg: &EnsembleConfig) -> EngineResult<Self> {
        Self::new(&cfg.models, cfg.voting.clone())
    }

    pub fn model_ids(&self) -> impl Iterator<Item = &str> {
        self.models.iter().map(|(id, _)| id.as_str())
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    pub fn voting(&self) -> &VotingMode {
        &self.voting
    }

    pub fn is_fitted(&self) -> bool {
        self.n_features.is_some()
    }

    pub fn fit(&mut self, x: &[Vec<f64>], y: &[u8]) -> EngineResult<()> {
        let width = classifier::validate_training_set(x, y)?;
        for (id, model) in self.models.iter_mut() {
            model.fit(x, y)?;
            tracing::debug!(model = %id, samples = x.len(), "Ensemble member fitted");
        }
        if let VotingMode::Weighted { weights: None } = self.voting {
            let scores = self
                .models
                .iter()
                .map(|(_, m)| m.score(x, y))
                .collect::<EngineResult<Vec<f64>>>()?;
            let total: f64 = scores.iter().sum();
            self.weights = if total > 0.0 {
                scores.iter().map(|s| s / total).collect()
            } else {
                vec![1.0 / scores.len() as f64; scores.len()]
            };
        }
        self.n_features = Some(width);
        tracing::info!(
            models = self.models.len(),
            samples = x.len(),
            features = width,
            weights = ?self.weights,
            "Ensemble fitted"
        );
        Ok(())
    }

    /// Systematic resampling by `sample_weights`, then a regular fit on the draw.
    pub fn fit_weighted(
        &mut self,
        x: &[Vec<f64>],
        y: &[u8],
        sample_weights: &[f64],
    ) -> EngineResult<()> {
        ensure_same_len("training data", x.len(), y.len())?;
        ensure_same_len("sample weights", x.len(), sample_weights.len())?;
        let picks = systematic_resample(sample_weights)?;
        let rx: Vec<Vec<f64>> = picks.iter().map(|i| x[*i].clone()).collect();
        let ry: Vec<u8> = picks.iter().map(|i| y[*i]).collect();
        self.fit(&rx, &ry)
    }

    pub fn predict_with_metrics(&self, row: &[f64]) -> EngineResult<EnsembleMetrics> {
        let width = self.n_features.ok_or(EngineError::NotFitted("ensemble"))?;
        if row.len() != width {
            return Err(EngineError::InvalidInput(format!(
                "expected {} features, got {}",
                width,
                row.len()
            )));
        }
        if row.iter().any(|v| !v.is_finite()) {
            return Err(EngineError::InvalidInput(
                "feature row has non-finite values".to_string(),
            ));
        }
        let probas = self
            .models
            .iter()
            .map(|(_, m)| m.predict_proba_row(row))
            .collect::<EngineResult<Vec<f64>>>()?;

        let proba_mean = match self.voting {
            VotingMode::Soft => mean(&probas),
            VotingMode::Weighted { .. } => probas
                .iter()
                .zip(&self.weights)
                .map(|(p, w)| p * w)
                .sum::<f64>(),
        };
        let mut individual_probas = BTreeMap::new();
        let mut votes = BTreeMap::new();
        for ((id, _), p) in self.models.iter().zip(&probas) {
            individual_probas.insert(id.clone(), *p);
            votes.insert(id.clone(), u8::from(*p >= 0.5));
        }
        Ok(EnsembleMetrics {
            prediction: u8::from(proba_mean >= 0.5),
            proba_mean,
            proba_std: population_std(&probas),
            disagreement_score: disagreement_score(&probas),
            individual_probas,
            votes,
        })
    }

    pub fn predict_proba(&self, x: &[Vec<f64>]) -> EngineResult<Vec<f64>> {
        x.iter()
            .map(|row| self.predict_with_metrics(row).map(|m| m.proba_mean))
            .collect()
    }

    pub fn predict(&self, x: &[Vec<f64>]) -> EngineResult<Vec<u8>> {
        x.iter()
            .map(|row| self.predict_with_metrics(row).map(|m| m.prediction))
            .collect()
    }
}

fn normalize_weights(weights: &[f64], expected: usize) -> EngineResult<Vec<f64>> {
    if weights.len() != expected {
        return Err(EngineError::InvalidParameter(format!(
            "{} weights for {} models",
            weights.len(),
            expected
        )));
    }
    if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
        return Err(EngineError::InvalidParameter(
            "weights must be finite and non-negative".to_string(),
        ));
    }
    let total: f64 = weights.iter().sum();
    if total <= 0.0 {
        return Err(EngineError::InvalidParameter(
            "weights must not all be zero".to_string(),
        ));
    }
    Ok(weights.iter().map(|w| w / total).collect())
}

/// Deterministic systematic resampling: `n` evenly spaced draws over the cumulative
/// weight distribution.
pub fn systematic_resample(weights: &[f64]) -> EngineResult<Vec<usize>> {
    if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
        return Err(EngineError::InvalidInput(
            "sample weights must be finite and non-negative".to_string(),
        ));
    }
    let total: f64 = weights.iter().sum();
    if total <= 0.0 {
        return Err(EngineError::InvalidInput(
            "sample weights sum to zero".to_string(),
        ));
    }
    let n = weights.len();
    let step = total / n as f64;
    let mut picks = Vec::with_capacity(n);
    let mut cumulative = weights[0];
    let mut i = 0;
    for k in 0..n {
        let target = (k as f64 + 0.5) * step;
        while cumulative < target && i + 1 < n {
            i += 1;
            cumulative += weights[i];
        }
        picks.push(i);
    }
    Ok(picks)
}
