use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::error::{EngineError, EngineResult};
use crate::indicator::stats::sigmoid;

use super::classifier::{validate_training_set, Classifier};
use super::tree::{RegressionTree, TreeParams};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoostingConfig {
    pub n_estimators: usize,
    pub learning_rate: f64,
    pub max_depth: usize,
    pub min_samples_leaf: usize,
    pub seed: u64,
}

impl Default for BoostingConfig {
    fn default() -> Self {
        Self {
            n_estimators: 50,
            learning_rate: 0.1,
            max_depth: 3,
            min_samples_leaf: 2,
            seed: 42,
        }
    }
}

/// Log-loss gradient boosting: each stage fits a tree to `y - sigmoid(F)`.
#[derive(Debug, Clone)]
pub struct GradientBoostingClassifier {
    cfg: BoostingConfig,
    init_logit: f64,
    stages: Vec<RegressionTree>,
    n_features: usize,
    fitted: bool,
}

impl GradientBoostingClassifier {
    pub fn new(cfg: BoostingConfig) -> Self {
        Self {
            cfg,
            init_logit: 0.0,
            stages: Vec::new(),
            n_features: 0,
            fitted: false,
        }
    }

    fn raw_score(&self, row: &[f64]) -> f64 {
        self.init_logit
            + self
                .stages
                .iter()
                .map(|t| self.cfg.learning_rate * t.predict(row))
                .sum::<f64>()
    }
}

impl Classifier for GradientBoostingClassifier {
    fn fit(&mut self, x: &[Vec<f64>], y: &[u8]) -> EngineResult<()> {
        let width = validate_training_set(x, y)?;
        let n = x.len();
        let positives = y.iter().filter(|v| **v == 1).count() as f64;
        let base_rate = ((positives + 0.5) / (n as f64 + 1.0)).clamp(1e-6, 1.0 - 1e-6);
        self.init_logit = (base_rate / (1.0 - base_rate)).ln();
        self.stages.clear();

        let mut rng = StdRng::seed_from_u64(self.cfg.seed);
        let params = TreeParams {
            max_depth: self.cfg.max_depth.max(1),
            min_samples_leaf: self.cfg.min_samples_leaf,
            max_features: None,
        };
        let idx: Vec<usize> = (0..n).collect();
        let mut scores = vec![self.init_logit; n];
        for _ in 0..self.cfg.n_estimators {
            let residuals: Vec<f64> = scores
                .iter()
                .zip(y)
                .map(|(s, t)| f64::from(*t) - sigmoid(*s))
                .collect();
            let tree = RegressionTree::fit(x, &residuals, &idx, params, &mut rng);
            for (s, row) in scores.iter_mut().zip(x) {
                *s += self.cfg.learning_rate * tree.predict(row);
            }
            self.stages.push(tree);
        }
        self.n_features = width;
        self.fitted = true;
        Ok(())
    }

    fn predict_proba_row(&self, row: &[f64]) -> EngineResult<f64> {
        if !self.fitted {
            return Err(EngineError::NotFitted("gradient boosting"));
        }
        if row.len() != self.n_features {
            return Err(EngineError::InvalidInput(format!(
                "expected {} features, got {}",
                self.n_features,
                row.len()
            )));
        }
        Ok(sigmoid(self.raw_score(row)))
    }

    fn is_fitted(&self) -> bool {
        self.fitted
    }
}
