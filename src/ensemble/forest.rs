use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::{EngineError, EngineResult};

use super::classifier::{validate_training_set, Classifier};
use super::tree::{RegressionTree, TreeParams};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ForestConfig {
    pub n_trees: usize,
    pub max_depth: usize,
    pub min_samples_leaf: usize,
    pub seed: u64,
}

impl Default for ForestConfig {
    fn default() -> Self {
        Self {
            n_trees: 50,
            max_depth: 6,
            min_samples_leaf: 2,
            seed: 42,
        }
    }
}

/// Bagged trees with `sqrt(d)` features per split; probability is the mean leaf value.
#[derive(Debug, Clone)]
pub struct RandomForestClassifier {
    cfg: ForestConfig,
    trees: Vec<RegressionTree>,
    n_features: usize,
}

impl RandomForestClassifier {
    pub fn new(cfg: ForestConfig) -> Self {
        Self {
            cfg,
            trees: Vec::new(),
            n_features: 0,
        }
    }

    pub fn tree_count(&self) -> usize {
        self.trees.len()
    }
}

impl Classifier for RandomForestClassifier {
    fn fit(&mut self, x: &[Vec<f64>], y: &[u8]) -> EngineResult<()> {
        let width = validate_training_set(x, y)?;
        let target: Vec<f64> = y.iter().map(|v| f64::from(*v)).collect();
        let mut rng = StdRng::seed_from_u64(self.cfg.seed);
        let params = TreeParams {
            max_depth: self.cfg.max_depth.max(1),
            min_samples_leaf: self.cfg.min_samples_leaf,
            max_features: Some(((width as f64).sqrt().round() as usize).max(1)),
        };
        let n = x.len();
        self.trees = (0..self.cfg.n_trees.max(1))
            .map(|_| {
                let sample: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();
                RegressionTree::fit(x, &target, &sample, params, &mut rng)
            })
            .collect();
        self.n_features = width;
        Ok(())
    }

    fn predict_proba_row(&self, row: &[f64]) -> EngineResult<f64> {
        if self.trees.is_empty() {
            return Err(EngineError::NotFitted("random forest"));
        }
        if row.len() != self.n_features {
            return Err(EngineError::InvalidInput(format!(
                "expected {} features, got {}",
                self.n_features,
                row.len()
            )));
        }
        let total: f64 = self.trees.iter().map(|t| t.predict(row)).sum();
        Ok((total / self.trees.len() as f64).clamp(0.0, 1.0))
    }

    fn is_fitted(&self) -> bool {
        !self.trees.is_empty()
    }
}
