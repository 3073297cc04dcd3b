use crate::error::{EngineError, EngineResult};
use crate::indicator::stats::sigmoid;

use super::classifier::{validate_training_set, Classifier};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LogisticConfig {
    pub learning_rate: f64,
    pub epochs: usize,
    pub l2: f64,
}

impl Default for LogisticConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.1,
            epochs: 300,
            l2: 1e-3,
        }
    }
}

/// Full-batch gradient descent on standardized features.
#[derive(Debug, Clone)]
pub struct LogisticClassifier {
    cfg: LogisticConfig,
    means: Vec<f64>,
    scales: Vec<f64>,
    coef: Vec<f64>,
    intercept: f64,
    fitted: bool,
}

impl LogisticClassifier {
    pub fn new(cfg: LogisticConfig) -> Self {
        Self {
            cfg,
            means: Vec::new(),
            scales: Vec::new(),
            coef: Vec::new(),
            intercept: 0.0,
            fitted: false,
        }
    }

    pub fn coefficients(&self) -> &[f64] {
        &self.coef
    }

    fn standardize<'a>(&'a self, row: &'a [f64]) -> impl Iterator<Item = f64> + 'a {
        row.iter()
            .zip(self.means.iter().zip(&self.scales))
            .map(|(v, (m, s))| (v - m) / s)
    }
}

impl Classifier for LogisticClassifier {
    fn fit(&mut self, x: &[Vec<f64>], y: &[u8]) -> EngineResult<()> {
        let width = validate_training_set(x, y)?;
        let n = x.len() as f64;
        self.means = (0..width)
            .map(|j| x.iter().map(|r| r[j]).sum::<f64>() / n)
            .collect();
        self.scales = (0..width)
            .map(|j| {
                let m = self.means[j];
                let var = x.iter().map(|r| (r[j] - m).powi(2)).sum::<f64>() / n;
                if var > 1e-24 {
                    var.sqrt()
                } else {
                    1.0
                }
            })
            .collect();
        let z: Vec<Vec<f64>> = x.iter().map(|r| self.standardize(r).collect()).collect();

        let mut coef = vec![0.0; width];
        let mut intercept = 0.0;
        for _ in 0..self.cfg.epochs {
            let mut grad = vec![0.0; width];
            let mut grad_b = 0.0;
            for (row, label) in z.iter().zip(y) {
                let logit = intercept + row.iter().zip(&coef).map(|(a, b)| a * b).sum::<f64>();
                let err = sigmoid(logit) - f64::from(*label);
                for (g, v) in grad.iter_mut().zip(row) {
                    *g += err * v;
                }
                grad_b += err;
            }
            for (c, g) in coef.iter_mut().zip(&grad) {
                *c -= self.cfg.learning_rate * (g / n + self.cfg.l2 * *c);
            }
            intercept -= self.cfg.learning_rate * grad_b / n;
        }
        self.coef = coef;
        self.intercept = intercept;
        self.fitted = true;
        Ok(())
    }

    fn predict_proba_row(&self, row: &[f64]) -> EngineResult<f64> {
        if !self.fitted {
            return Err(EngineError::NotFitted("logistic classifier"));
        }
        if row.len() != self.coef.len() {
            return Err(EngineError::InvalidInput(format!(
                "expected {} features, got {}",
                self.coef.len(),
                row.len()
            )));
        }
        let logit = self.intercept
            + self
                .standardize(row)
                .zip(&self.coef)
                .map(|(v, c)| v * c)
                .sum::<f64>();
        Ok(sigmoid(logit))
    }

    fn is_fitted(&self) -> bool {
        self.fitted
    }
}
