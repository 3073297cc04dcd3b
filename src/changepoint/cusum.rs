use serde::{Deserialize, Serialize};

use crate::indicator::stats::{mean, population_std};

pub const CUSUM_BASELINE_LEN: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CusumConfig {
    pub threshold: f64,
    pub drift: f64,
}

impl Default for CusumConfig {
    fn default() -> Self {
        Self {
            threshold: 5.0,
            drift: 0.5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CusumUpdate {
    pub changed: bool,
    /// `max(cusum_pos, cusum_neg) / (2 * threshold)`, capped at 1.
    pub strength: f64,
}

/// Two-sided CUSUM control chart over a standardized scalar stream.
#[derive(Debug, Clone)]
pub struct CusumDetector {
    cfg: CusumConfig,
    reference: Option<(f64, f64)>,
    cusum_pos: f64,
    cusum_neg: f64,
}

impl CusumDetector {
    pub fn new(cfg: CusumConfig) -> Self {
        Self {
            cfg: CusumConfig {
                threshold: if cfg.threshold > 0.0 { cfg.threshold } else { 1.0 },
                drift: cfg.drift.max(0.0),
            },
            reference: None,
            cusum_pos: 0.0,
            cusum_neg: 0.0,
        }
    }

    pub fn with_threshold(threshold: f64) -> Self {
        Self::new(CusumConfig {
            threshold,
            ..CusumConfig::default()
        })
    }

    /// Set reference mean/std from the last (up to) 20 baseline samples.
    /// A zero or non-finite std floors to 1.0. An empty baseline is ignored.
    pub fn fit(&mut self, baseline: &[f64]) {
        let finite: Vec<f64> = baseline.iter().copied().filter(|v| v.is_finite()).collect();
        if finite.is_empty() {
            return;
        }
        let start = finite.len().saturating_sub(CUSUM_BASELINE_LEN);
        let tail = &finite[start..];
        let mu = mean(tail);
        let sd = population_std(tail);
        let sd = if sd > 0.0 && sd.is_finite() { sd } else { 1.0 };
        self.reference = Some((mu, sd));
    }

    pub fn update(&mut self, value: f64) -> CusumUpdate {
        let Some((mu, sd)) = self.reference else {
            self.fit(&[value]);
            return CusumUpdate {
                changed: false,
                strength: 0.0,
            };
        };
        if !value.is_finite() {
            return self.state();
        }

        let z = (value - mu) / sd;
        self.cusum_pos = (self.cusum_pos + z - self.cfg.drift).max(0.0);
        self.cusum_neg = (self.cusum_neg - z - self.cfg.drift).max(0.0);
        self.state()
    }

    /// Zero the accumulators, keep the reference statistics.
    pub fn reset(&mut self) {
        self.cusum_pos = 0.0;
        self.cusum_neg = 0.0;
    }

    pub fn is_fitted(&self) -> bool {
        self.reference.is_some()
    }

    pub fn reference(&self) -> Option<(f64, f64)> {
        self.reference
    }

    pub fn sums(&self) -> (f64, f64) {
        (self.cusum_pos, self.cusum_neg)
    }

    pub fn threshold(&self) -> f64 {
        self.cfg.threshold
    }

    fn state(&self) -> CusumUpdate {
        let peak = self.cusum_pos.max(self.cusum_neg);
        CusumUpdate {
            changed: self.cusum_pos > self.cfg.threshold || self.cusum_neg > self.cfg.threshold,
            strength: (peak / (2.0 * self.cfg.threshold)).min(1.0),
        }
    }
}

impl Default for CusumDetector {
    fn default() -> Self {
        Self::new(CusumConfig::default())
    }
}
