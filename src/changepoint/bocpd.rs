use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::indicator::stats::normal_pdf;

const MIN_WINDOW_STD: f64 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BocpdConfig {
    pub hazard_rate: f64,
    /// Posterior entries beyond this run length are dropped.
    pub max_run_length: usize,
}

impl Default for BocpdConfig {
    fn default() -> Self {
        Self {
            hazard_rate: 0.01,
            max_run_length: 250,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BocpdUpdate {
    pub change_probability: f64,
    pub expected_run_length: usize,
}

/// Run-length posterior with Normal likelihoods estimated from trailing windows.
///
/// Memory is bounded: observations live in a ring buffer of `max_run_length + 1`
/// values and the posterior never exceeds `max_run_length` entries.
#[derive(Debug, Clone)]
pub struct BocpdDetector {
    hazard_rate: f64,
    max_run_length: usize,
    observations: VecDeque<f64>,
    growth_probs: Vec<f64>,
}

impl BocpdDetector {
    pub fn new(cfg: BocpdConfig) -> Self {
        let max_run_length = cfg.max_run_length.max(2);
        Self {
            hazard_rate: cfg.hazard_rate.clamp(1e-6, 1.0 - 1e-6),
            max_run_length,
            observations: VecDeque::with_capacity(max_run_length + 1),
            growth_probs: vec![1.0],
        }
    }

    pub fn update(&mut self, value: f64) -> BocpdUpdate {
        if !value.is_finite() {
            return self.snapshot();
        }
        self.observations.push_back(value);
        while self.observations.len() > self.max_run_length + 1 {
            let _ = self.observations.pop_front();
        }
        if self.observations.len() < 2 {
            return BocpdUpdate {
                change_probability: 0.0,
                expected_run_length: 0,
            };
        }

        let h = self.hazard_rate;
        let mut next = Vec::with_capacity(self.growth_probs.len() + 1);
        next.push(0.0);
        let mut changepoint_mass = 0.0;
        for (r, prob) in self.growth_probs.iter().enumerate() {
            let lik = self.window_likelihood(r + 1, value);
            next.push(prob * (1.0 - h) * lik);
            changepoint_mass += prob * lik * h;
        }
        next[0] = changepoint_mass * self.window_likelihood(1, value);

        next.truncate(self.max_run_length);
        normalize(&mut next);
        self.growth_probs = next;
        self.snapshot()
    }

    pub fn growth_probs(&self) -> &[f64] {
        &self.growth_probs
    }

    pub fn observation_count(&self) -> usize {
        self.observations.len()
    }

    pub fn reset(&mut self) {
        self.observations.clear();
        self.growth_probs = vec![1.0];
    }

    fn snapshot(&self) -> BocpdUpdate {
        if self.observations.len() < 2 {
            return BocpdUpdate {
                change_probability: 0.0,
                expected_run_length: 0,
            };
        }
        let (argmax, _) = self
            .growth_probs
            .iter()
            .enumerate()
            .fold((0usize, f64::MIN), |best, (i, p)| {
                if *p > best.1 {
                    (i, *p)
                } else {
                    best
                }
            });
        BocpdUpdate {
            change_probability: self.growth_probs.first().copied().unwrap_or(0.0),
            expected_run_length: argmax,
        }
    }

    /// Likelihood of `value` under the trailing window of `len` observations.
    fn window_likelihood(&self, len: usize, value: f64) -> f64 {
        let n = self.observations.len();
        let len = len.clamp(1, n);
        let window = self.observations.range(n - len..);
        let count = len as f64;
        let (sum, sum_sq) = window.fold((0.0, 0.0), |(s, sq), v| (s + v, sq + v * v));
        let mu = sum / count;
        let var = (sum_sq / count - mu * mu).max(0.0);
        let sigma = var.sqrt().max(MIN_WINDOW_STD);
        normal_pdf(value, mu, sigma)
    }
}

impl Default for BocpdDetector {
    fn default() -> Self {
        Self::new(BocpdConfig::default())
    }
}

fn normalize(probs: &mut [f64]) {
    let total: f64 = probs.iter().sum();
    if total > 1e-300 && total.is_finite() {
        for p in probs.iter_mut() {
            *p /= total;
        }
    } else if !probs.is_empty() {
        let uniform = 1.0 / probs.len() as f64;
        probs.iter_mut().for_each(|p| *p = uniform);
    }
}
