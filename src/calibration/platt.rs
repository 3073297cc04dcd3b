use serde::{Deserialize, Serialize};

use crate::indicator::stats::sigmoid;

const MAX_ITER: usize = 100;
const GRAD_TOL: f64 = 1e-9;
const RIDGE: f64 = 1e-12;

/// `p' = sigmoid(a * p + b)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlattScaling {
    pub a: f64,
    pub b: f64,
}

impl PlattScaling {
    /// Minimize the cross-entropy of `sigmoid(a * p + b)` against `y` starting from
    /// `(0, 0)` with Newton steps and a backtracking line search. Inputs are validated
    /// by the caller.
    pub fn fit(y: &[u8], p: &[f64]) -> Self {
        let mut a = 0.0;
        let mut b = 0.0;
        let mut loss = cross_entropy(y, p, a, b);
        for _ in 0..MAX_ITER {
            let (ga, gb, haa, hab, hbb) = gradient_hessian(y, p, a, b);
            if ga.abs().max(gb.abs()) < GRAD_TOL {
                break;
            }
            let haa = haa + RIDGE;
            let hbb = hbb + RIDGE;
            let det = haa * hbb - hab * hab;
            let (da, db) = if det.abs() > 1e-18 {
                (-(hbb * ga - hab * gb) / det, -(haa * gb - hab * ga) / det)
            } else {
                (-ga, -gb)
            };
            let slope = ga * da + gb * db;
            let mut step = 1.0;
            let mut accepted = false;
            while step > 1e-10 {
                let na = a + step * da;
                let nb = b + step * db;
                let next = cross_entropy(y, p, na, nb);
                if next.is_finite() && next <= loss + 1e-4 * step * slope {
                    a = na;
                    b = nb;
                    loss = next;
                    accepted = true;
                    break;
                }
                step *= 0.5;
            }
            if !accepted {
                break;
            }
        }
        Self { a, b }
    }

    pub fn apply(&self, p: f64) -> f64 {
        sigmoid(self.a * p + self.b)
    }
}

fn softplus(z: f64) -> f64 {
    z.max(0.0) + (-z.abs()).exp().ln_1p()
}

fn cross_entropy(y: &[u8], p: &[f64], a: f64, b: f64) -> f64 {
    y.iter()
        .zip(p)
        .map(|(yi, pi)| {
            let z = a * pi + b;
            softplus(z) - f64::from(*yi) * z
        })
        .sum()
}

fn gradient_hessian(y: &[u8], p: &[f64], a: f64, b: f64) -> (f64, f64, f64, f64, f64) {
    let mut ga = 0.0;
    let mut gb = 0.0;
    let mut haa = 0.0;
    let mut hab = 0.0;
    let mut hbb = 0.0;
    for (yi, pi) in y.iter().zip(p) {
        let s = sigmoid(a * pi + b);
        let r = s - f64::from(*yi);
        let w = s * (1.0 - s);
        ga += r * pi;
        gb += r;
        haa += w * pi * pi;
        hab += w * pi;
        hbb += w;
    }
    (ga, gb, haa, hab, hbb)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_probabilities_recover_base_rate() {
        let y = [1, 1, 1, 0];
        let p = [0.5; 4];
        let platt = PlattScaling::fit(&y, &p);
        assert!((platt.apply(0.5) - 0.75).abs() < 1e-6);
    }

    #[test]
    fn slope_is_positive_for_informative_scores() {
        let p: Vec<f64> = (0..40).map(|i| i as f64 / 40.0).collect();
        let y: Vec<u8> = p
            .iter()
            .enumerate()
            .map(|(i, v)| u8::from(*v > 0.5 || i % 7 == 0))
            .collect();
        let platt = PlattScaling::fit(&y, &p);
        assert!(platt.a > 0.0);
        assert!(platt.apply(0.9) > platt.apply(0.1));
    }
}
