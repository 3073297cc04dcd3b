use std::cmp::Ordering;

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

pub fn population_std(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let var = values
        .iter()
        .map(|v| {
            let d = v - m;
            d * d
        })
        .sum::<f64>()
        / values.len() as f64;
    var.sqrt()
}

pub fn simple_returns(prices: &[f64]) -> Vec<f64> {
    prices
        .windows(2)
        .map(|w| {
            if w[0].abs() > f64::EPSILON {
                (w[1] - w[0]) / w[0]
            } else {
                0.0
            }
        })
        .collect()
}

/// Least-squares slope of `values` against their index.
pub fn linear_slope(values: &[f64]) -> f64 {
    let n = values.len();
    if n < 2 {
        return 0.0;
    }
    let x_mean = (n - 1) as f64 / 2.0;
    let y_mean = mean(values);
    let mut num = 0.0;
    let mut den = 0.0;
    for (i, y) in values.iter().enumerate() {
        let dx = i as f64 - x_mean;
        num += dx * (y - y_mean);
        den += dx * dx;
    }
    if den <= f64::EPSILON {
        0.0
    } else {
        num / den
    }
}

/// Net move divided by path length, in [0, 1].
pub fn efficiency_ratio(prices: &[f64]) -> f64 {
    if prices.len() < 2 {
        return 0.0;
    }
    let net = (prices[prices.len() - 1] - prices[0]).abs();
    let path: f64 = prices.windows(2).map(|w| (w[1] - w[0]).abs()).sum();
    if path <= f64::EPSILON {
        0.0
    } else {
        (net / path).clamp(0.0, 1.0)
    }
}

/// Fraction of `history` that is <= `value`.
pub fn percentile_rank(history: &[f64], value: f64) -> f64 {
    if history.is_empty() {
        return 0.5;
    }
    let below = history.iter().filter(|v| **v <= value).count();
    below as f64 / history.len() as f64
}

/// Quantile with linear interpolation between order statistics. `q` is clamped to [0, 1].
pub fn quantile_linear(values: &[f64], q: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    let pos = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
}

pub fn normal_pdf(x: f64, mu: f64, sigma: f64) -> f64 {
    let z = (x - mu) / sigma;
    (-0.5 * z * z).exp() / (sigma * (2.0 * std::f64::consts::PI).sqrt())
}

pub fn sigmoid(z: f64) -> f64 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slope_of_line() {
        let v: Vec<f64> = (0..10).map(|i| 2.0 * i as f64 + 1.0).collect();
        assert!((linear_slope(&v) - 2.0).abs() < 1e-12);
        assert_eq!(linear_slope(&[1.0]), 0.0);
    }

    #[test]
    fn efficiency_bounds() {
        assert!((efficiency_ratio(&[1.0, 2.0, 3.0, 4.0]) - 1.0).abs() < 1e-12);
        let chop = [1.0, 2.0, 1.0, 2.0, 1.0];
        assert_eq!(efficiency_ratio(&chop), 0.0);
    }

    #[test]
    fn quantile_interpolates() {
        let v = [4.0, 1.0, 3.0, 2.0];
        assert_eq!(quantile_linear(&v, 0.0), Some(1.0));
        assert_eq!(quantile_linear(&v, 1.0), Some(4.0));
        assert!((quantile_linear(&v, 0.5).unwrap() - 2.5).abs() < 1e-12);
        assert_eq!(quantile_linear(&[], 0.5), None);
    }

    #[test]
    fn sigmoid_is_stable_at_extremes() {
        assert!((sigmoid(0.0) - 0.5).abs() < 1e-12);
        assert!(sigmoid(800.0) <= 1.0);
        assert!(sigmoid(-800.0) >= 0.0);
    }

    #[test]
    fn returns_skip_zero_base() {
        let r = simple_returns(&[0.0, 1.0, 1.1]);
        assert_eq!(r[0], 0.0);
        assert!((r[1] - 0.1).abs() < 1e-12);
    }
}
