use serde::{Deserialize, Serialize};

/// Non-decreasing step function fitted with pool-adjacent-violators.
///
/// `knots[i]` is the smallest input covered by block `i`; inputs below the first knot
/// take the first value and inputs above the last take the last value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IsotonicRegression {
    knots: Vec<f64>,
    values: Vec<f64>,
}

#[derive(Debug, Clone, Copy)]
struct Block {
    start: f64,
    sum: f64,
    weight: f64,
}

impl Block {
    fn mean(&self) -> f64 {
        self.sum / self.weight
    }
}

impl IsotonicRegression {
    /// Inputs are validated by the caller and must be non-empty.
    pub fn fit(y: &[u8], p: &[f64]) -> Self {
        let mut pairs: Vec<(f64, f64)> = p.iter().zip(y).map(|(x, t)| (*x, f64::from(*t))).collect();
        pairs.sort_by(|l, r| l.0.total_cmp(&r.0));

        let mut blocks: Vec<Block> = Vec::with_capacity(pairs.len());
        for (x, t) in pairs {
            match blocks.last_mut() {
                // Equal inputs must map to one value.
                Some(last) if last.start == x => {
                    last.sum += t;
                    last.weight += 1.0;
                }
                _ => blocks.push(Block {
                    start: x,
                    sum: t,
                    weight: 1.0,
                }),
            }
            while blocks.len() >= 2 {
                let n = blocks.len();
                if blocks[n - 2].mean() <= blocks[n - 1].mean() {
                    break;
                }
                let tail = blocks.pop();
                if let (Some(tail), Some(prev)) = (tail, blocks.last_mut()) {
                    prev.sum += tail.sum;
                    prev.weight += tail.weight;
                }
            }
        }

        Self {
            knots: blocks.iter().map(|b| b.start).collect(),
            values: blocks.iter().map(Block::mean).collect(),
        }
    }

    pub fn apply(&self, p: f64) -> f64 {
        let idx = self.knots.partition_point(|k| *k <= p);
        let i = idx.saturating_sub(1).min(self.values.len().saturating_sub(1));
        self.values.get(i).copied().unwrap_or(p)
    }

    pub fn knots(&self) -> &[f64] {
        &self.knots
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pools_violators_into_monotone_steps() {
        let p = [0.1, 0.2, 0.3, 0.4];
        let y = [0, 1, 0, 1];
        let iso = IsotonicRegression::fit(&y, &p);
        assert_eq!(iso.values(), &[0.0, 0.5, 1.0]);
        assert!((iso.apply(0.25) - 0.5).abs() < 1e-12);
        assert!((iso.apply(0.35) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn clips_outside_fitted_range() {
        let iso = IsotonicRegression::fit(&[0, 1], &[0.3, 0.7]);
        assert_eq!(iso.apply(0.0), 0.0);
        assert_eq!(iso.apply(1.0), 1.0);
    }

    #[test]
    fn ties_share_a_value() {
        let iso = IsotonicRegression::fit(&[0, 1, 1], &[0.5, 0.5, 0.9]);
        assert!((iso.apply(0.5) - 0.5).abs() < 1e-12);
        assert_eq!(iso.apply(0.95), 1.0);
    }
}
