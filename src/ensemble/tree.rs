use rand::rngs::StdRng;
use rand::seq::index;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TreeParams {
    pub max_depth: usize,
    pub min_samples_leaf: usize,
    /// Features considered per split; `None` uses all of them.
    pub max_features: Option<usize>,
}

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Leaf(f64),
    Split {
        feature: usize,
        threshold: f64,
        left: Box<Node>,
        right: Box<Node>,
    },
}

/// CART regression tree minimizing squared error. Used directly for forest votes
/// (targets in {0, 1}) and for boosting residuals.
#[derive(Debug, Clone, PartialEq)]
pub struct RegressionTree {
    root: Node,
}

struct SplitCandidate {
    feature: usize,
    threshold: f64,
    sse: f64,
}

impl RegressionTree {
    pub fn fit(
        x: &[Vec<f64>],
        target: &[f64],
        indices: &[usize],
        params: TreeParams,
        rng: &mut StdRng,
    ) -> Self {
        let root = build(x, target, indices.to_vec(), 0, params, rng);
        Self { root }
    }

    pub fn predict(&self, row: &[f64]) -> f64 {
        let mut node = &self.root;
        loop {
            match node {
                Node::Leaf(v) => return *v,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    let value = row.get(*feature).copied().unwrap_or(0.0);
                    node = if value <= *threshold { left } else { right };
                }
            }
        }
    }

    pub fn depth(&self) -> usize {
        fn walk(node: &Node) -> usize {
            match node {
                Node::Leaf(_) => 0,
                Node::Split { left, right, .. } => 1 + walk(left).max(walk(right)),
            }
        }
        walk(&self.root)
    }
}

fn build(
    x: &[Vec<f64>],
    target: &[f64],
    idx: Vec<usize>,
    depth: usize,
    params: TreeParams,
    rng: &mut StdRng,
) -> Node {
    let n = idx.len();
    if n == 0 {
        return Node::Leaf(0.0);
    }
    let sum: f64 = idx.iter().map(|i| target[*i]).sum();
    let sum_sq: f64 = idx.iter().map(|i| target[*i] * target[*i]).sum();
    let mean = sum / n as f64;
    let parent_sse = sum_sq - sum * sum / n as f64;
    let min_leaf = params.min_samples_leaf.max(1);
    if depth >= params.max_depth || n < 2 * min_leaf || parent_sse <= 1e-12 {
        return Node::Leaf(mean);
    }

    let Some(best) = best_split(x, target, &idx, params, min_leaf, rng) else {
        return Node::Leaf(mean);
    };
    if best.sse >= parent_sse - 1e-12 {
        return Node::Leaf(mean);
    }

    let (left_idx, right_idx): (Vec<usize>, Vec<usize>) = idx
        .into_iter()
        .partition(|i| x[*i][best.feature] <= best.threshold);
    Node::Split {
        feature: best.feature,
        threshold: best.threshold,
        left: Box::new(build(x, target, left_idx, depth + 1, params, rng)),
        right: Box::new(build(x, target, right_idx, depth + 1, params, rng)),
    }
}

fn best_split(
    x: &[Vec<f64>],
    target: &[f64],
    idx: &[usize],
    params: TreeParams,
    min_leaf: usize,
    rng: &mut StdRng,
) -> Option<SplitCandidate> {
    let n_features = x.get(idx[0]).map(Vec::len).unwrap_or(0);
    if n_features == 0 {
        return None;
    }
    let features: Vec<usize> = match params.max_features {
        Some(k) if k < n_features => index::sample(rng, n_features, k.max(1)).into_vec(),
        _ => (0..n_features).collect(),
    };

    let n = idx.len();
    let total_sum: f64 = idx.iter().map(|i| target[*i]).sum();
    let total_sq: f64 = idx.iter().map(|i| target[*i] * target[*i]).sum();
    let mut best: Option<SplitCandidate> = None;
    let mut order = idx.to_vec();
    for f in features {
        order.sort_by(|a, b| x[*a][f].total_cmp(&x[*b][f]));
        let mut left_sum = 0.0;
        let mut left_sq = 0.0;
        for k in 1..n {
            let t = target[order[k - 1]];
            left_sum += t;
            left_sq += t * t;
            if k < min_leaf || n - k < min_leaf {
                continue;
            }
            let lo = x[order[k - 1]][f];
            let hi = x[order[k]][f];
            if lo == hi {
                continue;
            }
            let right_sum = total_sum - left_sum;
            let right_sq = total_sq - left_sq;
            let sse = (left_sq - left_sum * left_sum / k as f64)
                + (right_sq - right_sum * right_sum / (n - k) as f64);
            if best.as_ref().map_or(true, |b| sse < b.sse) {
                best = Some(SplitCandidate {
                    feature: f,
                    threshold: lo + (hi - lo) / 2.0,
                    sse,
                });
            }
        }
    }
    best
}
