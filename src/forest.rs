use std::cmp::Ordering;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

use crate::dataset::{FEATURE_COUNT, FeatureVec};
use crate::pipeline::Hyperparameters;

enum Node {
    Leaf {
        value: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: Box<Node>,
        right: Box<Node>,
    },
}

/// CART regression tree: greedy variance-reduction splits bounded by
/// `max_depth`, `min_samples_split`, and `min_samples_leaf`.
pub struct RegressionTree {
    root: Node,
}

impl RegressionTree {
    pub fn fit(x: &[FeatureVec], y: &[f64], indices: Vec<usize>, params: &Hyperparameters) -> Self {
        Self {
            root: grow(x, y, indices, 0, params),
        }
    }

    pub fn predict_one(&self, row: &FeatureVec) -> f64 {
        let mut node = &self.root;
        loop {
            match node {
                Node::Leaf { value } => return *value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    node = if row[*feature] <= *threshold {
                        left
                    } else {
                        right
                    };
                }
            }
        }
    }
}

fn grow(
    x: &[FeatureVec],
    y: &[f64],
    indices: Vec<usize>,
    depth: usize,
    params: &Hyperparameters,
) -> Node {
    if depth >= params.max_depth || indices.len() < params.min_samples_split {
        return Node::Leaf {
            value: mean(y, &indices),
        };
    }
    let Some(split) = best_split(x, y, &indices, params.min_samples_leaf) else {
        return Node::Leaf {
            value: mean(y, &indices),
        };
    };
    Node::Split {
        feature: split.feature,
        threshold: split.threshold,
        left: Box::new(grow(x, y, split.left, depth + 1, params)),
        right: Box::new(grow(x, y, split.right, depth + 1, params)),
    }
}

struct SplitCandidate {
    feature: usize,
    threshold: f64,
    left: Vec<usize>,
    right: Vec<usize>,
}

/// Scans every feature with a sorted sweep, scoring candidate thresholds by
/// sum-of-squared-error reduction over the parent node.
fn best_split(
    x: &[FeatureVec],
    y: &[f64],
    indices: &[usize],
    min_samples_leaf: usize,
) -> Option<SplitCandidate> {
    let n = indices.len();
    let total_sum: f64 = indices.iter().map(|&i| y[i]).sum();
    let total_sq: f64 = indices.iter().map(|&i| y[i] * y[i]).sum();
    let parent_sse = total_sq - total_sum * total_sum / n as f64;

    let mut best: Option<(f64, usize, f64)> = None;
    let mut order = indices.to_vec();
    for feature in 0..FEATURE_COUNT {
        order.sort_by(|&a, &b| {
            x[a][feature]
                .partial_cmp(&x[b][feature])
                .unwrap_or(Ordering::Equal)
        });

        let mut left_sum = 0.0;
        let mut left_sq = 0.0;
        for split_at in 1..n {
            let prev = order[split_at - 1];
            left_sum += y[prev];
            left_sq += y[prev] * y[prev];

            // No threshold separates equal values.
            if x[order[split_at]][feature] <= x[prev][feature] {
                continue;
            }
            if split_at < min_samples_leaf || n - split_at < min_samples_leaf {
                continue;
            }

            let right_sum = total_sum - left_sum;
            let right_sq = total_sq - left_sq;
            let left_sse = left_sq - left_sum * left_sum / split_at as f64;
            let right_sse = right_sq - right_sum * right_sum / (n - split_at) as f64;
            let reduction = parent_sse - left_sse - right_sse;

            if best.is_none_or(|(best_reduction, _, _)| reduction > best_reduction)
                && reduction > 1e-12
            {
                let threshold = (x[prev][feature] + x[order[split_at]][feature]) / 2.0;
                best = Some((reduction, feature, threshold));
            }
        }
    }

    let (_, feature, threshold) = best?;
    let mut left = Vec::new();
    let mut right = Vec::new();
    for &i in indices {
        if x[i][feature] <= threshold {
            left.push(i);
        } else {
            right.push(i);
        }
    }
    if left.is_empty() || right.is_empty() {
        return None;
    }
    Some(SplitCandidate {
        feature,
        threshold,
        left,
        right,
    })
}

fn mean(y: &[f64], indices: &[usize]) -> f64 {
    if indices.is_empty() {
        return 0.0;
    }
    indices.iter().map(|&i| y[i]).sum::<f64>() / indices.len() as f64
}

/// Bagged ensemble of regression trees. Each tree bootstraps its sample
/// with a seed derived from the base seed and the tree index, so identical
/// inputs always grow an identical forest.
pub struct RandomForest {
    trees: Vec<RegressionTree>,
}

impl RandomForest {
    pub fn fit(x: &[FeatureVec], y: &[f64], params: &Hyperparameters, seed: u64) -> Self {
        let n = x.len();
        if n == 0 {
            return Self { trees: Vec::new() };
        }
        let trees: Vec<RegressionTree> = (0..params.n_trees)
            .into_par_iter()
            .map(|tree_idx| {
                let mut rng = StdRng::seed_from_u64(seed.wrapping_add(tree_idx as u64));
                let indices: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();
                RegressionTree::fit(x, y, indices, params)
            })
            .collect();
        Self { trees }
    }

    pub fn predict_one(&self, row: &FeatureVec) -> f64 {
        if self.trees.is_empty() {
            return 0.0;
        }
        let total: f64 = self.trees.iter().map(|tree| tree.predict_one(row)).sum();
        total / self.trees.len() as f64
    }

    pub fn predict(&self, rows: &[FeatureVec]) -> Vec<f64> {
        rows.iter().map(|row| self.predict_one(row)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step_data() -> (Vec<FeatureVec>, Vec<f64>) {
        // y depends only on feature 0: low half maps to 1, high half to 9.
        let mut x = Vec::new();
        let mut y = Vec::new();
        for i in 0..20 {
            let mut row = [0.0; FEATURE_COUNT];
            row[0] = i as f64;
            x.push(row);
            y.push(if i < 10 { 1.0 } else { 9.0 });
        }
        (x, y)
    }

    fn params() -> Hyperparameters {
        Hyperparameters {
            max_depth: 3,
            min_samples_leaf: 2,
            min_samples_split: 2,
            n_trees: 25,
        }
    }

    #[test]
    fn single_tree_recovers_step_function() {
        let (x, y) = step_data();
        let tree = RegressionTree::fit(&x, &y, (0..x.len()).collect(), &params());
        let mut low = [0.0; FEATURE_COUNT];
        low[0] = 3.0;
        let mut high = [0.0; FEATURE_COUNT];
        high[0] = 16.0;
        assert_eq!(tree.predict_one(&low), 1.0);
        assert_eq!(tree.predict_one(&high), 9.0);
    }

    #[test]
    fn constant_response_yields_single_leaf() {
        let (x, _) = step_data();
        let y = vec![4.0; x.len()];
        let tree = RegressionTree::fit(&x, &y, (0..x.len()).collect(), &params());
        let mut row = [0.0; FEATURE_COUNT];
        row[0] = 2.0;
        assert_eq!(tree.predict_one(&row), 4.0);
    }

    #[test]
    fn forest_is_deterministic_for_a_fixed_seed() {
        let (x, y) = step_data();
        let first = RandomForest::fit(&x, &y, &params(), 7);
        let second = RandomForest::fit(&x, &y, &params(), 7);
        assert_eq!(first.predict(&x), second.predict(&x));
    }

    #[test]
    fn forest_separates_the_step() {
        let (x, y) = step_data();
        let forest = RandomForest::fit(&x, &y, &params(), 0);
        let mut low = [0.0; FEATURE_COUNT];
        low[0] = 1.0;
        let mut high = [0.0; FEATURE_COUNT];
        high[0] = 18.0;
        assert!(forest.predict_one(&low) < 4.0);
        assert!(forest.predict_one(&high) > 6.0);
    }
}
