use anyhow::{Result, bail};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rayon::prelude::*;

use crate::dataset::{FeatureVec, Transform};
use crate::forest::RandomForest;
use crate::pre_scaler::PreScaler;
use crate::scaler::StandardScaler;

pub const FOREST_SEED: u64 = 0;
const CV_SHUFFLE_SEED: u64 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hyperparameters {
    pub max_depth: usize,
    pub min_samples_leaf: usize,
    pub min_samples_split: usize,
    pub n_trees: usize,
}

impl Default for Hyperparameters {
    fn default() -> Self {
        Self {
            max_depth: 5,
            min_samples_leaf: 2,
            min_samples_split: 2,
            n_trees: 100,
        }
    }
}

/// Fixed-order pipeline: availability weighting, then standardization
/// (statistics fit on training rows only), then the forest.
pub struct ModelPipeline {
    pre_scaler: PreScaler,
    scaler: StandardScaler,
    forest: Option<RandomForest>,
    params: Hyperparameters,
}

impl ModelPipeline {
    pub fn new(params: Hyperparameters) -> Self {
        Self {
            pre_scaler: PreScaler,
            scaler: StandardScaler::default(),
            forest: None,
            params,
        }
    }

    pub fn params(&self) -> Hyperparameters {
        self.params
    }

    pub fn fit(&mut self, x: &[FeatureVec], y: &[f64]) -> Result<()> {
        if x.is_empty() {
            bail!("cannot fit pipeline on an empty training set");
        }
        if x.len() != y.len() {
            bail!(
                "feature/response length mismatch: {} rows vs {} responses",
                x.len(),
                y.len()
            );
        }
        self.pre_scaler.fit(x);
        let weighted = self.pre_scaler.transform(x);
        self.scaler.fit(&weighted);
        let standardized = self.scaler.transform(&weighted);
        self.forest = Some(RandomForest::fit(&standardized, y, &self.params, FOREST_SEED));
        Ok(())
    }

    pub fn predict(&self, x: &[FeatureVec]) -> Result<Vec<f64>> {
        let Some(forest) = &self.forest else {
            bail!("pipeline has not been fitted");
        };
        let weighted = self.pre_scaler.transform(x);
        Ok(forest.predict(&self.scaler.transform(&weighted)))
    }
}

/// Coefficient of determination; the score the grid search maximizes.
pub fn r2_score(actual: &[f64], predicted: &[f64]) -> f64 {
    if actual.is_empty() || actual.len() != predicted.len() {
        return 0.0;
    }
    let mean = actual.iter().sum::<f64>() / actual.len() as f64;
    let sst: f64 = actual.iter().map(|v| (v - mean).powi(2)).sum();
    if sst <= 1e-12 {
        return 0.0;
    }
    let sse: f64 = actual
        .iter()
        .zip(predicted)
        .map(|(a, p)| (a - p).powi(2))
        .sum();
    1.0 - sse / sst
}

#[derive(Debug, Clone)]
pub struct SearchGrid {
    pub max_depth: Vec<usize>,
    pub min_samples_leaf: Vec<usize>,
    pub min_samples_split: Vec<usize>,
    pub n_trees: usize,
}

impl Default for SearchGrid {
    fn default() -> Self {
        Self {
            max_depth: (3..7).collect(),
            min_samples_leaf: (2..11).collect(),
            min_samples_split: (2..8).collect(),
            n_trees: 100,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SearchOutcome {
    pub params: Hyperparameters,
    pub cv_score: f64,
}

/// Exhaustive grid search with k-fold cross-validation, parallel across the
/// grid. Each trial fits its own pipeline on its own fold copies; ties keep
/// the earliest combination in grid order.
pub fn grid_search(
    x: &[FeatureVec],
    y: &[f64],
    grid: &SearchGrid,
    folds: usize,
) -> Result<SearchOutcome> {
    if x.len() != y.len() {
        bail!("feature/response length mismatch");
    }
    let folds = folds.max(2);
    if y.len() < folds * 2 {
        bail!(
            "not enough training rows ({}) for {folds}-fold search",
            y.len()
        );
    }

    let mut combos = Vec::new();
    for &max_depth in &grid.max_depth {
        for &min_samples_leaf in &grid.min_samples_leaf {
            for &min_samples_split in &grid.min_samples_split {
                combos.push(Hyperparameters {
                    max_depth,
                    min_samples_leaf,
                    min_samples_split,
                    n_trees: grid.n_trees,
                });
            }
        }
    }
    if combos.is_empty() {
        bail!("empty hyperparameter grid");
    }

    let fold_of = fold_assignments(y.len(), folds);
    let scores: Vec<f64> = combos
        .par_iter()
        .map(|params| cv_mean_r2(x, y, &fold_of, folds, *params))
        .collect();

    let mut best = 0;
    for idx in 1..scores.len() {
        if scores[idx] > scores[best] {
            best = idx;
        }
    }
    Ok(SearchOutcome {
        params: combos[best],
        cv_score: scores[best],
    })
}

fn fold_assignments(n: usize, folds: usize) -> Vec<usize> {
    let mut order: Vec<usize> = (0..n).collect();
    order.shuffle(&mut StdRng::seed_from_u64(CV_SHUFFLE_SEED));
    let mut fold_of = vec![0usize; n];
    for (position, &idx) in order.iter().enumerate() {
        fold_of[idx] = position % folds;
    }
    fold_of
}

fn cv_mean_r2(
    x: &[FeatureVec],
    y: &[f64],
    fold_of: &[usize],
    folds: usize,
    params: Hyperparameters,
) -> f64 {
    let mut total = 0.0;
    let mut counted = 0usize;

    for fold in 0..folds {
        let mut train_x = Vec::new();
        let mut train_y = Vec::new();
        let mut val_x = Vec::new();
        let mut val_y = Vec::new();
        for idx in 0..y.len() {
            if fold_of[idx] == fold {
                val_x.push(x[idx]);
                val_y.push(y[idx]);
            } else {
                train_x.push(x[idx]);
                train_y.push(y[idx]);
            }
        }
        if train_x.is_empty() || val_x.is_empty() {
            continue;
        }

        let mut pipeline = ModelPipeline::new(params);
        if pipeline.fit(&train_x, &train_y).is_err() {
            continue;
        }
        let Ok(predicted) = pipeline.predict(&val_x) else {
            continue;
        };
        total += r2_score(&val_y, &predicted);
        counted += 1;
    }

    if counted == 0 {
        f64::NEG_INFINITY
    } else {
        total / counted as f64
    }
}
