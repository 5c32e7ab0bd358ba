use std::cmp::Ordering;

use anyhow::{Context, Result};
use rusqlite::Connection;
use tracing::info;

use crate::dataset;
use crate::pipeline::{self, ModelPipeline, SearchGrid};
use crate::store::{self, PredictionRecord};

// A 4-fold search needs at least two rows per fold.
const MIN_TRAINING_ROWS: usize = 8;
const CV_FOLDS: usize = 4;

#[derive(Debug, Clone)]
pub struct ModelReport {
    pub trained: bool,
    pub searched: bool,
    pub cv_score: Option<f64>,
    pub training_rows: usize,
    pub predictions: usize,
    pub message: String,
}

impl ModelReport {
    fn skipped(training_rows: usize, message: impl Into<String>) -> Self {
        Self {
            trained: false,
            searched: false,
            cv_score: None,
            training_rows,
            predictions: 0,
            message: message.into(),
        }
    }
}

/// Fits (or loads) the model from settled history and replaces the
/// prediction table for the most recent capture. Reads features and
/// responses only; never writes them.
pub fn run_modelling(conn: &mut Connection, force_search: bool) -> Result<ModelReport> {
    let features = store::load_features(conn).context("load feature history")?;
    let responses = store::load_responses(conn).context("load response history")?;
    let (x, y) = dataset::build_training(&features, &responses);

    if y.len() < MIN_TRAINING_ROWS {
        info!(rows = y.len(), "not enough settled history, modelling skipped");
        return Ok(ModelReport::skipped(
            y.len(),
            format!(
                "modelling skipped: {} settled rows, need at least {MIN_TRAINING_ROWS}",
                y.len()
            ),
        ));
    }

    let stored = store::load_hyperparameters(conn).context("load hyperparameters")?;
    let (params, searched, cv_score) = match stored {
        Some(params) if !force_search => (params, false, None),
        _ => {
            let outcome = pipeline::grid_search(&x, &y, &SearchGrid::default(), CV_FOLDS)
                .context("hyperparameter search")?;
            store::replace_hyperparameters(conn, &outcome.params)
                .context("persist hyperparameters")?;
            info!(
                max_depth = outcome.params.max_depth,
                min_samples_leaf = outcome.params.min_samples_leaf,
                min_samples_split = outcome.params.min_samples_split,
                cv_score = outcome.cv_score,
                "grid search complete"
            );
            (outcome.params, true, Some(outcome.cv_score))
        }
    };

    let mut model = ModelPipeline::new(params);
    model.fit(&x, &y).context("fit model pipeline")?;

    let latest = store::latest_batch(conn).context("load latest batch")?;
    if latest.is_empty() {
        return Ok(ModelReport::skipped(
            y.len(),
            "modelling skipped: no captured batch to predict",
        ));
    }
    let statuses = store::player_statuses(conn).context("load player statuses")?;
    let (player_ids, x_new) = dataset::prediction_matrix(&latest, &statuses);
    let predicted = model.predict(&x_new).context("predict latest batch")?;

    let mut records: Vec<PredictionRecord> = player_ids
        .into_iter()
        .zip(predicted)
        .map(|(player_id, predicted_points)| PredictionRecord {
            player_id,
            predicted_points,
        })
        .collect();
    records.sort_by(|a, b| {
        b.predicted_points
            .partial_cmp(&a.predicted_points)
            .unwrap_or(Ordering::Equal)
    });
    store::replace_predictions(conn, &records).context("persist predictions")?;

    info!(
        training_rows = y.len(),
        predictions = records.len(),
        searched,
        "modelling run complete"
    );
    Ok(ModelReport {
        trained: true,
        searched,
        cv_score,
        training_rows: y.len(),
        predictions: records.len(),
        message: format!(
            "model fit on {} rows, {} predictions written",
            y.len(),
            records.len()
        ),
    })
}
