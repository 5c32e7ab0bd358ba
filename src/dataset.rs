use std::collections::HashMap;

use crate::store::{FeatureRecord, ResponseRecord};

pub const FEATURE_NAMES: [&str; 8] = [
    "team_id",
    "ict_index",
    "chance_of_playing",
    "form",
    "points_per_game",
    "previous_points",
    "is_home",
    "next_fixture_difficulty",
];

pub const FEATURE_COUNT: usize = FEATURE_NAMES.len();
pub const AVAILABILITY_IDX: usize = 2;

pub type FeatureVec = [f64; FEATURE_COUNT];

/// A pipeline stage: learn parameters from training rows, then map rows.
/// Stateless stages leave `fit` a no-op.
pub trait Transform {
    fn fit(&mut self, rows: &[FeatureVec]);
    fn transform(&self, rows: &[FeatureVec]) -> Vec<FeatureVec>;
}

/// Converts a stored row to a model input, applying the missing-value
/// policy. Status overrides run before the generic availability default so
/// that an injured or suspended player never falls through to "fully
/// available"; `status` is only meaningful for the current batch (upstream
/// statuses describe the present, not history).
pub fn feature_vector(record: &FeatureRecord, status: Option<&str>) -> FeatureVec {
    let chance_of_playing = match status {
        Some("u") | Some("s") | Some("i") => 0.0,
        Some("d") => record.chance_of_playing.unwrap_or(50.0),
        _ => record.chance_of_playing.unwrap_or(100.0),
    };
    [
        record.team_id as f64,
        record.ict_index.unwrap_or(0.0),
        chance_of_playing,
        record.form.unwrap_or(0.0),
        record.points_per_game.unwrap_or(0.0),
        record.previous_points,
        if record.is_home { 1.0 } else { 0.0 },
        record.next_fixture_difficulty,
    ]
}

/// Inner join of features to responses by entry id. The speculative batch
/// has no responses yet, so it never reaches the training set.
pub fn build_training(
    features: &[FeatureRecord],
    responses: &[ResponseRecord],
) -> (Vec<FeatureVec>, Vec<f64>) {
    let response_by_entry: HashMap<i64, f64> = responses
        .iter()
        .map(|record| (record.entry_id, record.points_scored))
        .collect();

    let mut x = Vec::new();
    let mut y = Vec::new();
    for record in features {
        let Some(points) = response_by_entry.get(&record.entry_id) else {
            continue;
        };
        x.push(feature_vector(record, None));
        y.push(*points);
    }
    (x, y)
}

/// Rows to predict: the most recent batch, status-aware fills applied.
/// Player ids ride alongside the matrix and never enter the pipeline.
pub fn prediction_matrix(
    latest: &[FeatureRecord],
    statuses: &HashMap<u32, String>,
) -> (Vec<u32>, Vec<FeatureVec>) {
    let mut player_ids = Vec::with_capacity(latest.len());
    let mut x = Vec::with_capacity(latest.len());
    for record in latest {
        let status = statuses.get(&record.player_id).map(String::as_str);
        player_ids.push(record.player_id);
        x.push(feature_vector(record, status));
    }
    (player_ids, x)
}
