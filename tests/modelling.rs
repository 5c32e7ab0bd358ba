use chrono::{TimeZone, Utc};
use rusqlite::Connection;

use fpl_predictor::dataset::FEATURE_COUNT;
use fpl_predictor::modelling::run_modelling;
use fpl_predictor::pipeline::{Hyperparameters, ModelPipeline};
use fpl_predictor::store::{self, FeatureRecord, PlayerInfoRecord, ResponseRecord};

fn test_conn() -> Connection {
    let conn = Connection::open_in_memory().unwrap();
    store::init_schema(&conn).unwrap();
    conn
}

fn feature_row(entry_id: i64, player_id: u32, signal: f64, day: u32) -> FeatureRecord {
    FeatureRecord {
        entry_id,
        player_id,
        team_id: (player_id % 20) + 1,
        ict_index: Some(signal),
        chance_of_playing: None,
        form: Some(signal / 2.0),
        points_per_game: Some(signal / 3.0),
        previous_points: signal.floor(),
        is_home: player_id % 2 == 0,
        next_fixture_difficulty: 3.0,
        captured_at: Utc.with_ymd_and_hms(2025, 9, day, 10, 0, 0).unwrap(),
    }
}

#[test]
fn pipeline_preserves_monotonic_ranking() {
    // Noiseless data with a single informative, monotone signal: the fitted
    // pipeline must rank at least 90% of pairs the same way as the truth.
    let n = 60;
    let mut x = Vec::new();
    let mut y = Vec::new();
    for i in 0..n {
        let mut row = [0.0; FEATURE_COUNT];
        row[0] = i as f64;
        row[2] = 100.0; // fully available
        x.push(row);
        y.push(i as f64);
    }

    let mut pipeline = ModelPipeline::new(Hyperparameters {
        max_depth: 6,
        min_samples_leaf: 2,
        min_samples_split: 2,
        n_trees: 50,
    });
    pipeline.fit(&x, &y).unwrap();
    let predicted = pipeline.predict(&x).unwrap();

    let mut agree = 0usize;
    let mut total = 0usize;
    for i in 0..n {
        for j in (i + 1)..n {
            total += 1;
            if (predicted[j] - predicted[i]) * (y[j] - y[i]) > 0.0 {
                agree += 1;
            }
        }
    }
    assert!(
        agree as f64 / total as f64 >= 0.9,
        "only {agree}/{total} pairs ranked correctly"
    );
}

#[test]
fn run_modelling_predicts_latest_batch_with_stored_params() {
    let mut conn = test_conn();

    // Settled history: 20 rows whose response tracks the signal.
    let mut features = Vec::new();
    let mut responses = Vec::new();
    for i in 0..20u32 {
        let signal = (i as f64) / 2.0;
        features.push(feature_row(i as i64 + 1, 100 + i, signal, 1));
        responses.push(ResponseRecord {
            entry_id: i as i64 + 1,
            points_scored: signal,
        });
    }
    // Speculative batch awaiting prediction.
    for i in 0..10u32 {
        features.push(feature_row(i as i64 + 21, 200 + i, (i as f64) / 2.0, 8));
    }
    store::insert_features(&conn, &features).unwrap();
    store::insert_responses(&conn, &responses).unwrap();
    store::replace_player_info(
        &mut conn,
        &[PlayerInfoRecord {
            player_id: 203,
            first_name: "Out".to_string(),
            second_name: "Injured".to_string(),
            team_name: "Arsenal".to_string(),
            team_short_name: "ARS".to_string(),
            current_price: 5.0,
            position: "MID".to_string(),
            status: "i".to_string(),
        }],
    )
    .unwrap();

    let stored = Hyperparameters {
        max_depth: 4,
        min_samples_leaf: 2,
        min_samples_split: 2,
        n_trees: 30,
    };
    store::replace_hyperparameters(&mut conn, &stored).unwrap();

    let report = run_modelling(&mut conn, false).unwrap();
    assert!(report.trained);
    assert!(!report.searched);
    assert_eq!(report.training_rows, 20);
    assert_eq!(report.predictions, 10);

    let predictions = store::load_predictions(&conn).unwrap();
    assert_eq!(predictions.len(), 10);
    // Only latest-batch players appear.
    assert!(predictions.iter().all(|p| p.player_id >= 200));
    // Sorted descending.
    for pair in predictions.windows(2) {
        assert!(pair[0].predicted_points >= pair[1].predicted_points);
    }
    // Stored hyperparameters survive a non-search run unchanged.
    assert_eq!(store::load_hyperparameters(&conn).unwrap().unwrap(), stored);
}

#[test]
fn run_modelling_skips_without_settled_history() {
    let mut conn = test_conn();
    let report = run_modelling(&mut conn, false).unwrap();
    assert!(!report.trained);
    assert_eq!(report.predictions, 0);
    assert!(report.message.contains("skipped"));
    assert!(store::load_predictions(&conn).unwrap().is_empty());
}
