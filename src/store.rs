use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, params};

use crate::pipeline::Hyperparameters;

/// One persisted feature row. Rows written by the same reconciliation cycle
/// share a `captured_at`; the batch with the greatest `captured_at` is
/// speculative until its gameweek concludes.
#[derive(Debug, Clone)]
pub struct FeatureRecord {
    pub entry_id: i64,
    pub player_id: u32,
    pub team_id: u32,
    pub ict_index: Option<f64>,
    pub chance_of_playing: Option<f64>,
    pub form: Option<f64>,
    pub points_per_game: Option<f64>,
    pub previous_points: f64,
    pub is_home: bool,
    pub next_fixture_difficulty: f64,
    pub captured_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy)]
pub struct ResponseRecord {
    pub entry_id: i64,
    pub points_scored: f64,
}

#[derive(Debug, Clone)]
pub struct PlayerInfoRecord {
    pub player_id: u32,
    pub first_name: String,
    pub second_name: String,
    pub team_name: String,
    pub team_short_name: String,
    pub current_price: f64,
    pub position: String,
    pub status: String,
}

#[derive(Debug, Clone, Copy)]
pub struct PredictionRecord {
    pub player_id: u32,
    pub predicted_points: f64,
}

pub fn default_db_path() -> Option<PathBuf> {
    // Prefer XDG cache.
    if let Ok(base) = std::env::var("XDG_CACHE_HOME")
        && !base.trim().is_empty()
    {
        return Some(PathBuf::from(base).join("fpl_predictor").join("fpl.sqlite"));
    }
    // Fallback to ~/.cache on linux-like systems.
    let home = std::env::var("HOME").ok()?;
    if home.trim().is_empty() {
        return None;
    }
    Some(
        PathBuf::from(home)
            .join(".cache")
            .join("fpl_predictor")
            .join("fpl.sqlite"),
    )
}

pub fn open_db(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).ok();
    }
    let conn =
        Connection::open(path).with_context(|| format!("open sqlite db {}", path.display()))?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        PRAGMA journal_mode = WAL;
        CREATE TABLE IF NOT EXISTS features (
            entry_id INTEGER PRIMARY KEY,
            player_id INTEGER NOT NULL,
            team_id INTEGER NOT NULL,
            ict_index REAL NULL,
            chance_of_playing REAL NULL,
            form REAL NULL,
            points_per_game REAL NULL,
            previous_points REAL NOT NULL,
            is_home INTEGER NOT NULL,
            next_fixture_difficulty REAL NOT NULL,
            captured_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_features_captured_at ON features(captured_at);
        CREATE INDEX IF NOT EXISTS idx_features_player ON features(player_id);

        CREATE TABLE IF NOT EXISTS response (
            entry_id INTEGER PRIMARY KEY,
            points_scored REAL NOT NULL
        );

        CREATE TABLE IF NOT EXISTS player_info (
            player_id INTEGER PRIMARY KEY,
            first_name TEXT NOT NULL,
            second_name TEXT NOT NULL,
            team_name TEXT NOT NULL,
            team_short_name TEXT NOT NULL,
            current_price REAL NOT NULL,
            position TEXT NOT NULL,
            status TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS hyperparameters (
            max_depth INTEGER NOT NULL,
            min_samples_leaf INTEGER NOT NULL,
            min_samples_split INTEGER NOT NULL,
            n_trees INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS predictions (
            player_id INTEGER NOT NULL,
            predicted_points REAL NOT NULL
        );
        "#,
    )
    .context("create sqlite schema")?;
    Ok(())
}

pub fn format_ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|at| at.with_timezone(&Utc))
        .with_context(|| format!("invalid captured_at timestamp {raw}"))
}

pub fn max_captured_at(conn: &Connection) -> Result<Option<DateTime<Utc>>> {
    let raw = conn
        .query_row("SELECT MAX(captured_at) FROM features", [], |row| {
            row.get::<_, Option<String>>(0)
        })
        .context("query max captured_at")?;
    raw.as_deref().map(parse_ts).transpose()
}

/// The next free `entry_id`: one past the current maximum, or 1 on an empty
/// table. Reclaims the range of any batch deleted earlier in the same cycle.
pub fn next_entry_id(conn: &Connection) -> Result<i64> {
    let max = conn
        .query_row("SELECT MAX(entry_id) FROM features", [], |row| {
            row.get::<_, Option<i64>>(0)
        })
        .context("query max entry_id")?;
    Ok(max.unwrap_or(0) + 1)
}

pub fn load_features(conn: &Connection) -> Result<Vec<FeatureRecord>> {
    query_features(conn, "ORDER BY entry_id ASC", &[])
}

pub fn latest_batch(conn: &Connection) -> Result<Vec<FeatureRecord>> {
    query_features(
        conn,
        "WHERE captured_at = (SELECT MAX(captured_at) FROM features) ORDER BY entry_id ASC",
        &[],
    )
}

fn query_features(
    conn: &Connection,
    clause: &str,
    args: &[&dyn rusqlite::ToSql],
) -> Result<Vec<FeatureRecord>> {
    let sql = format!(
        "SELECT entry_id, player_id, team_id, ict_index, chance_of_playing, form, \
         points_per_game, previous_points, is_home, next_fixture_difficulty, captured_at \
         FROM features {clause}"
    );
    let mut stmt = conn.prepare(&sql).context("prepare features query")?;
    let rows = stmt
        .query_map(args, |row| {
            Ok((
                FeatureRecord {
                    entry_id: row.get(0)?,
                    player_id: row.get::<_, u32>(1)?,
                    team_id: row.get::<_, u32>(2)?,
                    ict_index: row.get(3)?,
                    chance_of_playing: row.get(4)?,
                    form: row.get(5)?,
                    points_per_game: row.get(6)?,
                    previous_points: row.get(7)?,
                    is_home: row.get::<_, i64>(8)? != 0,
                    next_fixture_difficulty: row.get(9)?,
                    // Placeholder; replaced with the parsed column below.
                    captured_at: DateTime::<Utc>::UNIX_EPOCH,
                },
                row.get::<_, String>(10)?,
            ))
        })
        .context("query features")?;

    let mut out = Vec::new();
    for row in rows {
        let (mut record, raw_ts) = row.context("decode feature row")?;
        record.captured_at = parse_ts(&raw_ts)?;
        out.push(record);
    }
    Ok(out)
}

pub fn insert_features(conn: &Connection, records: &[FeatureRecord]) -> Result<()> {
    let mut stmt = conn
        .prepare(
            "INSERT INTO features (
                entry_id, player_id, team_id, ict_index, chance_of_playing, form,
                points_per_game, previous_points, is_home, next_fixture_difficulty, captured_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        )
        .context("prepare feature insert")?;
    for record in records {
        stmt.execute(params![
            record.entry_id,
            record.player_id as i64,
            record.team_id as i64,
            record.ict_index,
            record.chance_of_playing,
            record.form,
            record.points_per_game,
            record.previous_points,
            bool_to_i64(record.is_home),
            record.next_fixture_difficulty,
            format_ts(record.captured_at),
        ])
        .context("insert feature row")?;
    }
    Ok(())
}

pub fn delete_batch(conn: &Connection, captured_at: DateTime<Utc>) -> Result<usize> {
    conn.execute(
        "DELETE FROM features WHERE captured_at = ?1",
        params![format_ts(captured_at)],
    )
    .context("delete feature batch")
}

pub fn load_responses(conn: &Connection) -> Result<Vec<ResponseRecord>> {
    let mut stmt = conn
        .prepare("SELECT entry_id, points_scored FROM response ORDER BY entry_id ASC")
        .context("prepare response query")?;
    let rows = stmt
        .query_map([], |row| {
            Ok(ResponseRecord {
                entry_id: row.get(0)?,
                points_scored: row.get(1)?,
            })
        })
        .context("query responses")?;

    let mut out = Vec::new();
    for row in rows {
        out.push(row.context("decode response row")?);
    }
    Ok(out)
}

pub fn insert_responses(conn: &Connection, records: &[ResponseRecord]) -> Result<()> {
    let mut stmt = conn
        .prepare("INSERT INTO response (entry_id, points_scored) VALUES (?1, ?2)")
        .context("prepare response insert")?;
    for record in records {
        stmt.execute(params![record.entry_id, record.points_scored])
            .context("insert response row")?;
    }
    Ok(())
}

pub fn replace_player_info(conn: &mut Connection, records: &[PlayerInfoRecord]) -> Result<()> {
    let tx = conn
        .transaction()
        .context("begin player_info transaction")?;
    tx.execute("DELETE FROM player_info", [])
        .context("clear player_info")?;
    {
        let mut stmt = tx
            .prepare(
                "INSERT INTO player_info (
                    player_id, first_name, second_name, team_name, team_short_name,
                    current_price, position, status
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )
            .context("prepare player_info insert")?;
        for record in records {
            stmt.execute(params![
                record.player_id as i64,
                record.first_name,
                record.second_name,
                record.team_name,
                record.team_short_name,
                record.current_price,
                record.position,
                record.status,
            ])
            .context("insert player_info row")?;
        }
    }
    tx.commit().context("commit player_info transaction")
}

pub fn player_statuses(conn: &Connection) -> Result<HashMap<u32, String>> {
    let mut stmt = conn
        .prepare("SELECT player_id, status FROM player_info")
        .context("prepare status query")?;
    let rows = stmt
        .query_map([], |row| {
            Ok((row.get::<_, u32>(0)?, row.get::<_, String>(1)?))
        })
        .context("query statuses")?;

    let mut out = HashMap::new();
    for row in rows {
        let (player_id, status) = row.context("decode status row")?;
        out.insert(player_id, status);
    }
    Ok(out)
}

pub fn load_hyperparameters(conn: &Connection) -> Result<Option<Hyperparameters>> {
    let mut stmt = conn
        .prepare(
            "SELECT max_depth, min_samples_leaf, min_samples_split, n_trees \
             FROM hyperparameters LIMIT 1",
        )
        .context("prepare hyperparameter query")?;
    let mut rows = stmt.query([]).context("query hyperparameters")?;
    let Some(row) = rows.next().context("read hyperparameter row")? else {
        return Ok(None);
    };
    Ok(Some(Hyperparameters {
        max_depth: row.get::<_, i64>(0)? as usize,
        min_samples_leaf: row.get::<_, i64>(1)? as usize,
        min_samples_split: row.get::<_, i64>(2)? as usize,
        n_trees: row.get::<_, i64>(3)? as usize,
    }))
}

pub fn replace_hyperparameters(conn: &mut Connection, params_row: &Hyperparameters) -> Result<()> {
    let tx = conn
        .transaction()
        .context("begin hyperparameter transaction")?;
    tx.execute("DELETE FROM hyperparameters", [])
        .context("clear hyperparameters")?;
    tx.execute(
        "INSERT INTO hyperparameters (max_depth, min_samples_leaf, min_samples_split, n_trees) \
         VALUES (?1, ?2, ?3, ?4)",
        params![
            params_row.max_depth as i64,
            params_row.min_samples_leaf as i64,
            params_row.min_samples_split as i64,
            params_row.n_trees as i64,
        ],
    )
    .context("insert hyperparameters")?;
    tx.commit().context("commit hyperparameter transaction")
}

pub fn replace_predictions(conn: &mut Connection, records: &[PredictionRecord]) -> Result<()> {
    let tx = conn
        .transaction()
        .context("begin predictions transaction")?;
    tx.execute("DELETE FROM predictions", [])
        .context("clear predictions")?;
    {
        let mut stmt = tx
            .prepare("INSERT INTO predictions (player_id, predicted_points) VALUES (?1, ?2)")
            .context("prepare prediction insert")?;
        for record in records {
            stmt.execute(params![record.player_id as i64, record.predicted_points])
                .context("insert prediction row")?;
        }
    }
    tx.commit().context("commit predictions transaction")
}

pub fn load_predictions(conn: &Connection) -> Result<Vec<PredictionRecord>> {
    let mut stmt = conn
        .prepare(
            "SELECT player_id, predicted_points FROM predictions ORDER BY predicted_points DESC",
        )
        .context("prepare predictions query")?;
    let rows = stmt
        .query_map([], |row| {
            Ok(PredictionRecord {
                player_id: row.get::<_, u32>(0)?,
                predicted_points: row.get(1)?,
            })
        })
        .context("query predictions")?;

    let mut out = Vec::new();
    for row in rows {
        out.push(row.context("decode prediction row")?);
    }
    Ok(out)
}

fn bool_to_i64(v: bool) -> i64 {
    if v { 1 } else { 0 }
}
