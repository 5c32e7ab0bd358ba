use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::Connection;

use crate::fpl_api::SnapshotSource;
use crate::modelling::{ModelReport, run_modelling};
use crate::player_info::refresh_player_info;
use crate::reconcile::{CycleAction, UpdateGate, reconcile};

#[derive(Debug, Clone)]
pub struct CycleReport {
    pub player_info_rows: usize,
    pub action: CycleAction,
    pub model: ModelReport,
}

impl CycleReport {
    pub fn summary_lines(&self) -> Vec<String> {
        let mut lines = vec![format!("Player info: {} rows", self.player_info_rows)];
        match self.action {
            CycleAction::NoActionTaken => {
                lines.push("Reconcile: gameweek in progress, no update performed".to_string());
            }
            CycleAction::Captured {
                inserted,
                responses,
                stale_removed,
            } => {
                lines.push(format!(
                    "Reconcile: captured {inserted} rows, settled {responses}, removed {stale_removed} stale"
                ));
            }
        }
        lines.push(format!("Modelling: {}", self.model.message));
        lines
    }
}

/// One full invocation: refresh player identities, reconcile the feature
/// store, then fit/apply the model. Each stage aborts the run on failure
/// with the stage named; retry is the scheduler's job.
pub fn run_cycle<S>(
    conn: &mut Connection,
    source: &S,
    gate: UpdateGate,
    force_search: bool,
) -> Result<CycleReport>
where
    S: SnapshotSource + Sync,
{
    let player_info_rows =
        refresh_player_info(conn, source).context("player info refresh failed")?;
    let action = reconcile(conn, source, gate, Utc::now()).context("reconciliation failed")?;
    let model = run_modelling(conn, force_search).context("modelling failed")?;

    Ok(CycleReport {
        player_info_rows,
        action,
        model,
    })
}
