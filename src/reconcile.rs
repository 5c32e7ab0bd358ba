use std::collections::HashMap;

use anyhow::{Context, Result};
use chrono::{DateTime, Timelike, Utc};
use rayon::prelude::*;
use rusqlite::Connection;
use thiserror::Error;
use tracing::{info, warn};

use crate::fpl_api::{ElementSummary, PlayerSummary, SnapshotSource, SourceError};
use crate::store::{self, FeatureRecord, ResponseRecord};

/// Gating policy for "is an update due".
///
/// The upstream source flips a gameweek's `finished` flag only after its own
/// post-deadline bookkeeping runs, so the listed "current" gameweek having a
/// deadline still ahead of `now` is the working signal that the previous one
/// has concluded. `CurrentDeadlineAhead` reproduces that reading;
/// `LastFinishedConcluded` gates directly on a finished gameweek's deadline
/// having passed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UpdateGate {
    #[default]
    CurrentDeadlineAhead,
    LastFinishedConcluded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleAction {
    /// The tracked gameweek has not concluded; nothing was written.
    NoActionTaken,
    Captured {
        inserted: usize,
        responses: usize,
        stale_removed: usize,
    },
}

#[derive(Debug, Error)]
pub enum CycleError {
    #[error("no unfinished gameweek left in the schedule")]
    ScheduleExhausted,
    #[error("snapshot source unavailable: {0}")]
    SourceUnavailable(#[from] SourceError),
    #[error("every player snapshot was dropped during capture")]
    EmptyCapture,
    #[error("feature store unavailable: {0}")]
    Store(String),
}

/// One validated capture row, before an entry id is assigned.
#[derive(Debug, Clone)]
pub struct PlayerSnapshot {
    pub player_id: u32,
    pub team_id: u32,
    pub ict_index: Option<f64>,
    pub chance_of_playing: Option<f64>,
    pub form: Option<f64>,
    pub points_per_game: Option<f64>,
    pub previous_points: f64,
    pub is_home: bool,
    pub next_fixture_difficulty: f64,
}

/// Runs one reconciliation cycle: gate, capture, stale-or-settle, persist.
/// Steps that touch the store run inside a single transaction, so a failed
/// cycle leaves no partial batch behind.
pub fn reconcile<S>(
    conn: &mut Connection,
    source: &S,
    gate: UpdateGate,
    now: DateTime<Utc>,
) -> Result<CycleAction, CycleError>
where
    S: SnapshotSource + Sync,
{
    let schedule = source.schedule()?;
    let current = schedule
        .iter()
        .filter(|gw| !gw.finished)
        .min_by_key(|gw| gw.deadline_time)
        .ok_or(CycleError::ScheduleExhausted)?;
    let last_finished_deadline = schedule
        .iter()
        .filter(|gw| gw.finished)
        .map(|gw| gw.deadline_time)
        .max();

    if !update_due(gate, current.deadline_time, last_finished_deadline, now) {
        info!(gameweek = current.id, "gameweek in progress, no update performed");
        return Ok(CycleAction::NoActionTaken);
    }
    info!(
        gameweek = current.id,
        deadline = %current.deadline_time,
        "update due, capturing fresh snapshots"
    );

    let players = source.players()?;
    let snapshots = capture_snapshots(source, &players);
    if snapshots.is_empty() {
        return Err(CycleError::EmptyCapture);
    }

    persist_cycle(conn, &snapshots, last_finished_deadline, now)
        .map_err(|err| CycleError::Store(format!("{err:#}")))
}

fn update_due(
    gate: UpdateGate,
    current_deadline: DateTime<Utc>,
    last_finished_deadline: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> bool {
    match gate {
        UpdateGate::CurrentDeadlineAhead => current_deadline > now,
        UpdateGate::LastFinishedConcluded => last_finished_deadline.is_some_and(|at| at <= now),
    }
}

/// Fetches one detail per player, concurrently. A row either validates whole
/// or is dropped; per-player failures never abort the capture.
fn capture_snapshots<S>(source: &S, players: &[PlayerSummary]) -> Vec<PlayerSnapshot>
where
    S: SnapshotSource + Sync,
{
    let mut snapshots: Vec<PlayerSnapshot> = players
        .par_iter()
        .filter_map(|summary| match source.player_detail(summary.id) {
            Ok(detail) => {
                let snapshot = validate_snapshot(summary, &detail);
                if snapshot.is_none() {
                    warn!(
                        player_id = summary.id,
                        "snapshot missing required fields, row dropped"
                    );
                }
                snapshot
            }
            Err(err) => {
                warn!(player_id = summary.id, error = %err, "player fetch failed, row dropped");
                None
            }
        })
        .collect();
    snapshots.sort_by_key(|snapshot| snapshot.player_id);
    snapshots
}

/// Keep/drop decision for one captured row. The upcoming fixture context is
/// required; a player with no scoring history yet genuinely scored nothing
/// last gameweek, so an empty history resolves to zero rather than a drop.
pub fn validate_snapshot(
    summary: &PlayerSummary,
    detail: &ElementSummary,
) -> Option<PlayerSnapshot> {
    let fixture = detail.next_fixture?;
    Some(PlayerSnapshot {
        player_id: summary.id,
        team_id: summary.team_id,
        ict_index: summary.ict_index,
        chance_of_playing: summary.chance_of_playing,
        form: summary.form,
        points_per_game: summary.points_per_game,
        previous_points: detail.last_points.unwrap_or(0.0),
        is_home: fixture.is_home,
        next_fixture_difficulty: fixture.difficulty,
    })
}

fn persist_cycle(
    conn: &mut Connection,
    snapshots: &[PlayerSnapshot],
    last_finished_deadline: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Result<CycleAction> {
    let tx = conn.transaction().context("begin reconcile transaction")?;

    let most_recent = store::max_captured_at(&tx)?;
    let mut stale_removed = 0usize;
    let mut responses: Vec<ResponseRecord> = Vec::new();

    if let Some(prior_at) = most_recent {
        let is_stale = last_finished_deadline.is_some_and(|finished_at| prior_at > finished_at);
        if is_stale {
            // The speculative batch was captured after the last finished
            // deadline: it already describes the same target gameweek as
            // this capture. Remove it and reclaim its id range.
            stale_removed = store::delete_batch(&tx, prior_at)?;
            info!(
                removed = stale_removed,
                captured_at = %prior_at,
                "stale speculative batch removed"
            );
        } else {
            let outcome_by_player: HashMap<u32, f64> = snapshots
                .iter()
                .map(|snapshot| (snapshot.player_id, snapshot.previous_points))
                .collect();
            for row in store::latest_batch(&tx)? {
                if let Some(points) = outcome_by_player.get(&row.player_id) {
                    responses.push(ResponseRecord {
                        entry_id: row.entry_id,
                        points_scored: *points,
                    });
                }
            }
            info!(settled = responses.len(), "prior batch settled");
        }
    }

    let next_id = store::next_entry_id(&tx)?;
    let captured_at = now.with_nanosecond(0).unwrap_or(now);
    let records: Vec<FeatureRecord> = snapshots
        .iter()
        .enumerate()
        .map(|(offset, snapshot)| FeatureRecord {
            entry_id: next_id + offset as i64,
            player_id: snapshot.player_id,
            team_id: snapshot.team_id,
            ict_index: snapshot.ict_index,
            chance_of_playing: snapshot.chance_of_playing,
            form: snapshot.form,
            points_per_game: snapshot.points_per_game,
            previous_points: snapshot.previous_points,
            is_home: snapshot.is_home,
            next_fixture_difficulty: snapshot.next_fixture_difficulty,
            captured_at,
        })
        .collect();

    store::insert_features(&tx, &records)?;
    store::insert_responses(&tx, &responses)?;
    tx.commit().context("commit reconcile transaction")?;

    info!(
        inserted = records.len(),
        responses = responses.len(),
        "feature batch persisted"
    );
    Ok(CycleAction::Captured {
        inserted: records.len(),
        responses: responses.len(),
        stale_removed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fpl_api::FixtureContext;
    use chrono::TimeZone;

    fn summary(id: u32) -> PlayerSummary {
        PlayerSummary {
            id,
            team_id: 3,
            first_name: "Test".to_string(),
            second_name: format!("Player{id}"),
            status: "a".to_string(),
            element_type: 3,
            now_cost: 55,
            chance_of_playing: None,
            form: Some(2.5),
            points_per_game: Some(3.5),
            ict_index: Some(11.0),
        }
    }

    #[test]
    fn snapshot_requires_upcoming_fixture() {
        let detail = ElementSummary {
            next_fixture: None,
            last_points: Some(4.0),
        };
        assert!(validate_snapshot(&summary(1), &detail).is_none());
    }

    #[test]
    fn snapshot_keeps_null_availability_and_defaults_empty_history() {
        let detail = ElementSummary {
            next_fixture: Some(FixtureContext {
                is_home: false,
                difficulty: 2.0,
            }),
            last_points: None,
        };
        let snapshot = validate_snapshot(&summary(1), &detail).unwrap();
        assert!(snapshot.chance_of_playing.is_none());
        assert_eq!(snapshot.previous_points, 0.0);
        assert!(!snapshot.is_home);
    }

    #[test]
    fn gate_policies_disagree_on_in_progress_gameweek() {
        let now = Utc.with_ymd_and_hms(2025, 9, 20, 12, 0, 0).unwrap();
        let past_deadline = now - chrono::Duration::days(2);
        let future_deadline = now + chrono::Duration::days(5);

        // Listed current gameweek already kicked off: source-faithful gate
        // says not due, deadline-of-finished gate says due.
        assert!(!update_due(
            UpdateGate::CurrentDeadlineAhead,
            past_deadline,
            Some(past_deadline - chrono::Duration::days(7)),
            now
        ));
        assert!(update_due(
            UpdateGate::LastFinishedConcluded,
            past_deadline,
            Some(past_deadline - chrono::Duration::days(7)),
            now
        ));

        // Between gameweeks: both agree an update is due.
        assert!(update_due(
            UpdateGate::CurrentDeadlineAhead,
            future_deadline,
            Some(now - chrono::Duration::days(3)),
            now
        ));
        assert!(update_due(
            UpdateGate::LastFinishedConcluded,
            future_deadline,
            Some(now - chrono::Duration::days(3)),
            now
        ));

        // Season start: nothing finished yet.
        assert!(update_due(
            UpdateGate::CurrentDeadlineAhead,
            future_deadline,
            None,
            now
        ));
        assert!(!update_due(
            UpdateGate::LastFinishedConcluded,
            future_deadline,
            None,
            now
        ));
    }
}
