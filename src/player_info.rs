use std::collections::HashMap;

use anyhow::{Context, Result};
use rusqlite::Connection;
use tracing::info;

use crate::fpl_api::SnapshotSource;
use crate::store::{self, PlayerInfoRecord};

/// Rebuilds the player identity table from the current roster. Full replace:
/// no history is kept, and players whose team is unknown are dropped.
pub fn refresh_player_info<S: SnapshotSource>(conn: &mut Connection, source: &S) -> Result<usize> {
    let players = source.players().context("fetch player roster")?;
    let teams = source.teams().context("fetch team list")?;
    let team_by_id: HashMap<u32, _> = teams.iter().map(|team| (team.id, team)).collect();

    let records: Vec<PlayerInfoRecord> = players
        .iter()
        .filter_map(|player| {
            let team = team_by_id.get(&player.team_id)?;
            Some(PlayerInfoRecord {
                player_id: player.id,
                first_name: player.first_name.clone(),
                second_name: player.second_name.clone(),
                team_name: team.name.clone(),
                team_short_name: team.short_name.clone(),
                // Upstream prices are tenths of a million.
                current_price: player.now_cost as f64 / 10.0,
                position: position_label(player.element_type).to_string(),
                status: player.status.clone(),
            })
        })
        .collect();

    store::replace_player_info(conn, &records)?;
    info!(players = records.len(), "player info refreshed");
    Ok(records.len())
}

fn position_label(element_type: u8) -> &'static str {
    match element_type {
        1 => "GKP",
        2 => "DEF",
        3 => "MID",
        4 => "FWD",
        _ => "UNK",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn position_labels_cover_known_types() {
        assert_eq!(position_label(1), "GKP");
        assert_eq!(position_label(4), "FWD");
        assert_eq!(position_label(9), "UNK");
    }
}
