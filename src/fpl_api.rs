use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use once_cell::sync::OnceCell;
use serde_json::Value;
use thiserror::Error;

use crate::http_client::http_client;

const FPL_API_BASE: &str = "https://fantasy.premierleague.com/api";

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("schedule unavailable: {0}")]
    Schedule(String),
    #[error("player roster unavailable: {0}")]
    Roster(String),
    #[error("player {player_id} unavailable: {reason}")]
    Entity { player_id: u32, reason: String },
}

/// One scoring interval of the upstream game. The source only flips
/// `finished` after its own post-deadline bookkeeping runs, so the listed
/// "current" gameweek can already lie in the past.
#[derive(Debug, Clone)]
pub struct Gameweek {
    pub id: u32,
    pub name: String,
    pub deadline_time: DateTime<Utc>,
    pub finished: bool,
}

#[derive(Debug, Clone)]
pub struct PlayerSummary {
    pub id: u32,
    pub team_id: u32,
    pub first_name: String,
    pub second_name: String,
    pub status: String,
    pub element_type: u8,
    pub now_cost: i64,
    pub chance_of_playing: Option<f64>,
    pub form: Option<f64>,
    pub points_per_game: Option<f64>,
    pub ict_index: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct TeamInfo {
    pub id: u32,
    pub name: String,
    pub short_name: String,
}

#[derive(Debug, Clone, Copy)]
pub struct FixtureContext {
    pub is_home: bool,
    pub difficulty: f64,
}

/// Per-player detail: the upcoming fixture plus the points scored in the
/// most recently completed gameweek (None when the player has no history
/// yet, e.g. a mid-season signing).
#[derive(Debug, Clone, Copy)]
pub struct ElementSummary {
    pub next_fixture: Option<FixtureContext>,
    pub last_points: Option<f64>,
}

pub trait SnapshotSource {
    fn schedule(&self) -> Result<Vec<Gameweek>, SourceError>;
    fn players(&self) -> Result<Vec<PlayerSummary>, SourceError>;
    fn teams(&self) -> Result<Vec<TeamInfo>, SourceError>;
    fn player_detail(&self, player_id: u32) -> Result<ElementSummary, SourceError>;
}

#[derive(Debug)]
pub struct Bootstrap {
    pub events: Vec<Gameweek>,
    pub players: Vec<PlayerSummary>,
    pub teams: Vec<TeamInfo>,
}

/// Live client for the Fantasy Premier League API. The bootstrap payload is
/// fetched once per client instance; schedule, roster, and team lookups all
/// read from that single response.
pub struct FplClient {
    base_url: String,
    bootstrap: OnceCell<Bootstrap>,
}

impl FplClient {
    pub fn new() -> Self {
        let base_url = std::env::var("FPL_API_BASE")
            .ok()
            .filter(|raw| !raw.trim().is_empty())
            .unwrap_or_else(|| FPL_API_BASE.to_string());
        Self::with_base_url(base_url)
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            base_url,
            bootstrap: OnceCell::new(),
        }
    }

    fn bootstrap(&self) -> Result<&Bootstrap> {
        self.bootstrap.get_or_try_init(|| {
            let url = format!("{}/bootstrap-static/", self.base_url);
            let body = fetch_text(&url)?;
            parse_bootstrap_json(&body)
        })
    }
}

impl Default for FplClient {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotSource for FplClient {
    fn schedule(&self) -> Result<Vec<Gameweek>, SourceError> {
        self.bootstrap()
            .map(|b| b.events.clone())
            .map_err(|err| SourceError::Schedule(format!("{err:#}")))
    }

    fn players(&self) -> Result<Vec<PlayerSummary>, SourceError> {
        self.bootstrap()
            .map(|b| b.players.clone())
            .map_err(|err| SourceError::Roster(format!("{err:#}")))
    }

    fn teams(&self) -> Result<Vec<TeamInfo>, SourceError> {
        self.bootstrap()
            .map(|b| b.teams.clone())
            .map_err(|err| SourceError::Roster(format!("{err:#}")))
    }

    fn player_detail(&self, player_id: u32) -> Result<ElementSummary, SourceError> {
        let url = format!("{}/element-summary/{player_id}/", self.base_url);
        let body = fetch_text(&url).map_err(|err| SourceError::Entity {
            player_id,
            reason: format!("{err:#}"),
        })?;
        parse_element_summary_json(&body).map_err(|err| SourceError::Entity {
            player_id,
            reason: format!("{err:#}"),
        })
    }
}

fn fetch_text(url: &str) -> Result<String> {
    let client = http_client()?;
    let response = client
        .get(url)
        .send()
        .with_context(|| format!("request {url} failed"))?;
    let status = response.status();
    if !status.is_success() {
        return Err(anyhow!("request {url} returned {status}"));
    }
    response.text().context("read response body")
}

pub fn parse_bootstrap_json(raw: &str) -> Result<Bootstrap> {
    let root: Value = serde_json::from_str(raw.trim()).context("invalid bootstrap json")?;

    let events = root
        .get("events")
        .and_then(|v| v.as_array())
        .ok_or_else(|| anyhow!("bootstrap payload missing events"))?
        .iter()
        .filter_map(parse_gameweek)
        .collect::<Vec<_>>();

    let players = root
        .get("elements")
        .and_then(|v| v.as_array())
        .ok_or_else(|| anyhow!("bootstrap payload missing elements"))?
        .iter()
        .filter_map(parse_player_summary)
        .collect::<Vec<_>>();

    let teams = root
        .get("teams")
        .and_then(|v| v.as_array())
        .map(|arr| arr.iter().filter_map(parse_team_info).collect::<Vec<_>>())
        .unwrap_or_default();

    if events.is_empty() {
        return Err(anyhow!("bootstrap payload has no usable events"));
    }
    Ok(Bootstrap {
        events,
        players,
        teams,
    })
}

pub fn parse_element_summary_json(raw: &str) -> Result<ElementSummary> {
    let root: Value = serde_json::from_str(raw.trim()).context("invalid element summary json")?;

    let next_fixture = root
        .get("fixtures")
        .and_then(|v| v.as_array())
        .and_then(|arr| arr.first())
        .and_then(|fixture| {
            Some(FixtureContext {
                is_home: fixture.get("is_home")?.as_bool()?,
                difficulty: fixture.get("difficulty").and_then(as_f64_any)?,
            })
        });

    let last_points = root
        .get("history")
        .and_then(|v| v.as_array())
        .and_then(|arr| {
            arr.iter()
                .rev()
                .find_map(|entry| entry.get("total_points").and_then(as_f64_any))
        });

    Ok(ElementSummary {
        next_fixture,
        last_points,
    })
}

fn parse_gameweek(v: &Value) -> Option<Gameweek> {
    let id = v.get("id").and_then(as_u32_any)?;
    let raw_deadline = v.get("deadline_time")?.as_str()?;
    let deadline_time = DateTime::parse_from_rfc3339(raw_deadline)
        .ok()?
        .with_timezone(&Utc);
    Some(Gameweek {
        id,
        name: v
            .get("name")
            .and_then(|x| x.as_str())
            .unwrap_or_default()
            .to_string(),
        deadline_time,
        finished: v.get("finished").and_then(|x| x.as_bool()).unwrap_or(false),
    })
}

fn parse_player_summary(v: &Value) -> Option<PlayerSummary> {
    let id = v.get("id").and_then(as_u32_any)?;
    let team_id = v.get("team").and_then(as_u32_any)?;
    Some(PlayerSummary {
        id,
        team_id,
        first_name: v
            .get("first_name")
            .and_then(|x| x.as_str())
            .unwrap_or_default()
            .to_string(),
        second_name: v
            .get("second_name")
            .and_then(|x| x.as_str())
            .unwrap_or_default()
            .to_string(),
        status: v
            .get("status")
            .and_then(|x| x.as_str())
            .unwrap_or("a")
            .to_string(),
        element_type: v
            .get("element_type")
            .and_then(as_u32_any)
            .and_then(|n| u8::try_from(n).ok())
            .unwrap_or(0),
        now_cost: v.get("now_cost").and_then(as_i64_any).unwrap_or(0),
        chance_of_playing: v.get("chance_of_playing_this_round").and_then(as_f64_any),
        form: v.get("form").and_then(as_f64_any),
        points_per_game: v.get("points_per_game").and_then(as_f64_any),
        ict_index: v.get("ict_index").and_then(as_f64_any),
    })
}

fn parse_team_info(v: &Value) -> Option<TeamInfo> {
    Some(TeamInfo {
        id: v.get("id").and_then(as_u32_any)?,
        name: v.get("name")?.as_str()?.to_string(),
        short_name: v
            .get("short_name")
            .and_then(|x| x.as_str())
            .unwrap_or_default()
            .to_string(),
    })
}

// The FPL API serialises several numeric fields ("form", "ict_index",
// "points_per_game") as strings; accept either representation.
fn as_f64_any(v: &Value) -> Option<f64> {
    if let Some(n) = v.as_f64() {
        return Some(n);
    }
    let raw = v.as_str()?.trim();
    if raw.is_empty() {
        return None;
    }
    raw.parse::<f64>().ok()
}

fn as_i64_any(v: &Value) -> Option<i64> {
    if let Some(n) = v.as_i64() {
        return Some(n);
    }
    v.as_str()?.trim().parse::<i64>().ok()
}

fn as_u32_any(v: &Value) -> Option<u32> {
    if let Some(n) = v.as_u64() {
        return u32::try_from(n).ok();
    }
    v.as_str()?.trim().parse::<u32>().ok()
}
