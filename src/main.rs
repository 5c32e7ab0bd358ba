use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

use fpl_predictor::fpl_api::FplClient;
use fpl_predictor::reconcile::UpdateGate;
use fpl_predictor::run::run_cycle;
use fpl_predictor::store;

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let db_path = parse_db_path_arg()
        .or_else(db_path_from_env)
        .or_else(store::default_db_path)
        .context("unable to resolve sqlite path")?;

    let mut conn = store::open_db(&db_path)?;
    let source = FplClient::new();
    let report = run_cycle(&mut conn, &source, update_gate_from_env(), force_search_enabled())?;

    println!("Cycle complete");
    println!("DB: {}", db_path.display());
    for line in report.summary_lines() {
        println!("{line}");
    }
    Ok(())
}

fn parse_db_path_arg() -> Option<PathBuf> {
    let args = std::env::args().skip(1).collect::<Vec<_>>();
    for (idx, arg) in args.iter().enumerate() {
        if let Some(path) = arg.strip_prefix("--db=") {
            let trimmed = path.trim();
            if !trimmed.is_empty() {
                return Some(PathBuf::from(trimmed));
            }
        }
        if arg == "--db" {
            let Some(next) = args.get(idx + 1) else {
                continue;
            };
            if !next.trim().is_empty() {
                return Some(PathBuf::from(next));
            }
        }
    }
    None
}

fn db_path_from_env() -> Option<PathBuf> {
    let raw = std::env::var("FPL_DB_PATH").ok()?;
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(PathBuf::from(trimmed))
}

fn update_gate_from_env() -> UpdateGate {
    match std::env::var("FPL_UPDATE_GATE") {
        Ok(raw) if raw.trim().eq_ignore_ascii_case("last-finished") => {
            UpdateGate::LastFinishedConcluded
        }
        _ => UpdateGate::CurrentDeadlineAhead,
    }
}

fn force_search_enabled() -> bool {
    match std::env::var("FPL_FORCE_SEARCH") {
        Ok(raw) => matches!(
            raw.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "on" | "yes"
        ),
        Err(_) => false,
    }
}
