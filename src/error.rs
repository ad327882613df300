//! Domain-level error taxonomy (SPEC_FULL.md §B, mirroring spec.md §7).
//! These are never propagated across PBC cycles (§7 "Propagation"); the
//! orchestrator logs and swallows them at the boundary.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("cooldown not yet elapsed for {tool}: {remaining_seconds}s remaining")]
    Cooldown { tool: &'static str, remaining_seconds: i64 },
    #[error("{tool} command not yet realized, suppressing new command")]
    NotRealized { tool: &'static str },
    #[error("mode {mode:?} has no source override for {source:?}")]
    ModeSourceMismatch { mode: crate::domain::Mode, source: crate::domain::Source },
}

#[derive(Debug, Error)]
pub enum SensorError {
    #[error("sensor {entity} is stale (age {age_seconds}s > max_age)")]
    Stale { entity: String, age_seconds: i64 },
    #[error("sensor {entity} is invalid (age {age_seconds}s > invalid_age)")]
    Invalid { entity: String, age_seconds: i64 },
}

#[derive(Debug, Error)]
pub enum PriceApiError {
    #[error("day-ahead request failed after {attempts} attempts: {source}")]
    RequestFailed { attempts: u32, #[source] source: reqwest::Error },
    #[error("day-ahead response had {got} slots, expected 96")]
    WrongSlotCount { got: usize },
    #[error("day-ahead response failed to parse: {0}")]
    Parse(String),
}

#[derive(Debug, Error)]
pub enum WeatherApiError {
    #[error("weather request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),
    #[error("weather response failed to parse: {0}")]
    Parse(String),
}
