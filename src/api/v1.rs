#![allow(dead_code)]
//! Dashboard HTTP surface (spec.md §6, SPEC_FULL.md §D): exactly the two
//! endpoints the load scheduler exposes, bearer-gated by `auth::auth_layer`.

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::{get, post}, Json, Router};
use serde::{Deserialize, Serialize};

use crate::config::AppConfig;
use crate::controller::AppState;

pub fn router(state: AppState, cfg: &AppConfig) -> Router {
    Router::new()
        .route("/load-scheduler/data", get(load_scheduler_data))
        .route("/load-scheduler/reset-debt", post(load_scheduler_reset_debt))
        .with_state(state)
        .layer(crate::auth::auth_layer(cfg.auth.token.clone()))
}

#[cfg_attr(feature = "swagger", derive(utoipa::ToSchema))]
#[derive(Debug, Serialize)]
pub struct LoadSchedulerDataError {
    pub error: String,
}

/// `GET /api/v1/load-scheduler/data` (spec.md §6): today's materialized
/// snapshot, falling back to the persisted file when the in-memory one
/// hasn't been filled in yet (process just started, before the first
/// scheduler run).
pub async fn load_scheduler_data(State(st): State<AppState>) -> impl IntoResponse {
    if let Some(snapshot) = st.snapshot.lock().await.clone() {
        return (StatusCode::OK, Json(snapshot)).into_response();
    }
    match st.persistence.load().await {
        Some(snapshot) => (StatusCode::OK, Json(snapshot)).into_response(),
        None => (StatusCode::INTERNAL_SERVER_ERROR, Json(LoadSchedulerDataError { error: "no snapshot available yet".to_string() })).into_response(),
    }
}

#[cfg_attr(feature = "swagger", derive(utoipa::ToSchema))]
#[derive(Debug, Default, Deserialize)]
pub struct ResetDebtRequest {
    /// When absent, every device's debt is reset (spec.md §6).
    pub device_name: Option<String>,
}

#[cfg_attr(feature = "swagger", derive(utoipa::ToSchema))]
#[derive(Debug, Serialize)]
pub struct ResetDebtResponse {
    pub success: bool,
    pub reset_count: usize,
    pub devices: Vec<String>,
}

/// `POST /api/v1/load-scheduler/reset-debt` (spec.md §6): operator override
/// for a device stuck accruing debt it can no longer pay back.
pub async fn load_scheduler_reset_debt(State(st): State<AppState>, body: Option<Json<ResetDebtRequest>>) -> impl IntoResponse {
    let target = body.map(|Json(r)| r).unwrap_or_default().device_name;

    let mut devices = st.devices.lock().await;
    let mut reset = Vec::new();
    for device in devices.iter_mut() {
        let matches = match &target {
            Some(name) => *name == device.name,
            None => true,
        };
        if matches {
            device.energy_debt = 0.0;
            reset.push(device.name.clone());
        }
    }
    drop(devices);

    for name in &reset {
        if let Err(e) = st.persistence.patch_debt(name, 0.0).await {
            tracing::warn!(device = %name, error = %e, "failed to persist debt reset");
        }
    }

    Json(ResetDebtResponse { success: true, reset_count: reset.len(), devices: reset })
}
