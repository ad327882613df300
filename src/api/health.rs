#![allow(dead_code)]
use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;

use crate::controller::AppState;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: String,
    timestamp: chrono::DateTime<chrono::Utc>,
    checks: HealthChecks,
}

/// Individual health checks
#[derive(Debug, Serialize)]
pub struct HealthChecks {
    controller: ComponentHealth,
}

/// Health status of a component
#[derive(Debug, Serialize)]
pub struct ComponentHealth {
    status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl ComponentHealth {
    fn healthy(latency_ms: u64) -> Self {
        Self { status: "healthy".to_string(), latency_ms: Some(latency_ms), error: None }
    }
}

/// GET /healthz - aggregate health of the PBC/LSE controller.
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let controller_health = check_controller(&state);
    let all_healthy = controller_health.status == "healthy";

    let response = HealthResponse {
        status: if all_healthy { "healthy".to_string() } else { "degraded".to_string() },
        timestamp: chrono::Utc::now(),
        checks: HealthChecks { controller: controller_health },
    };

    let status_code = if all_healthy { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(response))
}

/// spec.md §6 "actions enabled" reflected here: a disabled controller is
/// still "healthy" (it's deliberately idle), so this only checks that the
/// Data Manager considers the critical sensor set valid.
fn check_controller(state: &AppState) -> ComponentHealth {
    if state.data_manager.is_system_valid() {
        ComponentHealth::healthy(0)
    } else {
        ComponentHealth { status: "degraded".to_string(), latency_ms: None, error: Some("critical sensors stale".to_string()) }
    }
}

/// GET /readyz - Kubernetes readiness probe.
pub async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    if state.data_manager.is_system_valid() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// GET /livez - Kubernetes liveness probe.
pub async fn liveness_check() -> impl IntoResponse {
    StatusCode::OK
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn component_health_healthy() {
        let health = ComponentHealth::healthy(42);
        assert_eq!(health.status, "healthy");
        assert_eq!(health.latency_ms, Some(42));
        assert!(health.error.is_none());
    }
}
