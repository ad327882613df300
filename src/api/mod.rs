#[cfg(feature = "swagger")]
pub mod openapi;
pub mod v1;
pub mod error;
pub mod response;
pub mod health;

use axum::{routing::get, Router};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{config::AppConfig, controller::AppState};

/// Full axum router (SPEC_FULL.md §D): the bearer-gated `/api/v1` dashboard
/// surface plus the ambient health/readiness/liveness probes every service
/// in this corpus carries regardless of what spec.md's Non-goals exclude.
pub fn router(state: AppState, cfg: &AppConfig) -> Router {
    Router::new()
        .route("/healthz", get(health::health_check))
        .route("/readyz", get(health::readiness_check))
        .route("/livez", get(health::liveness_check))
        .with_state(state.clone())
        .nest("/api/v1", v1::router(state, cfg))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

#[cfg(feature = "swagger")]
pub fn with_swagger(app: Router) -> Router {
    use crate::api::openapi::ApiDoc;
    use utoipa::OpenApi;
    use utoipa_swagger_ui::SwaggerUi;
    app.merge(SwaggerUi::new("/swagger-ui").url("/api-doc/openapi.json", ApiDoc::openapi()))
}
