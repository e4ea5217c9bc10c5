use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};

use crate::AppState;

/// Liveness probe for uptime monitors - fixed 200 with body `OK`
pub async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// Metrics endpoint - returns relay counters
pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.metrics.snapshot())
}
