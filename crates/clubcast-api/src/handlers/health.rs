//! Health check endpoints for load balancers and orchestrators.

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

use crate::state::AppState;

/// Basic health check.
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({"status": "healthy"})))
}

/// Readiness probe: verifies the queue backend answers.
pub async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    match state.queue.depth().await {
        Ok(depth) => {
            (StatusCode::OK, Json(json!({"status": "ready", "queue_depth": depth})))
        },
        Err(error) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"status": "not ready", "error": error.to_string()})),
        ),
    }
}

/// Liveness probe: the process is running and serving requests.
pub async fn liveness_check() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({"status": "alive"})))
}
