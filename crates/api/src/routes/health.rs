//! Health check endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use serde::Serialize;

use crate::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    /// Which product store backs the service.
    pub store: &'static str,
    pub failure_policy: String,
}

/// GET /health: reports liveness and how the service is wired.
pub async fn check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        store: state.store_backend,
        failure_policy: state.bus.config().failure_policy.to_string(),
    })
}
