//! Health check endpoint.

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use crate::AppState;

/// Create the health router.
pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}

/// Health check response.
#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
    version: &'static str,
    registered_jobs: usize,
    scheduled_jobs: usize,
    active_executions: usize,
}

/// Liveness check.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        service: "ldx-scheduler",
        version: env!("CARGO_PKG_VERSION"),
        registered_jobs: state.registry.len(),
        scheduled_jobs: state.scheduler.schedules().len(),
        active_executions: state.scheduler.active().len(),
    })
}
