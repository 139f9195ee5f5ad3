use axum::{extract::State, http::StatusCode, Json};
use serde_json::Value;
use std::sync::Arc;

use super::AppState;
use crate::supervisor::SupervisorState;

/// Health check endpoint handler
///
/// Unhealthy only once the supervisor has given up; backoff is still healthy.
pub async fn health(State(state): State<Arc<AppState>>) -> (StatusCode, Json<Value>) {
    let supervisor = state.supervisor.state();
    let (code, status) = match supervisor {
        SupervisorState::Failed => (StatusCode::SERVICE_UNAVAILABLE, "unhealthy"),
        _ => (StatusCode::OK, "healthy"),
    };

    (
        code,
        Json(serde_json::json!({
            "status": status,
            "service": "tracker-ingest-rs",
            "version": env!("CARGO_PKG_VERSION"),
            "mqtt": supervisor.as_str(),
        })),
    )
}
