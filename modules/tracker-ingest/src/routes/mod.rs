pub mod health;
pub mod metrics;

use axum::{routing::get, Router};
use std::sync::Arc;

use crate::metrics::IngestMetrics;
use crate::supervisor::ReconnectSupervisor;

/// Shared state for the operational endpoints
#[derive(Clone)]
pub struct AppState {
    pub supervisor: Arc<ReconnectSupervisor>,
    pub metrics: IngestMetrics,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/health", get(health::health))
        .route("/metrics", get(metrics::metrics))
        .with_state(state)
}
