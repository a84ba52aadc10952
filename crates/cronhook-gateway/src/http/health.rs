use axum::{extract::State, Json};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::app::AppState;

/// GET /
pub async fn index_handler() -> &'static str {
    "Welcome to the cronhook job scheduler API"
}

/// GET /health — liveness probe, returns server metadata and engine counters.
pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    let stats = state.engine.stats();
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "queued": stats.queued,
        "in_flight": stats.in_flight,
        "tracked_jobs": stats.tracked_jobs,
        "max_concurrent": state.config.scheduler.max_concurrent,
    }))
}
