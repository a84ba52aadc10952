use axum::{
    routing::{get, post},
    Router,
};
use cronhook_core::CronhookConfig;
use cronhook_scheduler::{SchedulerEngine, SchedulerHandle};
use std::sync::Arc;

/// Central shared state, passed as Arc<AppState> to all Axum handlers.
pub struct AppState {
    pub config: CronhookConfig,
    /// Job management over its own SQLite connection.
    pub scheduler: SchedulerHandle,
    /// Handle to the running engine, for stats and cache invalidation.
    pub engine: SchedulerEngine,
}

impl AppState {
    pub fn new(config: CronhookConfig, scheduler: SchedulerHandle, engine: SchedulerEngine) -> Self {
        Self {
            config,
            scheduler,
            engine,
        }
    }
}

/// Assemble the full Axum router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(crate::http::health::index_handler))
        .route("/health", get(crate::http::health::health_handler))
        .route("/create-job", post(crate::http::jobs::create_job))
        .route("/jobs", get(crate::http::jobs::list_jobs))
        .route(
            "/jobs/{id}/executions",
            get(crate::http::jobs::job_executions),
        )
        .route("/jobs/{id}/status", post(crate::http::jobs::set_status))
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
