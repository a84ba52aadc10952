//! Job management endpoints. Thin wrappers over `SchedulerHandle`; the engine
//! picks changes up on its next active-job refresh.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use cronhook_scheduler::{DeliveryMode, JobId, JobStatus, SchedulerError};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::warn;

use crate::app::AppState;

type ApiError = (StatusCode, Json<Value>);

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateJobRequest {
    pub title: String,
    pub schedule: String,
    #[serde(default, alias = "api")]
    pub target: Option<String>,
    #[serde(default, alias = "type")]
    pub delivery_mode: Option<DeliveryMode>,
    #[serde(default)]
    pub status: Option<JobStatus>,
}

#[derive(Debug, Deserialize)]
pub struct StatusRequest {
    pub status: JobStatus,
}

#[derive(Debug, Deserialize)]
pub struct ExecutionsQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    20
}

fn api_error(e: SchedulerError) -> ApiError {
    let status = match &e {
        SchedulerError::JobNotFound { .. } => StatusCode::NOT_FOUND,
        SchedulerError::DuplicateJob { .. } => StatusCode::CONFLICT,
        SchedulerError::InvalidSchedule(_) => StatusCode::BAD_REQUEST,
        _ => {
            warn!(error = %e, "job API store failure");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (status, Json(json!({ "error": e.to_string() })))
}

/// POST /create-job
pub async fn create_job(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateJobRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    if req.title.trim().is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "title is required" })),
        ));
    }

    let mut job = state
        .scheduler
        .create_job(req.title.trim(), &req.schedule, req.target, req.delivery_mode)
        .map_err(api_error)?;
    if let Some(status) = req.status.filter(|s| *s != job.status) {
        state.scheduler.set_status(&job.id, status).map_err(api_error)?;
        job.status = status;
    }
    state.engine.invalidate_cache().await;

    Ok((
        StatusCode::CREATED,
        Json(json!({ "message": "Job created successfully", "job": job })),
    ))
}

/// GET /jobs
pub async fn list_jobs(State(state): State<Arc<AppState>>) -> Result<Json<Value>, ApiError> {
    let jobs = state.scheduler.list_jobs().map_err(api_error)?;
    Ok(Json(json!({ "jobs": jobs })))
}

/// GET /jobs/{id}/executions?limit=N
pub async fn job_executions(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<ExecutionsQuery>,
) -> Result<Json<Value>, ApiError> {
    let id = JobId::from(id);
    state.scheduler.get_job(&id).map_err(api_error)?;
    let executions = state
        .scheduler
        .recent_executions(&id, query.limit.min(500))
        .map_err(api_error)?;
    Ok(Json(json!({ "jobId": id, "executions": executions })))
}

/// POST /jobs/{id}/status: pause, resume or delete.
pub async fn set_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<StatusRequest>,
) -> Result<Json<Value>, ApiError> {
    let id = JobId::from(id);
    state
        .scheduler
        .set_status(&id, req.status)
        .map_err(api_error)?;
    state.engine.invalidate_cache().await;
    Ok(Json(json!({ "jobId": id, "status": req.status })))
}
