//! Failure alerting with escalation on repeated failures.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, warn};

use crate::store::JobStore;
use crate::types::{ExecutionOutcome, ExecutionStatus, Job, JobId};

/// Structured payload of a failure alert.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureAlert {
    pub timestamp: DateTime<Utc>,
    pub severity: &'static str,
    pub job_id: JobId,
    pub job_title: String,
    pub job_target: Option<String>,
    pub failure_reason: String,
    pub response_code: Option<u16>,
    pub execution_duration: Option<u64>,
    pub scheduled_time: DateTime<Utc>,
    pub actual_start_time: DateTime<Utc>,
}

/// What the alerter emitted for one failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlertReport {
    /// FAILED executions among the inspected window.
    pub recent_failures: usize,
    /// Whether the critical "repeated failure" alert fired.
    pub escalated: bool,
}

/// Emits an `ERROR` alert per failed execution and a `CRITICAL` one when
/// `threshold` of the last `window` executions failed.
pub struct FailureAlerter {
    store: Arc<dyn JobStore>,
    window: usize,
    threshold: usize,
}

impl FailureAlerter {
    pub fn new(store: Arc<dyn JobStore>, window: usize, threshold: usize) -> Self {
        Self {
            store,
            window,
            threshold,
        }
    }

    pub fn build_alert(job: &Job, outcome: &ExecutionOutcome) -> FailureAlert {
        FailureAlert {
            timestamp: Utc::now(),
            severity: "ERROR",
            job_id: job.id.clone(),
            job_title: job.title.clone(),
            job_target: job.target.clone(),
            failure_reason: outcome.failure_reason(),
            response_code: outcome.response_code,
            execution_duration: outcome.duration_ms,
            scheduled_time: outcome.scheduled_time,
            actual_start_time: outcome.actual_start_time,
        }
    }

    /// Alert on a failed execution. Never fails; store errors while counting
    /// recent failures count as zero failures.
    pub async fn on_failure(&self, job: &Job, outcome: &ExecutionOutcome) -> AlertReport {
        let alert = Self::build_alert(job, outcome);
        let payload = serde_json::to_string(&alert).unwrap_or_default();
        error!(
            target: "cronhook::alert",
            severity = alert.severity,
            job_id = %alert.job_id,
            job_title = %alert.job_title,
            job_target = alert.job_target.as_deref().unwrap_or(""),
            failure_reason = %alert.failure_reason,
            response_code = ?alert.response_code,
            duration_ms = ?alert.execution_duration,
            %payload,
            "job failure alert"
        );

        let recent_failures = self.recent_failure_count(&job.id).await;
        let escalated = recent_failures >= self.threshold;
        if escalated {
            error!(
                target: "cronhook::alert",
                severity = "CRITICAL",
                job_id = %job.id,
                job_title = %job.title,
                recent_failures,
                window = self.window,
                "job \"{}\" has failed {} times in recent executions",
                job.title,
                recent_failures
            );
        }
        AlertReport {
            recent_failures,
            escalated,
        }
    }

    async fn recent_failure_count(&self, job_id: &JobId) -> usize {
        match self.store.find_recent_executions(job_id, self.window).await {
            Ok(executions) => executions
                .iter()
                .filter(|e| e.status == ExecutionStatus::Failed)
                .count(),
            Err(e) => {
                warn!(job_id = %job_id, error = %e, "could not count recent failures");
                0
            }
        }
    }
}
