//! Outbound HTTP execution of a single job.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{header, Client, Method};
use tracing::debug;

use crate::types::{ExecutionOutcome, ExecutionStatus, Job};

pub const TIMEOUT_MESSAGE: &str = "Request timeout";

/// Performs a job's remote call and classifies the result.
///
/// Implementations never fail: every transport problem is folded into a
/// `FAILED` outcome.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(&self, job: &Job, scheduled_time: DateTime<Utc>) -> ExecutionOutcome;
}

/// [`Executor`] backed by a shared `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct HttpExecutor {
    client: Client,
    timeout: Duration,
}

impl HttpExecutor {
    pub fn new(timeout: Duration) -> Self {
        Self::with_client(Client::new(), timeout)
    }

    pub fn with_client(client: Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }
}

/// POST when the target mentions "post" anywhere (case-insensitive), else GET.
pub fn method_for(target: &str) -> Method {
    if target.to_ascii_lowercase().contains("post") {
        Method::POST
    } else {
        Method::GET
    }
}

#[async_trait]
impl Executor for HttpExecutor {
    async fn execute(&self, job: &Job, scheduled_time: DateTime<Utc>) -> ExecutionOutcome {
        let actual_start_time = Utc::now();
        let mut outcome = ExecutionOutcome {
            scheduled_time,
            actual_start_time,
            status: ExecutionStatus::Failed,
            response_code: None,
            duration_ms: None,
            error_message: None,
        };

        let Some(target) = job.target.as_deref().filter(|t| !t.trim().is_empty()) else {
            outcome.status = ExecutionStatus::Success;
            outcome.response_code = Some(200);
            outcome.duration_ms = Some(0);
            return outcome;
        };

        let method = method_for(target);
        let mut request = self
            .client
            .request(method.clone(), target)
            .header(header::CONTENT_TYPE, "application/json");
        if method == Method::POST {
            request = request.body("{}");
        }

        let started = Instant::now();
        // Dropping the request future on timeout cancels the call.
        let result = tokio::time::timeout(self.timeout, request.send()).await;
        outcome.duration_ms = Some(u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX));

        match result {
            Ok(Ok(response)) => {
                let code = response.status().as_u16();
                outcome.response_code = Some(code);
                if response.status().is_success() {
                    outcome.status = ExecutionStatus::Success;
                }
            }
            Ok(Err(e)) if e.is_timeout() => {
                outcome.error_message = Some(TIMEOUT_MESSAGE.to_string());
            }
            Ok(Err(e)) => {
                outcome.error_message = Some(e.to_string());
            }
            Err(_) => {
                outcome.error_message = Some(TIMEOUT_MESSAGE.to_string());
            }
        }

        debug!(
            job_id = %job.id,
            %method,
            status = %outcome.status,
            response_code = ?outcome.response_code,
            duration_ms = ?outcome.duration_ms,
            "job executed"
        );
        outcome
    }
}
