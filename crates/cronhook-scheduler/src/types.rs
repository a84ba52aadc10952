use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque, stable job identifier (UUID v4 string).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Lifecycle state of a job. Only `Active` jobs are scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Active,
    Paused,
    Deleted,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Active => "ACTIVE",
            JobStatus::Paused => "PAUSED",
            JobStatus::Deleted => "DELETED",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "ACTIVE" => Ok(JobStatus::Active),
            "PAUSED" => Ok(JobStatus::Paused),
            "DELETED" => Ok(JobStatus::Deleted),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

/// Delivery guarantee requested for a job.
///
/// Stored and surfaced only: the engine makes one attempt per dispatch
/// regardless of the mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeliveryMode {
    #[default]
    AtLeastOnce,
    AtMostOnce,
}

impl fmt::Display for DeliveryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeliveryMode::AtLeastOnce => "AT_LEAST_ONCE",
            DeliveryMode::AtMostOnce => "AT_MOST_ONCE",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for DeliveryMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "AT_LEAST_ONCE" => Ok(DeliveryMode::AtLeastOnce),
            "AT_MOST_ONCE" => Ok(DeliveryMode::AtMostOnce),
            other => Err(format!("unknown delivery mode: {other}")),
        }
    }
}

/// A scheduled HTTP job as persisted by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: JobId,
    /// Human-readable label, unique among jobs.
    pub title: String,
    /// Textual cadence, e.g. `*/10 * * * * *`.
    pub schedule: String,
    /// URL invoked on execution. `None` models a no-op job.
    pub target: Option<String>,
    pub delivery_mode: DeliveryMode,
    pub status: JobStatus,
    /// Start time of the most recently recorded execution.
    pub last_run_at: Option<DateTime<Utc>>,
    /// Informational only; the engine computes due-ness itself.
    pub next_run_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Build a new active job with a fresh id.
    pub fn new(title: impl Into<String>, schedule: impl Into<String>, target: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            title: title.into(),
            schedule: schedule.into(),
            target,
            delivery_mode: DeliveryMode::default(),
            status: JobStatus::Active,
            last_run_at: None,
            next_run_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_status(mut self, status: JobStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_delivery_mode(mut self, mode: DeliveryMode) -> Self {
        self.delivery_mode = mode;
        self
    }

    pub fn is_active(&self) -> bool {
        self.status == JobStatus::Active
    }
}

/// Outcome classification of a single execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Success,
    Failed,
    Pending,
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExecutionStatus::Success => "SUCCESS",
            ExecutionStatus::Failed => "FAILED",
            ExecutionStatus::Pending => "PENDING",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "SUCCESS" => Ok(ExecutionStatus::Success),
            "FAILED" => Ok(ExecutionStatus::Failed),
            "PENDING" => Ok(ExecutionStatus::Pending),
            other => Err(format!("unknown execution status: {other}")),
        }
    }
}

/// What the executor observed for one call; not yet persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionOutcome {
    /// When the tick decided the job was due.
    pub scheduled_time: DateTime<Utc>,
    /// When the executor began the call.
    pub actual_start_time: DateTime<Utc>,
    pub status: ExecutionStatus,
    pub response_code: Option<u16>,
    pub duration_ms: Option<u64>,
    pub error_message: Option<String>,
}

impl ExecutionOutcome {
    pub fn is_failure(&self) -> bool {
        self.status == ExecutionStatus::Failed
    }

    /// Human-readable reason: the error message, or `HTTP <code>`.
    pub fn failure_reason(&self) -> String {
        match (&self.error_message, self.response_code) {
            (Some(msg), _) => msg.clone(),
            (None, Some(code)) => format!("HTTP {code}"),
            (None, None) => "unknown failure".to_string(),
        }
    }
}

/// Insert payload for one execution row.
#[derive(Debug, Clone, PartialEq)]
pub struct NewExecution {
    pub job_id: JobId,
    pub scheduled_time: DateTime<Utc>,
    pub actual_start_time: DateTime<Utc>,
    pub status: ExecutionStatus,
    pub response_code: Option<u16>,
    pub duration_ms: Option<u64>,
    pub attempt: u32,
    pub error_message: Option<String>,
}

impl NewExecution {
    /// First (and only) attempt for `outcome`.
    pub fn from_outcome(job_id: JobId, outcome: &ExecutionOutcome) -> Self {
        Self {
            job_id,
            scheduled_time: outcome.scheduled_time,
            actual_start_time: outcome.actual_start_time,
            status: outcome.status,
            response_code: outcome.response_code,
            duration_ms: outcome.duration_ms,
            attempt: 1,
            error_message: outcome.error_message.clone(),
        }
    }
}

/// A persisted, append-only execution record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobExecution {
    pub id: String,
    /// Weak reference to the owning job.
    pub job_id: JobId,
    pub scheduled_time: DateTime<Utc>,
    pub actual_start_time: DateTime<Utc>,
    pub status: ExecutionStatus,
    pub response_code: Option<u16>,
    pub duration_ms: Option<u64>,
    pub attempt: u32,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl JobExecution {
    /// Materialise a stored row from an insert payload.
    pub fn from_new(record: NewExecution, created_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            job_id: record.job_id,
            scheduled_time: record.scheduled_time,
            actual_start_time: record.actual_start_time,
            status: record.status,
            response_code: record.response_code,
            duration_ms: record.duration_ms,
            attempt: record.attempt,
            error_message: record.error_message,
            created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_tags_round_trip_through_text() {
        for s in [JobStatus::Active, JobStatus::Paused, JobStatus::Deleted] {
            assert_eq!(s.to_string().parse::<JobStatus>().unwrap(), s);
        }
        assert!("active".parse::<JobStatus>().is_err());
    }

    #[test]
    fn failure_reason_prefers_error_message() {
        let now = Utc::now();
        let mut outcome = ExecutionOutcome {
            scheduled_time: now,
            actual_start_time: now,
            status: ExecutionStatus::Failed,
            response_code: Some(503),
            duration_ms: Some(12),
            error_message: None,
        };
        assert_eq!(outcome.failure_reason(), "HTTP 503");

        outcome.error_message = Some("Request timeout".into());
        assert_eq!(outcome.failure_reason(), "Request timeout");
    }

    #[test]
    fn job_serializes_with_wire_tags() {
        let job = Job::new("nightly", "*/10 * * * * *", None);
        let json = serde_json::to_value(&job).unwrap();
        assert_eq!(json["status"], "ACTIVE");
        assert_eq!(json["deliveryMode"], "AT_LEAST_ONCE");
        assert_eq!(json["lastRunAt"], serde_json::Value::Null);
    }
}
