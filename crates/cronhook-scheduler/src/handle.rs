use std::sync::{Arc, Mutex};

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use tracing::info;

use crate::{
    db::{fmt_ts, init_db, job_from_row, lock, select_recent_executions, JOB_COLUMNS},
    error::{Result, SchedulerError},
    schedule::{classify, Cadence},
    types::{DeliveryMode, Job, JobExecution, JobId, JobStatus},
};

/// Shared handle for job management (create/list/status) while the engine runs.
///
/// Uses its own `Connection` so HTTP handlers can manage jobs without
/// conflicting with the engine's polling queries. Changes become visible to
/// the engine on its next active-job cache refresh.
#[derive(Debug, Clone)]
pub struct SchedulerHandle {
    conn: Arc<Mutex<Connection>>,
}

impl SchedulerHandle {
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create an active job. Titles are unique; the schedule must classify
    /// as a valid cadence.
    pub fn create_job(
        &self,
        title: &str,
        schedule: &str,
        target: Option<String>,
        delivery_mode: Option<DeliveryMode>,
    ) -> Result<Job> {
        if let Cadence::Invalid(reason) = classify(schedule) {
            return Err(SchedulerError::InvalidSchedule(reason));
        }

        let conn = lock(&self.conn)?;
        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM jobs WHERE title = ?1)",
            [title],
            |row| row.get(0),
        )?;
        if exists {
            return Err(SchedulerError::DuplicateJob {
                title: title.to_string(),
            });
        }

        let target = target.filter(|t| !t.trim().is_empty());
        let job = Job::new(title, schedule.trim(), target)
            .with_delivery_mode(delivery_mode.unwrap_or_default());
        conn.execute(
            &format!(
                "INSERT INTO jobs ({JOB_COLUMNS})
                 VALUES (?1,?2,?3,?4,?5,?6,NULL,NULL,?7,?7)"
            ),
            rusqlite::params![
                job.id.as_str(),
                job.title,
                job.schedule,
                job.target,
                job.delivery_mode.to_string(),
                job.status.to_string(),
                fmt_ts(job.created_at),
            ],
        )?;
        info!(job_id = %job.id, title = %job.title, schedule = %job.schedule, "job created");
        Ok(job)
    }

    /// All jobs ordered by creation time, deleted ones included.
    pub fn list_jobs(&self) -> Result<Vec<Job>> {
        let conn = lock(&self.conn)?;
        let mut stmt = conn.prepare(&format!("SELECT {JOB_COLUMNS} FROM jobs ORDER BY created_at"))?;
        let jobs = stmt
            .query_map([], job_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(jobs)
    }

    pub fn get_job(&self, id: &JobId) -> Result<Job> {
        let conn = lock(&self.conn)?;
        conn.query_row(
            &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1"),
            [id.as_str()],
            job_from_row,
        )
        .optional()?
        .ok_or_else(|| SchedulerError::JobNotFound { id: id.to_string() })
    }

    /// Pause, resume or soft-delete a job.
    pub fn set_status(&self, id: &JobId, status: JobStatus) -> Result<()> {
        let conn = lock(&self.conn)?;
        let n = conn.execute(
            "UPDATE jobs SET status = ?1, updated_at = ?2 WHERE id = ?3",
            rusqlite::params![status.to_string(), fmt_ts(Utc::now()), id.as_str()],
        )?;
        if n == 0 {
            return Err(SchedulerError::JobNotFound { id: id.to_string() });
        }
        info!(job_id = %id, %status, "job status changed");
        Ok(())
    }

    /// Up to `limit` executions of `id`, newest first.
    pub fn recent_executions(&self, id: &JobId, limit: usize) -> Result<Vec<JobExecution>> {
        let conn = lock(&self.conn)?;
        select_recent_executions(&conn, id, limit)
    }
}
