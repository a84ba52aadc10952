use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{types::Type, Connection, OptionalExtension, Row};

use crate::error::{Result, SchedulerError};
use crate::store::JobStore;
use crate::types::{Job, JobExecution, JobId, NewExecution};

/// Initialise the scheduler schema in `conn`.
///
/// Creates the `jobs` and `job_executions` tables (idempotent). Executions
/// are indexed by `(job_id, created_at)` so the alerter's "last N runs"
/// query stays cheap as history grows.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS jobs (
            id             TEXT    NOT NULL PRIMARY KEY,
            title          TEXT    NOT NULL UNIQUE,
            schedule       TEXT    NOT NULL,
            target         TEXT,               -- NULL means no-op job
            delivery_mode  TEXT    NOT NULL DEFAULT 'AT_LEAST_ONCE',
            status         TEXT    NOT NULL DEFAULT 'ACTIVE',
            last_run_at    TEXT,               -- RFC 3339 or NULL
            next_run_at    TEXT,
            created_at     TEXT    NOT NULL,
            updated_at     TEXT    NOT NULL
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs (status);

        CREATE TABLE IF NOT EXISTS job_executions (
            id                 TEXT    NOT NULL PRIMARY KEY,
            job_id             TEXT    NOT NULL,
            scheduled_time     TEXT    NOT NULL,
            actual_start_time  TEXT    NOT NULL,
            status             TEXT    NOT NULL,
            response_code      INTEGER,
            duration_ms        INTEGER,
            attempt            INTEGER NOT NULL DEFAULT 1,
            error_message      TEXT,
            created_at         TEXT    NOT NULL
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_executions_job_created
            ON job_executions (job_id, created_at);
        ",
    )?;
    Ok(())
}

pub(crate) const JOB_COLUMNS: &str = "id, title, schedule, target, delivery_mode, status,
     last_run_at, next_run_at, created_at, updated_at";

const EXECUTION_COLUMNS: &str = "id, job_id, scheduled_time, actual_start_time, status,
     response_code, duration_ms, attempt, error_message, created_at";

/// Fixed-width UTC timestamps so lexical order in SQL equals time order.
pub(crate) fn fmt_ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn ts_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    parse_ts(idx, &row.get::<_, String>(idx)?)
}

fn opt_ts_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    row.get::<_, Option<String>>(idx)?
        .map(|raw| parse_ts(idx, &raw))
        .transpose()
}

fn tag_col<T: FromStr<Err = String>>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    row.get::<_, String>(idx)?
        .parse()
        .map_err(|e: String| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, e.into()))
}

/// Map a row selected with [`JOB_COLUMNS`].
pub(crate) fn job_from_row(row: &Row<'_>) -> rusqlite::Result<Job> {
    Ok(Job {
        id: JobId(row.get(0)?),
        title: row.get(1)?,
        schedule: row.get(2)?,
        target: row.get(3)?,
        delivery_mode: tag_col(row, 4)?,
        status: tag_col(row, 5)?,
        last_run_at: opt_ts_col(row, 6)?,
        next_run_at: opt_ts_col(row, 7)?,
        created_at: ts_col(row, 8)?,
        updated_at: ts_col(row, 9)?,
    })
}

/// Map a row selected with [`EXECUTION_COLUMNS`].
pub(crate) fn execution_from_row(row: &Row<'_>) -> rusqlite::Result<JobExecution> {
    let duration_ms = row
        .get::<_, Option<i64>>(6)?
        .map(|d| u64::try_from(d).unwrap_or(0));
    Ok(JobExecution {
        id: row.get(0)?,
        job_id: JobId(row.get(1)?),
        scheduled_time: ts_col(row, 2)?,
        actual_start_time: ts_col(row, 3)?,
        status: tag_col(row, 4)?,
        response_code: row.get(5)?,
        duration_ms,
        attempt: row.get(7)?,
        error_message: row.get(8)?,
        created_at: ts_col(row, 9)?,
    })
}

pub(crate) fn lock(conn: &Mutex<Connection>) -> Result<MutexGuard<'_, Connection>> {
    conn.lock()
        .map_err(|_| SchedulerError::Store("connection lock poisoned".to_string()))
}

pub(crate) fn select_recent_executions(
    conn: &Connection,
    job_id: &JobId,
    limit: usize,
) -> Result<Vec<JobExecution>> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {EXECUTION_COLUMNS} FROM job_executions
         WHERE job_id = ?1
         ORDER BY created_at DESC, rowid DESC
         LIMIT ?2"
    ))?;
    let limit = i64::try_from(limit).unwrap_or(i64::MAX);
    let rows = stmt
        .query_map(rusqlite::params![job_id.as_str(), limit], execution_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

/// SQLite-backed [`JobStore`] used by the engine.
///
/// Owns its own `Connection` so the engine's polling never contends with
/// the management handle.
#[derive(Debug, Clone)]
pub struct SqliteJobStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteJobStore {
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn find_active_jobs(&self) -> Result<Vec<Job>> {
        let conn = lock(&self.conn)?;
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE status = 'ACTIVE' ORDER BY created_at"
        ))?;
        let jobs = stmt
            .query_map([], job_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(jobs)
    }

    async fn find_job_by_id(&self, id: &JobId) -> Result<Option<Job>> {
        let conn = lock(&self.conn)?;
        let job = conn
            .query_row(
                &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1"),
                [id.as_str()],
                job_from_row,
            )
            .optional()?;
        Ok(job)
    }

    async fn update_job_last_run(&self, id: &JobId, at: DateTime<Utc>) -> Result<()> {
        let conn = lock(&self.conn)?;
        let n = conn.execute(
            "UPDATE jobs SET last_run_at = ?1, updated_at = ?2 WHERE id = ?3",
            rusqlite::params![fmt_ts(at), fmt_ts(Utc::now()), id.as_str()],
        )?;
        if n == 0 {
            return Err(SchedulerError::JobNotFound { id: id.to_string() });
        }
        Ok(())
    }

    async fn create_execution(&self, record: NewExecution) -> Result<JobExecution> {
        let execution = JobExecution::from_new(record, Utc::now());
        let duration_ms = execution
            .duration_ms
            .map(|d| i64::try_from(d).unwrap_or(i64::MAX));
        let conn = lock(&self.conn)?;
        conn.execute(
            &format!(
                "INSERT INTO job_executions ({EXECUTION_COLUMNS})
                 VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10)"
            ),
            rusqlite::params![
                execution.id,
                execution.job_id.as_str(),
                fmt_ts(execution.scheduled_time),
                fmt_ts(execution.actual_start_time),
                execution.status.to_string(),
                execution.response_code,
                duration_ms,
                execution.attempt,
                execution.error_message,
                fmt_ts(execution.created_at),
            ],
        )?;
        Ok(execution)
    }

    async fn find_recent_executions(&self, job_id: &JobId, limit: usize) -> Result<Vec<JobExecution>> {
        let conn = lock(&self.conn)?;
        select_recent_executions(&conn, job_id, limit)
    }
}
