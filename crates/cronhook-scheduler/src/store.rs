//! Abstract persistence consumed by the engine, plus an in-memory backend.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::error::{Result, SchedulerError};
use crate::types::{Job, JobExecution, JobId, JobStatus, NewExecution};

/// Store operations the scheduling core depends on.
///
/// Job creation and mutation happen elsewhere; the engine only reads jobs,
/// appends executions and bumps `last_run_at`.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// All jobs whose status is `ACTIVE`.
    async fn find_active_jobs(&self) -> Result<Vec<Job>>;

    async fn find_job_by_id(&self, id: &JobId) -> Result<Option<Job>>;

    async fn update_job_last_run(&self, id: &JobId, at: DateTime<Utc>) -> Result<()>;

    async fn create_execution(&self, record: NewExecution) -> Result<JobExecution>;

    /// Up to `limit` executions for `job_id`, most recent first.
    async fn find_recent_executions(&self, job_id: &JobId, limit: usize) -> Result<Vec<JobExecution>>;
}

/// In-memory store, used by tests and ephemeral setups.
#[derive(Debug, Default)]
pub struct MemoryJobStore {
    jobs: RwLock<HashMap<JobId, Job>>,
    executions: RwLock<Vec<JobExecution>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a job.
    pub async fn put_job(&self, job: Job) {
        self.jobs.write().await.insert(job.id.clone(), job);
    }

    pub async fn set_status(&self, id: &JobId, status: JobStatus) -> Result<()> {
        let mut jobs = self.jobs.write().await;
        let job = jobs
            .get_mut(id)
            .ok_or_else(|| SchedulerError::JobNotFound { id: id.to_string() })?;
        job.status = status;
        job.updated_at = Utc::now();
        Ok(())
    }

    /// Every execution recorded so far, oldest first.
    pub async fn executions(&self) -> Vec<JobExecution> {
        self.executions.read().await.clone()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn find_active_jobs(&self) -> Result<Vec<Job>> {
        let jobs = self.jobs.read().await;
        Ok(jobs.values().filter(|j| j.is_active()).cloned().collect())
    }

    async fn find_job_by_id(&self, id: &JobId) -> Result<Option<Job>> {
        Ok(self.jobs.read().await.get(id).cloned())
    }

    async fn update_job_last_run(&self, id: &JobId, at: DateTime<Utc>) -> Result<()> {
        let mut jobs = self.jobs.write().await;
        let job = jobs
            .get_mut(id)
            .ok_or_else(|| SchedulerError::JobNotFound { id: id.to_string() })?;
        job.last_run_at = Some(at);
        job.updated_at = Utc::now();
        Ok(())
    }

    async fn create_execution(&self, record: NewExecution) -> Result<JobExecution> {
        let execution = JobExecution::from_new(record, Utc::now());
        self.executions.write().await.push(execution.clone());
        Ok(execution)
    }

    async fn find_recent_executions(&self, job_id: &JobId, limit: usize) -> Result<Vec<JobExecution>> {
        let executions = self.executions.read().await;
        // Append order doubles as creation order.
        Ok(executions
            .iter()
            .rev()
            .filter(|e| &e.job_id == job_id)
            .take(limit)
            .cloned()
            .collect())
    }
}

/// Serves reads from an inner [`MemoryJobStore`] and rejects every write,
/// counting the attempts.
#[cfg(test)]
pub(crate) struct ReadOnlyStore {
    pub(crate) inner: MemoryJobStore,
    pub(crate) write_attempts: std::sync::atomic::AtomicUsize,
}

#[cfg(test)]
impl ReadOnlyStore {
    pub(crate) async fn with_jobs(jobs: &[Job]) -> Self {
        let inner = MemoryJobStore::new();
        for job in jobs {
            inner.put_job(job.clone()).await;
        }
        Self {
            inner,
            write_attempts: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    pub(crate) fn writes(&self) -> usize {
        self.write_attempts.load(std::sync::atomic::Ordering::SeqCst)
    }

    fn reject(&self) -> SchedulerError {
        self.write_attempts
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        SchedulerError::Store("disk full".into())
    }
}

#[cfg(test)]
#[async_trait]
impl JobStore for ReadOnlyStore {
    async fn find_active_jobs(&self) -> Result<Vec<Job>> {
        self.inner.find_active_jobs().await
    }

    async fn find_job_by_id(&self, id: &JobId) -> Result<Option<Job>> {
        self.inner.find_job_by_id(id).await
    }

    async fn update_job_last_run(&self, _id: &JobId, _at: DateTime<Utc>) -> Result<()> {
        Err(self.reject())
    }

    async fn create_execution(&self, _record: NewExecution) -> Result<JobExecution> {
        Err(self.reject())
    }

    async fn find_recent_executions(&self, job_id: &JobId, limit: usize) -> Result<Vec<JobExecution>> {
        self.inner.find_recent_executions(job_id, limit).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ExecutionStatus;

    fn record(job_id: &JobId, status: ExecutionStatus) -> NewExecution {
        let now = Utc::now();
        NewExecution {
            job_id: job_id.clone(),
            scheduled_time: now,
            actual_start_time: now,
            status,
            response_code: None,
            duration_ms: None,
            attempt: 1,
            error_message: None,
        }
    }

    #[tokio::test]
    async fn active_filter_excludes_paused_jobs() {
        let store = MemoryJobStore::new();
        let active = Job::new("a", "* * * * * *", None);
        let paused = Job::new("p", "* * * * * *", None).with_status(JobStatus::Paused);
        store.put_job(active.clone()).await;
        store.put_job(paused).await;

        let found = store.find_active_jobs().await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, active.id);
    }

    #[tokio::test]
    async fn recent_executions_are_newest_first_and_scoped() {
        let store = MemoryJobStore::new();
        let a = JobId::from("a");
        let b = JobId::from("b");
        store.create_execution(record(&a, ExecutionStatus::Success)).await.unwrap();
        store.create_execution(record(&b, ExecutionStatus::Failed)).await.unwrap();
        store.create_execution(record(&a, ExecutionStatus::Failed)).await.unwrap();

        let recent = store.find_recent_executions(&a, 5).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].status, ExecutionStatus::Failed);
        assert_eq!(recent[1].status, ExecutionStatus::Success);

        assert_eq!(store.find_recent_executions(&a, 1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn last_run_on_missing_job_is_not_found() {
        let store = MemoryJobStore::new();
        let err = store
            .update_job_last_run(&JobId::from("ghost"), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::JobNotFound { .. }));
    }
}
