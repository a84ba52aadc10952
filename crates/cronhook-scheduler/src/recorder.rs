//! Persists execution outcomes off the dispatch path.
//!
//! Completed executions are handed to a bounded channel; a single worker
//! drains it and runs each write on a bounded pool of tasks. A slow store
//! therefore fills the channel (and sheds records with a warning) instead of
//! growing an unbounded set of outstanding writes.

use std::sync::Arc;

use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::alert::{AlertReport, FailureAlerter};
use crate::store::JobStore;
use crate::types::{ExecutionOutcome, Job, NewExecution};

/// Writes one execution record, bumps `last_run_at`, and alerts on failure.
pub struct ExecutionRecorder {
    store: Arc<dyn JobStore>,
    alerter: FailureAlerter,
}

impl ExecutionRecorder {
    pub fn new(store: Arc<dyn JobStore>, alerter: FailureAlerter) -> Self {
        Self { store, alerter }
    }

    /// Record `outcome` for `job`. Store errors are logged and not retried:
    /// the remote call already happened and must not be repeated.
    pub async fn record(&self, job: &Job, outcome: &ExecutionOutcome) -> Option<AlertReport> {
        let record = NewExecution::from_outcome(job.id.clone(), outcome);
        match self.store.create_execution(record).await {
            Ok(execution) => {
                debug!(job_id = %job.id, execution_id = %execution.id, status = %execution.status, "execution recorded");
                if let Err(e) = self
                    .store
                    .update_job_last_run(&job.id, outcome.actual_start_time)
                    .await
                {
                    error!(job_id = %job.id, error = %e, "failed to update last run");
                }
            }
            Err(e) => error!(job_id = %job.id, error = %e, "failed to save job execution"),
        }

        if outcome.is_failure() {
            Some(self.alerter.on_failure(job, outcome).await)
        } else {
            None
        }
    }
}

struct RecordTask {
    job: Job,
    outcome: ExecutionOutcome,
}

/// Cheap, cloneable sender side of the recorder pool.
#[derive(Clone)]
pub struct RecorderSender {
    tx: mpsc::Sender<RecordTask>,
}

impl RecorderSender {
    /// Hand an outcome off for recording without waiting.
    ///
    /// Returns `false` if the channel is full or the worker has stopped; the
    /// record is dropped in that case.
    pub fn submit(&self, job: Job, outcome: ExecutionOutcome) -> bool {
        let job_id = job.id.clone();
        match self.tx.try_send(RecordTask { job, outcome }) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(job_id = %job_id, "recorder queue full, execution record dropped");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!(job_id = %job_id, "recorder stopped, execution record dropped");
                false
            }
        }
    }
}

/// Start the recorder worker. It exits once every [`RecorderSender`] is dropped.
pub fn spawn_recorder(
    recorder: ExecutionRecorder,
    capacity: usize,
    concurrency: usize,
) -> (RecorderSender, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<RecordTask>(capacity.max(1));
    let recorder = Arc::new(recorder);
    let slots = Arc::new(Semaphore::new(concurrency.max(1)));

    let worker = tokio::spawn(async move {
        while let Some(task) = rx.recv().await {
            let Ok(permit) = Arc::clone(&slots).acquire_owned().await else {
                break;
            };
            let recorder = Arc::clone(&recorder);
            tokio::spawn(async move {
                let _permit = permit;
                recorder.record(&task.job, &task.outcome).await;
            });
        }
        debug!("recorder worker stopped");
    });

    (RecorderSender { tx }, worker)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::Utc;

    use super::*;
    use crate::store::{MemoryJobStore, ReadOnlyStore};
    use crate::types::ExecutionStatus;

    fn outcome(status: ExecutionStatus) -> ExecutionOutcome {
        let now = Utc::now();
        ExecutionOutcome {
            scheduled_time: now,
            actual_start_time: now,
            status,
            response_code: Some(200),
            duration_ms: Some(3),
            error_message: None,
        }
    }

    fn recorder(store: &Arc<MemoryJobStore>) -> ExecutionRecorder {
        let dyn_store: Arc<dyn JobStore> = store.clone();
        ExecutionRecorder::new(dyn_store.clone(), FailureAlerter::new(dyn_store, 5, 3))
    }

    #[tokio::test]
    async fn success_writes_record_and_last_run() {
        let store = Arc::new(MemoryJobStore::new());
        let job = Job::new("ok", "*/10 * * * * *", None);
        store.put_job(job.clone()).await;

        let out = outcome(ExecutionStatus::Success);
        let report = recorder(&store).record(&job, &out).await;
        assert!(report.is_none());

        let executions = store.executions().await;
        assert_eq!(executions.len(), 1);
        assert_eq!(executions[0].attempt, 1);
        assert_eq!(executions[0].status, ExecutionStatus::Success);
        let reloaded = store.find_job_by_id(&job.id).await.unwrap().unwrap();
        assert_eq!(reloaded.last_run_at, Some(out.actual_start_time));
    }

    #[tokio::test]
    async fn failure_is_recorded_then_alerted() {
        let store = Arc::new(MemoryJobStore::new());
        let job = Job::new("bad", "*/10 * * * * *", None);
        store.put_job(job.clone()).await;
        let rec = recorder(&store);

        let mut out = outcome(ExecutionStatus::Failed);
        out.response_code = Some(500);
        let mut last = None;
        for _ in 0..3 {
            last = rec.record(&job, &out).await;
        }
        // The third failure is counted in its own window.
        assert_eq!(last.map(|r| r.escalated), Some(true));
    }

    #[tokio::test]
    async fn missing_job_still_keeps_the_record() {
        let store = Arc::new(MemoryJobStore::new());
        let job = Job::new("deleted-meanwhile", "* * * * * *", None);
        recorder(&store).record(&job, &outcome(ExecutionStatus::Success)).await;
        assert_eq!(store.executions().await.len(), 1);
    }

    #[tokio::test]
    async fn failed_save_is_not_retried_and_still_alerts() {
        let job = Job::new("unlucky", "*/10 * * * * *", None);
        let store = Arc::new(ReadOnlyStore::with_jobs(std::slice::from_ref(&job)).await);
        let dyn_store: Arc<dyn JobStore> = store.clone();
        let rec = ExecutionRecorder::new(dyn_store.clone(), FailureAlerter::new(dyn_store, 5, 3));

        let mut out = outcome(ExecutionStatus::Failed);
        out.response_code = Some(502);
        let report = rec.record(&job, &out).await;

        // One rejected insert, no last-run bump attempted after it.
        assert_eq!(store.writes(), 1);
        let reloaded = store.find_job_by_id(&job.id).await.unwrap().unwrap();
        assert_eq!(reloaded.last_run_at, None);
        assert_eq!(
            report,
            Some(AlertReport {
                recent_failures: 0,
                escalated: false
            })
        );
    }

    #[tokio::test]
    async fn pool_records_submitted_outcomes() {
        let store = Arc::new(MemoryJobStore::new());
        let (sender, worker) = spawn_recorder(recorder(&store), 16, 4);
        for i in 0..10 {
            let job = Job::new(format!("j{i}"), "* * * * * *", None);
            store.put_job(job.clone()).await;
            assert!(sender.submit(job, outcome(ExecutionStatus::Success)));
        }

        for _ in 0..100 {
            if store.executions().await.len() == 10 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(store.executions().await.len(), 10);

        drop(sender);
        worker.await.unwrap();
    }
}
