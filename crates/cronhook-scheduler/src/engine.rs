use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use cronhook_core::SchedulerConfig;
use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::{
    alert::FailureAlerter,
    cache::ActiveJobCache,
    evaluator::DueEvaluator,
    executor::Executor,
    queue::{ExecutionQueue, QueuedJob},
    recorder::{spawn_recorder, ExecutionRecorder, RecorderSender},
    store::JobStore,
    timing::TimingTable,
};

/// Point-in-time counters for health reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct EngineStats {
    pub queued: usize,
    pub in_flight: usize,
    pub tracked_jobs: usize,
}

/// What a single tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub active: usize,
    pub enqueued: usize,
    pub dispatched: usize,
}

struct EngineInner {
    config: SchedulerConfig,
    cache: ActiveJobCache,
    evaluator: DueEvaluator,
    timing: TimingTable,
    queue: ExecutionQueue,
    /// One permit per in-flight execution.
    slots: Arc<Semaphore>,
    store: Arc<dyn JobStore>,
    executor: Arc<dyn Executor>,
    recorder: RecorderSender,
}

/// Core scheduler: evaluates active jobs every tick, queues the due ones and
/// dispatches them under a concurrency ceiling.
///
/// All scheduling state lives inside the instance, so several engines can
/// run side by side (one per test, for instance). Cloning yields another
/// handle to the same engine.
#[derive(Clone)]
pub struct SchedulerEngine {
    inner: Arc<EngineInner>,
}

impl SchedulerEngine {
    /// Build an engine over `store`, executing jobs with `executor`.
    ///
    /// Spawns the recorder worker, so this must be called from within a Tokio
    /// runtime.
    pub fn new(
        store: Arc<dyn JobStore>,
        executor: Arc<dyn Executor>,
        config: SchedulerConfig,
    ) -> Self {
        let alerter = FailureAlerter::new(
            Arc::clone(&store),
            config.alert_window,
            config.alert_threshold,
        );
        let recorder = ExecutionRecorder::new(Arc::clone(&store), alerter);
        let (recorder, _worker) =
            spawn_recorder(recorder, config.recorder_queue, config.recorder_concurrency);

        let inner = EngineInner {
            cache: ActiveJobCache::new(Arc::clone(&store), config.cache_ttl()),
            evaluator: DueEvaluator::new(&config),
            timing: TimingTable::new(),
            queue: ExecutionQueue::new(),
            slots: Arc::new(Semaphore::new(config.max_concurrent)),
            store,
            executor,
            recorder,
            config,
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    /// Main event loop. Ticks at the configured cadence until `shutdown`
    /// broadcasts `true`. In-flight executions are left to finish on their own.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            max_concurrent = self.inner.config.max_concurrent,
            tick_ms = self.inner.config.tick_interval_ms,
            "scheduler engine started"
        );

        let mut interval = tokio::time::interval(self.inner.config.tick_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let report = self.tick(Utc::now()).await;
                    if report.enqueued > 0 || report.dispatched > 0 {
                        debug!(
                            active = report.active,
                            enqueued = report.enqueued,
                            dispatched = report.dispatched,
                            "tick"
                        );
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!(in_flight = self.stats().in_flight, "scheduler engine shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// One scheduling pass at `now`: evaluate cached active jobs, enqueue the
    /// due ones, then drain the queue.
    pub async fn tick(&self, now: DateTime<Utc>) -> TickReport {
        let jobs = self.inner.cache.get_active_jobs().await;
        let mut report = TickReport {
            active: jobs.len(),
            ..TickReport::default()
        };
        for job in jobs.iter() {
            if self.inner.evaluator.should_run(job, now, &self.inner.timing)
                && self.inner.queue.enqueue(job.clone(), now)
            {
                report.enqueued += 1;
            }
        }
        report.dispatched = self.inner.drain(now);
        report
    }

    /// Drop the cached active-job snapshot so job edits are seen on the next tick.
    pub async fn invalidate_cache(&self) {
        self.inner.cache.invalidate().await;
    }

    pub fn stats(&self) -> EngineStats {
        let inner = &self.inner;
        EngineStats {
            queued: inner.queue.len(),
            in_flight: inner
                .config
                .max_concurrent
                .saturating_sub(inner.slots.available_permits()),
            tracked_jobs: inner.timing.len(),
        }
    }

    #[cfg(test)]
    fn timing(&self) -> &TimingTable {
        &self.inner.timing
    }
}

impl EngineInner {
    /// Dispatch queued jobs while a concurrency slot is free. Returns how
    /// many executions were started.
    fn drain(self: &Arc<Self>, now: DateTime<Utc>) -> usize {
        let min_spacing = Duration::milliseconds(
            i64::try_from(self.config.min_spacing_ms).unwrap_or(i64::MAX),
        );
        let mut dispatched = 0;
        loop {
            // Take the slot before the job so the ceiling is never exceeded,
            // even with completions draining concurrently.
            let Ok(permit) = Arc::clone(&self.slots).try_acquire_owned() else {
                break;
            };
            let Some(queued) = self.queue.dequeue() else {
                break;
            };
            if !self.timing.try_mark_dispatched(&queued.job.id, now, min_spacing) {
                debug!(job_id = %queued.job.id, "dispatched too recently, skipping this cycle");
                continue;
            }
            self.spawn_execution(queued, permit);
            dispatched += 1;
        }
        dispatched
    }

    fn spawn_execution(self: &Arc<Self>, queued: QueuedJob, permit: OwnedSemaphorePermit) {
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            let QueuedJob {
                job,
                scheduled_time,
            } = queued;

            // The snapshot may be up to one TTL old; re-read before calling out.
            let fresh = match inner.store.find_job_by_id(&job.id).await {
                Ok(Some(fresh)) if fresh.is_active() => Some(fresh),
                Ok(_) => {
                    debug!(job_id = %job.id, "job no longer active, execution skipped");
                    None
                }
                Err(e) => {
                    warn!(job_id = %job.id, error = %e, "could not re-read job, using cached copy");
                    Some(job)
                }
            };

            if let Some(job) = fresh {
                let outcome = inner.executor.execute(&job, scheduled_time).await;
                // Free the slot before recording so store latency never
                // throttles dispatch.
                drop(permit);
                inner.recorder.submit(job, outcome);
            } else {
                drop(permit);
            }
            inner.on_completion();
        });
    }

    /// Runs after every settled execution: bound the timing table, then
    /// refill the freed slot from the queue.
    fn on_completion(self: &Arc<Self>) {
        let now = Utc::now();
        let max_age = Duration::milliseconds(
            i64::try_from(self.config.prune_max_age_ms).unwrap_or(i64::MAX),
        );
        self.timing.prune(now, self.config.prune_threshold, max_age);
        if !self.queue.is_empty() {
            let started = self.drain(now);
            if started > 0 {
                debug!(started, "dispatched from completion path");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration as StdDuration;

    use async_trait::async_trait;

    use super::*;
    use crate::store::{MemoryJobStore, ReadOnlyStore};
    use crate::types::{ExecutionOutcome, ExecutionStatus, Job, JobId, JobStatus};

    /// Returns immediately with the configured status, counting calls.
    struct InstantExecutor {
        calls: AtomicUsize,
        status: ExecutionStatus,
    }

    impl InstantExecutor {
        fn new(status: ExecutionStatus) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                status,
            })
        }
    }

    #[async_trait]
    impl Executor for InstantExecutor {
        async fn execute(&self, _job: &Job, scheduled_time: DateTime<Utc>) -> ExecutionOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            ExecutionOutcome {
                scheduled_time,
                actual_start_time: Utc::now(),
                status: self.status,
                response_code: Some(if self.status == ExecutionStatus::Success { 201 } else { 500 }),
                duration_ms: Some(0),
                error_message: None,
            }
        }
    }

    /// Never settles, so every dispatched execution keeps its slot.
    struct HangingExecutor {
        started: AtomicUsize,
    }

    #[async_trait]
    impl Executor for HangingExecutor {
        async fn execute(&self, _job: &Job, _scheduled_time: DateTime<Utc>) -> ExecutionOutcome {
            self.started.fetch_add(1, Ordering::SeqCst);
            std::future::pending().await
        }
    }

    async fn store_with(jobs: &[Job]) -> Arc<MemoryJobStore> {
        let store = Arc::new(MemoryJobStore::new());
        for job in jobs {
            store.put_job(job.clone()).await;
        }
        store
    }

    async fn wait_until(mut cond: impl FnMut() -> bool) {
        for _ in 0..200 {
            if cond() {
                return;
            }
            tokio::time::sleep(StdDuration::from_millis(10)).await;
        }
        panic!("condition not met in time");
    }

    fn ms(n: i64) -> Duration {
        Duration::milliseconds(n)
    }

    #[tokio::test]
    async fn burst_never_exceeds_concurrency_ceiling() {
        let jobs: Vec<Job> = (0..200)
            .map(|i| Job::new(format!("j{i}"), "* * * * * *", Some("http://x/".into())))
            .collect();
        let store = store_with(&jobs).await;
        let executor = Arc::new(HangingExecutor {
            started: AtomicUsize::new(0),
        });
        let engine = SchedulerEngine::new(store, executor.clone(), SchedulerConfig::default());

        let report = engine.tick(Utc::now()).await;
        assert_eq!(report.enqueued, 200);
        assert_eq!(report.dispatched, 50);

        wait_until(|| executor.started.load(Ordering::SeqCst) == 50).await;
        let stats = engine.stats();
        assert_eq!(stats.in_flight, 50);
        assert_eq!(stats.queued, 150);

        // Second tick: the 50 dispatched jobs are due again and re-queued, the
        // 150 still waiting are not duplicated, and no slot frees up.
        let report = engine.tick(Utc::now() + ms(2_000)).await;
        assert_eq!(report.enqueued, 50);
        assert_eq!(report.dispatched, 0);
        assert_eq!(engine.stats().in_flight, 50);
        assert_eq!(engine.stats().queued, 200);
    }

    #[tokio::test]
    async fn spacing_guard_blocks_redispatch_within_a_second() {
        let job = Job::new("fast", "* * * * * *", Some("http://x/".into()));
        let store = store_with(std::slice::from_ref(&job)).await;
        let executor = Arc::new(HangingExecutor {
            started: AtomicUsize::new(0),
        });
        let engine = SchedulerEngine::new(store, executor, SchedulerConfig::default());
        let t0 = Utc::now();

        assert_eq!(engine.tick(t0).await.dispatched, 1);
        assert_eq!(engine.timing().last_dispatch(&job.id), Some(t0));

        // Re-queued by hand just before the window closes: dropped, not run.
        engine.inner.queue.enqueue(job.clone(), t0 + ms(900));
        assert_eq!(engine.inner.drain(t0 + ms(900)), 0);
        assert!(engine.inner.queue.is_empty());
        assert_eq!(engine.stats().in_flight, 1);

        engine.inner.queue.enqueue(job.clone(), t0 + ms(1_000));
        assert_eq!(engine.inner.drain(t0 + ms(1_000)), 1);
        assert_eq!(engine.timing().last_dispatch(&job.id), Some(t0 + ms(1_000)));
    }

    #[tokio::test]
    async fn fixed_interval_job_runs_once_per_interval() {
        let job = Job::new("every-10s", "*/10 * * * * *", Some("http://x/post".into()));
        let store = store_with(std::slice::from_ref(&job)).await;
        let executor = InstantExecutor::new(ExecutionStatus::Success);
        let engine = SchedulerEngine::new(store.clone(), executor.clone(), SchedulerConfig::default());
        let t0 = Utc::now();

        let mut dispatched_at = Vec::new();
        for second in 0..31 {
            let now = t0 + ms(second * 1_000);
            if engine.tick(now).await.dispatched > 0 {
                dispatched_at.push(second);
            }
            wait_until(|| engine.stats().in_flight == 0).await;
        }
        assert_eq!(dispatched_at, vec![0, 10, 20, 30]);

        wait_until(|| executor.calls.load(Ordering::SeqCst) == 4).await;
        for _ in 0..200 {
            if store.executions().await.len() == 4 {
                break;
            }
            tokio::time::sleep(StdDuration::from_millis(10)).await;
        }
        let executions = store.executions().await;
        assert_eq!(executions.len(), 4);
        assert!(executions.iter().all(|e| e.status == ExecutionStatus::Success));
        assert!(executions.iter().all(|e| e.response_code == Some(201)));
    }

    #[tokio::test]
    async fn paused_between_tick_and_dispatch_is_skipped() {
        let job = Job::new("pausing", "*/10 * * * * *", Some("http://x/".into()));
        let store = store_with(std::slice::from_ref(&job)).await;
        let executor = InstantExecutor::new(ExecutionStatus::Success);
        let engine = SchedulerEngine::new(store.clone(), executor.clone(), SchedulerConfig::default());

        // Warm the cache, then pause behind its back.
        engine.inner.cache.get_active_jobs().await;
        store.set_status(&job.id, JobStatus::Paused).await.unwrap();

        assert_eq!(engine.tick(Utc::now()).await.dispatched, 1);
        wait_until(|| engine.stats().in_flight == 0).await;
        assert_eq!(executor.calls.load(Ordering::SeqCst), 0);
        assert!(store.executions().await.is_empty());
    }

    #[tokio::test]
    async fn completion_prunes_stale_timing_entries() {
        let job = Job::new("trigger", "*/10 * * * * *", None);
        let store = store_with(std::slice::from_ref(&job)).await;
        let executor = InstantExecutor::new(ExecutionStatus::Success);
        let engine = SchedulerEngine::new(store, executor, SchedulerConfig::default());

        let now = Utc::now();
        let stale = JobId::from("stale");
        for i in 0..2_000 {
            engine
                .timing()
                .try_mark_dispatched(&JobId::from(format!("recent-{i}")), now, ms(1_000));
        }
        engine.timing().try_mark_dispatched(&stale, now - ms(301_000), ms(1_000));
        assert!(engine.timing().contains(&stale));

        engine.tick(now).await;
        wait_until(|| !engine.timing().contains(&stale)).await;
        assert!(engine.timing().contains(&job.id));
        assert_eq!(engine.stats().tracked_jobs, 2_001);
    }

    #[tokio::test]
    async fn bad_schedule_does_not_block_other_jobs() {
        let good = Job::new("good", "*/10 * * * * *", None);
        let bad = Job::new("bad", "definitely not cron", None);
        let store = store_with(&[bad, good.clone()]).await;
        let executor = InstantExecutor::new(ExecutionStatus::Success);
        let engine = SchedulerEngine::new(store, executor, SchedulerConfig::default());

        let report = engine.tick(Utc::now()).await;
        assert_eq!(report.active, 2);
        assert_eq!(report.enqueued, 1);
        assert!(engine.timing().last_dispatch(&good.id).is_some());
        // The broken job holds no timing entry.
        assert_eq!(engine.stats().tracked_jobs, 1);
    }

    #[tokio::test]
    async fn rejected_writes_do_not_stop_later_dispatches() {
        let job = Job::new("unsaved", "*/10 * * * * *", Some("http://x/".into()));
        let store = Arc::new(ReadOnlyStore::with_jobs(std::slice::from_ref(&job)).await);
        let executor = InstantExecutor::new(ExecutionStatus::Success);
        let engine = SchedulerEngine::new(store.clone(), executor.clone(), SchedulerConfig::default());
        let t0 = Utc::now();

        assert_eq!(engine.tick(t0).await.dispatched, 1);
        wait_until(|| store.writes() >= 1 && engine.stats().in_flight == 0).await;
        assert_eq!(executor.calls.load(Ordering::SeqCst), 1);

        // Nothing was saved, yet the job comes due on its next interval.
        assert_eq!(engine.tick(t0 + ms(5_000)).await.dispatched, 0);
        assert_eq!(engine.tick(t0 + ms(10_000)).await.dispatched, 1);
        wait_until(|| executor.calls.load(Ordering::SeqCst) == 2).await;
        assert!(store.inner.executions().await.is_empty());
    }

    #[tokio::test]
    async fn run_stops_on_shutdown_signal() {
        let store = store_with(&[]).await;
        let executor = InstantExecutor::new(ExecutionStatus::Success);
        let engine = SchedulerEngine::new(store, executor, SchedulerConfig::default());
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(engine.run(rx));
        tx.send(true).unwrap();
        tokio::time::timeout(StdDuration::from_secs(2), handle)
            .await
            .expect("engine did not stop")
            .unwrap();
    }
}
