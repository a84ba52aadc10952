//! Due-job evaluation: decides, per tick, whether a job should be enqueued.

use chrono::{DateTime, Duration, Utc};
use cronhook_core::SchedulerConfig;
use tracing::{debug, warn};

use crate::error::{Result, SchedulerError};
use crate::schedule::Cadence;
use crate::timing::TimingTable;
use crate::types::Job;

/// Thresholds used by [`DueEvaluator::should_run`].
#[derive(Debug, Clone)]
pub struct DueEvaluator {
    /// Fixed-interval jobs are due this long before the interval fully elapses,
    /// so tick jitter never costs a whole cycle.
    interval_tolerance: Duration,
    irregular_min_gap: Duration,
    irregular_force_after: Duration,
}

impl DueEvaluator {
    pub fn new(config: &SchedulerConfig) -> Self {
        Self {
            interval_tolerance: millis(config.interval_tolerance_ms),
            irregular_min_gap: millis(config.irregular_min_gap_ms),
            irregular_force_after: millis(config.irregular_force_after_ms),
        }
    }

    /// Whether `job` should be enqueued on the tick at `now`.
    ///
    /// Never fails: an evaluation error only makes this one job not due.
    pub fn should_run(&self, job: &Job, now: DateTime<Utc>, timing: &TimingTable) -> bool {
        match self.evaluate(job, now, timing) {
            Ok(due) => due,
            // Repeats every tick for as long as the row stays broken.
            Err(SchedulerError::InvalidSchedule(reason)) => {
                debug!(job_id = %job.id, %reason, "invalid schedule, job skipped");
                false
            }
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "job skipped this tick");
                false
            }
        }
    }

    fn evaluate(&self, job: &Job, now: DateTime<Utc>, timing: &TimingTable) -> Result<bool> {
        if !job.is_active() {
            return Ok(false);
        }
        if job.schedule.trim().is_empty() {
            return Err(SchedulerError::InvalidSchedule("schedule is empty".to_string()));
        }

        let cadence = timing.cadence_for(&job.id, &job.schedule);
        if let Cadence::Invalid(reason) = &cadence {
            return Err(SchedulerError::InvalidSchedule(reason.clone()));
        }

        let Some(last) = timing.last_dispatch(&job.id) else {
            // Never dispatched: first tick wins.
            return Ok(true);
        };
        let elapsed = now - last;
        if elapsed < Duration::zero() {
            // Wall clock stepped back past the last dispatch.
            debug!(job_id = %job.id, "clock moved backwards, treating job as due");
            return Ok(true);
        }

        let due = match cadence {
            Cadence::FixedIntervalMs(interval) => {
                elapsed >= millis(interval) - self.interval_tolerance
            }
            Cadence::Irregular(_) if elapsed > self.irregular_force_after => true,
            Cadence::Irregular(_) => elapsed >= self.irregular_min_gap && cadence.includes(now),
            Cadence::Invalid(_) => false,
        };
        Ok(due)
    }
}

fn millis(ms: u64) -> Duration {
    Duration::milliseconds(i64::try_from(ms).unwrap_or(i64::MAX))
}
