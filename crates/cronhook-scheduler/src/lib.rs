//! `cronhook-scheduler` — tick-driven HTTP job scheduler.
//!
//! # Overview
//!
//! Every tick (1 s by default) the [`engine::SchedulerEngine`] reads a
//! short-TTL snapshot of active jobs, asks the due-job evaluator which of them
//! should run, queues those (at most one pending entry per job) and dispatches
//! the queue under a concurrency ceiling. Each execution performs one HTTP call
//! with a hard timeout; the outcome is handed to a bounded recorder pool that
//! writes the execution row, bumps the job's `last_run_at` and raises failure
//! alerts.
//!
//! # Cadences
//!
//! | Schedule text            | Treatment                                       |
//! |--------------------------|-------------------------------------------------|
//! | `*/N * * * * *`          | Fixed interval of N seconds (500 ms early slack) |
//! | other valid cron         | Irregular: due on matching seconds, forced after 60 s |
//! | empty / unparsable       | Never scheduled                                 |

pub mod alert;
pub mod cache;
pub mod db;
pub mod engine;
pub mod error;
pub mod evaluator;
pub mod executor;
pub mod handle;
pub mod queue;
pub mod recorder;
pub mod schedule;
pub mod store;
pub mod timing;
pub mod types;

pub use db::SqliteJobStore;
pub use engine::{EngineStats, SchedulerEngine, TickReport};
pub use error::{Result, SchedulerError};
pub use executor::{Executor, HttpExecutor};
pub use handle::SchedulerHandle;
pub use store::{JobStore, MemoryJobStore};
pub use types::{
    DeliveryMode, ExecutionOutcome, ExecutionStatus, Job, JobExecution, JobId, JobStatus,
};
