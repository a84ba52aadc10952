//! FIFO execution queue holding at most one pending entry per job.

use std::collections::{HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};

use crate::types::{Job, JobId};

/// A job the tick decided was due, waiting for a dispatch slot.
#[derive(Debug, Clone)]
pub struct QueuedJob {
    pub job: Job,
    /// When the tick decided the job was due.
    pub scheduled_time: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct QueueInner {
    order: VecDeque<QueuedJob>,
    members: HashSet<JobId>,
}

/// Deduplicated FIFO. Membership test and insert happen under one lock.
#[derive(Debug, Default)]
pub struct ExecutionQueue {
    inner: Mutex<QueueInner>,
}

impl ExecutionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, QueueInner> {
        // Every critical section leaves the queue consistent, so a poisoned
        // lock is still safe to use.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue `job`. Returns `false` (and changes nothing) if the job is
    /// already waiting.
    pub fn enqueue(&self, job: Job, scheduled_time: DateTime<Utc>) -> bool {
        let mut inner = self.lock();
        if !inner.members.insert(job.id.clone()) {
            return false;
        }
        inner.order.push_back(QueuedJob {
            job,
            scheduled_time,
        });
        true
    }

    pub fn dequeue(&self) -> Option<QueuedJob> {
        let mut inner = self.lock();
        let next = inner.order.pop_front()?;
        inner.members.remove(&next.job.id);
        Some(next)
    }

    pub fn contains(&self, id: &JobId) -> bool {
        self.lock().members.contains(id)
    }

    pub fn len(&self) -> usize {
        self.lock().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().order.is_empty()
    }
}
