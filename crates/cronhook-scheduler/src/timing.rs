//! Per-job timing state: one entry per job holding both the memoized cadence
//! and the last dispatch instant.
//!
//! The due-job evaluator and the dispatcher's spacing guard read the same
//! `last_dispatch` field, so they can never disagree about when a job last ran.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use tracing::debug;

use crate::schedule::{classify, Cadence};
use crate::types::JobId;

#[derive(Debug, Clone)]
struct TimingEntry {
    /// Schedule text the cadence was derived from.
    schedule: String,
    cadence: Cadence,
    /// Last time an execution was actually dispatched (not merely queued).
    last_dispatch: Option<DateTime<Utc>>,
}

/// Concurrent map of timing entries, owned by a single engine instance.
#[derive(Debug, Default)]
pub struct TimingTable {
    entries: DashMap<JobId, TimingEntry>,
}

impl TimingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Memoized cadence for `id`, re-classified when the schedule text changed.
    ///
    /// An invalid schedule never creates an entry: such a job cannot be
    /// dispatched, so it would only inflate the count the pruner works from.
    pub fn cadence_for(&self, id: &JobId, schedule: &str) -> Cadence {
        if let Some(mut entry) = self.entries.get_mut(id) {
            if entry.schedule != schedule {
                debug!(job_id = %id, "schedule changed, re-classifying cadence");
                entry.schedule = schedule.to_string();
                entry.cadence = classify(schedule);
            }
            return entry.cadence.clone();
        }

        let cadence = classify(schedule);
        if cadence.is_valid() {
            self.entries.entry(id.clone()).or_insert_with(|| TimingEntry {
                schedule: schedule.to_string(),
                cadence: cadence.clone(),
                last_dispatch: None,
            });
        }
        cadence
    }

    pub fn last_dispatch(&self, id: &JobId) -> Option<DateTime<Utc>> {
        self.entries.get(id).and_then(|e| e.last_dispatch)
    }

    /// Spacing guard: record `now` as the dispatch time unless the previous
    /// dispatch was less than `min_spacing` ago.
    ///
    /// Check and set happen under the entry's shard lock, so two concurrent
    /// callers can never both succeed inside the window.
    pub fn try_mark_dispatched(&self, id: &JobId, now: DateTime<Utc>, min_spacing: Duration) -> bool {
        let mut entry = self.entries.entry(id.clone()).or_insert_with(|| TimingEntry {
            schedule: String::new(),
            cadence: Cadence::Invalid("not yet classified".to_string()),
            last_dispatch: None,
        });
        if let Some(last) = entry.last_dispatch {
            // A negative gap means the wall clock stepped back; restart from `now`.
            let gap = now - last;
            if gap >= Duration::zero() && gap < min_spacing {
                return false;
            }
        }
        entry.last_dispatch = Some(now);
        true
    }

    /// Drop entries whose last dispatch is older than `max_age`, but only once
    /// more than `threshold` entries are tracked. Returns how many were removed.
    ///
    /// Entries that were never dispatched carry no spacing state and are kept.
    pub fn prune(&self, now: DateTime<Utc>, threshold: usize, max_age: Duration) -> usize {
        if self.entries.len() <= threshold {
            return 0;
        }
        let cutoff = now - max_age;
        let before = self.entries.len();
        self.entries
            .retain(|_, e| e.last_dispatch.map_or(true, |last| last >= cutoff));
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            debug!(removed, remaining = self.entries.len(), "pruned stale timing entries");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, id: &JobId) -> bool {
        self.entries.contains_key(id)
    }
}
