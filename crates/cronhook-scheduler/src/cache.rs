//! Short-TTL snapshot of active jobs.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::store::JobStore;
use crate::types::Job;

struct Snapshot {
    jobs: Arc<Vec<Job>>,
    refreshed_at: Option<Instant>,
}

/// Serves the active-job list from memory, re-querying the store once the
/// snapshot is older than the TTL.
///
/// The lock is held across the refresh so concurrent callers wait for one
/// query instead of stampeding the store.
pub struct ActiveJobCache {
    store: Arc<dyn JobStore>,
    ttl: Duration,
    snapshot: Mutex<Snapshot>,
}

impl ActiveJobCache {
    pub fn new(store: Arc<dyn JobStore>, ttl: Duration) -> Self {
        Self {
            store,
            ttl,
            snapshot: Mutex::new(Snapshot {
                jobs: Arc::new(Vec::new()),
                refreshed_at: None,
            }),
        }
    }

    /// Current active jobs. On a store error the last known snapshot
    /// (possibly empty) is returned instead.
    pub async fn get_active_jobs(&self) -> Arc<Vec<Job>> {
        let mut snapshot = self.snapshot.lock().await;
        let fresh = snapshot
            .refreshed_at
            .is_some_and(|at| at.elapsed() < self.ttl);
        if fresh {
            return Arc::clone(&snapshot.jobs);
        }

        match self.store.find_active_jobs().await {
            Ok(jobs) => {
                debug!(count = jobs.len(), "active job cache refreshed");
                snapshot.jobs = Arc::new(jobs);
                snapshot.refreshed_at = Some(Instant::now());
            }
            Err(e) => {
                // Keep the refresh timestamp stale so the next tick retries.
                warn!(error = %e, stale = snapshot.jobs.len(), "active job refresh failed, serving last snapshot");
            }
        }
        Arc::clone(&snapshot.jobs)
    }

    /// Force the next read to hit the store.
    pub async fn invalidate(&self) {
        self.snapshot.lock().await.refreshed_at = None;
    }
}
