//! Periodic sweep promoting retry-eligible jobs back to the queue
//! (spec.md §4.5).

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;

use crate::error::Result;
use crate::queue::PriorityQueue;
use crate::store::JobStore;

pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(5);

pub struct RetryScheduler {
    store: Arc<dyn JobStore>,
    queue: Arc<dyn PriorityQueue>,
    max_per_sweep: i64,
    interval: Duration,
}

impl RetryScheduler {
    pub fn new(store: Arc<dyn JobStore>, queue: Arc<dyn PriorityQueue>, max_per_sweep: i64) -> Self {
        Self {
            store,
            queue,
            max_per_sweep,
            interval: DEFAULT_SWEEP_INTERVAL,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Runs sweeps on `interval` until `shutdown` is signalled. Loop-level
    /// errors are logged and swallowed (spec.md §7 propagation policy) so a
    /// transient store/queue outage never kills the process.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {
                    if let Err(e) = self.sweep().await {
                        tracing::error!(error = %e, "retry sweep error");
                        tokio::time::sleep(Duration::from_secs(2)).await;
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }

    pub async fn sweep(&self) -> Result<usize> {
        let now = Utc::now();
        let due = self.store.due_retries(now, self.max_per_sweep).await?;

        let mut requeued = 0;
        for job in &due {
            if self.queue.is_store_backed() {
                self.store.promote_to_queued(job.id).await?;
                continue;
            }
            match self.queue.enqueue(job.id, job.priority).await {
                Ok(()) => requeued += 1,
                Err(e) => {
                    tracing::warn!(
                        job_id = %job.id,
                        error = %e,
                        "queue unavailable, promoting retry directly to QUEUED"
                    );
                    self.store.promote_to_queued(job.id).await?;
                }
            }
        }

        if !due.is_empty() {
            tracing::info!(count = due.len(), requeued, "re-queued retry-eligible jobs");
        }

        Ok(due.len())
    }
}
