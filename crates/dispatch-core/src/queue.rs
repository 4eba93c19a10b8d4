//! The in-memory priority-queue boundary (spec.md §4.1).
//!
//! The queue is a hint, never the source of truth; stale entries (the job
//! is already terminal by the time it's claimed) are detected and dropped
//! at claim time, not here.

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use crate::error::Result;

#[async_trait]
pub trait PriorityQueue: Send + Sync {
    /// Idempotent insertion; re-enqueueing an id already present updates its
    /// priority.
    async fn enqueue(&self, job_id: Uuid, priority: i32) -> Result<()>;

    /// Atomically remove and return the id with the highest priority, or
    /// `None` if empty. Two concurrent dequeuers must never receive the
    /// same id.
    async fn dequeue(&self) -> Result<Option<Uuid>>;

    /// Best-effort removal; no error if the id is absent.
    async fn remove(&self, job_id: Uuid) -> Result<()>;

    async fn length(&self) -> Result<u64>;

    async fn processing_count(&self) -> Result<u64>;

    /// Remove from the processing set (observability only).
    async fn mark_done(&self, job_id: Uuid) -> Result<()>;

    /// Fire-and-forget, best-effort, at-most-once, unordered notification.
    async fn publish_event(&self, event_type: &str, payload: Value) -> Result<()>;

    /// Monotone counter for telemetry (`enqueued`, `completed`, `failed`,
    /// `retries`).
    async fn increment_stat(&self, name: &str, delta: i64) -> Result<()>;

    /// Whether this queue delegates dispatch entirely to the store (i.e.
    /// `enqueue` is a harmless no-op rather than a real handoff). The retry
    /// scheduler needs this: with a real queue, `enqueue` failing is the
    /// signal to fall back to `JobStore::promote_to_queued` (spec.md §4.5
    /// step 3); a store-backed queue never fails `enqueue`, so without this
    /// flag retrying jobs would stall forever — `find_ready_id` only scans
    /// PENDING/QUEUED, never RETRYING.
    fn is_store_backed(&self) -> bool {
        false
    }
}

/// Queue-backend-optionality fallback (DESIGN NOTES item 4, SPEC_FULL.md):
/// a `PriorityQueue` that holds nothing and always reports empty. Used when
/// `USE_REDIS=false` so the dispatcher's pull loop needs no special-casing
/// — every dequeue falls through to `JobStore::find_ready_id`, and every
/// other method is a harmless no-op.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullPriorityQueue;

#[async_trait]
impl PriorityQueue for NullPriorityQueue {
    async fn enqueue(&self, _job_id: Uuid, _priority: i32) -> Result<()> {
        Ok(())
    }

    async fn dequeue(&self) -> Result<Option<Uuid>> {
        Ok(None)
    }

    async fn remove(&self, _job_id: Uuid) -> Result<()> {
        Ok(())
    }

    async fn length(&self) -> Result<u64> {
        Ok(0)
    }

    async fn processing_count(&self) -> Result<u64> {
        Ok(0)
    }

    async fn mark_done(&self, _job_id: Uuid) -> Result<()> {
        Ok(())
    }

    async fn publish_event(&self, _event_type: &str, _payload: Value) -> Result<()> {
        Ok(())
    }

    async fn increment_stat(&self, _name: &str, _delta: i64) -> Result<()> {
        Ok(())
    }

    fn is_store_backed(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn null_queue_always_empty() {
        let q = NullPriorityQueue;
        assert_eq!(q.dequeue().await.unwrap(), None);
        assert_eq!(q.length().await.unwrap(), 0);
        q.enqueue(Uuid::new_v4(), 10).await.unwrap();
        assert_eq!(q.dequeue().await.unwrap(), None);
    }
}
