//! An in-memory [`PriorityQueue`] for tests, mirroring the scored-set +
//! companion-set shape of the Redis reference implementation without
//! needing a live Redis.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use dispatch_core::error::Result;
use dispatch_core::queue::PriorityQueue;
use serde_json::Value;
use tokio::sync::Mutex;
use uuid::Uuid;

struct Entry {
    priority: i32,
    seq: u64,
}

#[derive(Default)]
struct State {
    pending: HashMap<Uuid, Entry>,
    processing: HashSet<Uuid>,
    stats: HashMap<String, i64>,
    events: Vec<(String, Value)>,
    next_seq: u64,
}

/// Held behind a mutex: single process, no lock-free structure needed per
/// spec.md §5 ("no shared mutable state requiring locks inside the
/// process" — the mutex here stands in for what the reference Redis
/// sorted-set gives atomically over the network).
#[derive(Default)]
pub struct InMemoryPriorityQueue {
    state: Mutex<State>,
}

impl InMemoryPriorityQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn stats(&self) -> HashMap<String, i64> {
        self.state.lock().await.stats.clone()
    }

    pub async fn events(&self) -> Vec<(String, Value)> {
        self.state.lock().await.events.clone()
    }
}

#[async_trait]
impl PriorityQueue for InMemoryPriorityQueue {
    async fn enqueue(&self, job_id: Uuid, priority: i32) -> Result<()> {
        let mut state = self.state.lock().await;
        let seq = state.next_seq;
        state.next_seq += 1;
        // Idempotent: update priority, keep original insertion order if
        // already present.
        let entry = state.pending.entry(job_id).or_insert(Entry { priority, seq });
        entry.priority = priority;
        Ok(())
    }

    async fn dequeue(&self) -> Result<Option<Uuid>> {
        let mut state = self.state.lock().await;
        let winner = state
            .pending
            .iter()
            .max_by(|(_, a), (_, b)| a.priority.cmp(&b.priority).then(b.seq.cmp(&a.seq)))
            .map(|(id, _)| *id);

        if let Some(id) = winner {
            state.pending.remove(&id);
            state.processing.insert(id);
        }
        Ok(winner)
    }

    async fn remove(&self, job_id: Uuid) -> Result<()> {
        let mut state = self.state.lock().await;
        state.pending.remove(&job_id);
        state.processing.remove(&job_id);
        Ok(())
    }

    async fn length(&self) -> Result<u64> {
        Ok(self.state.lock().await.pending.len() as u64)
    }

    async fn processing_count(&self) -> Result<u64> {
        Ok(self.state.lock().await.processing.len() as u64)
    }

    async fn mark_done(&self, job_id: Uuid) -> Result<()> {
        self.state.lock().await.processing.remove(&job_id);
        Ok(())
    }

    async fn publish_event(&self, event_type: &str, payload: Value) -> Result<()> {
        self.state
            .lock()
            .await
            .events
            .push((event_type.to_string(), payload));
        Ok(())
    }

    async fn increment_stat(&self, name: &str, delta: i64) -> Result<()> {
        let mut state = self.state.lock().await;
        *state.stats.entry(name.to_string()).or_insert(0) += delta;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn dequeue_prefers_higher_priority() {
        let queue = InMemoryPriorityQueue::new();
        let low = Uuid::new_v4();
        let high = Uuid::new_v4();
        queue.enqueue(low, 5).await.unwrap();
        queue.enqueue(high, 10).await.unwrap();

        assert_eq!(queue.dequeue().await.unwrap(), Some(high));
        assert_eq!(queue.dequeue().await.unwrap(), Some(low));
        assert_eq!(queue.dequeue().await.unwrap(), None);
    }

    #[tokio::test]
    async fn reenqueue_updates_priority_idempotently() {
        let queue = InMemoryPriorityQueue::new();
        let id = Uuid::new_v4();
        queue.enqueue(id, 1).await.unwrap();
        queue.enqueue(id, 9).await.unwrap();
        assert_eq!(queue.length().await.unwrap(), 1);

        let other = Uuid::new_v4();
        queue.enqueue(other, 5).await.unwrap();

        assert_eq!(queue.dequeue().await.unwrap(), Some(id));
    }

    #[tokio::test]
    async fn mark_done_is_idempotent() {
        let queue = InMemoryPriorityQueue::new();
        let id = Uuid::new_v4();
        queue.mark_done(id).await.unwrap();
        queue.mark_done(id).await.unwrap();
    }
}
