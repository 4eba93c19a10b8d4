//! Redis implementation of the dispatch core's [`PriorityQueue`] fast path.
//!
//! Mirrors the key layout of the system this crate is modeled on exactly, so
//! operators inspecting Redis directly see the same shape regardless of
//! which side drives it:
//!
//! - `job_queue:priority` — sorted set, member = job id, score = `-priority`
//!   (Redis pops lowest score first, so higher priority sorts out first).
//! - `job_queue:processing` — set of job ids currently claimed by a worker.
//! - `job_stats` — hash of counter name to count (`completed`, `failed`,
//!   `retries`, ...).
//! - `job_events` — pub/sub channel carrying `{"event": ..., ...payload}`.

use async_trait::async_trait;
use dispatch_core::error::{DispatchError, Result};
use dispatch_core::queue::PriorityQueue;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde_json::Value;
use uuid::Uuid;

const QUEUE_KEY: &str = "job_queue:priority";
const PROCESSING_KEY: &str = "job_queue:processing";
const STATS_KEY: &str = "job_stats";
const EVENTS_CHANNEL: &str = "job_events";

fn infra(e: redis::RedisError) -> DispatchError {
    DispatchError::Infrastructure(e.to_string())
}

/// A `PriorityQueue` backed by a Redis connection manager, which
/// transparently reconnects across brief outages instead of failing every
/// call until a fresh client is built.
#[derive(Clone)]
pub struct RedisPriorityQueue {
    conn: ConnectionManager,
}

impl RedisPriorityQueue {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url).map_err(infra)?;
        let conn = client.get_connection_manager().await.map_err(infra)?;
        Ok(Self { conn })
    }

    pub fn from_connection_manager(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl PriorityQueue for RedisPriorityQueue {
    async fn enqueue(&self, job_id: Uuid, priority: i32) -> Result<()> {
        let mut conn = self.conn.clone();
        let score = -priority as f64;
        conn.zadd::<_, _, _, ()>(QUEUE_KEY, job_id.to_string(), score)
            .await
            .map_err(infra)
    }

    async fn dequeue(&self) -> Result<Option<Uuid>> {
        let mut conn = self.conn.clone();
        let popped: Vec<(String, f64)> = conn.zpopmin(QUEUE_KEY, 1).await.map_err(infra)?;
        let Some((raw_id, _score)) = popped.into_iter().next() else {
            return Ok(None);
        };
        let job_id = Uuid::parse_str(&raw_id)
            .map_err(|e| DispatchError::Infrastructure(format!("corrupt queue entry: {e}")))?;
        conn.sadd::<_, _, ()>(PROCESSING_KEY, raw_id)
            .await
            .map_err(infra)?;
        Ok(Some(job_id))
    }

    async fn remove(&self, job_id: Uuid) -> Result<()> {
        let mut conn = self.conn.clone();
        let id = job_id.to_string();
        conn.zrem::<_, _, ()>(QUEUE_KEY, &id).await.map_err(infra)?;
        conn.srem::<_, _, ()>(PROCESSING_KEY, &id)
            .await
            .map_err(infra)
    }

    async fn length(&self) -> Result<u64> {
        let mut conn = self.conn.clone();
        conn.zcard(QUEUE_KEY).await.map_err(infra)
    }

    async fn processing_count(&self) -> Result<u64> {
        let mut conn = self.conn.clone();
        conn.scard(PROCESSING_KEY).await.map_err(infra)
    }

    async fn mark_done(&self, job_id: Uuid) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.srem::<_, _, ()>(PROCESSING_KEY, job_id.to_string())
            .await
            .map_err(infra)
    }

    async fn publish_event(&self, event_type: &str, payload: Value) -> Result<()> {
        let mut conn = self.conn.clone();
        let mut message = serde_json::Map::new();
        message.insert("event".to_string(), Value::String(event_type.to_string()));
        if let Value::Object(fields) = payload {
            message.extend(fields);
        }
        let body = serde_json::to_string(&Value::Object(message))
            .map_err(|e| DispatchError::Infrastructure(e.to_string()))?;
        conn.publish::<_, _, ()>(EVENTS_CHANNEL, body)
            .await
            .map_err(infra)
    }

    async fn increment_stat(&self, name: &str, delta: i64) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.hincr::<_, _, _, ()>(STATS_KEY, name, delta)
            .await
            .map_err(infra)
    }
}
