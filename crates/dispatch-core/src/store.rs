//! The durable store boundary (spec.md §4.2).
//!
//! Implementations must give the claim protocol (§4.4) atomicity via
//! `SELECT ... FOR UPDATE SKIP LOCKED` or an equivalent row-level,
//! non-blocking lock. `dispatch-postgres` provides the production
//! implementation; `dispatch-testing` provides an in-memory one with the
//! same contract for tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::error::Result;
use crate::job::{Job, JobCreate};

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new job row. Caller decides the initial status (QUEUED for
    /// immediately-eligible jobs, PENDING is reserved for jobs a future
    /// submitter might insert without enqueueing).
    async fn insert(&self, create: JobCreate) -> Result<Job>;

    /// Insert many jobs in a single transaction (spec.md §6 `submit_bulk`).
    async fn insert_bulk(&self, creates: Vec<JobCreate>) -> Result<Vec<Job>>;

    async fn get(&self, id: Uuid) -> Result<Option<Job>>;

    /// Claim protocol step 1-4 (spec.md §4.4): lock the row with
    /// skip-locked, filter to claimable statuses, and if present, set
    /// RUNNING/started_at/worker_id and increment attempt. Returns `None`
    /// (never an error) when the row is not claimable — races, stale queue
    /// entries, and already-terminal jobs all land here silently.
    async fn claim(&self, id: Uuid, worker_id: &str) -> Result<Option<Job>>;

    /// Store-fallback dispatch (spec.md §4.2 last bullet, §4.6 step 2): find
    /// one claimable id without mutating it, ordered by (priority desc,
    /// created_at asc), skipping rows locked by a concurrent transaction.
    /// The caller is expected to then call [`JobStore::claim`] on the
    /// returned id.
    async fn find_ready_id(&self, now: DateTime<Utc>) -> Result<Option<Uuid>>;

    /// Successful terminal outcome.
    async fn complete(&self, id: Uuid, result: Value, duration_seconds: f64) -> Result<Job>;

    /// Permanent failure: no handler, or retry budget exhausted.
    async fn fail_permanently(
        &self,
        id: Uuid,
        error: &str,
        duration_seconds: Option<f64>,
    ) -> Result<Job>;

    /// Recoverable failure with budget remaining: move to RETRYING with a
    /// future `next_retry_at`.
    async fn schedule_retry(&self, id: Uuid, error: &str, next_retry_at: DateTime<Utc>)
        -> Result<Job>;

    /// Range scan for the retry scheduler (spec.md §4.5 step 1):
    /// status = RETRYING and next_retry_at <= now, up to `limit` rows.
    async fn due_retries(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Job>>;

    /// Retry scheduler's queue-unavailable fallback (spec.md §4.5 step 3):
    /// under a row lock (skip-locked), set status = QUEUED and clear
    /// next_retry_at. No-op (not an error) if the row is no longer
    /// RETRYING.
    async fn promote_to_queued(&self, id: Uuid) -> Result<()>;

    /// External cancel (spec.md §6 `cancel`): reject if already COMPLETED
    /// or CANCELLED, else set CANCELLED + completed_at.
    async fn cancel(&self, id: Uuid) -> Result<Job>;

    /// External retry (spec.md §6 `retry`): reject unless FAILED or
    /// CANCELLED; reset attempt=0, clear error/result/timings, set QUEUED.
    async fn retry_reset(&self, id: Uuid) -> Result<Job>;
}
