//! PostgreSQL implementation of the dispatch core's `JobStore`.
//!
//! # Database Schema
//!
//! ```sql
//! CREATE TABLE jobs (
//!     id               UUID PRIMARY KEY,
//!     name             TEXT NOT NULL,
//!     job_type         TEXT NOT NULL,
//!     status           TEXT NOT NULL DEFAULT 'pending'
//!                        CHECK (status IN ('pending', 'queued', 'running',
//!                                          'completed', 'failed', 'retrying',
//!                                          'cancelled')),
//!     priority         INTEGER NOT NULL DEFAULT 5,
//!     payload          JSONB NOT NULL DEFAULT '{}'::jsonb,
//!     result           JSONB,
//!     error_message    TEXT,
//!     attempt          INTEGER NOT NULL DEFAULT 0,
//!     max_retries      INTEGER NOT NULL DEFAULT 5,
//!     next_retry_at    TIMESTAMPTZ,
//!     created_at       TIMESTAMPTZ NOT NULL DEFAULT NOW(),
//!     scheduled_at     TIMESTAMPTZ,
//!     started_at       TIMESTAMPTZ,
//!     completed_at     TIMESTAMPTZ,
//!     duration_seconds DOUBLE PRECISION,
//!     created_by       TEXT,
//!     worker_id        TEXT
//! );
//!
//! CREATE INDEX idx_jobs_status_priority ON jobs (status, priority);
//! CREATE INDEX idx_jobs_scheduled_at ON jobs (scheduled_at);
//! CREATE INDEX idx_jobs_next_retry_at ON jobs (next_retry_at);
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use dispatch_postgres::PgJobStore;
//! use sqlx::PgPool;
//!
//! let pool = PgPool::connect("postgres://localhost/dispatch").await?;
//! let store = PgJobStore::new(pool);
//! ```

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dispatch_core::error::{DispatchError, Result};
use dispatch_core::job::{Job, JobCreate, JobStatus};
use dispatch_core::store::JobStore;
use serde_json::Value;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

const JOB_COLUMNS: &str = "id, name, job_type, status, priority, payload, result, \
     error_message, attempt, max_retries, next_retry_at, created_at, scheduled_at, \
     started_at, completed_at, duration_seconds, created_by, worker_id";

fn infra(e: sqlx::Error) -> DispatchError {
    DispatchError::Infrastructure(e.to_string())
}

fn row_to_job(row: PgRow) -> Result<Job> {
    let status: String = row.try_get("status").map_err(infra)?;
    Ok(Job {
        id: row.try_get("id").map_err(infra)?,
        name: row.try_get("name").map_err(infra)?,
        job_type: row.try_get::<String, _>("job_type").map_err(infra)?.into(),
        status: JobStatus::from_str(&status)?,
        priority: row.try_get("priority").map_err(infra)?,
        payload: row.try_get("payload").map_err(infra)?,
        result: row.try_get("result").map_err(infra)?,
        error_message: row.try_get("error_message").map_err(infra)?,
        attempt: row.try_get("attempt").map_err(infra)?,
        max_retries: row.try_get("max_retries").map_err(infra)?,
        next_retry_at: row.try_get("next_retry_at").map_err(infra)?,
        created_at: row.try_get("created_at").map_err(infra)?,
        scheduled_at: row.try_get("scheduled_at").map_err(infra)?,
        started_at: row.try_get("started_at").map_err(infra)?,
        completed_at: row.try_get("completed_at").map_err(infra)?,
        duration_seconds: row.try_get("duration_seconds").map_err(infra)?,
        created_by: row.try_get("created_by").map_err(infra)?,
        worker_id: row.try_get("worker_id").map_err(infra)?,
    })
}

/// PostgreSQL-backed job store. The claim protocol and retry bookkeeping
/// live entirely in SQL so a concurrent fleet of `dispatch-core` dispatchers
/// sharing one database never double-claim a row.
#[derive(Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Reclaim jobs stuck RUNNING past `stale_after` — a worker that died
    /// mid-job without reaching a terminal state. Not part of the core
    /// `JobStore` trait since spec.md leaves worker-crash recovery as an
    /// operational concern, not a required behavior (§4.4 Open Questions).
    pub async fn reclaim_stale_running(&self, stale_after: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'queued', worker_id = NULL, started_at = NULL
            WHERE status = 'running' AND started_at < $1
            "#,
        )
        .bind(stale_after)
        .execute(&self.pool)
        .await
        .map_err(infra)?;

        Ok(result.rows_affected())
    }

    /// Delete terminal jobs older than `older_than`, mirroring the
    /// housekeeping `seesaw-job-postgres::cleanup_succeeded` does for its
    /// own terminal state.
    pub async fn cleanup_terminal(&self, older_than: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM jobs
            WHERE status IN ('completed', 'failed', 'cancelled')
              AND completed_at < $1
            "#,
        )
        .bind(older_than)
        .execute(&self.pool)
        .await
        .map_err(infra)?;

        Ok(result.rows_affected())
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn insert(&self, create: JobCreate) -> Result<Job> {
        create.validate()?;
        let id = Uuid::new_v4();
        let query = format!(
            r#"
            INSERT INTO jobs (id, name, job_type, status, priority, payload, max_retries,
                               scheduled_at, created_by)
            VALUES ($1, $2, $3, 'queued', $4, $5, $6, $7, $8)
            RETURNING {JOB_COLUMNS}
            "#
        );
        let row = sqlx::query(&query)
            .bind(id)
            .bind(&create.name)
            .bind(&create.job_type.0)
            .bind(create.priority)
            .bind(&create.payload)
            .bind(create.max_retries)
            .bind(create.scheduled_at)
            .bind(&create.created_by)
            .fetch_one(&self.pool)
            .await
            .map_err(infra)?;
        row_to_job(row)
    }

    async fn insert_bulk(&self, creates: Vec<JobCreate>) -> Result<Vec<Job>> {
        let mut tx = self.pool.begin().await.map_err(infra)?;
        let query = format!(
            r#"
            INSERT INTO jobs (id, name, job_type, status, priority, payload, max_retries,
                               scheduled_at, created_by)
            VALUES ($1, $2, $3, 'queued', $4, $5, $6, $7, $8)
            RETURNING {JOB_COLUMNS}
            "#
        );
        let mut jobs = Vec::with_capacity(creates.len());
        for create in &creates {
            create.validate()?;
            let row = sqlx::query(&query)
                .bind(Uuid::new_v4())
                .bind(&create.name)
                .bind(&create.job_type.0)
                .bind(create.priority)
                .bind(&create.payload)
                .bind(create.max_retries)
                .bind(create.scheduled_at)
                .bind(&create.created_by)
                .fetch_one(&mut *tx)
                .await
                .map_err(infra)?;
            jobs.push(row_to_job(row)?);
        }
        tx.commit().await.map_err(infra)?;
        Ok(jobs)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Job>> {
        let query = format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = $1");
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(infra)?;
        row.map(row_to_job).transpose()
    }

    async fn claim(&self, id: Uuid, worker_id: &str) -> Result<Option<Job>> {
        let query = format!(
            r#"
            WITH claimable AS (
                SELECT id FROM jobs
                WHERE id = $1 AND status IN ('pending', 'queued', 'retrying')
                FOR UPDATE SKIP LOCKED
            )
            UPDATE jobs
            SET status = 'running', started_at = NOW(), worker_id = $2, attempt = attempt + 1
            WHERE id IN (SELECT id FROM claimable)
            RETURNING {JOB_COLUMNS}
            "#
        );
        let row = sqlx::query(&query)
            .bind(id)
            .bind(worker_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(infra)?;
        row.map(row_to_job).transpose()
    }

    async fn find_ready_id(&self, now: DateTime<Utc>) -> Result<Option<Uuid>> {
        // A bare SELECT ... FOR UPDATE SKIP LOCKED, not a claim: the
        // implicit single-statement transaction releases the row lock the
        // moment this query returns. dispatch-core calls `claim` on the
        // returned id to perform the actual, durable claim.
        let row = sqlx::query(
            r#"
            SELECT id FROM jobs
            WHERE status IN ('pending', 'queued')
              AND (scheduled_at IS NULL OR scheduled_at <= $1)
            ORDER BY priority DESC, created_at ASC
            LIMIT 1
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(infra)?;
        Ok(row.map(|r| r.get("id")))
    }

    async fn complete(&self, id: Uuid, result: Value, duration_seconds: f64) -> Result<Job> {
        let query = format!(
            r#"
            UPDATE jobs
            SET status = 'completed', result = $2, duration_seconds = $3,
                completed_at = NOW(), error_message = NULL
            WHERE id = $1
            RETURNING {JOB_COLUMNS}
            "#
        );
        let row = sqlx::query(&query)
            .bind(id)
            .bind(result)
            .bind(duration_seconds)
            .fetch_optional(&self.pool)
            .await
            .map_err(infra)?
            .ok_or(DispatchError::NotFound(id))?;
        row_to_job(row)
    }

    async fn fail_permanently(
        &self,
        id: Uuid,
        error: &str,
        duration_seconds: Option<f64>,
    ) -> Result<Job> {
        let query = format!(
            r#"
            UPDATE jobs
            SET status = 'failed', error_message = $2, duration_seconds = $3,
                completed_at = NOW()
            WHERE id = $1
            RETURNING {JOB_COLUMNS}
            "#
        );
        let row = sqlx::query(&query)
            .bind(id)
            .bind(error)
            .bind(duration_seconds)
            .fetch_optional(&self.pool)
            .await
            .map_err(infra)?
            .ok_or(DispatchError::NotFound(id))?;
        row_to_job(row)
    }

    async fn schedule_retry(
        &self,
        id: Uuid,
        error: &str,
        next_retry_at: DateTime<Utc>,
    ) -> Result<Job> {
        let query = format!(
            r#"
            UPDATE jobs
            SET status = 'retrying', error_message = $2, next_retry_at = $3
            WHERE id = $1
            RETURNING {JOB_COLUMNS}
            "#
        );
        let row = sqlx::query(&query)
            .bind(id)
            .bind(error)
            .bind(next_retry_at)
            .fetch_optional(&self.pool)
            .await
            .map_err(infra)?
            .ok_or(DispatchError::NotFound(id))?;
        row_to_job(row)
    }

    async fn due_retries(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Job>> {
        let query = format!(
            r#"
            SELECT {JOB_COLUMNS} FROM jobs
            WHERE status = 'retrying' AND next_retry_at <= $1
            ORDER BY next_retry_at ASC
            LIMIT $2
            "#
        );
        let rows = sqlx::query(&query)
            .bind(now)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(infra)?;
        rows.into_iter().map(row_to_job).collect()
    }

    async fn promote_to_queued(&self, id: Uuid) -> Result<()> {
        sqlx::query(
            r#"
            WITH claimable AS (
                SELECT id FROM jobs WHERE id = $1 AND status = 'retrying'
                FOR UPDATE SKIP LOCKED
            )
            UPDATE jobs SET status = 'queued', next_retry_at = NULL
            WHERE id IN (SELECT id FROM claimable)
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(infra)?;
        Ok(())
    }

    async fn cancel(&self, id: Uuid) -> Result<Job> {
        let query = format!(
            r#"
            UPDATE jobs
            SET status = 'cancelled', completed_at = NOW()
            WHERE id = $1 AND status NOT IN ('completed', 'cancelled')
            RETURNING {JOB_COLUMNS}
            "#
        );
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(infra)?;

        match row {
            Some(row) => row_to_job(row),
            None => match self.get(id).await? {
                None => Err(DispatchError::NotFound(id)),
                Some(existing) => Err(DispatchError::Validation(format!(
                    "cannot cancel job in '{}' state",
                    existing.status
                ))),
            },
        }
    }

    async fn retry_reset(&self, id: Uuid) -> Result<Job> {
        let query = format!(
            r#"
            UPDATE jobs
            SET status = 'queued', attempt = 0, error_message = NULL, result = NULL,
                started_at = NULL, completed_at = NULL, duration_seconds = NULL,
                next_retry_at = NULL
            WHERE id = $1 AND status IN ('failed', 'cancelled')
            RETURNING {JOB_COLUMNS}
            "#
        );
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(infra)?;

        match row {
            Some(row) => row_to_job(row),
            None => match self.get(id).await? {
                None => Err(DispatchError::NotFound(id)),
                Some(_) => Err(DispatchError::Validation(
                    "can only retry failed or cancelled jobs".into(),
                )),
            },
        }
    }
}
