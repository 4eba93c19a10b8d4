//! Executes exactly one job end-to-end (spec.md §4.4).
//!
//! The executor is the sole mutator of a job during its RUNNING phase: it
//! claims, invokes the handler under a hard timeout, and writes the
//! terminal or retry outcome. It never panics on handler failure — every
//! error the handler raises, or a timeout, is captured as a string on
//! `error_message`.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

use crate::error::Result;
use crate::queue::PriorityQueue;
use crate::registry::HandlerRegistry;
use crate::store::JobStore;

/// Executes a single claimed job for one dispatcher worker slot.
pub struct Executor {
    store: Arc<dyn JobStore>,
    queue: Arc<dyn PriorityQueue>,
    registry: Arc<HandlerRegistry>,
    worker_id: String,
    job_timeout: Duration,
    retry_backoff_base: f64,
}

impl Executor {
    pub fn new(
        store: Arc<dyn JobStore>,
        queue: Arc<dyn PriorityQueue>,
        registry: Arc<HandlerRegistry>,
        worker_id: String,
        job_timeout: Duration,
        retry_backoff_base: f64,
    ) -> Self {
        Self {
            store,
            queue,
            registry,
            worker_id,
            job_timeout,
            retry_backoff_base,
        }
    }

    /// Runs the job to a terminal-for-this-attempt outcome. Returns `true`
    /// only on COMPLETED; `false` for every other outcome including a lost
    /// claim, matching the source's `execute() -> bool`.
    pub async fn execute(&self, job_id: Uuid) -> Result<bool> {
        let claimed = match self.store.claim(job_id, &self.worker_id).await? {
            Some(job) => job,
            None => return Ok(false),
        };

        tracing::info!(
            job_id = %claimed.id,
            worker_id = %self.worker_id,
            attempt = claimed.attempt,
            max_retries = claimed.max_retries,
            "claimed job"
        );

        let handler = match self.registry.get(&claimed.job_type) {
            Some(h) => h,
            None => {
                let duration = self.duration_since(claimed.started_at);
                let error = format!("No handler for type: {}", claimed.job_type);
                self.fail_permanently(job_id, &error, duration).await?;
                return Ok(false);
            }
        };

        let outcome = tokio::time::timeout(self.job_timeout, handler.call(claimed.payload.clone())).await;

        match outcome {
            Ok(Ok(result)) => {
                let duration = self.duration_since(claimed.started_at).unwrap_or(0.0);
                let completed = self.store.complete(job_id, result, duration).await?;
                tracing::info!(
                    job_id = %job_id,
                    worker_id = %self.worker_id,
                    duration_seconds = duration,
                    "job completed"
                );
                self.queue.mark_done(job_id).await?;
                self.queue.increment_stat("completed", 1).await?;
                self.queue
                    .publish_event(
                        "job_completed",
                        json!({ "job_id": job_id.to_string(), "duration": duration }),
                    )
                    .await?;
                let _ = completed;
                Ok(true)
            }
            Ok(Err(e)) => {
                self.handle_failure(job_id, claimed.attempt, claimed.max_retries, claimed.started_at, e.to_string())
                    .await?;
                Ok(false)
            }
            Err(_elapsed) => {
                let error = format!("Job timed out after {}s", self.job_timeout.as_secs());
                self.handle_failure(job_id, claimed.attempt, claimed.max_retries, claimed.started_at, error)
                    .await?;
                Ok(false)
            }
        }
    }

    fn duration_since(&self, started_at: Option<chrono::DateTime<Utc>>) -> Option<f64> {
        started_at.map(|t| (Utc::now() - t).num_milliseconds() as f64 / 1000.0)
    }

    /// Decide whether to retry or permanently fail (spec.md §4.4 "Retry
    /// policy"). `attempt` is already incremented at claim time, so the
    /// backoff sequence for attempts 1,2,3,... is base^1, base^2, base^3...
    async fn handle_failure(
        &self,
        job_id: Uuid,
        attempt: i32,
        max_retries: i32,
        started_at: Option<chrono::DateTime<Utc>>,
        error: String,
    ) -> Result<()> {
        if attempt <= max_retries {
            let backoff_secs = self.retry_backoff_base.powi(attempt);
            let next_retry_at = Utc::now() + chrono::Duration::milliseconds((backoff_secs * 1000.0) as i64);
            let message = format!("Attempt {attempt} failed: {error}");

            self.store
                .schedule_retry(job_id, &message, next_retry_at)
                .await?;

            tracing::warn!(
                job_id = %job_id,
                worker_id = %self.worker_id,
                attempt,
                backoff_secs,
                error = %error,
                "job failed, retrying"
            );

            self.queue.mark_done(job_id).await?;
            self.queue.increment_stat("retries", 1).await?;
            Ok(())
        } else {
            let duration = self.duration_since(started_at);
            self.fail_permanently(job_id, &error, duration).await
        }
    }

    async fn fail_permanently(&self, job_id: Uuid, error: &str, duration: Option<f64>) -> Result<()> {
        self.store.fail_permanently(job_id, error, duration).await?;

        tracing::error!(job_id = %job_id, worker_id = %self.worker_id, error, "job permanently failed");

        self.queue.mark_done(job_id).await?;
        self.queue.increment_stat("failed", 1).await?;
        self.queue
            .publish_event(
                "job_failed",
                json!({ "job_id": job_id.to_string(), "error": error }),
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{JobCreate, JobStatus};
    use crate::queue::NullPriorityQueue;
    use std::sync::atomic::{AtomicUsize, Ordering};

    // Minimal in-process store sufficient to exercise the executor without
    // pulling in dispatch-testing (kept deliberately tiny; the full
    // in-memory store used by integration-style tests lives in
    // dispatch-testing).
    struct OneShotStore {
        job: tokio::sync::Mutex<Option<crate::job::Job>>,
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl JobStore for OneShotStore {
        async fn insert(&self, _create: JobCreate) -> Result<crate::job::Job> {
            unimplemented!()
        }
        async fn insert_bulk(&self, _creates: Vec<JobCreate>) -> Result<Vec<crate::job::Job>> {
            unimplemented!()
        }
        async fn get(&self, _id: Uuid) -> Result<Option<crate::job::Job>> {
            unimplemented!()
        }
        async fn claim(&self, _id: Uuid, worker_id: &str) -> Result<Option<crate::job::Job>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut guard = self.job.lock().await;
            if let Some(job) = guard.as_mut() {
                job.status = JobStatus::Running;
                job.started_at = Some(Utc::now());
                job.worker_id = Some(worker_id.to_string());
                job.attempt += 1;
                Ok(Some(job.clone()))
            } else {
                Ok(None)
            }
        }
        async fn find_ready_id(&self, _now: chrono::DateTime<Utc>) -> Result<Option<Uuid>> {
            unimplemented!()
        }
        async fn complete(&self, id: Uuid, result: serde_json::Value, duration_seconds: f64) -> Result<crate::job::Job> {
            let mut guard = self.job.lock().await;
            let job = guard.as_mut().unwrap();
            job.status = JobStatus::Completed;
            job.result = Some(result);
            job.duration_seconds = Some(duration_seconds);
            job.completed_at = Some(Utc::now());
            let _ = id;
            Ok(job.clone())
        }
        async fn fail_permanently(&self, _id: Uuid, error: &str, _duration: Option<f64>) -> Result<crate::job::Job> {
            let mut guard = self.job.lock().await;
            let job = guard.as_mut().unwrap();
            job.status = JobStatus::Failed;
            job.error_message = Some(error.to_string());
            job.completed_at = Some(Utc::now());
            Ok(job.clone())
        }
        async fn schedule_retry(&self, _id: Uuid, error: &str, next_retry_at: chrono::DateTime<Utc>) -> Result<crate::job::Job> {
            let mut guard = self.job.lock().await;
            let job = guard.as_mut().unwrap();
            job.status = JobStatus::Retrying;
            job.error_message = Some(error.to_string());
            job.next_retry_at = Some(next_retry_at);
            Ok(job.clone())
        }
        async fn due_retries(&self, _now: chrono::DateTime<Utc>, _limit: i64) -> Result<Vec<crate::job::Job>> {
            unimplemented!()
        }
        async fn promote_to_queued(&self, _id: Uuid) -> Result<()> {
            unimplemented!()
        }
        async fn cancel(&self, _id: Uuid) -> Result<crate::job::Job> {
            unimplemented!()
        }
        async fn retry_reset(&self, _id: Uuid) -> Result<crate::job::Job> {
            unimplemented!()
        }
    }

    fn job_fixture(max_retries: i32) -> crate::job::Job {
        crate::job::Job {
            id: Uuid::new_v4(),
            name: "test".into(),
            job_type: crate::job::JobType::new("email"),
            status: JobStatus::Queued,
            priority: 5,
            payload: json!({ "to": "a@x.com" }),
            result: None,
            error_message: None,
            attempt: 0,
            max_retries,
            next_retry_at: None,
            created_at: Utc::now(),
            scheduled_at: None,
            started_at: None,
            completed_at: None,
            duration_seconds: None,
            created_by: None,
            worker_id: None,
        }
    }

    #[tokio::test]
    async fn happy_path_completes() {
        let store = Arc::new(OneShotStore {
            job: tokio::sync::Mutex::new(Some(job_fixture(2))),
            calls: AtomicUsize::new(0),
        });
        let queue = Arc::new(NullPriorityQueue);
        let registry = Arc::new(HandlerRegistry::new());
        registry.register_fn("email", |payload: serde_json::Value| async move {
            Ok(json!({ "status": "sent", "to": payload["to"] }))
        });

        let job_id = store.job.lock().await.as_ref().unwrap().id;
        let executor = Executor::new(
            store.clone(),
            queue,
            registry,
            "w-1".into(),
            Duration::from_secs(5),
            2.0,
        );

        let ok = executor.execute(job_id).await.unwrap();
        assert!(ok);

        let job = store.job.lock().await.clone().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.attempt, 1);
        assert_eq!(job.result.unwrap()["status"], "sent");
    }

    #[tokio::test]
    async fn missing_handler_fails_permanently_without_retry() {
        let store = Arc::new(OneShotStore {
            job: tokio::sync::Mutex::new(Some(job_fixture(5))),
            calls: AtomicUsize::new(0),
        });
        let queue = Arc::new(NullPriorityQueue);
        let registry = Arc::new(HandlerRegistry::new());

        let job_id = store.job.lock().await.as_ref().unwrap().id;
        let executor = Executor::new(store.clone(), queue, registry, "w-1".into(), Duration::from_secs(5), 2.0);

        let ok = executor.execute(job_id).await.unwrap();
        assert!(!ok);

        let job = store.job.lock().await.clone().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.error_message.unwrap().contains("No handler"));
    }

    #[tokio::test]
    async fn transient_failure_schedules_retry_when_budget_remains() {
        let store = Arc::new(OneShotStore {
            job: tokio::sync::Mutex::new(Some(job_fixture(2))),
            calls: AtomicUsize::new(0),
        });
        let queue = Arc::new(NullPriorityQueue);
        let registry = Arc::new(HandlerRegistry::new());
        registry.register_fn("email", |_payload: serde_json::Value| async move {
            anyhow::bail!("SMTP connection refused")
        });

        let job_id = store.job.lock().await.as_ref().unwrap().id;
        let executor = Executor::new(store.clone(), queue, registry, "w-1".into(), Duration::from_secs(5), 2.0);

        let ok = executor.execute(job_id).await.unwrap();
        assert!(!ok);

        let job = store.job.lock().await.clone().unwrap();
        assert_eq!(job.status, JobStatus::Retrying);
        assert!(job.error_message.unwrap().contains("Attempt 1 failed"));
        assert!(job.next_retry_at.is_some());
    }

    #[tokio::test]
    async fn timeout_is_a_recoverable_failure() {
        let store = Arc::new(OneShotStore {
            job: tokio::sync::Mutex::new(Some(job_fixture(0))),
            calls: AtomicUsize::new(0),
        });
        let queue = Arc::new(NullPriorityQueue);
        let registry = Arc::new(HandlerRegistry::new());
        registry.register_fn("email", |_payload: serde_json::Value| async move {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(json!({}))
        });

        let job_id = store.job.lock().await.as_ref().unwrap().id;
        let executor = Executor::new(
            store.clone(),
            queue,
            registry,
            "w-1".into(),
            Duration::from_millis(50),
            2.0,
        );

        let ok = executor.execute(job_id).await.unwrap();
        assert!(!ok);

        let job = store.job.lock().await.clone().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.error_message.unwrap().contains("timed out"));
    }
}
