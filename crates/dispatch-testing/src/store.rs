//! An in-memory [`JobStore`] with the same claim contract as the production
//! Postgres store, so dispatch-core's behavior can be tested without a
//! live database. A single `tokio::sync::Mutex` stands in for the row
//! lock — there is no cross-process concurrency to model here, only the
//! same state machine.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dispatch_core::error::{DispatchError, Result};
use dispatch_core::job::{Job, JobCreate, JobStatus};
use dispatch_core::store::JobStore;
use serde_json::Value;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Default)]
pub struct InMemoryJobStore {
    jobs: Mutex<HashMap<Uuid, Job>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn materialize(create: JobCreate) -> Job {
        Job {
            id: Uuid::new_v4(),
            name: create.name,
            job_type: create.job_type,
            status: JobStatus::Queued,
            priority: create.priority,
            payload: create.payload,
            result: None,
            error_message: None,
            attempt: 0,
            max_retries: create.max_retries,
            next_retry_at: None,
            created_at: Utc::now(),
            scheduled_at: create.scheduled_at,
            started_at: None,
            completed_at: None,
            duration_seconds: None,
            created_by: create.created_by,
            worker_id: None,
        }
    }

    /// Snapshot of every job, for assertions in tests.
    pub async fn all(&self) -> Vec<Job> {
        self.jobs.lock().await.values().cloned().collect()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn insert(&self, create: JobCreate) -> Result<Job> {
        let job = Self::materialize(create);
        self.jobs.lock().await.insert(job.id, job.clone());
        Ok(job)
    }

    async fn insert_bulk(&self, creates: Vec<JobCreate>) -> Result<Vec<Job>> {
        let mut guard = self.jobs.lock().await;
        let mut out = Vec::with_capacity(creates.len());
        for create in creates {
            let job = Self::materialize(create);
            guard.insert(job.id, job.clone());
            out.push(job);
        }
        Ok(out)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Job>> {
        Ok(self.jobs.lock().await.get(&id).cloned())
    }

    async fn claim(&self, id: Uuid, worker_id: &str) -> Result<Option<Job>> {
        let mut guard = self.jobs.lock().await;
        let Some(job) = guard.get_mut(&id) else {
            return Ok(None);
        };
        if !job.status.is_claimable() {
            return Ok(None);
        }
        job.status = JobStatus::Running;
        job.started_at = Some(Utc::now());
        job.worker_id = Some(worker_id.to_string());
        job.attempt += 1;
        Ok(Some(job.clone()))
    }

    async fn find_ready_id(&self, now: DateTime<Utc>) -> Result<Option<Uuid>> {
        let guard = self.jobs.lock().await;
        let candidate = guard
            .values()
            .filter(|j| {
                matches!(j.status, JobStatus::Pending | JobStatus::Queued)
                    && j.scheduled_at.map(|s| s <= now).unwrap_or(true)
            })
            .max_by(|a, b| {
                a.priority
                    .cmp(&b.priority)
                    .then_with(|| b.created_at.cmp(&a.created_at))
            });
        Ok(candidate.map(|j| j.id))
    }

    async fn complete(&self, id: Uuid, result: Value, duration_seconds: f64) -> Result<Job> {
        let mut guard = self.jobs.lock().await;
        let job = guard.get_mut(&id).ok_or(DispatchError::NotFound(id))?;
        job.status = JobStatus::Completed;
        job.result = Some(result);
        job.duration_seconds = Some(duration_seconds);
        job.completed_at = Some(Utc::now());
        job.error_message = None;
        Ok(job.clone())
    }

    async fn fail_permanently(
        &self,
        id: Uuid,
        error: &str,
        duration_seconds: Option<f64>,
    ) -> Result<Job> {
        let mut guard = self.jobs.lock().await;
        let job = guard.get_mut(&id).ok_or(DispatchError::NotFound(id))?;
        job.status = JobStatus::Failed;
        job.error_message = Some(error.to_string());
        job.completed_at = Some(Utc::now());
        job.duration_seconds = duration_seconds;
        Ok(job.clone())
    }

    async fn schedule_retry(
        &self,
        id: Uuid,
        error: &str,
        next_retry_at: DateTime<Utc>,
    ) -> Result<Job> {
        let mut guard = self.jobs.lock().await;
        let job = guard.get_mut(&id).ok_or(DispatchError::NotFound(id))?;
        job.status = JobStatus::Retrying;
        job.error_message = Some(error.to_string());
        job.next_retry_at = Some(next_retry_at);
        Ok(job.clone())
    }

    async fn due_retries(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Job>> {
        let guard = self.jobs.lock().await;
        let mut due: Vec<Job> = guard
            .values()
            .filter(|j| {
                j.status == JobStatus::Retrying
                    && j.next_retry_at.map(|t| t <= now).unwrap_or(false)
            })
            .cloned()
            .collect();
        due.sort_by_key(|j| j.next_retry_at);
        due.truncate(limit.max(0) as usize);
        Ok(due)
    }

    async fn promote_to_queued(&self, id: Uuid) -> Result<()> {
        let mut guard = self.jobs.lock().await;
        if let Some(job) = guard.get_mut(&id) {
            if job.status == JobStatus::Retrying {
                job.status = JobStatus::Queued;
                job.next_retry_at = None;
            }
        }
        Ok(())
    }

    async fn cancel(&self, id: Uuid) -> Result<Job> {
        let mut guard = self.jobs.lock().await;
        let job = guard.get_mut(&id).ok_or(DispatchError::NotFound(id))?;
        if matches!(job.status, JobStatus::Completed | JobStatus::Cancelled) {
            return Err(DispatchError::Validation(format!(
                "cannot cancel job in '{}' state",
                job.status
            )));
        }
        job.status = JobStatus::Cancelled;
        job.completed_at = Some(Utc::now());
        Ok(job.clone())
    }

    async fn retry_reset(&self, id: Uuid) -> Result<Job> {
        let mut guard = self.jobs.lock().await;
        let job = guard.get_mut(&id).ok_or(DispatchError::NotFound(id))?;
        if !matches!(job.status, JobStatus::Failed | JobStatus::Cancelled) {
            return Err(DispatchError::Validation(
                "can only retry failed or cancelled jobs".into(),
            ));
        }
        job.status = JobStatus::Queued;
        job.attempt = 0;
        job.error_message = None;
        job.result = None;
        job.started_at = None;
        job.completed_at = None;
        job.duration_seconds = None;
        job.next_retry_at = None;
        Ok(job.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn claim_is_exclusive() {
        let store = InMemoryJobStore::new();
        let job = store
            .insert(JobCreate::new("x", "email"))
            .await
            .unwrap();

        let a = store.claim(job.id, "w-a").await.unwrap();
        assert!(a.is_some());
        // Second claim must see RUNNING and refuse.
        let b = store.claim(job.id, "w-b").await.unwrap();
        assert!(b.is_none());
    }

    #[tokio::test]
    async fn find_ready_id_prefers_higher_priority() {
        let store = InMemoryJobStore::new();
        let low = store
            .insert(JobCreate::new("low", "email").with_priority(5))
            .await
            .unwrap();
        let high = store
            .insert(JobCreate::new("high", "email").with_priority(10))
            .await
            .unwrap();

        let ready = store.find_ready_id(Utc::now()).await.unwrap();
        assert_eq!(ready, Some(high.id));
        let _ = low;
    }

    #[tokio::test]
    async fn retry_reset_restores_queued_and_zeroes_attempt() {
        let store = InMemoryJobStore::new();
        let job = store.insert(JobCreate::new("x", "email")).await.unwrap();
        store.claim(job.id, "w-a").await.unwrap();
        store
            .fail_permanently(job.id, "boom", Some(1.0))
            .await
            .unwrap();

        let reset = store.retry_reset(job.id).await.unwrap();
        assert_eq!(reset.status, JobStatus::Queued);
        assert_eq!(reset.attempt, 0);
        assert!(reset.error_message.is_none());
    }

    #[tokio::test]
    async fn cancel_rejects_completed() {
        let store = InMemoryJobStore::new();
        let job = store.insert(JobCreate::new("x", "email")).await.unwrap();
        store.claim(job.id, "w-a").await.unwrap();
        store.complete(job.id, Value::Null, 0.1).await.unwrap();

        let result = store.cancel(job.id).await;
        assert!(matches!(result, Err(DispatchError::Validation(_))));
    }
}
