//! The core API surface a future HTTP collaborator calls into
//! (spec.md §6 "Core API to the HTTP collaborator").

use std::sync::Arc;

use uuid::Uuid;

use crate::error::Result;
use crate::job::{Job, JobCreate, JobStatus};
use crate::queue::PriorityQueue;
use crate::store::JobStore;

/// Pairs a [`JobStore`] with a [`PriorityQueue`] behind the four operations
/// an API layer needs: submit, submit_bulk, cancel, retry.
#[derive(Clone)]
pub struct JobSubmitter {
    store: Arc<dyn JobStore>,
    queue: Arc<dyn PriorityQueue>,
}

impl JobSubmitter {
    pub fn new(store: Arc<dyn JobStore>, queue: Arc<dyn PriorityQueue>) -> Self {
        Self { store, queue }
    }

    /// Insert QUEUED, enqueue, increment `enqueued`.
    pub async fn submit(&self, create: JobCreate) -> Result<Job> {
        create.validate()?;
        let job = self.store.insert(create).await?;
        self.queue.enqueue(job.id, job.priority).await?;
        self.queue.increment_stat("enqueued", 1).await?;
        Ok(job)
    }

    /// Single transaction; single `enqueued` increment by count.
    pub async fn submit_bulk(&self, creates: Vec<JobCreate>) -> Result<Vec<Job>> {
        for create in &creates {
            create.validate()?;
        }
        let jobs = self.store.insert_bulk(creates).await?;
        for job in &jobs {
            self.queue.enqueue(job.id, job.priority).await?;
        }
        self.queue.increment_stat("enqueued", jobs.len() as i64).await?;
        Ok(jobs)
    }

    /// Reject if status ∈ {COMPLETED, CANCELLED}; set CANCELLED; remove
    /// from queue. A RUNNING job is not interrupted — see spec.md §9 Open
    /// Question on cancellation races.
    pub async fn cancel(&self, id: Uuid) -> Result<Job> {
        let job = self.store.cancel(id).await?;
        self.queue.remove(id).await?;
        Ok(job)
    }

    /// Reject if status ∉ {FAILED, CANCELLED}; reset attempt=0, clear
    /// error/result/timings; enqueue.
    pub async fn retry(&self, id: Uuid) -> Result<Job> {
        let job = self.store.retry_reset(id).await?;
        debug_assert_eq!(job.status, JobStatus::Queued);
        self.queue.enqueue(job.id, job.priority).await?;
        Ok(job)
    }
}
