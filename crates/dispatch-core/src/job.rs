//! The durable job record and the status lifecycle it moves through.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{DispatchError, Result};

/// Minimum and maximum accepted priority. Higher sorts earlier.
pub const MIN_PRIORITY: i32 = 0;
pub const MAX_PRIORITY: i32 = 20;

pub const MAX_MAX_RETRIES: i32 = 20;

/// Open registry key selecting a handler. Unlike the source system's closed
/// enum, any string a caller registers a handler for is a valid job type;
/// the "closed set" spec.md refers to is enforced at the registry, not the
/// type system (see REDESIGN FLAGS in SPEC_FULL.md).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobType(pub String);

impl JobType {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for JobType {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for JobType {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Lifecycle state. See spec invariant 1: this is the complete closed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Queued,
    Running,
    Completed,
    Failed,
    Retrying,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    pub fn is_claimable(self) -> bool {
        matches!(
            self,
            JobStatus::Pending | JobStatus::Queued | JobStatus::Retrying
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Retrying => "retrying",
            JobStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = DispatchError;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "pending" => JobStatus::Pending,
            "queued" => JobStatus::Queued,
            "running" => JobStatus::Running,
            "completed" => JobStatus::Completed,
            "failed" => JobStatus::Failed,
            "retrying" => JobStatus::Retrying,
            "cancelled" => JobStatus::Cancelled,
            other => {
                return Err(DispatchError::Other(anyhow::anyhow!(
                    "unknown job status {other:?}"
                )))
            }
        })
    }
}

/// The durable job record. Source of truth lives in the store; this is the
/// in-memory view callers and handlers see.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub name: String,
    pub job_type: JobType,
    pub status: JobStatus,
    pub priority: i32,
    pub payload: Value,
    pub result: Option<Value>,
    pub error_message: Option<String>,
    pub attempt: i32,
    pub max_retries: i32,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_seconds: Option<f64>,
    pub created_by: Option<String>,
    pub worker_id: Option<String>,
}

/// What a caller supplies to create a job; the store fills in the rest.
#[derive(Debug, Clone)]
pub struct JobCreate {
    pub name: String,
    pub job_type: JobType,
    pub priority: i32,
    pub payload: Value,
    pub max_retries: i32,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub created_by: Option<String>,
}

/// Default priority, matching the source's `JobPriority.NORMAL`.
pub const DEFAULT_PRIORITY: i32 = 5;
pub const DEFAULT_MAX_RETRIES: i32 = 5;

impl JobCreate {
    pub fn new(name: impl Into<String>, job_type: impl Into<JobType>) -> Self {
        Self {
            name: name.into(),
            job_type: job_type.into(),
            priority: DEFAULT_PRIORITY,
            payload: Value::Object(Default::default()),
            max_retries: DEFAULT_MAX_RETRIES,
            scheduled_at: None,
            created_by: None,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_max_retries(mut self, max_retries: i32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_scheduled_at(mut self, at: DateTime<Utc>) -> Self {
        self.scheduled_at = Some(at);
        self
    }

    pub fn with_created_by(mut self, who: impl Into<String>) -> Self {
        self.created_by = Some(who.into());
        self
    }

    /// Validation failure class from spec.md §7 (class 5): surfaced
    /// synchronously, the job is never created.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() || self.name.len() > 255 {
            return Err(DispatchError::Validation(
                "name must be 1-255 characters".into(),
            ));
        }
        if !(MIN_PRIORITY..=MAX_PRIORITY).contains(&self.priority) {
            return Err(DispatchError::Validation(format!(
                "priority must be between {MIN_PRIORITY} and {MAX_PRIORITY}, got {}",
                self.priority
            )));
        }
        if !(0..=MAX_MAX_RETRIES).contains(&self.max_retries) {
            return Err(DispatchError::Validation(format!(
                "max_retries must be between 0 and {MAX_MAX_RETRIES}, got {}",
                self.max_retries
            )));
        }
        Ok(())
    }
}
