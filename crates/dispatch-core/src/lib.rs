//! # dispatch-core
//!
//! The dispatch and execution core of an asynchronous job engine: a
//! durable, priority-ordered dispatcher that accepts typed work items,
//! persists their lifecycle in a relational store, coordinates
//! distribution through an in-memory priority queue, and executes them
//! concurrently under a bounded worker pool with exponential-backoff
//! retries and timeout enforcement.
//!
//! ## Architecture
//!
//! ```text
//! submit() ──► JobStore (insert) + PriorityQueue (enqueue)
//!                                        │
//!                                        ▼ dequeue()
//!                                  Dispatcher pull loop
//!                                        │ (store fallback on empty queue)
//!                                        ▼ spawn, bounded by Semaphore(MAX_WORKERS)
//!                                    Executor
//!                                        │ claim (SKIP LOCKED) → handler(payload) w/ timeout
//!                        ┌───────────────┼────────────────────┐
//!                        ▼               ▼                    ▼
//!                  COMPLETED          RETRYING              FAILED
//!                                        │
//!                                        ▼ (RetryScheduler sweep, next_retry_at <= now)
//!                                  re-enqueue
//! ```
//!
//! ## What This Crate Is Not
//!
//! - An HTTP API, an auth layer, or a dashboard. Those are collaborators
//!   that call [`submit::JobSubmitter`] and read the `JobStore` directly.
//! - A distributed consensus system: multiple dispatcher processes
//!   coordinate only through optimistic locking at claim time.
//! - An exactly-once execution engine. The contract is at-least-once.
//!
//! See `SPEC_FULL.md` at the workspace root for the full specification
//! this crate implements.

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod executor;
pub mod job;
pub mod queue;
pub mod registry;
pub mod retry;
pub mod store;
pub mod submit;

pub use config::Config;
pub use dispatcher::{Dispatcher, DispatcherBuilder, DispatcherConfig, DispatcherHandle};
pub use error::{DispatchError, Result};
pub use executor::Executor;
pub use job::{Job, JobCreate, JobStatus, JobType};
pub use queue::{NullPriorityQueue, PriorityQueue};
pub use registry::{FnHandler, Handler, HandlerRegistry};
pub use retry::RetryScheduler;
pub use store::JobStore;
pub use submit::JobSubmitter;

pub use async_trait::async_trait;
