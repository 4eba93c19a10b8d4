//! Bounded worker pool and main pull loop (spec.md §4.6).

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use uuid::Uuid;

use crate::error::Result;
use crate::executor::Executor;
use crate::queue::PriorityQueue;
use crate::registry::HandlerRegistry;
use crate::retry::RetryScheduler;
use crate::store::JobStore;

pub const DEFAULT_MAX_WORKERS: usize = 10;
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1000);
pub const DEFAULT_JOB_TIMEOUT: Duration = Duration::from_secs(300);
pub const DEFAULT_RETRY_BACKOFF_BASE: f64 = 2.0;

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub max_workers: usize,
    pub poll_interval: Duration,
    pub job_timeout: Duration,
    pub retry_backoff_base: f64,
    pub retry_sweep_interval: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_workers: DEFAULT_MAX_WORKERS,
            poll_interval: DEFAULT_POLL_INTERVAL,
            job_timeout: DEFAULT_JOB_TIMEOUT,
            retry_backoff_base: DEFAULT_RETRY_BACKOFF_BASE,
            retry_sweep_interval: crate::retry::DEFAULT_SWEEP_INTERVAL,
        }
    }
}

pub struct DispatcherBuilder {
    store: Arc<dyn JobStore>,
    queue: Arc<dyn PriorityQueue>,
    registry: Arc<HandlerRegistry>,
    config: DispatcherConfig,
}

impl DispatcherBuilder {
    pub fn new(store: Arc<dyn JobStore>, queue: Arc<dyn PriorityQueue>) -> Self {
        Self {
            store,
            queue,
            registry: Arc::new(HandlerRegistry::new()),
            config: DispatcherConfig::default(),
        }
    }

    pub fn with_registry(mut self, registry: Arc<HandlerRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_max_workers(mut self, n: usize) -> Self {
        self.config.max_workers = n;
        self
    }

    pub fn with_poll_interval(mut self, d: Duration) -> Self {
        self.config.poll_interval = d;
        self
    }

    pub fn with_job_timeout(mut self, d: Duration) -> Self {
        self.config.job_timeout = d;
        self
    }

    pub fn with_retry_backoff_base(mut self, base: f64) -> Self {
        self.config.retry_backoff_base = base;
        self
    }

    pub fn with_config(mut self, config: DispatcherConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Dispatcher {
        Dispatcher {
            store: self.store,
            queue: self.queue,
            registry: self.registry,
            config: self.config,
            manager_id: format!("mgr-{}", Uuid::new_v4().simple()),
        }
    }
}

/// Owns the worker pool lifecycle. Not a global singleton (DESIGN NOTES
/// item 2 in SPEC_FULL.md): callers build one explicitly and call
/// [`Dispatcher::start`], which returns a [`DispatcherHandle`] owning
/// `shutdown()`.
pub struct Dispatcher {
    store: Arc<dyn JobStore>,
    queue: Arc<dyn PriorityQueue>,
    registry: Arc<HandlerRegistry>,
    config: DispatcherConfig,
    manager_id: String,
}

pub struct DispatcherHandle {
    shutdown_tx: watch::Sender<bool>,
    pull_task: tokio::task::JoinHandle<()>,
    retry_task: tokio::task::JoinHandle<()>,
}

impl DispatcherHandle {
    /// Flip the running flag, cancel the pull/retry tasks at their next
    /// safe suspension point, and wait for all active executor tasks to
    /// finish. In-flight handlers run to completion; nothing is forced to
    /// terminate (spec.md §4.6 "Shutdown").
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        let _ = self.pull_task.await;
        let _ = self.retry_task.await;
    }
}

impl Dispatcher {
    pub fn manager_id(&self) -> &str {
        &self.manager_id
    }

    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }

    /// Spawns the pull loop and retry-sweep loop and returns immediately.
    pub fn start(self) -> DispatcherHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let store = self.store;
        let queue = self.queue;
        let registry = self.registry;
        let config = self.config;
        let manager_id = self.manager_id;

        let retry_scheduler = RetryScheduler::new(store.clone(), queue.clone(), config.max_workers as i64)
            .with_interval(config.retry_sweep_interval);
        let retry_shutdown = shutdown_rx.clone();
        let retry_task = tokio::spawn(async move {
            retry_scheduler.run(retry_shutdown).await;
        });

        let pull_task = tokio::spawn(Self::pull_loop(
            store,
            queue,
            registry,
            config,
            manager_id,
            shutdown_rx,
        ));

        DispatcherHandle {
            shutdown_tx,
            pull_task,
            retry_task,
        }
    }

    async fn pull_loop(
        store: Arc<dyn JobStore>,
        queue: Arc<dyn PriorityQueue>,
        registry: Arc<HandlerRegistry>,
        config: DispatcherConfig,
        manager_id: String,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let semaphore = Arc::new(Semaphore::new(config.max_workers));
        let mut active: JoinSet<()> = JoinSet::new();

        loop {
            if *shutdown.borrow() {
                break;
            }

            // Opportunistically reap finished executor tasks so the set
            // doesn't grow unbounded; this never blocks.
            while active.try_join_next().is_some() {}

            match Self::dequeue_next(&store, &queue).await {
                Ok(Some(job_id)) => {
                    let permit = match semaphore.clone().acquire_owned().await {
                        Ok(p) => p,
                        Err(_) => break,
                    };

                    let worker_id = format!("{manager_id}:w-{}", Uuid::new_v4().simple());
                    let executor = Executor::new(
                        store.clone(),
                        queue.clone(),
                        registry.clone(),
                        worker_id,
                        config.job_timeout,
                        config.retry_backoff_base,
                    );

                    active.spawn(async move {
                        if let Err(e) = executor.execute(job_id).await {
                            tracing::error!(job_id = %job_id, error = %e, "unhandled executor error");
                        }
                        drop(permit);
                    });
                }
                Ok(None) => {
                    tokio::select! {
                        _ = tokio::time::sleep(config.poll_interval) => {}
                        _ = shutdown.changed() => {}
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "poll loop error");
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
            }
        }

        // Wait for in-flight executors to finish; no forced termination.
        while active.join_next().await.is_some() {}
    }

    /// Attempt `queue.dequeue()` first (spec.md §4.6 step 1); fall back to
    /// a store scan (step 2).
    async fn dequeue_next(store: &Arc<dyn JobStore>, queue: &Arc<dyn PriorityQueue>) -> Result<Option<Uuid>> {
        if let Some(id) = queue.dequeue().await? {
            return Ok(Some(id));
        }
        store.find_ready_id(Utc::now()).await
    }
}
