//! Maps a job type tag to an async handler function (spec.md §4.3).

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde_json::Value;

use crate::job::JobType;

/// A registered handler. Pure with respect to the core: receives the
/// payload document, may perform arbitrary I/O, and either returns a result
/// document or fails with any error. Timeouts and retries are enforced by
/// the executor, not the handler.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn call(&self, payload: Value) -> anyhow::Result<Value>;
}

/// Adapts any `Fn(Value) -> Future<Output = anyhow::Result<Value>>` into a
/// [`Handler`], so simple handlers don't need a named type.
pub struct FnHandler<F> {
    f: F,
}

impl<F, Fut> FnHandler<F>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = anyhow::Result<Value>> + Send,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> Handler for FnHandler<F>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = anyhow::Result<Value>> + Send,
{
    async fn call(&self, payload: Value) -> anyhow::Result<Value> {
        (self.f)(payload).await
    }
}

/// Mapping from job type to handler. A missing handler is a permanent
/// failure (spec.md §4.3): no retry is attempted.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<JobType, Arc<dyn Handler>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
        }
    }

    pub fn register(&self, job_type: impl Into<JobType>, handler: impl Handler + 'static) {
        self.handlers
            .write()
            .unwrap()
            .insert(job_type.into(), Arc::new(handler));
    }

    pub fn register_fn<F, Fut>(&self, job_type: impl Into<JobType>, f: F)
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        self.register(job_type, FnHandler::new(f));
    }

    pub fn get(&self, job_type: &JobType) -> Option<Arc<dyn Handler>> {
        self.handlers.read().unwrap().get(job_type).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn registers_and_dispatches() {
        let registry = HandlerRegistry::new();
        registry.register_fn("email", |payload: Value| async move {
            Ok(json!({ "to": payload["to"], "status": "sent" }))
        });

        let handler = registry.get(&JobType::new("email")).expect("registered");
        let result = handler.call(json!({ "to": "a@x.com" })).await.unwrap();
        assert_eq!(result["status"], "sent");
    }

    #[test]
    fn missing_handler_is_none() {
        let registry = HandlerRegistry::new();
        assert!(registry.get(&JobType::new("unknown")).is_none());
    }
}
