//! End-to-end scenarios from the dispatch core's testable properties:
//! happy path, transient failure with retries, timeout, cancel before
//! dispatch, unknown handler, and priority ordering — all run against the
//! in-memory store/queue so they need no live infrastructure.

use std::sync::Arc;
use std::time::Duration;

use dispatch_core::job::{JobCreate, JobStatus};
use dispatch_core::{Dispatcher, DispatcherBuilder, HandlerRegistry, JobSubmitter};
use dispatch_testing::{InMemoryJobStore, InMemoryPriorityQueue};
use serde_json::json;

fn wire() -> (Arc<InMemoryJobStore>, Arc<InMemoryPriorityQueue>, Arc<HandlerRegistry>) {
    (
        Arc::new(InMemoryJobStore::new()),
        Arc::new(InMemoryPriorityQueue::new()),
        Arc::new(HandlerRegistry::new()),
    )
}

async fn wait_for_terminal(store: &InMemoryJobStore, id: uuid::Uuid, timeout: Duration) -> dispatch_core::Job {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let job = store.get(id).await.unwrap().unwrap();
        if job.status.is_terminal() {
            return job;
        }
        if tokio::time::Instant::now() >= deadline {
            return job;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn happy_path_completes_with_result() {
    let (store, queue, registry) = wire();
    registry.register_fn("email", |payload: serde_json::Value| async move {
        Ok(json!({ "status": "sent", "to": payload["to"] }))
    });

    let submitter = JobSubmitter::new(store.clone(), queue.clone());
    let job = submitter
        .submit(
            JobCreate::new("send welcome", "email")
                .with_priority(5)
                .with_payload(json!({ "to": "a@x.com" })),
        )
        .await
        .unwrap();

    let dispatcher: Dispatcher = DispatcherBuilder::new(store.clone(), queue.clone())
        .with_registry(registry)
        .with_poll_interval(Duration::from_millis(20))
        .build();
    let handle = dispatcher.start();

    let finished = wait_for_terminal(&store, job.id, Duration::from_secs(2)).await;
    handle.shutdown().await;

    assert_eq!(finished.status, JobStatus::Completed);
    assert_eq!(finished.attempt, 1);
    assert_eq!(finished.result.unwrap()["status"], "sent");
    assert!(finished.duration_seconds.is_some());
    assert_eq!(*queue.stats().await.get("completed").unwrap(), 1);
}

#[tokio::test]
async fn transient_failure_retries_then_permanently_fails() {
    let (store, queue, registry) = wire();
    registry.register_fn("email", |_payload: serde_json::Value| async move {
        anyhow::bail!("SMTP connection refused (simulated)")
    });

    let submitter = JobSubmitter::new(store.clone(), queue.clone());
    let job = submitter
        .submit(JobCreate::new("flaky", "email").with_max_retries(2))
        .await
        .unwrap();

    let dispatcher = DispatcherBuilder::new(store.clone(), queue.clone())
        .with_registry(registry)
        .with_config(dispatch_core::DispatcherConfig {
            poll_interval: Duration::from_millis(20),
            retry_backoff_base: 1.05, // keep the test fast; still exponential
            retry_sweep_interval: Duration::from_millis(50),
            ..dispatch_core::DispatcherConfig::default()
        })
        .build();
    let handle = dispatcher.start();

    let finished = wait_for_terminal(&store, job.id, Duration::from_secs(5)).await;
    handle.shutdown().await;

    assert_eq!(finished.status, JobStatus::Failed);
    assert_eq!(finished.attempt, 3);
    assert!(finished
        .error_message
        .unwrap()
        .contains("SMTP connection refused"));
    assert_eq!(*queue.stats().await.get("retries").unwrap(), 2);
    assert_eq!(*queue.stats().await.get("failed").unwrap(), 1);
}

#[tokio::test]
async fn timeout_becomes_permanent_failure_with_no_retry_budget() {
    let (store, queue, registry) = wire();
    registry.register_fn("email", |_payload: serde_json::Value| async move {
        tokio::time::sleep(Duration::from_secs(10)).await;
        Ok(json!({}))
    });

    let submitter = JobSubmitter::new(store.clone(), queue.clone());
    let job = submitter
        .submit(JobCreate::new("slow", "email").with_max_retries(0))
        .await
        .unwrap();

    let dispatcher = DispatcherBuilder::new(store.clone(), queue.clone())
        .with_registry(registry)
        .with_poll_interval(Duration::from_millis(20))
        .with_job_timeout(Duration::from_millis(100))
        .build();
    let handle = dispatcher.start();

    let finished = wait_for_terminal(&store, job.id, Duration::from_secs(2)).await;
    handle.shutdown().await;

    assert_eq!(finished.status, JobStatus::Failed);
    assert!(finished.error_message.unwrap().contains("timed out"));
}

#[tokio::test]
async fn cancel_before_dispatch_prevents_execution() {
    let (store, queue, registry) = wire();
    let calls = Arc::new(tokio::sync::Mutex::new(0u32));
    let calls_clone = calls.clone();
    registry.register_fn("email", move |_payload: serde_json::Value| {
        let calls = calls_clone.clone();
        async move {
            *calls.lock().await += 1;
            Ok(json!({}))
        }
    });

    let submitter = JobSubmitter::new(store.clone(), queue.clone());
    let job = submitter.submit(JobCreate::new("cancel-me", "email")).await.unwrap();

    let cancelled = submitter.cancel(job.id).await.unwrap();
    assert_eq!(cancelled.status, JobStatus::Cancelled);

    let dispatcher = DispatcherBuilder::new(store.clone(), queue.clone())
        .with_registry(registry)
        .with_poll_interval(Duration::from_millis(20))
        .build();
    let handle = dispatcher.start();
    tokio::time::sleep(Duration::from_millis(200)).await;
    handle.shutdown().await;

    let final_job = store.get(job.id).await.unwrap().unwrap();
    assert_eq!(final_job.status, JobStatus::Cancelled);
    assert_eq!(*calls.lock().await, 0);
}

#[tokio::test]
async fn unknown_handler_fails_immediately_without_retry() {
    let (store, queue, registry) = wire();
    // No handler registered for "mystery".

    let submitter = JobSubmitter::new(store.clone(), queue.clone());
    let job = submitter
        .submit(JobCreate::new("unmapped", "mystery").with_max_retries(5))
        .await
        .unwrap();

    let dispatcher = DispatcherBuilder::new(store.clone(), queue.clone())
        .with_registry(registry)
        .with_poll_interval(Duration::from_millis(20))
        .build();
    let handle = dispatcher.start();

    let finished = wait_for_terminal(&store, job.id, Duration::from_secs(2)).await;
    handle.shutdown().await;

    assert_eq!(finished.status, JobStatus::Failed);
    assert_eq!(finished.attempt, 1);
    assert!(finished.error_message.unwrap().contains("No handler"));
}

#[tokio::test]
async fn submit_cancel_retry_round_trip_restores_queued() {
    let (store, queue, _registry) = wire();
    let submitter = JobSubmitter::new(store.clone(), queue.clone());

    let job = submitter.submit(JobCreate::new("roundtrip", "email")).await.unwrap();
    submitter.cancel(job.id).await.unwrap();
    let retried = submitter.retry(job.id).await.unwrap();

    assert_eq!(retried.status, JobStatus::Queued);
    assert_eq!(retried.attempt, 0);
}

#[tokio::test]
async fn dispatch_order_respects_priority_when_quiescent() {
    let (store, queue, registry) = wire();
    let order = Arc::new(tokio::sync::Mutex::new(Vec::<String>::new()));
    let order_clone = order.clone();
    registry.register_fn("track", move |payload: serde_json::Value| {
        let order = order_clone.clone();
        async move {
            order.lock().await.push(payload["label"].as_str().unwrap().to_string());
            Ok(json!({}))
        }
    });

    let submitter = JobSubmitter::new(store.clone(), queue.clone());
    // Both enqueued before the dispatcher starts, so it's quiescent at t=0.
    let low = submitter
        .submit(
            JobCreate::new("B", "track")
                .with_priority(5)
                .with_payload(json!({ "label": "B" })),
        )
        .await
        .unwrap();
    let high = submitter
        .submit(
            JobCreate::new("A", "track")
                .with_priority(10)
                .with_payload(json!({ "label": "A" })),
        )
        .await
        .unwrap();

    let dispatcher = DispatcherBuilder::new(store.clone(), queue.clone())
        .with_registry(registry)
        .with_max_workers(1)
        .with_poll_interval(Duration::from_millis(20))
        .build();
    let handle = dispatcher.start();

    wait_for_terminal(&store, low.id, Duration::from_secs(2)).await;
    wait_for_terminal(&store, high.id, Duration::from_secs(2)).await;
    handle.shutdown().await;

    let seen = order.lock().await.clone();
    assert_eq!(seen.first().map(String::as_str), Some("A"));
}
