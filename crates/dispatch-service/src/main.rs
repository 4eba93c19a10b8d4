//! Binary entrypoint: loads configuration, wires the Postgres store and
//! either the Redis or null priority queue, registers the demo handlers,
//! and runs the dispatcher until Ctrl-C.

use std::sync::Arc;

use anyhow::{Context, Result};
use dispatch_core::{Config, DispatcherBuilder, HandlerRegistry, PriorityQueue};
use dispatch_postgres::PgJobStore;
use dispatch_redis::RedisPriorityQueue;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod handlers;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,dispatch_core=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env().context("loading configuration")?;
    tracing::info!(
        max_workers = config.max_workers,
        use_redis = config.use_redis,
        "starting dispatch-service"
    );

    let pool = PgPoolOptions::new()
        .max_connections(config.max_workers as u32 + 5)
        .connect(&config.database_url)
        .await
        .context("connecting to Postgres")?;
    let store = Arc::new(PgJobStore::new(pool));

    let queue: Arc<dyn PriorityQueue> = if config.use_redis {
        Arc::new(
            RedisPriorityQueue::connect(&config.redis_url)
                .await
                .context("connecting to Redis")?,
        )
    } else {
        Arc::new(dispatch_core::NullPriorityQueue)
    };

    let registry = Arc::new(HandlerRegistry::new());
    registry.register_fn("email", handlers::handle_email);
    registry.register_fn("ai_task", handlers::handle_ai_task);
    registry.register_fn("data_cleaning", handlers::handle_data_cleaning);

    let dispatcher = DispatcherBuilder::new(store, queue)
        .with_registry(registry)
        .with_config(config.dispatcher_config())
        .build();

    tracing::info!(manager_id = dispatcher.manager_id(), "dispatcher built");
    let handle = dispatcher.start();

    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    tracing::info!("shutdown signal received, draining in-flight jobs");
    handle.shutdown().await;
    tracing::info!("dispatch-service stopped");

    Ok(())
}
