//! # TaskTrail Worker
//!
//! Consumes the `task_audit_logs` stream into the `task_audits` table and
//! sweeps expired refresh tokens.
//!
//! ## Usage
//!
//! ```bash
//! TASKTRAIL_WORKER_DATABASE_URL=postgresql://localhost/tasktrail \
//! TASKTRAIL_WORKER_REDIS_URL=redis://localhost:6379 \
//! cargo run -p tasktrail-worker
//! ```

use std::sync::Arc;
use tasktrail_shared::db::pool::{close_pool, create_pool, DatabaseConfig};
use tasktrail_shared::redis::{AuditStreamConfig, RedisAuditQueue, RedisClient, RedisConfig};
use tasktrail_shared::repository::PgStore;
use tasktrail_shared::shutdown::ShutdownSignal;
use tasktrail_worker::config::WorkerConfig;
use tasktrail_worker::consumer::AuditConsumer;
use tasktrail_worker::maintenance::run_token_sweeper;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    tracing::info!("TaskTrail Worker v{} starting...", env!("CARGO_PKG_VERSION"));

    let config = WorkerConfig::load()?;
    let signal = ShutdownSignal::install()?;

    let pool = create_pool(DatabaseConfig::with_url(&config.database_url)).await?;
    let store = Arc::new(PgStore::new(pool.clone()));

    let redis = RedisClient::new(RedisConfig::new(&config.redis_url)).await?;
    let queue = Arc::new(RedisAuditQueue::new(
        &redis,
        AuditStreamConfig::default()
            .with_consumer(&config.consumer_name)
            .with_claim_idle(config.claim_idle()),
    ));

    let shutdown = CancellationToken::new();

    let mut consumer = AuditConsumer::new(queue, store.clone(), config.consumer());
    let mut consumer_task = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move { consumer.run(shutdown).await })
    };
    let sweeper_task = tokio::spawn(run_token_sweeper(
        store,
        config.token_sweep_interval(),
        shutdown.clone(),
    ));

    tracing::info!(consumer = %config.consumer_name, "Worker ready");

    let finished_early = tokio::select! {
        received = signal.recv() => {
            tracing::info!(signal = %received, "Shutdown signal received, finishing in-flight message...");
            None
        }
        result = &mut consumer_task => Some(result),
    };
    shutdown.cancel();

    let consumer_result = match finished_early {
        Some(result) => result,
        None => consumer_task.await,
    };

    if let Err(e) = sweeper_task.await {
        tracing::warn!(error = %e, "Token sweeper task failed");
    }
    close_pool(pool).await;

    consumer_result?;
    tracing::info!("Worker stopped");
    Ok(())
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "tasktrail_worker=debug,tasktrail_shared=info".into());

    let json = std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json"));
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}
