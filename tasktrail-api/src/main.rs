//! # TaskTrail API Server
//!
//! Task and user management over HTTP. Every task mutation is handed to the
//! audit dispatcher, which publishes it to the `task_audit_logs` Redis stream
//! for the worker to persist.
//!
//! ## Usage
//!
//! ```bash
//! DATABASE_URL=postgresql://localhost/tasktrail \
//! REDIS_URL=redis://localhost:6379 \
//! JWT_SECRET=$(openssl rand -hex 32) \
//! cargo run -p tasktrail-api
//! ```

use std::sync::Arc;
use tasktrail_api::app::{build_router, AppState};
use tasktrail_api::config::Config;
use tasktrail_api::seeder;
use tasktrail_shared::audit::AuditDispatcher;
use tasktrail_shared::db::migrations::run_migrations;
use tasktrail_shared::db::pool::{close_pool, create_pool, DatabaseConfig};
use tasktrail_shared::redis::{AuditStreamConfig, RedisAuditQueue, RedisClient, RedisConfig};
use tasktrail_shared::repository::PgStore;
use tasktrail_shared::shutdown::ShutdownSignal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    tracing::info!(
        "TaskTrail API Server v{} starting...",
        env!("CARGO_PKG_VERSION")
    );

    let config = Config::from_env()?;
    let signal = ShutdownSignal::install()?;

    let pool = create_pool(DatabaseConfig {
        max_connections: config.database.max_connections,
        ..DatabaseConfig::with_url(&config.database.url)
    })
    .await?;
    run_migrations(&pool).await?;

    let redis = RedisClient::new(RedisConfig::new(&config.redis.url)).await?;
    let queue = Arc::new(RedisAuditQueue::new(&redis, AuditStreamConfig::default()));
    let (audit, audit_handle) = AuditDispatcher::spawn(queue, config.audit.dispatcher());

    let shutdown = CancellationToken::new();
    let grace = config.api.shutdown_grace;
    let bind_address = config.bind_address();
    let seed = config.seed.clone();

    let state = AppState::new(PgStore::new(pool.clone()), audit, config)
        .with_redis(redis)
        .with_shutdown(shutdown.clone());

    let seeders = if seed.enabled {
        Some(seeder::spawn(&state, &seed, shutdown.clone()).await?)
    } else {
        None
    };
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&bind_address).await?;
    tracing::info!(address = %bind_address, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(signal, shutdown))
        .await?;

    // Seeders write tasks, so they stop before the dispatcher drains
    if let Some(seeders) = seeders {
        let (tasks, users) = seeders.join().await?;
        tracing::info!(
            tasks_created = tasks.created,
            users_created = users.created,
            "Seeders stopped"
        );
    }

    let stats = audit_handle.shutdown(grace).await;
    tracing::info!(
        published = stats.published,
        failed = stats.failed,
        dropped = stats.dropped,
        "Audit dispatcher stopped"
    );

    close_pool(pool).await;
    tracing::info!("Server stopped");
    Ok(())
}

/// Resolves on SIGINT or SIGTERM and cancels `shutdown` so streaming avatar
/// transfers stop instead of holding the server open
async fn shutdown_signal(signal: ShutdownSignal, shutdown: CancellationToken) {
    let received = signal.recv().await;
    tracing::info!(signal = %received, "Shutdown signal received, draining connections...");
    shutdown.cancel();
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "tasktrail_api=debug,tasktrail_shared=info,tower_http=debug".into());

    let registry = tracing_subscriber::registry().with(filter);

    if std::env::var("LOG_FORMAT").as_deref() == Ok("json") {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}
