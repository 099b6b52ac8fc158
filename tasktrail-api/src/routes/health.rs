/// Health check endpoint
///
/// ```text
/// GET /health
/// ```
///
/// ```json
/// {
///   "status": "healthy",
///   "version": "0.1.0",
///   "database": "connected",
///   "queue": "connected",
///   "audit": { "enqueued": 12, "published": 12, "failed": 0, "dropped": 0 }
/// }
/// ```
///
/// Always answers 200; `status` is `degraded` when the database or the
/// queue is unreachable. `queue` is `not_configured` when the server runs
/// without a Redis client.

use crate::app::AppState;
use axum::{extract::State, Json};
use serde::Serialize;
use tasktrail_shared::audit::DispatchStats;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub database: &'static str,
    pub queue: &'static str,
    pub audit: DispatchStats,
}

pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let database = match state.store.ping().await {
        Ok(()) => "connected",
        Err(e) => {
            tracing::warn!(error = %e, "Database health check failed");
            "disconnected"
        }
    };

    let queue = match &state.redis {
        None => "not_configured",
        Some(redis) => match redis.ping().await {
            Ok(true) => "connected",
            Ok(false) => "disconnected",
            Err(e) => {
                tracing::warn!(error = %e, "Redis health check failed");
                "disconnected"
            }
        },
    };

    let healthy = database == "connected" && queue != "disconnected";

    Json(HealthResponse {
        status: if healthy { "healthy" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION"),
        database,
        queue,
        audit: state.audit.stats(),
    })
}
