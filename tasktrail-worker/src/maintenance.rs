//! Periodic housekeeping run alongside the consumer

use std::sync::Arc;
use std::time::Duration;
use tasktrail_shared::repository::RefreshTokenRepository;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Deletes expired refresh tokens every `every` until `shutdown` fires
///
/// The first sweep runs immediately. Failures are logged and retried on the
/// next tick.
pub async fn run_token_sweeper(
    tokens: Arc<dyn RefreshTokenRepository>,
    every: Duration,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }

        match tokens.delete_expired_refresh_tokens().await {
            Ok(0) => debug!("No expired refresh tokens"),
            Ok(removed) => info!(removed, "Removed expired refresh tokens"),
            Err(e) => warn!(error = %e, "Refresh token sweep failed"),
        }
    }

    debug!("Token sweeper stopped");
}
