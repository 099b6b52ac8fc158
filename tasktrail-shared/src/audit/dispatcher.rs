//! Bounded audit hand-off
//!
//! Mutation handlers call [`AuditDispatcher::dispatch`], which never waits on
//! the broker: the message goes into a bounded channel and a single background
//! task publishes it with a per-message timeout. When the channel is full or
//! closed the message is dropped, logged and counted. Publish failures are
//! logged and counted too; they never reach the request that caused them.
//!
//! On shutdown the background task stops taking new messages, publishes what
//! is already buffered and exits. [`DispatcherHandle::shutdown`] bounds that
//! drain with a grace period.
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use tasktrail_shared::audit::dispatcher::{AuditDispatcher, DispatcherConfig};
//! use tasktrail_shared::queue::{MemoryQueue, AUDIT_QUEUE};
//!
//! # async fn example() {
//! let queue = Arc::new(MemoryQueue::declared(AUDIT_QUEUE));
//! let (dispatcher, handle) = AuditDispatcher::spawn(queue, DispatcherConfig::default());
//! // ... hand `dispatcher` to the task service ...
//! handle.shutdown(Duration::from_secs(5)).await;
//! # }
//! ```

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::message::AuditMessage;
use crate::queue::AuditPublisher;

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Messages buffered before `dispatch` starts dropping (default 1024)
    pub capacity: usize,

    /// Upper bound on a single publish (default 2s)
    pub publish_timeout: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            capacity: 1024,
            publish_timeout: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    enqueued: AtomicU64,
    published: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

/// Point-in-time dispatcher counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchStats {
    /// Accepted into the buffer
    pub enqueued: u64,

    /// Accepted by the broker
    pub published: u64,

    /// Publish returned an error or timed out
    pub failed: u64,

    /// Rejected because the buffer was full or closed
    pub dropped: u64,
}

/// Producer side of the audit hand-off; cheap to clone
#[derive(Clone)]
pub struct AuditDispatcher {
    tx: mpsc::Sender<AuditMessage>,
    counters: Arc<Counters>,
}

/// Owns the background publisher task
pub struct DispatcherHandle {
    join: JoinHandle<()>,
    shutdown: CancellationToken,
    counters: Arc<Counters>,
}

impl AuditDispatcher {
    /// Starts the background publisher and returns both ends
    pub fn spawn(
        publisher: Arc<dyn AuditPublisher>,
        config: DispatcherConfig,
    ) -> (Self, DispatcherHandle) {
        let (tx, rx) = mpsc::channel(config.capacity.max(1));
        let counters = Arc::new(Counters::default());
        let shutdown = CancellationToken::new();

        let join = tokio::spawn(publish_loop(
            rx,
            publisher,
            config.publish_timeout,
            counters.clone(),
            shutdown.clone(),
        ));

        (
            Self {
                tx,
                counters: counters.clone(),
            },
            DispatcherHandle {
                join,
                shutdown,
                counters,
            },
        )
    }

    /// Queues `message` for publishing without waiting
    ///
    /// Returns `false` if the message was dropped.
    pub fn dispatch(&self, message: AuditMessage) -> bool {
        match self.tx.try_send(message) {
            Ok(()) => {
                self.counters.enqueued.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(TrySendError::Full(message)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(
                    action = %message.action,
                    entity_id = message.entity_id,
                    "Audit buffer full, dropping audit message"
                );
                false
            }
            Err(TrySendError::Closed(message)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(
                    action = %message.action,
                    entity_id = message.entity_id,
                    "Audit dispatcher stopped, dropping audit message"
                );
                false
            }
        }
    }

    pub fn stats(&self) -> DispatchStats {
        snapshot(&self.counters)
    }
}

impl DispatcherHandle {
    /// Stops intake, drains buffered messages, and waits up to `grace`
    ///
    /// Messages still buffered when the grace period ends are lost; the count
    /// is logged.
    pub async fn shutdown(mut self, grace: Duration) -> DispatchStats {
        self.shutdown.cancel();

        match tokio::time::timeout(grace, &mut self.join).await {
            Ok(Ok(())) => info!("Audit dispatcher drained"),
            Ok(Err(e)) => error!(error = %e, "Audit dispatcher task failed"),
            Err(_) => {
                self.join.abort();
                let stats = snapshot(&self.counters);
                let lost = stats
                    .enqueued
                    .saturating_sub(stats.published + stats.failed);
                warn!(
                    grace_ms = grace.as_millis() as u64,
                    lost, "Audit dispatcher drain timed out"
                );
            }
        }

        snapshot(&self.counters)
    }
}

fn snapshot(counters: &Counters) -> DispatchStats {
    DispatchStats {
        enqueued: counters.enqueued.load(Ordering::Relaxed),
        published: counters.published.load(Ordering::Relaxed),
        failed: counters.failed.load(Ordering::Relaxed),
        dropped: counters.dropped.load(Ordering::Relaxed),
    }
}

async fn publish_loop(
    mut rx: mpsc::Receiver<AuditMessage>,
    publisher: Arc<dyn AuditPublisher>,
    publish_timeout: Duration,
    counters: Arc<Counters>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            next = rx.recv() => match next {
                Some(message) => {
                    publish_one(publisher.as_ref(), message, publish_timeout, &counters).await
                }
                None => return,
            },
        }
    }

    rx.close();
    while let Some(message) = rx.recv().await {
        publish_one(publisher.as_ref(), message, publish_timeout, &counters).await;
    }
}

async fn publish_one(
    publisher: &dyn AuditPublisher,
    message: AuditMessage,
    publish_timeout: Duration,
    counters: &Counters,
) {
    match tokio::time::timeout(publish_timeout, publisher.publish(&message)).await {
        Ok(Ok(message_id)) => {
            counters.published.fetch_add(1, Ordering::Relaxed);
            debug!(
                message_id = %message_id,
                action = %message.action,
                entity_id = message.entity_id,
                "Published audit message"
            );
        }
        Ok(Err(e)) => {
            counters.failed.fetch_add(1, Ordering::Relaxed);
            error!(
                error = %e,
                action = %message.action,
                entity_id = message.entity_id,
                "Failed to publish audit message"
            );
        }
        Err(_) => {
            counters.failed.fetch_add(1, Ordering::Relaxed);
            error!(
                timeout_ms = publish_timeout.as_millis() as u64,
                action = %message.action,
                entity_id = message.entity_id,
                "Timed out publishing audit message"
            );
        }
    }
}
