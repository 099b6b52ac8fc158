/// Audit queue consumer
///
/// Drains [`AuditMessage`]s from an [`AuditSource`] and appends them to the
/// `task_audits` table.
///
/// # States
///
/// ```text
/// Connecting ──declare ok──> Consuming ──receive/settle error──> Connecting
///      │                         │
///      └──────── shutdown ───────┴──────────────> Stopped
/// ```
///
/// Connection-level failures put the consumer back in `Connecting` after
/// `reconnect_delay`, forever. A passive declare that finds no queue is logged
/// as an error and retried the same way, so consumption starts once someone
/// else creates the queue.
///
/// # Per-delivery decisions
///
/// | Outcome                       | Settlement                         |
/// |-------------------------------|------------------------------------|
/// | payload does not decode       | nack, drop                         |
/// | row inserted                  | ack                                |
/// | row already present (dedup)   | ack                                |
/// | record conversion failed      | nack, requeue                      |
/// | insert failed                 | nack, requeue                      |
/// | failed `max_deliveries` times | dead-letter                        |
///
/// Shutdown is checked between deliveries. A delivery that has started is
/// always settled; the rest of its batch is requeued.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tasktrail_shared::audit::AuditMessage;
use tasktrail_shared::queue::{AuditSource, DeclareMode, Delivery, QueueError};
use tasktrail_shared::repository::TaskAuditRepository;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Deliveries requested per read
    pub batch_size: usize,

    /// How long a read waits for new deliveries
    pub block: Duration,

    /// Pause before reconnecting after a connection failure
    pub reconnect_delay: Duration,

    /// Pause after requeueing a delivery whose insert failed
    pub retry_delay: Duration,

    pub declare_mode: DeclareMode,

    /// Failed inserts before a delivery is dead-lettered; `None` retries forever
    pub max_deliveries: Option<u32>,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            block: Duration::from_secs(5),
            reconnect_delay: Duration::from_secs(5),
            retry_delay: Duration::from_secs(1),
            declare_mode: DeclareMode::Create,
            max_deliveries: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Connecting,
    Consuming,
    Stopped,
}

/// How a delivery is settled
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    Ack,
    Requeue,
    Drop,
    DeadLetter(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerStats {
    pub received: u64,
    pub inserted: u64,
    pub duplicates: u64,
    pub requeued: u64,
    pub dropped: u64,
    pub dead_lettered: u64,
    pub reconnects: u64,
}

pub struct AuditConsumer {
    source: Arc<dyn AuditSource>,
    audits: Arc<dyn TaskAuditRepository>,
    config: ConsumerConfig,
    state: ConsumerState,

    /// Failed attempts per delivery ID, kept only while `max_deliveries` is
    /// set. Cleared on reconnect.
    attempts: HashMap<String, u32>,

    stats: ConsumerStats,
}

impl AuditConsumer {
    pub fn new(
        source: Arc<dyn AuditSource>,
        audits: Arc<dyn TaskAuditRepository>,
        config: ConsumerConfig,
    ) -> Self {
        Self {
            source,
            audits,
            config,
            state: ConsumerState::Connecting,
            attempts: HashMap::new(),
            stats: ConsumerStats::default(),
        }
    }

    pub fn state(&self) -> ConsumerState {
        self.state
    }

    pub fn stats(&self) -> ConsumerStats {
        self.stats
    }

    /// Consumes until `shutdown` fires
    pub async fn run(&mut self, shutdown: CancellationToken) {
        self.run_inner(&shutdown).await;
        self.state = ConsumerState::Stopped;
        info!(stats = ?self.stats, "Audit consumer stopped");
    }

    async fn run_inner(&mut self, shutdown: &CancellationToken) {
        while !shutdown.is_cancelled() {
            self.state = ConsumerState::Connecting;

            match self.source.declare(self.config.declare_mode).await {
                Ok(()) => {}
                Err(QueueError::NotFound(name)) if self.config.declare_mode == DeclareMode::Passive => {
                    error!(queue = %name, "Audit queue does not exist and passive declare is set");
                    self.reconnect_after_delay(shutdown).await;
                    continue;
                }
                Err(e) => {
                    error!(error = %e, "Failed to declare audit queue");
                    self.reconnect_after_delay(shutdown).await;
                    continue;
                }
            }

            self.state = ConsumerState::Consuming;
            info!(batch_size = self.config.batch_size, "Consuming audit messages");

            match self.consume(shutdown).await {
                Ok(()) => break,
                Err(e) => {
                    warn!(error = %e, "Audit queue connection lost");
                    self.reconnect_after_delay(shutdown).await;
                }
            }
        }
    }

    async fn reconnect_after_delay(&mut self, shutdown: &CancellationToken) {
        self.stats.reconnects += 1;
        // Deliveries in flight when the connection dropped may be settled elsewhere
        self.attempts.clear();
        info!(
            delay_secs = self.config.reconnect_delay.as_secs_f64(),
            "Reconnecting to audit queue"
        );
        tokio::select! {
            _ = shutdown.cancelled() => {}
            _ = tokio::time::sleep(self.config.reconnect_delay) => {}
        }
    }

    /// Returns `Ok` on shutdown, `Err` on a connection-level failure
    async fn consume(&mut self, shutdown: &CancellationToken) -> Result<(), QueueError> {
        loop {
            let batch = tokio::select! {
                biased;
                _ = shutdown.cancelled() => return Ok(()),
                batch = self.source.receive(self.config.batch_size, self.config.block) => batch?,
            };

            let mut deliveries = batch.into_iter();
            while let Some(delivery) = deliveries.next() {
                if shutdown.is_cancelled() {
                    self.requeue_unprocessed(std::iter::once(delivery).chain(deliveries))
                        .await;
                    return Ok(());
                }

                self.stats.received += 1;
                let disposition = self.process(&delivery).await;
                self.settle(&delivery, disposition, shutdown).await?;
            }
        }
    }

    /// Decides how to settle one delivery
    pub async fn process(&mut self, delivery: &Delivery) -> Disposition {
        let message = match AuditMessage::decode(&delivery.payload) {
            Ok(message) => message,
            Err(e) => {
                warn!(id = %delivery.id, error = %e, "Dropping malformed audit message");
                return Disposition::Drop;
            }
        };

        let record = match message.to_record(Some(delivery.id.clone())) {
            Ok(record) => record,
            Err(e) => {
                error!(id = %delivery.id, error = %e, "Failed to convert audit message");
                return self.after_failure(&delivery.id);
            }
        };

        match self.audits.insert_audit(record).await {
            Ok(true) => {
                self.stats.inserted += 1;
                debug!(
                    id = %delivery.id,
                    action = %message.action,
                    entity_id = message.entity_id,
                    "Audit record stored"
                );
                Disposition::Ack
            }
            Ok(false) => {
                self.stats.duplicates += 1;
                debug!(id = %delivery.id, "Audit record already stored");
                Disposition::Ack
            }
            Err(e) => {
                error!(id = %delivery.id, error = %e, "Failed to store audit record");
                self.after_failure(&delivery.id)
            }
        }
    }

    /// Requeue, or dead-letter once `max_deliveries` attempts have failed
    fn after_failure(&mut self, id: &str) -> Disposition {
        let Some(max) = self.config.max_deliveries else {
            return Disposition::Requeue;
        };

        let attempts = self.attempts.entry(id.to_string()).or_insert(0);
        *attempts += 1;

        if *attempts >= max {
            Disposition::DeadLetter(format!("processing failed {attempts} times"))
        } else {
            Disposition::Requeue
        }
    }

    async fn settle(
        &mut self,
        delivery: &Delivery,
        disposition: Disposition,
        shutdown: &CancellationToken,
    ) -> Result<(), QueueError> {
        let result = match &disposition {
            Disposition::Ack => self.source.ack(delivery).await,
            Disposition::Drop => {
                self.stats.dropped += 1;
                self.source.nack(delivery, false).await
            }
            Disposition::DeadLetter(reason) => {
                self.stats.dead_lettered += 1;
                warn!(id = %delivery.id, reason = %reason, "Dead-lettering audit message");
                self.source.dead_letter(delivery, reason).await
            }
            Disposition::Requeue => {
                self.stats.requeued += 1;
                self.source.nack(delivery, true).await
            }
        };

        if disposition != Disposition::Requeue {
            self.attempts.remove(&delivery.id);
        }

        match result {
            Ok(()) => {}
            Err(e) if e.is_connection_level() => return Err(e),
            Err(e) => warn!(id = %delivery.id, error = %e, "Failed to settle delivery"),
        }

        if disposition == Disposition::Requeue && !self.config.retry_delay.is_zero() {
            tokio::select! {
                _ = shutdown.cancelled() => {}
                _ = tokio::time::sleep(self.config.retry_delay) => {}
            }
        }

        Ok(())
    }

    async fn requeue_unprocessed(&self, deliveries: impl Iterator<Item = Delivery>) {
        for delivery in deliveries {
            if let Err(e) = self.source.nack(&delivery, true).await {
                warn!(id = %delivery.id, error = %e, "Failed to requeue delivery on shutdown");
            }
        }
    }
}
