//! Durable audit queue
//!
//! Producers hand [`AuditMessage`]s to an [`AuditPublisher`]; the audit worker
//! drains them through an [`AuditSource`] with manual settlement:
//!
//! - `ack` removes a delivery for good
//! - `nack(requeue = true)` makes it eligible for redelivery
//! - `nack(requeue = false)` drops it
//! - `dead_letter` parks it on a side queue with a reason, then drops it
//!
//! Delivery is at-least-once. A delivery that is neither acked nor nacked
//! (the consumer crashed) is redelivered to the next reader.
//!
//! Implementations:
//!
//! - [`crate::redis::audit_stream::RedisAuditQueue`]: Redis Streams with a
//!   consumer group
//! - [`memory::MemoryQueue`]: in-process, for tests

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

use crate::audit::message::AuditMessage;

pub mod memory;

pub use memory::MemoryQueue;

/// Name of the audit queue (Redis stream key)
pub const AUDIT_QUEUE: &str = "task_audit_logs";

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("failed to serialize audit message: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Broker unreachable or the connection dropped
    #[error("queue connection error: {0}")]
    Connection(String),

    /// Passive declare found no queue
    #[error("queue '{0}' does not exist")]
    NotFound(String),

    #[error("unknown delivery: {0}")]
    UnknownDelivery(String),

    #[error("queue command failed: {0}")]
    Command(String),
}

impl QueueError {
    /// True for failures that call for a reconnect rather than a per-message
    /// decision
    pub fn is_connection_level(&self) -> bool {
        matches!(self, QueueError::Connection(_) | QueueError::NotFound(_))
    }
}

/// How a consumer declares the queue before reading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeclareMode {
    /// Create the queue if missing; a no-op when it already exists
    #[default]
    Create,

    /// Require the queue to exist already; fail otherwise
    Passive,
}

/// One message handed to a consumer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Broker-assigned ID, stable across redeliveries
    pub id: String,
    pub payload: Vec<u8>,
}

#[async_trait]
pub trait AuditPublisher: Send + Sync {
    /// Serializes and durably enqueues `message`
    ///
    /// Returns the broker's message ID. Success means the broker accepted the
    /// message, not that anyone consumed it.
    async fn publish(&self, message: &AuditMessage) -> Result<String, QueueError>;
}

#[async_trait]
pub trait AuditSource: Send + Sync {
    /// Idempotent queue declaration
    async fn declare(&self, mode: DeclareMode) -> Result<(), QueueError>;

    /// Up to `max` deliveries, waiting at most `block` when none are ready
    ///
    /// Redeliveries come before new messages.
    async fn receive(&self, max: usize, block: Duration) -> Result<Vec<Delivery>, QueueError>;

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError>;

    async fn nack(&self, delivery: &Delivery, requeue: bool) -> Result<(), QueueError>;

    /// Moves the delivery to the dead-letter queue and removes it here
    async fn dead_letter(&self, delivery: &Delivery, reason: &str) -> Result<(), QueueError>;
}
