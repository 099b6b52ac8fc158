//! # TaskTrail Worker Library
//!
//! Background processing for TaskTrail: the audit queue consumer that turns
//! queued task mutations into `task_audits` rows, and periodic housekeeping.
//!
//! ## Modules
//!
//! - `config`: Worker configuration from `TASKTRAIL_WORKER_*` variables
//! - `consumer`: Audit queue consumer with ack/requeue/drop settlement
//! - `maintenance`: Expired refresh token sweeper
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use tasktrail_shared::queue::{MemoryQueue, AUDIT_QUEUE};
//! use tasktrail_shared::repository::InMemoryStore;
//! use tasktrail_worker::consumer::{AuditConsumer, ConsumerConfig};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() {
//! let queue = Arc::new(MemoryQueue::declared(AUDIT_QUEUE));
//! let mut consumer = AuditConsumer::new(queue, Arc::new(InMemoryStore::new()), ConsumerConfig::default());
//! consumer.run(CancellationToken::new()).await;
//! # }
//! ```

pub mod config;
pub mod consumer;
pub mod maintenance;
