/// Redis integration for the audit queue
///
/// # Architecture
///
/// ```text
/// ┌─────────────┐
/// │     API     │ ──XADD──> task_audit_logs
/// └─────────────┘                │
///                                │ XREADGROUP (group audit_workers)
///                                ▼
///                        ┌───────────────┐        task_audit_logs:dlq
///                        │ Audit worker  │ ──XADD──> (dead letters)
///                        └───────────────┘
/// ```
///
/// # Example
///
/// ```no_run
/// use tasktrail_shared::redis::{AuditStreamConfig, RedisAuditQueue, RedisClient, RedisConfig};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let client = RedisClient::new(RedisConfig::new("redis://localhost:6379")).await?;
/// let queue = RedisAuditQueue::new(&client, AuditStreamConfig::default());
/// # Ok(())
/// # }
/// ```

pub mod audit_stream;
pub mod client;

pub use audit_stream::{AuditStreamConfig, RedisAuditQueue};
pub use client::{RedisClient, RedisClientError, RedisConfig};
