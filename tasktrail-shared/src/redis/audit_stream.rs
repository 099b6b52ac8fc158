/// Audit queue on Redis Streams
///
/// # Layout
///
/// ```text
/// task_audit_logs          stream, one entry per audit message
///   field "payload"        JSON-encoded AuditMessage
///   group "audit_workers"  consumer group read by the audit worker
///
/// task_audit_logs:dlq      dead letters: payload, reason, source_id
/// ```
///
/// # Settlement
///
/// | Operation            | Redis                                            |
/// |----------------------|--------------------------------------------------|
/// | publish              | `XADD stream * payload <json>` (retried)         |
/// | declare (create)     | `XGROUP CREATE stream group 0 MKSTREAM`          |
/// | declare (passive)    | `EXISTS stream` + `XINFO GROUPS stream`          |
/// | receive              | `XREADGROUP ... 0` (pending), `XAUTOCLAIM`, then `... >` (new) |
/// | ack                  | `XACK`                                           |
/// | nack, requeue        | leave in the pending list; re-read from `0`      |
/// | nack, drop           | `XACK` + `XDEL`                                  |
/// | dead letter          | `XADD dlq ...` then `XACK` + `XDEL`              |
///
/// Pending entries belong to the consumer name that read them. Entries left
/// pending by a consumer that went away (a renamed or scaled-down worker) are
/// taken over with `XAUTOCLAIM` once they have been idle for `claim_idle`.
///
/// Entries survive a Redis restart only as far as the server's persistence
/// settings (AOF `appendfsync`) allow.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::streams::StreamInfoGroupsReply;
use redis::RedisError;
use std::time::Duration;

use super::client::RedisClient;
use crate::audit::message::AuditMessage;
use crate::queue::{AuditPublisher, AuditSource, DeclareMode, Delivery, QueueError, AUDIT_QUEUE};

/// Stream entry field holding the encoded message
pub const PAYLOAD_FIELD: &str = "payload";

/// `XREADGROUP` reply: `[(stream, [(id, fields | nil)])]`
///
/// Fields are `None` for entries deleted while still pending.
type ReadReply = Vec<(String, Vec<(String, Option<Vec<(String, Vec<u8>)>>)>)>;

impl From<RedisError> for QueueError {
    fn from(err: RedisError) -> Self {
        if err.code() == Some("NOGROUP") {
            QueueError::NotFound(err.to_string())
        } else if err.is_io_error() || err.is_connection_dropped() || err.is_timeout() {
            QueueError::Connection(err.to_string())
        } else {
            QueueError::Command(err.to_string())
        }
    }
}

#[derive(Debug, Clone)]
pub struct AuditStreamConfig {
    pub stream: String,
    pub group: String,

    /// Consumer name inside the group; pending entries are tracked per name
    pub consumer: String,

    pub dlq_stream: String,

    /// Idle time after which another consumer's pending entries are claimed;
    /// `None` never claims
    pub claim_idle: Option<Duration>,

    /// Approximate `MAXLEN` applied on publish; `None` keeps every entry
    pub max_len: Option<usize>,

    /// Publish retries after the first attempt
    pub max_retries: u32,
    pub base_retry_delay_ms: u64,
    pub max_retry_delay_ms: u64,
}

impl Default for AuditStreamConfig {
    fn default() -> Self {
        Self {
            stream: AUDIT_QUEUE.to_string(),
            group: "audit_workers".to_string(),
            consumer: "audit_worker".to_string(),
            dlq_stream: format!("{AUDIT_QUEUE}:dlq"),
            claim_idle: Some(Duration::from_secs(60)),
            max_len: None,
            max_retries: 3,
            base_retry_delay_ms: 100,
            max_retry_delay_ms: 5000,
        }
    }
}

impl AuditStreamConfig {
    pub fn with_consumer(mut self, consumer: impl Into<String>) -> Self {
        self.consumer = consumer.into();
        self
    }

    pub fn with_claim_idle(mut self, claim_idle: Option<Duration>) -> Self {
        self.claim_idle = claim_idle;
        self
    }

    fn retry_delay(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
        Duration::from_millis(
            self.base_retry_delay_ms
                .saturating_mul(factor)
                .min(self.max_retry_delay_ms),
        )
    }
}

/// Redis Streams implementation of both queue traits
#[derive(Clone)]
pub struct RedisAuditQueue {
    conn: ConnectionManager,
    config: AuditStreamConfig,
}

impl RedisAuditQueue {
    pub fn new(client: &RedisClient, config: AuditStreamConfig) -> Self {
        Self {
            conn: client.get_connection(),
            config,
        }
    }

    async fn xadd_with_retry(&self, payload: &[u8]) -> Result<String, RedisError> {
        let mut attempt = 0;

        loop {
            let mut cmd = redis::cmd("XADD");
            cmd.arg(&self.config.stream);
            if let Some(max_len) = self.config.max_len {
                cmd.arg("MAXLEN").arg("~").arg(max_len);
            }
            cmd.arg("*").arg(PAYLOAD_FIELD).arg(payload);

            let mut conn = self.conn.clone();
            match cmd.query_async::<_, String>(&mut conn).await {
                Ok(id) => return Ok(id),
                Err(e) if attempt < self.config.max_retries => {
                    attempt += 1;
                    let delay = self.config.retry_delay(attempt);
                    tracing::warn!(
                        stream = %self.config.stream,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "XADD failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn read_group(
        &self,
        start: &str,
        max: usize,
        block: Option<Duration>,
    ) -> Result<Vec<Delivery>, QueueError> {
        let mut cmd = redis::cmd("XREADGROUP");
        cmd.arg("GROUP")
            .arg(&self.config.group)
            .arg(&self.config.consumer);
        if let Some(block) = block {
            cmd.arg("BLOCK").arg(block.as_millis() as u64);
        }
        cmd.arg("COUNT")
            .arg(max)
            .arg("STREAMS")
            .arg(&self.config.stream)
            .arg(start);

        let mut conn = self.conn.clone();
        let reply: Option<ReadReply> = cmd.query_async(&mut conn).await?;

        let deliveries = reply
            .unwrap_or_default()
            .into_iter()
            .flat_map(|(_, entries)| entries)
            .map(|(id, fields)| {
                let payload = fields
                    .unwrap_or_default()
                    .into_iter()
                    .find(|(name, _)| name == PAYLOAD_FIELD)
                    .map(|(_, value)| value)
                    .unwrap_or_default();
                Delivery { id, payload }
            })
            .collect();

        Ok(deliveries)
    }

    /// Moves idle pending entries of other consumers to this one; `true` if
    /// any were claimed
    async fn claim_idle(&self, max: usize) -> Result<bool, QueueError> {
        let Some(idle) = self.config.claim_idle else {
            return Ok(false);
        };

        let mut conn = self.conn.clone();
        // Reply is [next_start, [ids], ...]; the deleted-ids element only exists on Redis 7+
        let reply: redis::Value = redis::cmd("XAUTOCLAIM")
            .arg(&self.config.stream)
            .arg(&self.config.group)
            .arg(&self.config.consumer)
            .arg(idle.as_millis() as u64)
            .arg("0-0")
            .arg("COUNT")
            .arg(max)
            .arg("JUSTID")
            .query_async(&mut conn)
            .await?;

        let claimed = match reply {
            redis::Value::Bulk(items) => match items.get(1) {
                Some(redis::Value::Bulk(ids)) => ids.len(),
                _ => 0,
            },
            _ => 0,
        };
        if claimed > 0 {
            tracing::info!(
                claimed,
                consumer = %self.config.consumer,
                "Claimed idle pending entries"
            );
        }
        Ok(claimed > 0)
    }

    async fn ack_and_delete(&self, id: &str) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        redis::pipe()
            .atomic()
            .cmd("XACK")
            .arg(&self.config.stream)
            .arg(&self.config.group)
            .arg(id)
            .ignore()
            .cmd("XDEL")
            .arg(&self.config.stream)
            .arg(id)
            .ignore()
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl AuditPublisher for RedisAuditQueue {
    async fn publish(&self, message: &AuditMessage) -> Result<String, QueueError> {
        let payload = message.encode()?;
        Ok(self.xadd_with_retry(&payload).await?)
    }
}

#[async_trait]
impl AuditSource for RedisAuditQueue {
    async fn declare(&self, mode: DeclareMode) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();

        match mode {
            DeclareMode::Create => {
                let created: Result<(), RedisError> = redis::cmd("XGROUP")
                    .arg("CREATE")
                    .arg(&self.config.stream)
                    .arg(&self.config.group)
                    .arg("0")
                    .arg("MKSTREAM")
                    .query_async(&mut conn)
                    .await;

                match created {
                    Ok(()) => {
                        tracing::info!(
                            stream = %self.config.stream,
                            group = %self.config.group,
                            "Created consumer group"
                        );
                        Ok(())
                    }
                    Err(e) if e.code() == Some("BUSYGROUP") => Ok(()),
                    Err(e) => Err(e.into()),
                }
            }
            DeclareMode::Passive => {
                let exists: bool = redis::cmd("EXISTS")
                    .arg(&self.config.stream)
                    .query_async(&mut conn)
                    .await?;
                if !exists {
                    return Err(QueueError::NotFound(self.config.stream.clone()));
                }

                let info: StreamInfoGroupsReply = redis::cmd("XINFO")
                    .arg("GROUPS")
                    .arg(&self.config.stream)
                    .query_async(&mut conn)
                    .await?;
                if info.groups.iter().any(|g| g.name == self.config.group) {
                    Ok(())
                } else {
                    Err(QueueError::NotFound(format!(
                        "{}/{}",
                        self.config.stream, self.config.group
                    )))
                }
            }
        }
    }

    async fn receive(&self, max: usize, block: Duration) -> Result<Vec<Delivery>, QueueError> {
        let pending = self.read_group("0", max, None).await?;
        if !pending.is_empty() {
            return Ok(pending);
        }
        if self.claim_idle(max).await? {
            return self.read_group("0", max, None).await;
        }
        self.read_group(">", max, Some(block)).await
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        let acked: i64 = redis::cmd("XACK")
            .arg(&self.config.stream)
            .arg(&self.config.group)
            .arg(&delivery.id)
            .query_async(&mut conn)
            .await?;

        if acked == 0 {
            return Err(QueueError::UnknownDelivery(delivery.id.clone()));
        }
        Ok(())
    }

    async fn nack(&self, delivery: &Delivery, requeue: bool) -> Result<(), QueueError> {
        if requeue {
            // Stays in this consumer's pending list and comes back on the
            // next read from "0"
            tracing::debug!(id = %delivery.id, "Leaving delivery pending for redelivery");
            return Ok(());
        }
        self.ack_and_delete(&delivery.id).await
    }

    async fn dead_letter(&self, delivery: &Delivery, reason: &str) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("XADD")
            .arg(&self.config.dlq_stream)
            .arg("*")
            .arg(PAYLOAD_FIELD)
            .arg(&delivery.payload)
            .arg("reason")
            .arg(reason)
            .arg("source_id")
            .arg(&delivery.id)
            .query_async(&mut conn)
            .await?;

        tracing::info!(
            id = %delivery.id,
            dlq = %self.config.dlq_stream,
            reason,
            "Moved delivery to dead-letter stream"
        );

        self.ack_and_delete(&delivery.id).await
    }
}
