/// Task audit trail
///
/// Append-only history of task mutations. Rows are written exclusively by the
/// audit worker and never updated or deleted by the application.
///
/// # Schema
///
/// ```sql
/// CREATE TYPE audit_action AS ENUM ('Create', 'Read', 'Update', 'Delete');
///
/// CREATE TABLE task_audits (
///     id BIGSERIAL PRIMARY KEY,
///     user_id BIGINT NOT NULL,
///     action audit_action NOT NULL,
///     entity_type TEXT NOT NULL,
///     entity_id BIGINT NOT NULL,
///     old_values TEXT,
///     new_values TEXT,
///     changes TEXT,
///     message_id TEXT UNIQUE,
///     changed_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
/// );
/// ```
///
/// `entity_id` deliberately has no foreign key: the task may be deleted after
/// its history was written.
///
/// # Deduplication
///
/// `message_id` carries the queue's delivery ID. Inserting the same message
/// twice (a redelivery after a lost ack) is a no-op, so one queued message
/// yields at most one row.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::fmt;

/// Kind of mutation recorded
///
/// `Read` exists in the schema but reads are not currently audited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "audit_action")]
pub enum AuditAction {
    Create,
    Read,
    Update,
    Delete,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Create => "Create",
            AuditAction::Read => "Read",
            AuditAction::Update => "Update",
            AuditAction::Delete => "Delete",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persisted audit record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct TaskAudit {
    pub id: i64,

    /// Acting user
    pub user_id: i64,

    pub action: AuditAction,
    pub entity_type: String,
    pub entity_id: i64,

    /// Serialized JSON object, absent when the message carried none
    pub old_values: Option<String>,
    pub new_values: Option<String>,
    pub changes: Option<String>,

    pub message_id: Option<String>,
    pub changed_at: DateTime<Utc>,
}

/// Input for appending an audit record
#[derive(Debug, Clone, PartialEq)]
pub struct NewTaskAudit {
    pub user_id: i64,
    pub action: AuditAction,
    pub entity_type: String,
    pub entity_id: i64,
    pub old_values: Option<String>,
    pub new_values: Option<String>,
    pub changes: Option<String>,
    pub message_id: Option<String>,
    pub changed_at: DateTime<Utc>,
}

const AUDIT_COLUMNS: &str = "id, user_id, action, entity_type, entity_id, old_values, new_values, changes, message_id, changed_at";

impl TaskAudit {
    /// Appends a record
    ///
    /// Returns `false` when a row with the same `message_id` already exists.
    pub async fn insert(pool: &PgPool, data: NewTaskAudit) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            INSERT INTO task_audits
                (user_id, action, entity_type, entity_id, old_values, new_values, changes, message_id, changed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (message_id) DO NOTHING
            "#,
        )
        .bind(data.user_id)
        .bind(data.action)
        .bind(data.entity_type)
        .bind(data.entity_id)
        .bind(data.old_values)
        .bind(data.new_values)
        .bind(data.changes)
        .bind(data.message_id)
        .bind(data.changed_at)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// History of one entity, oldest first
    pub async fn list_for_entity(
        pool: &PgPool,
        entity_type: &str,
        entity_id: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, TaskAudit>(&format!(
            "SELECT {AUDIT_COLUMNS} FROM task_audits
             WHERE entity_type = $1 AND entity_id = $2
             ORDER BY changed_at, id"
        ))
        .bind(entity_type)
        .bind(entity_id)
        .fetch_all(pool)
        .await
    }
}
