//! Audit message wire format
//!
//! ```json
//! {
//!   "user_id": 1,
//!   "action": "Update",
//!   "entity_id": 42,
//!   "old_values": {"title": "A", "description": "", "status": "pending"},
//!   "new_values": {"title": "B", "description": "", "status": "pending"},
//!   "changes": {"title": {"old": "A", "new": "B"}},
//!   "timestamp": "2025-01-01T12:00:00Z"
//! }
//! ```
//!
//! Absent snapshots serialize as `null`. Only tasks are audited, so the
//! persisted record's `entity_type` is always [`AUDITED_ENTITY`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::models::task::Task;
use crate::models::task_audit::{AuditAction, NewTaskAudit};

/// `entity_type` written for every record derived from an [`AuditMessage`]
pub const AUDITED_ENTITY: &str = "task";

/// Key/value snapshot of an entity's audited fields
pub type Snapshot = Map<String, Value>;

/// Before/after pair for one changed field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldChange {
    pub old: Value,
    pub new: Value,
}

/// A task mutation on its way to the audit worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditMessage {
    /// Acting user
    pub user_id: i64,
    pub action: AuditAction,
    pub entity_id: i64,
    pub old_values: Option<Snapshot>,
    pub new_values: Option<Snapshot>,
    pub changes: Option<BTreeMap<String, FieldChange>>,
    pub timestamp: DateTime<Utc>,
}

fn mutable_fields(task: &Task) -> Snapshot {
    let mut snapshot = Map::new();
    snapshot.insert("title".into(), Value::from(task.title.clone()));
    snapshot.insert("description".into(), Value::from(task.description.clone()));
    snapshot.insert("status".into(), Value::from(task.status.as_str()));
    snapshot
}

fn full_snapshot(task: &Task) -> Snapshot {
    let mut snapshot = mutable_fields(task);
    snapshot.insert("owner_id".into(), Value::from(task.owner_id));
    snapshot
}

impl AuditMessage {
    /// Task was created; carries the new row including `owner_id`
    pub fn created(actor: i64, task: &Task) -> Self {
        Self {
            user_id: actor,
            action: AuditAction::Create,
            entity_id: task.id,
            old_values: None,
            new_values: Some(full_snapshot(task)),
            changes: None,
            timestamp: Utc::now(),
        }
    }

    /// Task was updated
    ///
    /// Snapshots cover title, description and status. `changes` lists only the
    /// fields whose value differs between `before` and `after`.
    pub fn updated(actor: i64, before: &Task, after: &Task) -> Self {
        let old_values = mutable_fields(before);
        let new_values = mutable_fields(after);

        let changes = old_values
            .iter()
            .filter_map(|(field, old)| {
                let new = new_values.get(field)?;
                (old != new).then(|| {
                    (
                        field.clone(),
                        FieldChange {
                            old: old.clone(),
                            new: new.clone(),
                        },
                    )
                })
            })
            .collect();

        Self {
            user_id: actor,
            action: AuditAction::Update,
            entity_id: after.id,
            old_values: Some(old_values),
            new_values: Some(new_values),
            changes: Some(changes),
            timestamp: Utc::now(),
        }
    }

    /// Task was deleted; carries the pre-delete row including `owner_id`
    pub fn deleted(actor: i64, task: &Task) -> Self {
        Self {
            user_id: actor,
            action: AuditAction::Delete,
            entity_id: task.id,
            old_values: Some(full_snapshot(task)),
            new_values: None,
            changes: None,
            timestamp: Utc::now(),
        }
    }

    /// Parses a queue payload
    pub fn decode(payload: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(payload)
    }

    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Converts to a storable record
    ///
    /// Each mapping is re-serialized to its own JSON string; an absent mapping
    /// stays absent. `message_id` is the queue delivery ID used for
    /// deduplication.
    pub fn to_record(&self, message_id: Option<String>) -> Result<NewTaskAudit, serde_json::Error> {
        Ok(NewTaskAudit {
            user_id: self.user_id,
            action: self.action,
            entity_type: AUDITED_ENTITY.to_string(),
            entity_id: self.entity_id,
            old_values: self.old_values.as_ref().map(serde_json::to_string).transpose()?,
            new_values: self.new_values.as_ref().map(serde_json::to_string).transpose()?,
            changes: self.changes.as_ref().map(serde_json::to_string).transpose()?,
            message_id,
            changed_at: self.timestamp,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::task::TaskStatus;
    use serde_json::json;

    fn task(title: &str, description: &str, status: TaskStatus) -> Task {
        Task {
            id: 42,
            title: title.to_string(),
            description: description.to_string(),
            status,
            owner_id: 1,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_created_snapshot_includes_owner() {
        let msg = AuditMessage::created(1, &task("T1", "d", TaskStatus::Pending));

        assert_eq!(msg.action, AuditAction::Create);
        assert!(msg.old_values.is_none());
        assert!(msg.changes.is_none());
        assert_eq!(
            Value::Object(msg.new_values.unwrap()),
            json!({"title": "T1", "description": "d", "status": "pending", "owner_id": 1})
        );
    }

    #[test]
    fn test_updated_changes_only_differing_fields() {
        let before = task("A", "same", TaskStatus::Pending);
        let after = task("B", "same", TaskStatus::Pending);

        let msg = AuditMessage::updated(1, &before, &after);
        let changes = msg.changes.unwrap();

        assert_eq!(changes.len(), 1);
        assert_eq!(
            changes["title"],
            FieldChange {
                old: json!("A"),
                new: json!("B")
            }
        );
        assert!(!msg.old_values.unwrap().contains_key("owner_id"));
    }

    #[test]
    fn test_deleted_snapshot() {
        let msg = AuditMessage::deleted(2, &task("gone", "", TaskStatus::Completed));

        assert_eq!(msg.action, AuditAction::Delete);
        assert!(msg.new_values.is_none());
        let old = msg.old_values.unwrap();
        assert_eq!(old["status"], json!("completed"));
        assert_eq!(old["owner_id"], json!(1));
    }

    #[test]
    fn test_wire_shape() {
        let msg = AuditMessage::created(1, &task("T", "", TaskStatus::Pending));
        let value: Value = serde_json::from_slice(&msg.encode().unwrap()).unwrap();

        assert_eq!(value["action"], json!("Create"));
        assert_eq!(value["old_values"], Value::Null);
        assert_eq!(value["changes"], Value::Null);
        assert!(value["timestamp"].as_str().unwrap().contains('T'));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(AuditMessage::decode(b"not json").is_err());
        assert!(AuditMessage::decode(br#"{"user_id": 1}"#).is_err());
    }

    #[test]
    fn test_to_record_serializes_each_mapping() {
        let before = task("A", "x", TaskStatus::Pending);
        let after = task("B", "x", TaskStatus::InProgress);
        let msg = AuditMessage::updated(5, &before, &after);

        let record = msg.to_record(Some("1-0".to_string())).unwrap();
        assert_eq!(record.entity_type, AUDITED_ENTITY);
        assert_eq!(record.user_id, 5);
        assert_eq!(record.entity_id, 42);
        assert_eq!(record.changed_at, msg.timestamp);

        let changes: Value = serde_json::from_str(record.changes.as_deref().unwrap()).unwrap();
        assert_eq!(
            changes,
            json!({
                "status": {"old": "pending", "new": "in_progress"},
                "title": {"old": "A", "new": "B"}
            })
        );

        let created = AuditMessage::created(5, &after).to_record(None).unwrap();
        assert!(created.old_values.is_none());
        assert!(created.changes.is_none());
    }
}
