//! Task mutation service
//!
//! Every operation is scoped to an acting user. Reads and writes on a task
//! owned by someone else fail with [`ServiceError::Forbidden`] before anything
//! is written. Create, update and delete each hand exactly one
//! [`AuditMessage`] to the dispatcher after the write succeeds; reads emit
//! nothing.

use serde::Deserialize;
use std::sync::Arc;
use tracing::instrument;

use crate::audit::{AuditDispatcher, AuditMessage};
use crate::error::{ServiceError, ServiceResult};
use crate::models::task::{CreateTask, Task, TaskStatus, TaskUpdate};
use crate::repository::{TaskRepository, UserRepository};

/// Update as it arrives from a client
///
/// An empty `title` or `status` means "unchanged". `description` is applied
/// whenever present, so it can be cleared with `Some("")`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct UpdateTaskRequest {
    pub title: String,
    pub description: Option<String>,
    pub status: String,
}

impl UpdateTaskRequest {
    /// Builds the sparse update; an unknown status is `InvalidInput`
    pub fn into_update(self) -> ServiceResult<TaskUpdate> {
        let status = if self.status.is_empty() {
            None
        } else {
            Some(
                self.status
                    .parse::<TaskStatus>()
                    .map_err(|e| ServiceError::InvalidInput(e.to_string()))?,
            )
        };

        Ok(TaskUpdate {
            title: (!self.title.is_empty()).then_some(self.title),
            description: self.description,
            status,
        })
    }
}

#[derive(Clone)]
pub struct TaskService {
    tasks: Arc<dyn TaskRepository>,
    users: Arc<dyn UserRepository>,
    audit: AuditDispatcher,
}

impl TaskService {
    pub fn new(
        tasks: Arc<dyn TaskRepository>,
        users: Arc<dyn UserRepository>,
        audit: AuditDispatcher,
    ) -> Self {
        Self { tasks, users, audit }
    }

    /// Creates a task owned by `actor`
    ///
    /// Whatever `owner_id` the input carries is replaced with `actor`.
    #[instrument(skip(self, input))]
    pub async fn create_task(&self, actor: i64, mut input: CreateTask) -> ServiceResult<Task> {
        if input.title.trim().is_empty() {
            return Err(ServiceError::InvalidInput("title must not be empty".to_string()));
        }

        match self.users.get_user(actor).await? {
            Some(user) if user.is_active => {}
            _ => return Err(ServiceError::UserNotFound),
        }

        input.owner_id = actor;
        let task = self.tasks.create_task(input).await?;

        self.audit.dispatch(AuditMessage::created(actor, &task));
        tracing::info!(task_id = task.id, owner_id = actor, "Task created");

        Ok(task)
    }

    #[instrument(skip(self))]
    pub async fn get_task(&self, task_id: i64, actor: i64) -> ServiceResult<Task> {
        self.load_owned(task_id, actor).await
    }

    /// Applies a sparse update
    ///
    /// An update with no fields fails with `NoFieldsToUpdate` and writes
    /// nothing.
    #[instrument(skip(self, update))]
    pub async fn update_task(
        &self,
        task_id: i64,
        actor: i64,
        update: TaskUpdate,
    ) -> ServiceResult<Task> {
        let before = self.load_owned(task_id, actor).await?;

        if update.is_empty() {
            return Err(ServiceError::NoFieldsToUpdate);
        }

        let after = self
            .tasks
            .update_task(task_id, &update)
            .await?
            .ok_or(ServiceError::TaskNotFound)?;

        self.audit
            .dispatch(AuditMessage::updated(actor, &before, &after));
        tracing::info!(task_id, "Task updated");

        Ok(after)
    }

    #[instrument(skip(self))]
    pub async fn delete_task(&self, task_id: i64, actor: i64) -> ServiceResult<()> {
        let task = self.load_owned(task_id, actor).await?;

        if !self.tasks.delete_task(task_id).await? {
            return Err(ServiceError::TaskNotFound);
        }

        self.audit.dispatch(AuditMessage::deleted(actor, &task));
        tracing::info!(task_id, "Task deleted");

        Ok(())
    }

    /// Owner's tasks, newest first, optionally filtered by exact status
    #[instrument(skip(self))]
    pub async fn list_tasks(
        &self,
        owner_id: i64,
        status: Option<TaskStatus>,
    ) -> ServiceResult<Vec<Task>> {
        Ok(self.tasks.list_tasks(owner_id, status).await?)
    }

    async fn load_owned(&self, task_id: i64, actor: i64) -> ServiceResult<Task> {
        let task = self
            .tasks
            .get_task(task_id)
            .await?
            .ok_or(ServiceError::TaskNotFound)?;

        if task.owner_id != actor {
            return Err(ServiceError::Forbidden);
        }
        Ok(task)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{DispatcherConfig, DispatcherHandle};
    use crate::models::task_audit::AuditAction;
    use crate::models::user::{CreateUser, UpdateUser};
    use crate::queue::{MemoryQueue, AUDIT_QUEUE};
    use crate::repository::InMemoryStore;
    use serde_json::json;
    use std::time::Duration;

    struct Fixture {
        service: TaskService,
        store: InMemoryStore,
        queue: Arc<MemoryQueue>,
        handle: DispatcherHandle,
    }

    impl Fixture {
        async fn new() -> Self {
            let store = InMemoryStore::new();
            let queue = Arc::new(MemoryQueue::declared(AUDIT_QUEUE));
            let (dispatcher, handle) =
                AuditDispatcher::spawn(queue.clone(), DispatcherConfig::default());
            let service = TaskService::new(
                Arc::new(store.clone()),
                Arc::new(store.clone()),
                dispatcher,
            );
            Self {
                service,
                store,
                queue,
                handle,
            }
        }

        async fn user(&self, name: &str) -> i64 {
            self.store
                .create_user(CreateUser {
                    name: name.to_string(),
                    email: Some(format!("{name}@example.com")),
                    password_hash: String::new(),
                })
                .await
                .unwrap()
                .id
        }

        /// Flushes the dispatcher and returns every emitted message
        async fn emitted(self) -> Vec<AuditMessage> {
            self.handle.shutdown(Duration::from_secs(1)).await;
            self.queue.pending_messages()
        }
    }

    fn input(title: &str, owner_id: i64) -> CreateTask {
        CreateTask {
            title: title.to_string(),
            description: String::new(),
            status: TaskStatus::Pending,
            owner_id,
        }
    }

    #[tokio::test]
    async fn test_create_overrides_owner() {
        let fx = Fixture::new().await;
        let alice = fx.user("alice").await;
        let bob = fx.user("bob").await;

        let task = fx.service.create_task(alice, input("T1", bob)).await.unwrap();
        assert_eq!(task.owner_id, alice);

        let emitted = fx.emitted().await;
        assert_eq!(emitted.len(), 1);
        assert_eq!(emitted[0].action, AuditAction::Create);
        assert_eq!(emitted[0].new_values.as_ref().unwrap()["owner_id"], json!(alice));
    }

    #[tokio::test]
    async fn test_create_requires_active_user() {
        let fx = Fixture::new().await;
        let carol = fx.user("carol").await;
        fx.store
            .update_user(
                carol,
                &UpdateUser {
                    is_active: Some(false),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let missing = fx.service.create_task(999, input("T", 999)).await;
        assert!(matches!(missing, Err(ServiceError::UserNotFound)));

        let inactive = fx.service.create_task(carol, input("T", carol)).await;
        assert!(matches!(inactive, Err(ServiceError::UserNotFound)));

        assert_eq!(fx.store.task_writes(), 0);
        assert!(fx.emitted().await.is_empty());
    }

    #[tokio::test]
    async fn test_empty_update_writes_nothing() {
        let fx = Fixture::new().await;
        let alice = fx.user("alice").await;
        let task = fx.service.create_task(alice, input("T", alice)).await.unwrap();
        let writes = fx.store.task_writes();

        let err = fx
            .service
            .update_task(task.id, alice, TaskUpdate::default())
            .await
            .unwrap_err();

        assert!(matches!(err, ServiceError::NoFieldsToUpdate));
        assert_eq!(fx.store.task_writes(), writes);
        assert_eq!(fx.emitted().await.len(), 1, "only the create");
    }

    #[tokio::test]
    async fn test_foreign_task_is_forbidden_before_mutation() {
        let fx = Fixture::new().await;
        let alice = fx.user("alice").await;
        let bob = fx.user("bob").await;
        let task = fx.service.create_task(alice, input("mine", alice)).await.unwrap();
        let writes = fx.store.task_writes();

        assert!(matches!(
            fx.service.get_task(task.id, bob).await,
            Err(ServiceError::Forbidden)
        ));
        let update = TaskUpdate {
            title: Some("stolen".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            fx.service.update_task(task.id, bob, update).await,
            Err(ServiceError::Forbidden)
        ));
        assert!(matches!(
            fx.service.delete_task(task.id, bob).await,
            Err(ServiceError::Forbidden)
        ));

        assert_eq!(fx.store.task_writes(), writes);
        assert_eq!(fx.service.get_task(task.id, alice).await.unwrap(), task);

        let emitted = fx.emitted().await;
        assert_eq!(emitted.len(), 1);
        assert_eq!(emitted[0].action, AuditAction::Create);
    }

    #[tokio::test]
    async fn test_missing_task_is_not_found() {
        let fx = Fixture::new().await;
        let alice = fx.user("alice").await;

        assert!(matches!(
            fx.service.get_task(404, alice).await,
            Err(ServiceError::TaskNotFound)
        ));
        assert!(matches!(
            fx.service.delete_task(404, alice).await,
            Err(ServiceError::TaskNotFound)
        ));
    }

    #[tokio::test]
    async fn test_update_changes_only_title() {
        let fx = Fixture::new().await;
        let alice = fx.user("alice").await;
        let task = fx.service.create_task(alice, input("A", alice)).await.unwrap();

        let update = UpdateTaskRequest {
            title: "B".to_string(),
            ..Default::default()
        }
        .into_update()
        .unwrap();
        let updated = fx.service.update_task(task.id, alice, update).await.unwrap();
        assert_eq!(updated.title, "B");
        assert_eq!(updated.status, TaskStatus::Pending);

        let emitted = fx.emitted().await;
        let update_msg = emitted
            .iter()
            .find(|m| m.action == AuditAction::Update)
            .unwrap();
        let changes = update_msg.changes.as_ref().unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes["title"].old, json!("A"));
        assert_eq!(changes["title"].new, json!("B"));
        assert_eq!(update_msg.old_values.as_ref().unwrap()["title"], json!("A"));
    }

    #[tokio::test]
    async fn test_delete_emits_pre_delete_snapshot() {
        let fx = Fixture::new().await;
        let alice = fx.user("alice").await;
        let task = fx.service.create_task(alice, input("bye", alice)).await.unwrap();

        fx.service.delete_task(task.id, alice).await.unwrap();
        assert!(matches!(
            fx.service.get_task(task.id, alice).await,
            Err(ServiceError::TaskNotFound)
        ));

        let emitted = fx.emitted().await;
        let deleted = emitted
            .iter()
            .find(|m| m.action == AuditAction::Delete)
            .unwrap();
        assert_eq!(deleted.entity_id, task.id);
        assert_eq!(deleted.old_values.as_ref().unwrap()["title"], json!("bye"));
        assert!(deleted.new_values.is_none());
    }

    #[tokio::test]
    async fn test_list_filters_by_status() {
        let fx = Fixture::new().await;
        let alice = fx.user("alice").await;
        let first = fx.service.create_task(alice, input("one", alice)).await.unwrap();
        fx.service.create_task(alice, input("two", alice)).await.unwrap();
        fx.service
            .update_task(
                first.id,
                alice,
                TaskUpdate {
                    status: Some(TaskStatus::Completed),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let all = fx.service.list_tasks(alice, None).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].title, "two");

        let done = fx
            .service
            .list_tasks(alice, Some(TaskStatus::Completed))
            .await
            .unwrap();
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].id, first.id);
    }

    #[test]
    fn test_update_request_conversion() {
        let empty = UpdateTaskRequest::default().into_update().unwrap();
        assert!(empty.is_empty());

        let cleared = UpdateTaskRequest {
            description: Some(String::new()),
            ..Default::default()
        }
        .into_update()
        .unwrap();
        assert_eq!(cleared.description.as_deref(), Some(""));

        let status = UpdateTaskRequest {
            status: "in_progress".to_string(),
            ..Default::default()
        }
        .into_update()
        .unwrap();
        assert_eq!(status.status, Some(TaskStatus::InProgress));

        let bad = UpdateTaskRequest {
            status: "done".to_string(),
            ..Default::default()
        }
        .into_update();
        assert!(matches!(bad, Err(ServiceError::InvalidInput(_))));
    }
}
