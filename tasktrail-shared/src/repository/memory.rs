/// In-process repository
///
/// Mirrors the PostgreSQL constraints that the services rely on: unique
/// emails, the task owner foreign key, per-user avatar upsert, cascading user
/// deletes and audit `message_id` deduplication.
///
/// Failure hooks let tests drive the error paths:
///
/// ```
/// use tasktrail_shared::repository::InMemoryStore;
///
/// let store = InMemoryStore::new();
/// store.fail_next_audit_inserts(1);
/// ```

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

use super::{
    AvatarRepository, HealthCheck, RefreshTokenRepository, RepositoryError, RepositoryResult,
    TaskAuditRepository, TaskRepository, UserRepository,
};
use crate::models::avatar::{Avatar, SaveAvatar};
use crate::models::refresh_token::{NewRefreshToken, RefreshToken};
use crate::models::task::{CreateTask, Task, TaskStatus, TaskUpdate};
use crate::models::task_audit::{NewTaskAudit, TaskAudit};
use crate::models::user::{CreateUser, UpdateUser, User};

#[derive(Default)]
struct Tables {
    next_id: i64,
    users: BTreeMap<i64, User>,
    tasks: BTreeMap<i64, Task>,
    avatars: HashMap<i64, Avatar>,
    audits: Vec<TaskAudit>,
    refresh_tokens: Vec<RefreshToken>,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

#[derive(Default)]
struct Faults {
    unavailable: AtomicBool,
    audit_insert_failures: AtomicU32,
    task_writes: AtomicU64,
}

/// Cloneable in-memory store; clones share state
#[derive(Clone, Default)]
pub struct InMemoryStore {
    tables: Arc<RwLock<Tables>>,
    faults: Arc<Faults>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every call fail with `Unavailable` until reset
    pub fn set_unavailable(&self, unavailable: bool) {
        self.faults.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// The next `count` audit inserts fail with `Unavailable`
    pub fn fail_next_audit_inserts(&self, count: u32) {
        self.faults
            .audit_insert_failures
            .store(count, Ordering::SeqCst);
    }

    /// Number of task create/update/delete calls that reached the store
    pub fn task_writes(&self) -> u64 {
        self.faults.task_writes.load(Ordering::SeqCst)
    }

    /// Every audit row, in insertion order
    pub async fn audits(&self) -> Vec<TaskAudit> {
        self.tables.read().await.audits.clone()
    }

    fn check_available(&self) -> RepositoryResult<()> {
        if self.faults.unavailable.load(Ordering::SeqCst) {
            return Err(RepositoryError::Unavailable(
                "in-memory store marked unavailable".to_string(),
            ));
        }
        Ok(())
    }

    fn take_audit_failure(&self) -> bool {
        self.faults
            .audit_insert_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl TaskRepository for InMemoryStore {
    async fn create_task(&self, data: CreateTask) -> RepositoryResult<Task> {
        self.check_available()?;
        self.faults.task_writes.fetch_add(1, Ordering::SeqCst);

        let mut tables = self.tables.write().await;
        if !tables.users.contains_key(&data.owner_id) {
            return Err(RepositoryError::Conflict(format!(
                "owner {} does not exist",
                data.owner_id
            )));
        }

        let now = Utc::now();
        let task = Task {
            id: tables.next_id(),
            title: data.title,
            description: data.description,
            status: data.status,
            owner_id: data.owner_id,
            created_at: now,
            updated_at: now,
        };
        tables.tasks.insert(task.id, task.clone());
        Ok(task)
    }

    async fn get_task(&self, id: i64) -> RepositoryResult<Option<Task>> {
        self.check_available()?;
        Ok(self.tables.read().await.tasks.get(&id).cloned())
    }

    async fn update_task(&self, id: i64, update: &TaskUpdate) -> RepositoryResult<Option<Task>> {
        self.check_available()?;
        self.faults.task_writes.fetch_add(1, Ordering::SeqCst);

        let mut tables = self.tables.write().await;
        let Some(current) = tables.tasks.get(&id) else {
            return Ok(None);
        };

        let mut next = update.apply_to(current);
        next.updated_at = Utc::now();
        tables.tasks.insert(id, next.clone());
        Ok(Some(next))
    }

    async fn delete_task(&self, id: i64) -> RepositoryResult<bool> {
        self.check_available()?;
        self.faults.task_writes.fetch_add(1, Ordering::SeqCst);
        Ok(self.tables.write().await.tasks.remove(&id).is_some())
    }

    async fn list_tasks(
        &self,
        owner_id: i64,
        status: Option<TaskStatus>,
    ) -> RepositoryResult<Vec<Task>> {
        self.check_available()?;
        let tables = self.tables.read().await;

        let mut tasks: Vec<Task> = tables
            .tasks
            .values()
            .filter(|t| t.owner_id == owner_id)
            .filter(|t| status.map_or(true, |s| t.status == s))
            .cloned()
            .collect();

        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(tasks)
    }
}

#[async_trait]
impl UserRepository for InMemoryStore {
    async fn create_user(&self, data: CreateUser) -> RepositoryResult<User> {
        self.check_available()?;
        let mut tables = self.tables.write().await;

        if let Some(email) = &data.email {
            let taken = tables
                .users
                .values()
                .any(|u| u.email.as_deref().is_some_and(|e| e.eq_ignore_ascii_case(email)));
            if taken {
                return Err(RepositoryError::Conflict(format!("email {email} already exists")));
            }
        }

        let now = Utc::now();
        let user = User {
            id: tables.next_id(),
            name: data.name,
            email: data.email,
            password_hash: data.password_hash,
            avatar_url: None,
            is_active: true,
            last_login: None,
            created_at: now,
            updated_at: now,
        };
        tables.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn get_user(&self, id: i64) -> RepositoryResult<Option<User>> {
        self.check_available()?;
        Ok(self.tables.read().await.users.get(&id).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> RepositoryResult<Option<User>> {
        self.check_available()?;
        Ok(self
            .tables
            .read()
            .await
            .users
            .values()
            .find(|u| u.email.as_deref().is_some_and(|e| e.eq_ignore_ascii_case(email)))
            .cloned())
    }

    async fn list_users(&self) -> RepositoryResult<Vec<User>> {
        self.check_available()?;
        Ok(self.tables.read().await.users.values().cloned().collect())
    }

    async fn update_user(&self, id: i64, update: &UpdateUser) -> RepositoryResult<Option<User>> {
        self.check_available()?;
        let mut tables = self.tables.write().await;

        if let Some(email) = &update.email {
            let taken = tables.users.values().any(|u| {
                u.id != id && u.email.as_deref().is_some_and(|e| e.eq_ignore_ascii_case(email))
            });
            if taken {
                return Err(RepositoryError::Conflict(format!("email {email} already exists")));
            }
        }

        let Some(user) = tables.users.get_mut(&id) else {
            return Ok(None);
        };
        if let Some(name) = &update.name {
            user.name = name.clone();
        }
        if let Some(email) = &update.email {
            user.email = Some(email.clone());
        }
        if let Some(is_active) = update.is_active {
            user.is_active = is_active;
        }
        if let Some(avatar_url) = &update.avatar_url {
            user.avatar_url = avatar_url.clone();
        }
        user.updated_at = Utc::now();
        Ok(Some(user.clone()))
    }

    async fn update_last_login(&self, id: i64) -> RepositoryResult<()> {
        self.check_available()?;
        if let Some(user) = self.tables.write().await.users.get_mut(&id) {
            user.last_login = Some(Utc::now());
        }
        Ok(())
    }

    async fn delete_user(&self, id: i64) -> RepositoryResult<bool> {
        self.check_available()?;
        let mut tables = self.tables.write().await;

        if tables.users.remove(&id).is_none() {
            return Ok(false);
        }
        tables.tasks.retain(|_, t| t.owner_id != id);
        tables.avatars.remove(&id);
        tables.refresh_tokens.retain(|t| t.user_id != id);
        Ok(true)
    }
}

#[async_trait]
impl AvatarRepository for InMemoryStore {
    async fn save_avatar(&self, data: SaveAvatar) -> RepositoryResult<Avatar> {
        self.check_available()?;
        let mut tables = self.tables.write().await;

        if !tables.users.contains_key(&data.user_id) {
            return Err(RepositoryError::Conflict(format!(
                "user {} does not exist",
                data.user_id
            )));
        }

        let now = Utc::now();
        let (id, created_at) = match tables.avatars.get(&data.user_id) {
            Some(existing) => (existing.id, existing.created_at),
            None => (tables.next_id(), now),
        };
        let avatar = Avatar {
            id,
            user_id: data.user_id,
            file_path: data.file_path,
            file_size: data.file_size,
            content_type: data.content_type,
            created_at,
            updated_at: now,
        };
        tables.avatars.insert(avatar.user_id, avatar.clone());
        Ok(avatar)
    }

    async fn get_avatar(&self, user_id: i64) -> RepositoryResult<Option<Avatar>> {
        self.check_available()?;
        Ok(self.tables.read().await.avatars.get(&user_id).cloned())
    }

    async fn delete_avatar(&self, user_id: i64) -> RepositoryResult<bool> {
        self.check_available()?;
        Ok(self.tables.write().await.avatars.remove(&user_id).is_some())
    }
}

#[async_trait]
impl TaskAuditRepository for InMemoryStore {
    async fn insert_audit(&self, data: NewTaskAudit) -> RepositoryResult<bool> {
        self.check_available()?;
        if self.take_audit_failure() {
            return Err(RepositoryError::Unavailable(
                "injected audit insert failure".to_string(),
            ));
        }

        let mut tables = self.tables.write().await;
        if let Some(message_id) = &data.message_id {
            if tables
                .audits
                .iter()
                .any(|a| a.message_id.as_ref() == Some(message_id))
            {
                return Ok(false);
            }
        }

        let audit = TaskAudit {
            id: tables.next_id(),
            user_id: data.user_id,
            action: data.action,
            entity_type: data.entity_type,
            entity_id: data.entity_id,
            old_values: data.old_values,
            new_values: data.new_values,
            changes: data.changes,
            message_id: data.message_id,
            changed_at: data.changed_at,
        };
        tables.audits.push(audit);
        Ok(true)
    }

    async fn list_audits(
        &self,
        entity_type: &str,
        entity_id: i64,
    ) -> RepositoryResult<Vec<TaskAudit>> {
        self.check_available()?;
        Ok(self
            .tables
            .read()
            .await
            .audits
            .iter()
            .filter(|a| a.entity_type == entity_type && a.entity_id == entity_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl RefreshTokenRepository for InMemoryStore {
    async fn save_refresh_token(&self, data: NewRefreshToken) -> RepositoryResult<RefreshToken> {
        self.check_available()?;
        let mut tables = self.tables.write().await;

        if tables
            .refresh_tokens
            .iter()
            .any(|t| t.token_hash == data.token_hash)
        {
            return Err(RepositoryError::Conflict("duplicate token hash".to_string()));
        }

        let token = RefreshToken {
            id: tables.next_id(),
            user_id: data.user_id,
            token_hash: data.token_hash,
            expires_at: data.expires_at,
            created_at: Utc::now(),
            revoked: false,
        };
        tables.refresh_tokens.push(token.clone());
        Ok(token)
    }

    async fn find_refresh_token(&self, token_hash: &str) -> RepositoryResult<Option<RefreshToken>> {
        self.check_available()?;
        let now = Utc::now();
        Ok(self
            .tables
            .read()
            .await
            .refresh_tokens
            .iter()
            .find(|t| t.token_hash == token_hash && t.is_usable(now))
            .cloned())
    }

    async fn list_refresh_tokens(&self, user_id: i64) -> RepositoryResult<Vec<RefreshToken>> {
        self.check_available()?;
        let now = Utc::now();
        let mut tokens: Vec<RefreshToken> = self
            .tables
            .read()
            .await
            .refresh_tokens
            .iter()
            .filter(|t| t.user_id == user_id && t.is_usable(now))
            .cloned()
            .collect();
        tokens.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(tokens)
    }

    async fn revoke_refresh_token(&self, token_hash: &str) -> RepositoryResult<bool> {
        self.check_available()?;
        let now = Utc::now();
        let mut tables = self.tables.write().await;
        match tables
            .refresh_tokens
            .iter_mut()
            .find(|t| t.token_hash == token_hash && t.is_usable(now))
        {
            Some(token) => {
                token.revoked = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn revoke_all_refresh_tokens(&self, user_id: i64) -> RepositoryResult<u64> {
        self.check_available()?;
        let mut tables = self.tables.write().await;
        let mut count = 0;
        for token in tables
            .refresh_tokens
            .iter_mut()
            .filter(|t| t.user_id == user_id && !t.revoked)
        {
            token.revoked = true;
            count += 1;
        }
        Ok(count)
    }

    async fn delete_expired_refresh_tokens(&self) -> RepositoryResult<u64> {
        self.check_available()?;
        let now = Utc::now();
        let mut tables = self.tables.write().await;
        let before = tables.refresh_tokens.len();
        tables.refresh_tokens.retain(|t| t.expires_at > now);
        Ok((before - tables.refresh_tokens.len()) as u64)
    }
}

#[async_trait]
impl HealthCheck for InMemoryStore {
    async fn ping(&self) -> RepositoryResult<()> {
        self.check_available()
    }
}
