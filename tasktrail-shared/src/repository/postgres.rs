/// PostgreSQL implementation of the repository traits

use async_trait::async_trait;
use sqlx::PgPool;

use super::{
    AvatarRepository, HealthCheck, RefreshTokenRepository, RepositoryResult, TaskAuditRepository,
    TaskRepository, UserRepository,
};
use crate::db::pool::health_check;
use crate::models::avatar::{Avatar, SaveAvatar};
use crate::models::refresh_token::{NewRefreshToken, RefreshToken};
use crate::models::task::{CreateTask, Task, TaskStatus, TaskUpdate};
use crate::models::task_audit::{NewTaskAudit, TaskAudit};
use crate::models::user::{CreateUser, UpdateUser, User};

/// Repository gateway over a shared connection pool
///
/// Cloning is cheap; every clone shares the same pool.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl TaskRepository for PgStore {
    async fn create_task(&self, data: CreateTask) -> RepositoryResult<Task> {
        Ok(Task::create(&self.pool, data).await?)
    }

    async fn get_task(&self, id: i64) -> RepositoryResult<Option<Task>> {
        Ok(Task::find_by_id(&self.pool, id).await?)
    }

    async fn update_task(&self, id: i64, update: &TaskUpdate) -> RepositoryResult<Option<Task>> {
        Ok(Task::update(&self.pool, id, update).await?)
    }

    async fn delete_task(&self, id: i64) -> RepositoryResult<bool> {
        Ok(Task::delete(&self.pool, id).await?)
    }

    async fn list_tasks(
        &self,
        owner_id: i64,
        status: Option<TaskStatus>,
    ) -> RepositoryResult<Vec<Task>> {
        Ok(Task::list_by_owner(&self.pool, owner_id, status).await?)
    }
}

#[async_trait]
impl UserRepository for PgStore {
    async fn create_user(&self, data: CreateUser) -> RepositoryResult<User> {
        Ok(User::create(&self.pool, data).await?)
    }

    async fn get_user(&self, id: i64) -> RepositoryResult<Option<User>> {
        Ok(User::find_by_id(&self.pool, id).await?)
    }

    async fn find_user_by_email(&self, email: &str) -> RepositoryResult<Option<User>> {
        Ok(User::find_by_email(&self.pool, email).await?)
    }

    async fn list_users(&self) -> RepositoryResult<Vec<User>> {
        Ok(User::list(&self.pool).await?)
    }

    async fn update_user(&self, id: i64, update: &UpdateUser) -> RepositoryResult<Option<User>> {
        Ok(User::update(&self.pool, id, update).await?)
    }

    async fn update_last_login(&self, id: i64) -> RepositoryResult<()> {
        Ok(User::update_last_login(&self.pool, id).await?)
    }

    async fn delete_user(&self, id: i64) -> RepositoryResult<bool> {
        Ok(User::delete(&self.pool, id).await?)
    }
}

#[async_trait]
impl AvatarRepository for PgStore {
    async fn save_avatar(&self, data: SaveAvatar) -> RepositoryResult<Avatar> {
        Ok(Avatar::save(&self.pool, data).await?)
    }

    async fn get_avatar(&self, user_id: i64) -> RepositoryResult<Option<Avatar>> {
        Ok(Avatar::find_by_user(&self.pool, user_id).await?)
    }

    async fn delete_avatar(&self, user_id: i64) -> RepositoryResult<bool> {
        Ok(Avatar::delete_by_user(&self.pool, user_id).await?)
    }
}

#[async_trait]
impl TaskAuditRepository for PgStore {
    async fn insert_audit(&self, data: NewTaskAudit) -> RepositoryResult<bool> {
        Ok(TaskAudit::insert(&self.pool, data).await?)
    }

    async fn list_audits(
        &self,
        entity_type: &str,
        entity_id: i64,
    ) -> RepositoryResult<Vec<TaskAudit>> {
        Ok(TaskAudit::list_for_entity(&self.pool, entity_type, entity_id).await?)
    }
}

#[async_trait]
impl RefreshTokenRepository for PgStore {
    async fn save_refresh_token(&self, data: NewRefreshToken) -> RepositoryResult<RefreshToken> {
        Ok(RefreshToken::save(&self.pool, data).await?)
    }

    async fn find_refresh_token(&self, token_hash: &str) -> RepositoryResult<Option<RefreshToken>> {
        Ok(RefreshToken::find_active_by_hash(&self.pool, token_hash).await?)
    }

    async fn list_refresh_tokens(&self, user_id: i64) -> RepositoryResult<Vec<RefreshToken>> {
        Ok(RefreshToken::list_active_for_user(&self.pool, user_id).await?)
    }

    async fn revoke_refresh_token(&self, token_hash: &str) -> RepositoryResult<bool> {
        Ok(RefreshToken::revoke(&self.pool, token_hash).await?)
    }

    async fn revoke_all_refresh_tokens(&self, user_id: i64) -> RepositoryResult<u64> {
        Ok(RefreshToken::revoke_all_for_user(&self.pool, user_id).await?)
    }

    async fn delete_expired_refresh_tokens(&self) -> RepositoryResult<u64> {
        Ok(RefreshToken::delete_expired(&self.pool).await?)
    }
}

#[async_trait]
impl HealthCheck for PgStore {
    async fn ping(&self) -> RepositoryResult<()> {
        Ok(health_check(&self.pool).await?)
    }
}
