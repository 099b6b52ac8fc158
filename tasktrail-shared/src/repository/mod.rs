/// Persistence gateway
///
/// The services depend on these traits rather than on `PgPool` directly.
/// Single-entity lookups return `Ok(None)` for "not found"; turning that into
/// a typed error is the caller's job.
///
/// Two implementations ship with the crate:
///
/// - [`postgres::PgStore`]: the production gateway, delegating to the SQL in
///   `crate::models`
/// - [`memory::InMemoryStore`]: a lock-protected in-process store used by
///   tests and local runs, with hooks for injecting failures
///
/// All methods are cancel-safe in the async sense: dropping the returned
/// future abandons the query without leaving partial writes behind.

use async_trait::async_trait;
use thiserror::Error;

use crate::models::avatar::{Avatar, SaveAvatar};
use crate::models::refresh_token::{NewRefreshToken, RefreshToken};
use crate::models::task::{CreateTask, Task, TaskStatus, TaskUpdate};
use crate::models::task_audit::{NewTaskAudit, TaskAudit};
use crate::models::user::{CreateUser, UpdateUser, User};

pub mod memory;
pub mod postgres;

pub use memory::InMemoryStore;
pub use postgres::PgStore;

/// Persistence failures
#[derive(Error, Debug)]
pub enum RepositoryError {
    /// A unique or foreign key constraint rejected the write
    #[error("constraint violation: {0}")]
    Conflict(String),

    /// The store could not be reached (pool timeout, closed pool, I/O)
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("database error: {0}")]
    Database(#[source] sqlx::Error),
}

impl From<sqlx::Error> for RepositoryError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db_err)
                if db_err.is_unique_violation() || db_err.is_foreign_key_violation() =>
            {
                RepositoryError::Conflict(db_err.message().to_string())
            }
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                RepositoryError::Unavailable(err.to_string())
            }
            _ => RepositoryError::Database(err),
        }
    }
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;

#[async_trait]
pub trait TaskRepository: Send + Sync {
    async fn create_task(&self, data: CreateTask) -> RepositoryResult<Task>;

    async fn get_task(&self, id: i64) -> RepositoryResult<Option<Task>>;

    /// Returns `None` if the task vanished before the write
    async fn update_task(&self, id: i64, update: &TaskUpdate) -> RepositoryResult<Option<Task>>;

    /// Returns `false` if nothing was deleted
    async fn delete_task(&self, id: i64) -> RepositoryResult<bool>;

    /// Owner's tasks, newest first
    async fn list_tasks(
        &self,
        owner_id: i64,
        status: Option<TaskStatus>,
    ) -> RepositoryResult<Vec<Task>>;
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn create_user(&self, data: CreateUser) -> RepositoryResult<User>;

    async fn get_user(&self, id: i64) -> RepositoryResult<Option<User>>;

    async fn find_user_by_email(&self, email: &str) -> RepositoryResult<Option<User>>;

    async fn list_users(&self) -> RepositoryResult<Vec<User>>;

    async fn update_user(&self, id: i64, update: &UpdateUser) -> RepositoryResult<Option<User>>;

    async fn update_last_login(&self, id: i64) -> RepositoryResult<()>;

    async fn delete_user(&self, id: i64) -> RepositoryResult<bool>;
}

#[async_trait]
pub trait AvatarRepository: Send + Sync {
    /// Inserts or replaces the user's avatar row
    async fn save_avatar(&self, data: SaveAvatar) -> RepositoryResult<Avatar>;

    async fn get_avatar(&self, user_id: i64) -> RepositoryResult<Option<Avatar>>;

    async fn delete_avatar(&self, user_id: i64) -> RepositoryResult<bool>;
}

#[async_trait]
pub trait TaskAuditRepository: Send + Sync {
    /// Appends a record; `false` means a row with the same message ID exists
    async fn insert_audit(&self, data: NewTaskAudit) -> RepositoryResult<bool>;

    async fn list_audits(&self, entity_type: &str, entity_id: i64)
        -> RepositoryResult<Vec<TaskAudit>>;
}

#[async_trait]
pub trait RefreshTokenRepository: Send + Sync {
    async fn save_refresh_token(&self, data: NewRefreshToken) -> RepositoryResult<RefreshToken>;

    /// Unrevoked, unexpired token with this hash
    async fn find_refresh_token(&self, token_hash: &str) -> RepositoryResult<Option<RefreshToken>>;

    async fn list_refresh_tokens(&self, user_id: i64) -> RepositoryResult<Vec<RefreshToken>>;

    /// Revokes a usable token; only one caller ever gets `true` for a hash
    async fn revoke_refresh_token(&self, token_hash: &str) -> RepositoryResult<bool>;

    async fn revoke_all_refresh_tokens(&self, user_id: i64) -> RepositoryResult<u64>;

    async fn delete_expired_refresh_tokens(&self) -> RepositoryResult<u64>;
}

/// Liveness check for the backing store
#[async_trait]
pub trait HealthCheck: Send + Sync {
    async fn ping(&self) -> RepositoryResult<()>;
}
