/// Database models
///
/// Each model owns its SQL as static async functions taking a `&PgPool`.
/// Services do not call these directly; they go through the traits in
/// `crate::repository`, whose PostgreSQL implementation delegates here.
///
/// # Models
///
/// - `user`: accounts and credentials
/// - `task`: user-owned tasks
/// - `avatar`: avatar file metadata
/// - `task_audit`: append-only task history
/// - `refresh_token`: hashed refresh tokens

pub mod avatar;
pub mod refresh_token;
pub mod task;
pub mod task_audit;
pub mod user;
