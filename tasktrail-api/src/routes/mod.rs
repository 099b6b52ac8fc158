/// API route handlers, one module per resource
///
/// - `health`: liveness and dependency status
/// - `auth`: register, login, refresh, logout
/// - `tasks`: task CRUD for the caller
/// - `users`: user CRUD and avatars

pub mod auth;
pub mod health;
pub mod tasks;
pub mod users;
