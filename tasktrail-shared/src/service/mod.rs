//! Business services
//!
//! Services own the rules: ownership checks, sparse updates, audit emission,
//! credential handling. They talk to storage only through the repository
//! traits, so every service runs against [`crate::repository::PgStore`] in
//! production and [`crate::repository::InMemoryStore`] in tests.

pub mod auth;
pub mod task;
pub mod user;

pub use auth::{AuthResponse, AuthService, LoginRequest, RegisterRequest};
pub use task::{TaskService, UpdateTaskRequest};
pub use user::{AvatarConfig, AvatarDownload, CreateUserRequest, UserService};
