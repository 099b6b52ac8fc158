//! Service-level errors
//!
//! These are what the services surface to their callers. The HTTP layer maps
//! each variant to a status code; the services themselves never log expected
//! outcomes such as `Forbidden` or `TaskNotFound`.

use thiserror::Error;

use crate::auth::jwt::JwtError;
use crate::auth::password::PasswordError;
use crate::repository::RepositoryError;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("user not found")]
    UserNotFound,

    #[error("task not found")]
    TaskNotFound,

    #[error("avatar not found")]
    AvatarNotFound,

    /// Acting user does not own the resource
    #[error("forbidden")]
    Forbidden,

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("no fields to update")]
    NoFieldsToUpdate,

    #[error("{0}")]
    Unauthorized(String),

    #[error("user is not active")]
    InactiveUser,

    #[error("conflict: {0}")]
    Conflict(String),

    /// The caller's cancellation token fired mid-operation
    #[error("operation cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(String),
}

pub type ServiceResult<T> = Result<T, ServiceError>;

impl From<RepositoryError> for ServiceError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::Conflict(msg) => ServiceError::Conflict(msg),
            other => ServiceError::Internal(other.to_string()),
        }
    }
}

impl From<PasswordError> for ServiceError {
    fn from(err: PasswordError) -> Self {
        ServiceError::Internal(err.to_string())
    }
}

impl From<JwtError> for ServiceError {
    fn from(err: JwtError) -> Self {
        match err {
            JwtError::CreateError(msg) => ServiceError::Internal(msg),
            other => ServiceError::Unauthorized(other.to_string()),
        }
    }
}

impl From<std::io::Error> for ServiceError {
    fn from(err: std::io::Error) -> Self {
        ServiceError::Internal(format!("I/O error: {err}"))
    }
}
