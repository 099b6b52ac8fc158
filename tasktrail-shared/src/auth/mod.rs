/// Authentication primitives
///
/// - [`password`]: Argon2id hashing and verification
/// - [`jwt`]: HS256 access and refresh tokens
/// - [`middleware`]: axum bearer-token layer and the `AuthContext` extractor
///
/// The orchestration (register, login, refresh rotation, logout) lives in
/// `crate::service::auth`.

pub mod jwt;
pub mod middleware;
pub mod password;
