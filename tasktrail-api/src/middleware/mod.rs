/// Middleware for the API server
///
/// - `security`: response security headers
///
/// Bearer authentication lives in `tasktrail_shared::auth::middleware` and is
/// wired per route group in `crate::app`.

pub mod security;
