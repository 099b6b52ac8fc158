/// Authentication endpoints
///
/// - `POST /v1/auth/register`: create an account and sign in
/// - `POST /v1/auth/login`: exchange email and password for tokens
/// - `POST /v1/auth/refresh`: rotate a refresh token
/// - `POST /v1/auth/logout`: revoke every refresh token of the caller
///
/// Register and login answer with the user and a token pair:
///
/// ```json
/// {
///   "user": { "id": 1, "name": "Grace", "email": "grace@example.com", ... },
///   "access_token": "eyJ...",
///   "refresh_token": "eyJ...",
///   "expires_in": 900
/// }
/// ```

use crate::{app::AppState, error::ApiResult};
use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use tasktrail_shared::auth::jwt::TokenPair;
use tasktrail_shared::auth::middleware::AuthContext;
use tasktrail_shared::service::{AuthResponse, LoginRequest, RegisterRequest};
use validator::Validate;

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Serialize)]
pub struct LogoutResponse {
    pub revoked: u64,
}

/// # Errors
///
/// - `422 Unprocessable Entity`: malformed name or email
/// - `400 Bad Request`: weak password
/// - `409 Conflict`: email already registered
pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> ApiResult<(StatusCode, Json<AuthResponse>)> {
    req.validate()?;
    let response = state.auth.register(req).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

/// # Errors
///
/// - `401 Unauthorized`: unknown email or wrong password
/// - `403 Forbidden`: the account is deactivated
pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> ApiResult<Json<AuthResponse>> {
    Ok(Json(state.auth.login(req).await?))
}

/// The presented token stops working once this succeeds
pub async fn refresh(
    State(state): State<AppState>,
    Json(req): Json<RefreshRequest>,
) -> ApiResult<Json<TokenPair>> {
    Ok(Json(state.auth.refresh(&req.refresh_token).await?))
}

pub async fn logout(
    State(state): State<AppState>,
    auth: AuthContext,
) -> ApiResult<Json<LogoutResponse>> {
    let revoked = state.auth.logout(auth.user_id).await?;
    Ok(Json(LogoutResponse { revoked }))
}
