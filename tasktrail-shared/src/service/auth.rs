//! Registration, login and refresh-token rotation
//!
//! Refresh tokens are stored only as their SHA-256 hex digest. Each refresh
//! revokes the presented token and stores its replacement, so a refresh token
//! works once.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::instrument;
use validator::Validate;

use crate::auth::jwt::{issue_token_pair, validate_refresh_token, TokenPair, TokenType};
use crate::auth::password::{hash_password, validate_password_strength, verify_password};
use crate::error::{ServiceError, ServiceResult};
use crate::models::refresh_token::{hash_token, NewRefreshToken};
use crate::models::user::{CreateUser, User};
use crate::repository::{RefreshTokenRepository, UserRepository};

const INVALID_CREDENTIALS: &str = "invalid email or password";

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct RegisterRequest {
    #[validate(length(min = 1, max = 100))]
    pub name: String,

    #[validate(email)]
    pub email: String,

    pub password: String,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(email)]
    pub email: String,

    #[validate(length(min = 1))]
    pub password: String,
}

/// Signed-in user with a fresh token pair
#[derive(Debug, Clone, Serialize)]
pub struct AuthResponse {
    pub user: User,

    #[serde(flatten)]
    pub tokens: TokenPair,
}

#[derive(Clone)]
pub struct AuthService {
    users: Arc<dyn UserRepository>,
    tokens: Arc<dyn RefreshTokenRepository>,
    jwt_secret: String,
}

impl AuthService {
    pub fn new(
        users: Arc<dyn UserRepository>,
        tokens: Arc<dyn RefreshTokenRepository>,
        jwt_secret: impl Into<String>,
    ) -> Self {
        Self {
            users,
            tokens,
            jwt_secret: jwt_secret.into(),
        }
    }

    #[instrument(skip(self, request), fields(email = %request.email))]
    pub async fn register(&self, request: RegisterRequest) -> ServiceResult<AuthResponse> {
        request
            .validate()
            .map_err(|e| ServiceError::InvalidInput(e.to_string()))?;
        validate_password_strength(&request.password).map_err(ServiceError::InvalidInput)?;

        if self.users.find_user_by_email(&request.email).await?.is_some() {
            return Err(ServiceError::Conflict(
                "user with this email already exists".to_string(),
            ));
        }

        let user = self
            .users
            .create_user(CreateUser {
                name: request.name,
                email: Some(request.email),
                password_hash: hash_password(&request.password)?,
            })
            .await?;

        let tokens = self.start_session(&user).await?;
        tracing::info!(user_id = user.id, "User registered");

        Ok(AuthResponse { user, tokens })
    }

    #[instrument(skip(self, request), fields(email = %request.email))]
    pub async fn login(&self, request: LoginRequest) -> ServiceResult<AuthResponse> {
        request
            .validate()
            .map_err(|_| ServiceError::Unauthorized(INVALID_CREDENTIALS.to_string()))?;

        let user = self
            .users
            .find_user_by_email(&request.email)
            .await?
            .ok_or_else(|| ServiceError::Unauthorized(INVALID_CREDENTIALS.to_string()))?;

        if !user.is_active {
            return Err(ServiceError::InactiveUser);
        }

        if !verify_password(&request.password, &user.password_hash)? {
            tracing::debug!(user_id = user.id, "Password mismatch");
            return Err(ServiceError::Unauthorized(INVALID_CREDENTIALS.to_string()));
        }

        let tokens = self.start_session(&user).await?;
        tracing::info!(user_id = user.id, "User logged in");

        Ok(AuthResponse { user, tokens })
    }

    /// Trades a refresh token for a new pair and revokes the old token
    #[instrument(skip(self, refresh_token))]
    pub async fn refresh(&self, refresh_token: &str) -> ServiceResult<TokenPair> {
        let claims = validate_refresh_token(refresh_token, &self.jwt_secret)
            .map_err(|e| ServiceError::Unauthorized(format!("invalid refresh token: {e}")))?;

        // Revocation is the gate: of two concurrent refreshes only one wins
        if !self.tokens.revoke_refresh_token(&hash_token(refresh_token)).await? {
            return Err(ServiceError::Unauthorized(
                "refresh token not found or expired".to_string(),
            ));
        }

        let (pair, _) = issue_token_pair(claims.user_id, claims.email, &self.jwt_secret)?;
        self.store_refresh_token(claims.user_id, &pair.refresh_token)
            .await?;

        tracing::debug!(user_id = claims.user_id, "Refresh token rotated");
        Ok(pair)
    }

    /// Revokes every refresh token the user holds
    #[instrument(skip(self))]
    pub async fn logout(&self, user_id: i64) -> ServiceResult<u64> {
        let revoked = self.tokens.revoke_all_refresh_tokens(user_id).await?;
        tracing::info!(user_id, revoked, "User logged out");
        Ok(revoked)
    }

    /// Issues and stores a token pair for a user who is already trusted
    pub async fn start_session(&self, user: &User) -> ServiceResult<TokenPair> {
        let (pair, _) = issue_token_pair(user.id, user.email.clone(), &self.jwt_secret)?;
        self.store_refresh_token(user.id, &pair.refresh_token).await?;
        self.users.update_last_login(user.id).await?;
        Ok(pair)
    }

    async fn store_refresh_token(&self, user_id: i64, token: &str) -> ServiceResult<()> {
        self.tokens
            .save_refresh_token(NewRefreshToken {
                user_id,
                token_hash: hash_token(token),
                expires_at: Utc::now() + TokenType::Refresh.default_expiration(),
            })
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::jwt::validate_access_token;
    use crate::models::user::UpdateUser;
    use crate::models::refresh_token::RefreshToken;
    use crate::repository::{InMemoryStore, RepositoryResult};

    const SECRET: &str = "test-secret-that-is-at-least-32-bytes";

    fn service() -> (AuthService, InMemoryStore) {
        let store = InMemoryStore::new();
        let service = AuthService::new(Arc::new(store.clone()), Arc::new(store.clone()), SECRET);
        (service, store)
    }

    fn register_request(email: &str) -> RegisterRequest {
        RegisterRequest {
            name: "Grace".to_string(),
            email: email.to_string(),
            password: "compiler42".to_string(),
        }
    }

    fn login_request(email: &str, password: &str) -> LoginRequest {
        LoginRequest {
            email: email.to_string(),
            password: password.to_string(),
        }
    }

    #[tokio::test]
    async fn test_register_issues_tokens() {
        let (service, store) = service();

        let response = service.register(register_request("grace@example.com")).await.unwrap();

        let claims = validate_access_token(&response.tokens.access_token, SECRET).unwrap();
        assert_eq!(claims.user_id, response.user.id);
        assert_eq!(store.list_refresh_tokens(response.user.id).await.unwrap().len(), 1);

        let user = store.get_user(response.user.id).await.unwrap().unwrap();
        assert!(user.last_login.is_some());
    }

    #[tokio::test]
    async fn test_register_duplicate_email_conflicts() {
        let (service, _) = service();
        service.register(register_request("grace@example.com")).await.unwrap();

        let err = service
            .register(register_request("GRACE@example.com"))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_login_rejects_bad_credentials() {
        let (service, _) = service();
        service.register(register_request("grace@example.com")).await.unwrap();

        let wrong_password = service
            .login(login_request("grace@example.com", "nope12345"))
            .await
            .unwrap_err();
        assert!(
            matches!(wrong_password, ServiceError::Unauthorized(ref m) if m == INVALID_CREDENTIALS)
        );

        let unknown = service
            .login(login_request("nobody@example.com", "compiler42"))
            .await
            .unwrap_err();
        assert!(matches!(unknown, ServiceError::Unauthorized(ref m) if m == INVALID_CREDENTIALS));

        let ok = service
            .login(login_request("grace@example.com", "compiler42"))
            .await
            .unwrap();
        assert_eq!(ok.user.email.as_deref(), Some("grace@example.com"));
    }

    #[tokio::test]
    async fn test_inactive_user_cannot_login() {
        let (service, store) = service();
        let registered = service.register(register_request("grace@example.com")).await.unwrap();
        store
            .update_user(
                registered.user.id,
                &UpdateUser {
                    is_active: Some(false),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let err = service
            .login(login_request("grace@example.com", "compiler42"))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InactiveUser));
    }

    #[tokio::test]
    async fn test_refresh_rotates_token() {
        let (service, _) = service();
        let registered = service.register(register_request("grace@example.com")).await.unwrap();
        let original = registered.tokens.refresh_token;

        let rotated = service.refresh(&original).await.unwrap();
        assert_ne!(rotated.refresh_token, original);

        let reused = service.refresh(&original).await.unwrap_err();
        assert!(
            matches!(reused, ServiceError::Unauthorized(ref m) if m == "refresh token not found or expired")
        );

        service.refresh(&rotated.refresh_token).await.unwrap();
    }

    /// Token store that yields before every call, so concurrent callers interleave
    struct YieldingTokens(InMemoryStore);

    #[async_trait::async_trait]
    impl RefreshTokenRepository for YieldingTokens {
        async fn save_refresh_token(
            &self,
            data: NewRefreshToken,
        ) -> RepositoryResult<RefreshToken> {
            tokio::task::yield_now().await;
            self.0.save_refresh_token(data).await
        }

        async fn find_refresh_token(
            &self,
            token_hash: &str,
        ) -> RepositoryResult<Option<RefreshToken>> {
            tokio::task::yield_now().await;
            self.0.find_refresh_token(token_hash).await
        }

        async fn list_refresh_tokens(
            &self,
            user_id: i64,
        ) -> RepositoryResult<Vec<RefreshToken>> {
            self.0.list_refresh_tokens(user_id).await
        }

        async fn revoke_refresh_token(
            &self,
            token_hash: &str,
        ) -> RepositoryResult<bool> {
            tokio::task::yield_now().await;
            self.0.revoke_refresh_token(token_hash).await
        }

        async fn revoke_all_refresh_tokens(
            &self,
            user_id: i64,
        ) -> RepositoryResult<u64> {
            self.0.revoke_all_refresh_tokens(user_id).await
        }

        async fn delete_expired_refresh_tokens(&self) -> RepositoryResult<u64> {
            self.0.delete_expired_refresh_tokens().await
        }
    }

    #[tokio::test]
    async fn test_concurrent_refresh_with_same_token_succeeds_once() {
        let store = InMemoryStore::new();
        let service = AuthService::new(
            Arc::new(store.clone()),
            Arc::new(YieldingTokens(store.clone())),
            SECRET,
        );
        let registered = service.register(register_request("grace@example.com")).await.unwrap();
        let token = registered.tokens.refresh_token;

        let (first, second) = tokio::join!(service.refresh(&token), service.refresh(&token));

        assert_eq!(
            [first.is_ok(), second.is_ok()].iter().filter(|ok| **ok).count(),
            1
        );
        assert_eq!(store.list_refresh_tokens(registered.user.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_access_token_is_not_a_refresh_token() {
        let (service, _) = service();
        let registered = service.register(register_request("grace@example.com")).await.unwrap();

        let err = service
            .refresh(&registered.tokens.access_token)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn test_logout_revokes_all_tokens() {
        let (service, _) = service();
        let registered = service.register(register_request("grace@example.com")).await.unwrap();
        let second = service
            .login(login_request("grace@example.com", "compiler42"))
            .await
            .unwrap();

        assert_eq!(service.logout(registered.user.id).await.unwrap(), 2);

        assert!(service.refresh(&registered.tokens.refresh_token).await.is_err());
        assert!(service.refresh(&second.tokens.refresh_token).await.is_err());
    }
}
