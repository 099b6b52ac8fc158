#![allow(dead_code)]

/// Shared harness for the API tests
///
/// Builds the real router over an `InMemoryStore` and a `MemoryQueue`, with
/// avatars written to a throwaway directory. Requests go through
/// `tower::ServiceExt::oneshot`, so no socket is opened.

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::response::Response;
use axum::Router;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tasktrail_api::app::{build_router, AppState};
use tasktrail_api::config::{
    ApiConfig, AuditSettings, Config, DatabaseConfig, JwtConfig, RedisSettings, SeedSettings,
};
use tasktrail_shared::audit::{AuditDispatcher, AuditMessage, DispatcherHandle};
use tasktrail_shared::queue::{MemoryQueue, AUDIT_QUEUE};
use tasktrail_shared::repository::InMemoryStore;
use tasktrail_shared::service::AvatarConfig;
use tower::ServiceExt;
use uuid::Uuid;

pub const JWT_SECRET: &str = "integration-test-secret-0123456789abcdef";
pub const PASSWORD: &str = "compiler42";

/// A signed-in user
pub struct Session {
    pub user_id: i64,
    pub access_token: String,
    pub refresh_token: String,
}

pub struct TestApp {
    pub app: Router,
    pub store: InMemoryStore,
    pub queue: Arc<MemoryQueue>,
    audit_handle: Option<DispatcherHandle>,
    avatar_dir: PathBuf,
}

pub fn test_config(avatar_dir: PathBuf, max_avatar_bytes: u64) -> Config {
    Config {
        api: ApiConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            production: false,
            cors_origins: vec!["*".to_string()],
            shutdown_grace: Duration::from_secs(1),
        },
        database: DatabaseConfig {
            url: "postgresql://unused".to_string(),
            max_connections: 1,
        },
        jwt: JwtConfig {
            secret: JWT_SECRET.to_string(),
        },
        redis: RedisSettings {
            url: "redis://unused".to_string(),
        },
        avatars: AvatarConfig {
            dir: avatar_dir,
            max_bytes: max_avatar_bytes,
        },
        audit: AuditSettings {
            buffer: 64,
            publish_timeout: Duration::from_millis(500),
        },
        seed: SeedSettings::default(),
    }
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_avatar_limit(AvatarConfig::default().max_bytes)
    }

    pub fn with_avatar_limit(max_avatar_bytes: u64) -> Self {
        let avatar_dir =
            std::env::temp_dir().join(format!("tasktrail-api-test-{}", Uuid::new_v4()));
        let config = test_config(avatar_dir.clone(), max_avatar_bytes);

        let store = InMemoryStore::new();
        let queue = Arc::new(MemoryQueue::declared(AUDIT_QUEUE));
        let (audit, audit_handle) = AuditDispatcher::spawn(queue.clone(), config.audit.dispatcher());

        let app = build_router(AppState::new(store.clone(), audit, config));

        Self {
            app,
            store,
            queue,
            audit_handle: Some(audit_handle),
            avatar_dir,
        }
    }

    pub async fn send(&self, request: Request<Body>) -> Response {
        self.app.clone().oneshot(request).await.unwrap()
    }

    /// JSON request; returns the status and the parsed body (`Null` if empty)
    pub async fn call(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.send(request).await;
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    pub async fn register(&self, name: &str, email: &str) -> Session {
        let (status, body) = self
            .call(
                Method::POST,
                "/v1/auth/register",
                None,
                Some(json!({ "name": name, "email": email, "password": PASSWORD })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "register failed: {body}");

        Session {
            user_id: body["user"]["id"].as_i64().unwrap(),
            access_token: body["access_token"].as_str().unwrap().to_string(),
            refresh_token: body["refresh_token"].as_str().unwrap().to_string(),
        }
    }

    /// Stops the dispatcher and returns every audit message it published
    pub async fn emitted(&mut self) -> Vec<AuditMessage> {
        if let Some(handle) = self.audit_handle.take() {
            handle.shutdown(Duration::from_secs(1)).await;
        }
        self.queue.pending_messages()
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.avatar_dir);
    }
}
