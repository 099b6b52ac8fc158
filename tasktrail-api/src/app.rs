/// Application state and router builder
///
/// # Example
///
/// ```no_run
/// use tasktrail_api::{app::AppState, config::Config};
/// use tasktrail_shared::audit::AuditDispatcher;
/// use tasktrail_shared::db::pool::{create_pool, DatabaseConfig};
/// use tasktrail_shared::queue::{MemoryQueue, AUDIT_QUEUE};
/// use tasktrail_shared::repository::PgStore;
/// use std::sync::Arc;
///
/// # async fn example() -> anyhow::Result<()> {
/// let config = Config::from_env()?;
/// let pool = create_pool(DatabaseConfig::with_url(&config.database.url)).await?;
/// let queue = Arc::new(MemoryQueue::declared(AUDIT_QUEUE));
/// let (audit, _handle) = AuditDispatcher::spawn(queue, config.audit.dispatcher());
///
/// let state = AppState::new(PgStore::new(pool), audit, config);
/// let app = tasktrail_api::app::build_router(state);
///
/// let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
/// axum::serve(listener, app).await?;
/// # Ok(())
/// # }
/// ```

use crate::{config::Config, middleware::security::SecurityHeadersLayer};
use axum::{
    extract::{Request, State},
    http::{header, HeaderValue, Method},
    middleware::Next,
    response::Response,
    routing::get,
    Router,
};
use std::sync::Arc;
use tasktrail_shared::audit::AuditDispatcher;
use tasktrail_shared::auth::middleware::{jwt_auth_middleware, AuthError};
use tasktrail_shared::redis::RedisClient;
use tasktrail_shared::repository::{
    AvatarRepository, HealthCheck, RefreshTokenRepository, TaskRepository, UserRepository,
};
use tasktrail_shared::service::{AuthService, TaskService, UserService};
use tokio_util::sync::CancellationToken;
use tower_http::{
    compression::CompressionLayer,
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::Level;

/// Shared application state, cloned into every handler
#[derive(Clone)]
pub struct AppState {
    pub tasks: TaskService,
    pub users: UserService,
    pub auth: AuthService,

    /// Same dispatcher the task service writes to; read for its counters
    pub audit: AuditDispatcher,

    pub store: Arc<dyn HealthCheck>,

    /// Pinged by `/health` when set
    pub redis: Option<RedisClient>,

    /// Fires when the server begins shutting down; avatar transfers watch it
    pub shutdown: CancellationToken,

    pub config: Arc<Config>,
}

impl AppState {
    /// Wires every service to one store
    pub fn new<S>(store: S, audit: AuditDispatcher, config: Config) -> Self
    where
        S: TaskRepository
            + UserRepository
            + AvatarRepository
            + RefreshTokenRepository
            + HealthCheck
            + 'static,
    {
        let store = Arc::new(store);

        Self {
            tasks: TaskService::new(store.clone(), store.clone(), audit.clone()),
            users: UserService::new(store.clone(), store.clone(), config.avatars.clone()),
            auth: AuthService::new(store.clone(), store.clone(), config.jwt.secret.clone()),
            audit,
            store,
            redis: None,
            shutdown: CancellationToken::new(),
            config: Arc::new(config),
        }
    }

    pub fn with_redis(mut self, redis: RedisClient) -> Self {
        self.redis = Some(redis);
        self
    }

    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn jwt_secret(&self) -> &str {
        &self.config.jwt.secret
    }
}

/// Builds the router with all routes and middleware
///
/// ```text
/// /
/// ├── GET /health                       public
/// └── /v1/
///     ├── /auth/
///     │   ├── POST /register            public
///     │   ├── POST /login               public
///     │   ├── POST /refresh             public
///     │   └── POST /logout              bearer
///     ├── /tasks/                       bearer
///     │   ├── GET|POST /
///     │   └── GET|PUT|DELETE /:id
///     └── /users/                       bearer
///         ├── GET|POST /
///         ├── GET|PUT|DELETE /:id
///         └── PUT|GET|HEAD|DELETE /:id/avatar
/// ```
pub fn build_router(state: AppState) -> Router {
    use crate::routes;

    let auth_layer = axum::middleware::from_fn_with_state(state.clone(), jwt_auth_layer);

    let health_routes = Router::new().route("/health", get(routes::health::health_check));

    let public_auth_routes = Router::new()
        .route("/register", axum::routing::post(routes::auth::register))
        .route("/login", axum::routing::post(routes::auth::login))
        .route("/refresh", axum::routing::post(routes::auth::refresh));

    let session_routes = Router::new()
        .route("/logout", axum::routing::post(routes::auth::logout))
        .layer(auth_layer.clone());

    let v1_routes = Router::new()
        .nest("/auth", public_auth_routes.merge(session_routes))
        .nest("/tasks", routes::tasks::router().layer(auth_layer.clone()))
        .nest("/users", routes::users::router().layer(auth_layer));

    Router::new()
        .merge(health_routes)
        .nest("/v1", v1_routes)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(CompressionLayer::new())
        .layer(cors_layer(&state.config.api.cors_origins))
        .layer(SecurityHeadersLayer::new(state.config.api.production))
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|origin| origin == "*") {
        return CorsLayer::permissive();
    }

    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([
            Method::GET,
            Method::HEAD,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_credentials(true)
        .max_age(std::time::Duration::from_secs(3600))
}

/// Requires a valid access token and stores the caller's `AuthContext`
async fn jwt_auth_layer(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, AuthError> {
    jwt_auth_middleware(state.jwt_secret().to_string(), req, next).await
}
