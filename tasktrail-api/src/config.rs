/// Configuration for the API server
///
/// Everything comes from environment variables, after loading a `.env` file
/// when one exists.
///
/// # Environment Variables
///
/// - `API_HOST`: host to bind to (default: 0.0.0.0)
/// - `API_PORT`: port to bind to (default: 8080)
/// - `DATABASE_URL`: PostgreSQL connection string (required)
/// - `DATABASE_MAX_CONNECTIONS`: pool size (default: 10)
/// - `JWT_SECRET`: HS256 signing secret, at least 32 characters (required)
/// - `REDIS_URL`: Redis connection string for the audit stream (required)
/// - `AVATAR_DIR`: where avatar files are written (default: var/avatars)
/// - `AVATAR_MAX_BYTES`: largest accepted avatar upload (default: 5 MiB)
/// - `AUDIT_BUFFER`: audit messages buffered before dropping (default: 1024)
/// - `AUDIT_PUBLISH_TIMEOUT_MS`: per-message publish timeout (default: 2000)
/// - `SHUTDOWN_GRACE_SECS`: time allowed to drain audit messages (default: 10)
/// - `PRODUCTION`: enables HSTS (default: false)
/// - `CORS_ORIGINS`: comma-separated allowed origins, `*` for any (default: *)
/// - `SEED_ENABLED`: run the synthetic task and user generators (default: false)
/// - `SEED_TASK_INTERVAL_SECS`: pause between generated tasks (default: 5)
/// - `SEED_USER_INTERVAL_SECS`: pause between generated users (default: 30)
/// - `SEED_MAX_USERS`: users the generator creates before stopping (default: 30)
/// - `SEED_AVATAR_DIR`: images handed out as avatars to generated users (optional)
///
/// # Example
///
/// ```no_run
/// use tasktrail_api::config::Config;
///
/// # fn example() -> anyhow::Result<()> {
/// let config = Config::from_env()?;
/// println!("Server will listen on {}", config.bind_address());
/// # Ok(())
/// # }
/// ```

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tasktrail_shared::audit::DispatcherConfig;
use tasktrail_shared::service::AvatarConfig;

#[derive(Debug, Clone)]
pub struct Config {
    pub api: ApiConfig,
    pub database: DatabaseConfig,
    pub jwt: JwtConfig,
    pub redis: RedisSettings,
    pub avatars: AvatarConfig,
    pub audit: AuditSettings,
    pub seed: SeedSettings,
}

#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,

    /// Turns on `Strict-Transport-Security`
    pub production: bool,

    pub cors_origins: Vec<String>,

    /// How long in-flight audit messages get to reach Redis on shutdown
    pub shutdown_grace: Duration,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone)]
pub struct JwtConfig {
    /// Secret key for JWT signing
    ///
    /// Must be at least 32 bytes. Generate with: `openssl rand -hex 32`
    pub secret: String,
}

#[derive(Debug, Clone)]
pub struct RedisSettings {
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct AuditSettings {
    pub buffer: usize,
    pub publish_timeout: Duration,
}

/// Synthetic traffic generators, off unless `SEED_ENABLED` is set
#[derive(Debug, Clone)]
pub struct SeedSettings {
    pub enabled: bool,
    pub task_interval: Duration,
    pub user_interval: Duration,
    pub max_users: u32,

    /// Without images, generated users get no avatar
    pub avatar_dir: Option<PathBuf>,
}

impl Default for SeedSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            task_interval: Duration::from_secs(5),
            user_interval: Duration::from_secs(30),
            max_users: 30,
            avatar_dir: None,
        }
    }
}

impl AuditSettings {
    pub fn dispatcher(&self) -> DispatcherConfig {
        DispatcherConfig {
            capacity: self.buffer,
            publish_timeout: self.publish_timeout,
        }
    }
}

impl Config {
    /// Loads configuration from the environment
    ///
    /// # Errors
    ///
    /// Returns an error if a required variable is missing, a value does not
    /// parse, or `JWT_SECRET` is shorter than 32 characters.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let required = |key: &str| {
            lookup(key)
                .filter(|v| !v.is_empty())
                .ok_or_else(|| anyhow::anyhow!("{key} environment variable is required"))
        };

        let jwt_secret = required("JWT_SECRET")?;
        if jwt_secret.len() < 32 {
            anyhow::bail!("JWT_SECRET must be at least 32 characters long");
        }

        let avatar_defaults = AvatarConfig::default();
        let seed_defaults = SeedSettings::default();
        let cors_origins = lookup("CORS_ORIGINS")
            .unwrap_or_else(|| "*".to_string())
            .split(',')
            .map(|origin| origin.trim().to_string())
            .filter(|origin| !origin.is_empty())
            .collect();

        Ok(Self {
            api: ApiConfig {
                host: lookup("API_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
                port: parse_or(&lookup, "API_PORT", 8080)?,
                production: parse_or(&lookup, "PRODUCTION", false)?,
                cors_origins,
                shutdown_grace: Duration::from_secs(parse_or(&lookup, "SHUTDOWN_GRACE_SECS", 10)?),
            },
            database: DatabaseConfig {
                url: required("DATABASE_URL")?,
                max_connections: parse_or(&lookup, "DATABASE_MAX_CONNECTIONS", 10)?,
            },
            jwt: JwtConfig { secret: jwt_secret },
            redis: RedisSettings {
                url: required("REDIS_URL")?,
            },
            avatars: AvatarConfig {
                dir: lookup("AVATAR_DIR")
                    .map(PathBuf::from)
                    .unwrap_or(avatar_defaults.dir),
                max_bytes: parse_or(&lookup, "AVATAR_MAX_BYTES", avatar_defaults.max_bytes)?,
            },
            audit: AuditSettings {
                buffer: parse_or(&lookup, "AUDIT_BUFFER", 1024)?,
                publish_timeout: Duration::from_millis(parse_or(
                    &lookup,
                    "AUDIT_PUBLISH_TIMEOUT_MS",
                    2000,
                )?),
            },
            seed: SeedSettings {
                enabled: parse_or(&lookup, "SEED_ENABLED", seed_defaults.enabled)?,
                task_interval: Duration::from_secs(parse_or(
                    &lookup,
                    "SEED_TASK_INTERVAL_SECS",
                    seed_defaults.task_interval.as_secs(),
                )?),
                user_interval: Duration::from_secs(parse_or(
                    &lookup,
                    "SEED_USER_INTERVAL_SECS",
                    seed_defaults.user_interval.as_secs(),
                )?),
                max_users: parse_or(&lookup, "SEED_MAX_USERS", seed_defaults.max_users)?,
                avatar_dir: lookup("SEED_AVATAR_DIR")
                    .filter(|dir| !dir.is_empty())
                    .map(PathBuf::from),
            },
        })
    }

    /// Returns the server bind address
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.api.host, self.api.port)
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) if !raw.is_empty() => raw
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid value for {key}: {e}")),
        _ => Ok(default),
    }
}
