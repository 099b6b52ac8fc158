/// Worker configuration
///
/// Values come from `TASKTRAIL_WORKER_*` environment variables (after loading
/// a `.env` file if present), layered over built-in defaults.
///
/// # Environment Variables
///
/// - `TASKTRAIL_WORKER_DATABASE_URL`: PostgreSQL connection string (required)
/// - `TASKTRAIL_WORKER_REDIS_URL`: Redis connection string (required)
/// - `TASKTRAIL_WORKER_BATCH_SIZE`: deliveries per read (default: 10)
/// - `TASKTRAIL_WORKER_BLOCK_MS`: blocking read timeout (default: 5000)
/// - `TASKTRAIL_WORKER_RECONNECT_DELAY_SECS`: delay after a connection failure (default: 5)
/// - `TASKTRAIL_WORKER_RETRY_DELAY_MS`: pause after a requeue (default: 1000)
/// - `TASKTRAIL_WORKER_PASSIVE_DECLARE`: require the queue to exist (default: false)
/// - `TASKTRAIL_WORKER_MAX_DELIVERIES`: dead-letter after N failed inserts (default: unset, retry forever)
/// - `TASKTRAIL_WORKER_CONSUMER_NAME`: consumer name in the group (default: audit_worker)
/// - `TASKTRAIL_WORKER_CLAIM_IDLE_SECS`: take over other consumers' entries idle this long; 0 disables (default: 60)
/// - `TASKTRAIL_WORKER_TOKEN_SWEEP_INTERVAL_SECS`: expired refresh token sweep (default: 3600)
///
/// # Example
///
/// ```no_run
/// use tasktrail_worker::config::WorkerConfig;
///
/// # fn example() -> anyhow::Result<()> {
/// let config = WorkerConfig::load()?;
/// println!("Consuming as {}", config.consumer_name);
/// # Ok(())
/// # }
/// ```

use config::{Config, Environment};
use serde::Deserialize;
use std::time::Duration;
use tasktrail_shared::queue::DeclareMode;

use crate::consumer::ConsumerConfig;

const ENV_PREFIX: &str = "TASKTRAIL_WORKER";

#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    pub database_url: String,
    pub redis_url: String,
    pub batch_size: usize,
    pub block_ms: u64,
    pub reconnect_delay_secs: u64,
    pub retry_delay_ms: u64,
    pub passive_declare: bool,

    #[serde(default)]
    pub max_deliveries: Option<u32>,

    pub consumer_name: String,
    pub claim_idle_secs: u64,
    pub token_sweep_interval_secs: u64,
}

impl WorkerConfig {
    /// Loads `.env`, then the process environment
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_env(Environment::with_prefix(ENV_PREFIX))
    }

    fn from_env(env: Environment) -> anyhow::Result<Self> {
        let config: WorkerConfig = Config::builder()
            .set_default("batch_size", 10)?
            .set_default("block_ms", 5000)?
            .set_default("reconnect_delay_secs", 5)?
            .set_default("retry_delay_ms", 1000)?
            .set_default("passive_declare", false)?
            .set_default("consumer_name", "audit_worker")?
            .set_default("claim_idle_secs", 60)?
            .set_default("token_sweep_interval_secs", 3600)?
            .add_source(env.try_parsing(true))
            .build()?
            .try_deserialize()?;

        if config.batch_size == 0 {
            anyhow::bail!("{ENV_PREFIX}_BATCH_SIZE must be at least 1");
        }
        if config.max_deliveries == Some(0) {
            anyhow::bail!("{ENV_PREFIX}_MAX_DELIVERIES must be at least 1 when set");
        }

        Ok(config)
    }

    pub fn consumer(&self) -> ConsumerConfig {
        ConsumerConfig {
            batch_size: self.batch_size,
            block: Duration::from_millis(self.block_ms),
            reconnect_delay: Duration::from_secs(self.reconnect_delay_secs),
            retry_delay: Duration::from_millis(self.retry_delay_ms),
            declare_mode: if self.passive_declare {
                DeclareMode::Passive
            } else {
                DeclareMode::Create
            },
            max_deliveries: self.max_deliveries,
        }
    }

    /// `None` when claiming is disabled
    pub fn claim_idle(&self) -> Option<Duration> {
        (self.claim_idle_secs > 0).then(|| Duration::from_secs(self.claim_idle_secs))
    }

    pub fn token_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.token_sweep_interval_secs)
    }
}
