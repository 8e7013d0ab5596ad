use crate::storage::{
    StorageDriver,
    hippo::{HippoConfig, HippoDriver},
    local::{LocalConfig, LocalDriver},
    router::StorageRouter,
};
use anyhow::{Context, Result, bail};
use clap::Parser;
use serde::Deserialize;
use std::{env, fmt, path::{Path, PathBuf}, str::FromStr, sync::Arc};

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    /// Public base URL that file URLs are built on.
    pub app_host: String,
    /// JSON file describing one storage driver per barrel code.
    pub storage_config: PathBuf,
    pub signature_secret: String,
    pub scheduler_interval_secs: u64,
    pub replication_batch: i64,
    pub worker_prefetch: usize,
    /// First redelivery delay for a nacked message; doubles per attempt.
    pub worker_retry_delay_ms: u64,
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database_url", &self.database_url)
            .field("app_host", &self.app_host)
            .field("storage_config", &self.storage_config)
            .field("scheduler_interval_secs", &self.scheduler_interval_secs)
            .field("replication_batch", &self.replication_batch)
            .field("worker_prefetch", &self.worker_prefetch)
            .field("worker_retry_delay_ms", &self.worker_retry_delay_ms)
            .finish_non_exhaustive()
    }
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Multi-backend object storage gateway")]
pub struct Args {
    /// Host to bind to (overrides GATEWAY_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides GATEWAY_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Database URL (overrides GATEWAY_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Public base URL for file links (overrides GATEWAY_APP_HOST)
    #[arg(long)]
    pub app_host: Option<String>,

    /// Storage driver file (overrides GATEWAY_STORAGE_CONFIG)
    #[arg(long)]
    pub storage_config: Option<PathBuf>,

    /// Secret used to sign session tokens (overrides GATEWAY_SIGNATURE_SECRET)
    #[arg(long)]
    pub signature_secret: Option<String>,

    /// Seconds between replication scheduling runs (overrides GATEWAY_SCHEDULER_INTERVAL_SECS)
    #[arg(long)]
    pub scheduler_interval_secs: Option<u64>,

    /// Pending replicas queued per run, 1 to 50 (overrides GATEWAY_REPLICATION_BATCH)
    #[arg(long)]
    pub replication_batch: Option<i64>,

    /// Unsettled deliveries per queue (overrides GATEWAY_WORKER_PREFETCH)
    #[arg(long)]
    pub worker_prefetch: Option<usize>,

    /// First redelivery delay in milliseconds (overrides GATEWAY_WORKER_RETRY_DELAY_MS)
    #[arg(long)]
    pub worker_retry_delay_ms: Option<u64>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

/// Reads `key`, falling back to `default` when it is not set.
fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(value) => value
            .parse::<T>()
            .with_context(|| format!("parsing {} value `{}`", key, value)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {}", key)),
    }
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        Self::merge(Args::parse())
    }

    fn merge(args: Args) -> Result<(Self, bool)> {
        // --- Environment fallback ---
        let env_host = env_or("GATEWAY_HOST", "0.0.0.0".to_string())?;
        let env_port = env_or("GATEWAY_PORT", 3000u16)?;
        let env_db = env_or(
            "GATEWAY_DATABASE_URL",
            "sqlite://./data/meta/gateway.db".to_string(),
        )?;
        let env_app_host = env_or("GATEWAY_APP_HOST", "http://localhost:3000".to_string())?;
        let env_storage = env_or(
            "GATEWAY_STORAGE_CONFIG",
            PathBuf::from("./config/storage.json"),
        )?;
        let env_secret = env::var("GATEWAY_SIGNATURE_SECRET").ok();
        let env_interval = env_or("GATEWAY_SCHEDULER_INTERVAL_SECS", 10u64)?;
        let env_batch = env_or("GATEWAY_REPLICATION_BATCH", 20i64)?;
        let env_prefetch = env_or("GATEWAY_WORKER_PREFETCH", 8usize)?;
        let env_retry_delay = env_or("GATEWAY_WORKER_RETRY_DELAY_MS", 500u64)?;

        // --- Merge ---
        let Some(signature_secret) = args.signature_secret.or(env_secret) else {
            bail!("GATEWAY_SIGNATURE_SECRET must be set");
        };
        let cfg = Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            database_url: args.database_url.unwrap_or(env_db),
            app_host: args.app_host.unwrap_or(env_app_host),
            storage_config: args.storage_config.unwrap_or(env_storage),
            signature_secret,
            scheduler_interval_secs: args.scheduler_interval_secs.unwrap_or(env_interval),
            replication_batch: args.replication_batch.unwrap_or(env_batch),
            worker_prefetch: args.worker_prefetch.unwrap_or(env_prefetch),
            worker_retry_delay_ms: args.worker_retry_delay_ms.unwrap_or(env_retry_delay),
        };

        if cfg.signature_secret.is_empty() {
            bail!("signature secret must not be empty");
        }
        if !(1..=50).contains(&cfg.replication_batch) {
            bail!("replication batch must be between 1 and 50");
        }
        if cfg.scheduler_interval_secs == 0 {
            bail!("scheduler interval must be at least one second");
        }
        if cfg.worker_retry_delay_ms == 0 {
            bail!("worker retry delay must be at least one millisecond");
        }

        Ok((cfg, args.migrate))
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Driver settings for one barrel code.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "driver", rename_all = "snake_case")]
pub enum DriverConfig {
    Hippo(HippoConfig),
    Local(LocalConfig),
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct StorageEntry {
    pub code: String,
    #[serde(flatten)]
    pub driver: DriverConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct StorageConfig {
    pub storages: Vec<StorageEntry>,
}

impl StorageConfig {
    pub fn from_json(raw: &str) -> Result<Self> {
        let config: StorageConfig =
            serde_json::from_str(raw).context("parsing storage configuration")?;
        if config.storages.is_empty() {
            bail!("storage configuration lists no storages");
        }
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading storage configuration {}", path.display()))?;
        Self::from_json(&raw)
    }

    /// One driver per entry, keyed by barrel code.
    pub fn into_router(self) -> StorageRouter {
        StorageRouter::new(self.storages.into_iter().map(|entry| {
            let driver: Arc<dyn StorageDriver> = match entry.driver {
                DriverConfig::Hippo(config) => Arc::new(HippoDriver::new(config)),
                DriverConfig::Local(config) => Arc::new(LocalDriver::new(config)),
            };
            (entry.code, driver)
        }))
    }
}
