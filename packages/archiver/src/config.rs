use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub database_max_connections: u32,
    pub firecrawl_api_key: String,
    pub firecrawl_base_url: String,
    pub storage: StorageConfig,
    pub worker: WorkerSettings,
}

/// S3-compatible bucket settings (Cloudflare R2 in production)
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Custom endpoint, required for R2 and MinIO
    pub endpoint: Option<String>,
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub bucket: String,
    /// Every key is written under `<root_prefix>/`
    pub root_prefix: String,
}

/// Worker loop and pipeline tuning
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub poll_interval: Duration,
    pub asset_concurrency: usize,
    pub render_timeout: Duration,
    pub asset_fetch_timeout: Duration,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            asset_concurrency: 8,
            render_timeout: Duration::from_secs(120),
            asset_fetch_timeout: Duration::from_secs(30),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        let defaults = WorkerSettings::default();

        Ok(Self {
            database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            database_max_connections: parse_or("DATABASE_MAX_CONNECTIONS", 10)?,
            firecrawl_api_key: env::var("FIRECRAWL_API_KEY")
                .context("FIRECRAWL_API_KEY must be set")?,
            firecrawl_base_url: env::var("FIRECRAWL_BASE_URL")
                .unwrap_or_else(|_| "https://api.firecrawl.dev".to_string()),
            storage: StorageConfig {
                endpoint: env::var("S3_ENDPOINT").ok().filter(|s| !s.is_empty()),
                region: env::var("S3_REGION").unwrap_or_else(|_| "auto".to_string()),
                access_key_id: env::var("S3_ACCESS_KEY_ID")
                    .context("S3_ACCESS_KEY_ID must be set")?,
                secret_access_key: env::var("S3_SECRET_ACCESS_KEY")
                    .context("S3_SECRET_ACCESS_KEY must be set")?,
                bucket: env::var("S3_BUCKET").context("S3_BUCKET must be set")?,
                root_prefix: env::var("S3_ROOT_PREFIX").unwrap_or_else(|_| "archive".to_string()),
            },
            worker: WorkerSettings {
                poll_interval: Duration::from_secs(parse_or(
                    "WORKER_POLL_INTERVAL_SECS",
                    defaults.poll_interval.as_secs(),
                )?),
                asset_concurrency: parse_or("ASSET_CONCURRENCY", defaults.asset_concurrency)?
                    .max(1),
                render_timeout: Duration::from_secs(parse_or(
                    "RENDER_TIMEOUT_SECS",
                    defaults.render_timeout.as_secs(),
                )?),
                asset_fetch_timeout: Duration::from_secs(parse_or(
                    "ASSET_FETCH_TIMEOUT_SECS",
                    defaults.asset_fetch_timeout.as_secs(),
                )?),
            },
        })
    }
}

fn parse_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{} must be a valid number", key)),
        Err(_) => Ok(default),
    }
}
