use std::path::PathBuf;
use std::time::Duration;

use crate::actors::connectivity::DEFAULT_PROBE_INTERVAL;
use crate::actors::operation_queue::{DEFAULT_RETRY_BACKOFF, DEFAULT_RETRY_CEILING};
use crate::annotations::DEFAULT_FLUSH_INTERVAL;

const DEFAULT_DATABASE_PATH: &str = "./data/annotator.db";
const DEFAULT_API_BASE_URL: &str = "http://localhost:3000/api";
const DEFAULT_USER_ID: &str = "local";
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_millis(10_000);

#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// SQLite file backing the durable local store
    pub database_path: PathBuf,
    /// Base URL of the project REST API, without trailing slash
    pub api_base_url: String,
    /// Bearer token sent with every remote call
    pub api_token: Option<String>,
    /// URL the connectivity probe hits
    pub health_url: String,
    /// User id attributed to local annotation writes
    pub user_id: String,
    /// Failed attempts after which a pending operation is dropped
    pub retry_ceiling: u32,
    /// Delay before re-draining when a pass leaves failures queued
    pub retry_backoff: Duration,
    pub probe_interval: Duration,
    /// Write-behind flush period for annotation snapshots
    pub flush_interval: Duration,
    pub http_timeout: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from(DEFAULT_DATABASE_PATH),
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            api_token: None,
            health_url: format!("{DEFAULT_API_BASE_URL}/health"),
            user_id: DEFAULT_USER_ID.to_string(),
            retry_ceiling: DEFAULT_RETRY_CEILING,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
            probe_interval: DEFAULT_PROBE_INTERVAL,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            http_timeout: DEFAULT_HTTP_TIMEOUT,
        }
    }
}

impl SyncConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let api_base_url = env_str("ANNOTATOR_API_BASE_URL", DEFAULT_API_BASE_URL)
            .trim_end_matches('/')
            .to_string();
        let health_url = std::env::var("ANNOTATOR_HEALTH_URL")
            .unwrap_or_else(|_| format!("{api_base_url}/health"));

        let retry_ceiling = env_parse("ANNOTATOR_RETRY_CEILING", DEFAULT_RETRY_CEILING)?;
        if retry_ceiling == 0 {
            return Err(anyhow::anyhow!(
                "Invalid ANNOTATOR_RETRY_CEILING=0. Expected at least 1"
            ));
        }

        Ok(Self {
            database_path: PathBuf::from(env_str("ANNOTATOR_DATABASE_PATH", DEFAULT_DATABASE_PATH)),
            api_base_url,
            api_token: std::env::var("ANNOTATOR_API_TOKEN")
                .ok()
                .filter(|token| !token.trim().is_empty()),
            health_url,
            user_id: env_str("ANNOTATOR_USER_ID", DEFAULT_USER_ID),
            retry_ceiling,
            retry_backoff: Duration::from_millis(env_parse(
                "ANNOTATOR_RETRY_BACKOFF_MS",
                DEFAULT_RETRY_BACKOFF.as_millis() as u64,
            )?),
            probe_interval: Duration::from_secs(env_parse(
                "ANNOTATOR_PROBE_INTERVAL_SECS",
                DEFAULT_PROBE_INTERVAL.as_secs(),
            )?),
            flush_interval: Duration::from_millis(env_parse(
                "ANNOTATOR_FLUSH_INTERVAL_MS",
                DEFAULT_FLUSH_INTERVAL.as_millis() as u64,
            )?),
            http_timeout: Duration::from_millis(env_parse(
                "ANNOTATOR_HTTP_TIMEOUT_MS",
                DEFAULT_HTTP_TIMEOUT.as_millis() as u64,
            )?),
        })
    }
}

fn env_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> anyhow::Result<T>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(val) => val
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("Failed to parse env var {key}={val}: {e}")),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.database_path, PathBuf::from("./data/annotator.db"));
        assert_eq!(config.health_url, "http://localhost:3000/api/health");
        assert_eq!(config.user_id, "local");
        assert_eq!(config.retry_ceiling, 3);
        assert_eq!(config.retry_backoff, Duration::from_secs(5));
        assert_eq!(config.probe_interval, Duration::from_secs(30));
        assert_eq!(config.flush_interval, Duration::from_secs(1));
        assert!(config.api_token.is_none());
    }

    #[test]
    fn test_env_parse_rejects_garbage() {
        std::env::set_var("ANNOTATOR_TEST_ONLY_NUMBER", "not-a-number");
        let parsed: anyhow::Result<u32> = env_parse("ANNOTATOR_TEST_ONLY_NUMBER", 7);
        assert!(parsed.is_err());
        std::env::remove_var("ANNOTATOR_TEST_ONLY_NUMBER");

        let fallback: u32 = env_parse("ANNOTATOR_TEST_ONLY_MISSING", 7).unwrap();
        assert_eq!(fallback, 7);
    }
}
