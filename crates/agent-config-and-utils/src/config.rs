//! Configuration management for the agent.

use crate::{CoreError, CoreResult, Paths};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Default broker endpoint.
pub const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";

const DEFAULT_SEND_ATTEMPTS: u32 = 10;
const DEFAULT_RETRY_INTERVAL_MS: u64 = 1000;
const DEFAULT_DATA_LIMIT_POLL_SECS: u64 = 3600;

/// Main agent configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Broker connection URL.
    #[serde(default = "default_redis_url")]
    pub redis_url: String,
    /// Organization the agent reports under; part of every broker topic.
    #[serde(default)]
    pub org_id: String,
    /// Client identity; part of every broker topic.
    #[serde(default)]
    pub client_id: String,
    /// Upper bound on bytes held in the message directory. Unbounded if absent.
    #[serde(default)]
    pub storage_limit_bytes: Option<u64>,
    /// Broker publish attempts per message before stalling.
    #[serde(default = "default_send_attempts")]
    pub send_attempts: u32,
    /// Pause between broker publish attempts.
    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,
    /// How often the data-limit feed file is re-read.
    #[serde(default = "default_data_limit_poll_secs")]
    pub data_limit_poll_secs: u64,
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_redis_url() -> String {
    DEFAULT_REDIS_URL.to_string()
}

fn default_send_attempts() -> u32 {
    DEFAULT_SEND_ATTEMPTS
}

fn default_retry_interval_ms() -> u64 {
    DEFAULT_RETRY_INTERVAL_MS
}

fn default_data_limit_poll_secs() -> u64 {
    DEFAULT_DATA_LIMIT_POLL_SECS
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            redis_url: default_redis_url(),
            org_id: String::new(),
            client_id: String::new(),
            storage_limit_bytes: None,
            send_attempts: DEFAULT_SEND_ATTEMPTS,
            retry_interval_ms: DEFAULT_RETRY_INTERVAL_MS,
            data_limit_poll_secs: DEFAULT_DATA_LIMIT_POLL_SECS,
        }
    }
}

impl Config {
    /// Load configuration from `<base>/config.json`, falling back to defaults,
    /// then apply environment overrides.
    pub fn load(paths: &Paths) -> CoreResult<Self> {
        let config_path = paths.config_file();

        let mut config = if config_path.exists() {
            Self::load_from_file(&config_path)?
        } else {
            Self::default()
        };

        config.load_from_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a file.
    pub fn save(&self, paths: &Paths) -> CoreResult<()> {
        paths.ensure_dirs()?;
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(paths.config_file(), content)?;
        Ok(())
    }

    /// Pause between broker publish attempts.
    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }

    /// How often the data-limit feed is polled.
    pub fn data_limit_poll_interval(&self) -> Duration {
        Duration::from_secs(self.data_limit_poll_secs)
    }

    fn load_from_env(&mut self) -> CoreResult<()> {
        if let Ok(log_level) = std::env::var("TERN_LOG_LEVEL") {
            self.log_level = log_level;
        }
        if let Ok(url) = std::env::var("TERN_REDIS_URL") {
            self.redis_url = url;
        }
        if let Ok(raw) = std::env::var("TERN_STORAGE_LIMIT_BYTES") {
            let limit = raw
                .trim()
                .parse::<u64>()
                .map_err(|e| CoreError::InvalidEnv {
                    name: "TERN_STORAGE_LIMIT_BYTES",
                    value: raw.clone(),
                    reason: e.to_string(),
                })?;
            self.storage_limit_bytes = Some(limit);
        }
        Ok(())
    }

    fn validate(&self) -> CoreResult<()> {
        if self.send_attempts == 0 {
            return Err(CoreError::Config(
                "send_attempts must be at least 1".to_string(),
            ));
        }
        if self.data_limit_poll_secs == 0 {
            return Err(CoreError::Config(
                "data_limit_poll_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
