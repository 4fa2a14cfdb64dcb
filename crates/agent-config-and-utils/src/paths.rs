//! File system paths for the agent.

use crate::{CoreError, CoreResult};
use std::path::PathBuf;

/// Directory holding one file per undelivered message.
const MESSAGE_DIR_NAME: &str = "message";
/// Persisted data limiter counters.
const DATA_LIMIT_STATE_NAME: &str = "datalimit.json";
/// Data-limit configuration dropped in by the control plane.
const DATA_LIMIT_FEED_NAME: &str = "data_limit.json";

/// Manages file system paths for the agent.
#[derive(Debug, Clone)]
pub struct Paths {
    /// Base directory for agent runtime files (~/.tern)
    base_dir: PathBuf,
}

impl Paths {
    /// Create a new Paths instance rooted at `~/.tern`.
    pub fn new() -> CoreResult<Self> {
        let home = dirs::home_dir().ok_or(CoreError::NoHomeDir)?;

        Ok(Self {
            base_dir: home.join(".tern"),
        })
    }

    /// Create a new Paths instance with a custom base directory.
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    /// Get the base directory (~/.tern).
    pub fn base_dir(&self) -> &PathBuf {
        &self.base_dir
    }

    /// Get the config file path (~/.tern/config.json).
    pub fn config_file(&self) -> PathBuf {
        self.base_dir.join("config.json")
    }

    /// Get the persisted message directory (~/.tern/message).
    pub fn message_dir(&self) -> PathBuf {
        self.base_dir.join(MESSAGE_DIR_NAME)
    }

    /// Get the data limiter state file (~/.tern/datalimit.json).
    pub fn data_limit_state_file(&self) -> PathBuf {
        self.base_dir.join(DATA_LIMIT_STATE_NAME)
    }

    /// Get the data-limit configuration feed (~/.tern/data_limit.json).
    pub fn data_limit_feed_file(&self) -> PathBuf {
        self.base_dir.join(DATA_LIMIT_FEED_NAME)
    }

    /// Get the logs directory (~/.tern/logs).
    pub fn logs_dir(&self) -> PathBuf {
        self.base_dir.join("logs")
    }

    /// Get the agent log file path (~/.tern/logs/tern.jsonl).
    pub fn log_file(&self) -> PathBuf {
        self.logs_dir().join("tern.jsonl")
    }

    /// Ensure all required directories exist.
    ///
    /// The message directory is left to the persistor, which creates it on
    /// first write.
    pub fn ensure_dirs(&self) -> CoreResult<()> {
        std::fs::create_dir_all(&self.base_dir)?;
        std::fs::create_dir_all(self.logs_dir())?;
        Ok(())
    }
}
