//! Error types for the delivery pipeline.

use thiserror::Error;

/// Pipeline error type.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// IO error (message files, limiter state)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding or decoding error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Accepting the message would push stored bytes past 90% of the limit
    #[error("storage full: {used} used of {limit} limit")]
    StorageFull { limit: u64, used: u64 },

    /// Broker rejected or failed a publish
    #[error("Broker error: {0}")]
    Broker(String),

    /// Redis connection or command error
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Limiter state could not be saved or restored
    #[error("Limiter state error: {0}")]
    LimiterState(String),

    /// Every publish attempt for a message failed
    #[error("Send failed after {0} attempts")]
    MaxRetriesExceeded(u32),

    /// The queue task has shut down
    #[error("Queue closed")]
    QueueClosed,

    /// A pipeline task panicked or was cancelled
    #[error("Task failed: {0}")]
    Task(String),
}

impl PipelineError {
    /// Whether this is the non-fatal storage-full signal.
    pub fn is_storage_full(&self) -> bool {
        matches!(self, PipelineError::StorageFull { .. })
    }
}

impl From<agent_config_and_utils::CoreError> for PipelineError {
    fn from(err: agent_config_and_utils::CoreError) -> Self {
        PipelineError::Config(err.to_string())
    }
}

/// Result type for pipeline operations.
pub type PipelineResult<T> = Result<T, PipelineError>;
