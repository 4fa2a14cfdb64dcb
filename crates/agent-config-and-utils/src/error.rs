//! Errors raised while loading agent configuration.

use std::io::ErrorKind;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    /// A value was read but is out of range or inconsistent.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// An environment override could not be parsed.
    #[error("invalid value for {name}: {value:?} ({reason})")]
    InvalidEnv {
        name: &'static str,
        value: String,
        reason: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// No base directory was given and `$HOME` could not be resolved.
    #[error("could not determine home directory")]
    NoHomeDir,
}

impl CoreError {
    /// The file being read does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, CoreError::Io(e) if e.kind() == ErrorKind::NotFound)
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
