//! # Observability
//!
//! Centralized logging layer for the Tern agent.
//!
//! Components are **log producers**: they call `observability::init()` once at
//! startup and use standard `tracing` macros everywhere else. They do not know
//! where the log lines end up.
//!
//! Every process writes structured JSONL to a single file, by default
//! `~/.tern/logs/tern.jsonl`, with one object per line:
//!
//! ```text
//! {"timestamp":"...","level":"INFO","service":"tern","pid":4242,
//!  "target":"tern::producer","message":"message sent","fields":{"topic":"c/logs/org/id"}}
//! ```
//!
//! This keeps `tail -f ~/.tern/logs/tern.jsonl | jq` usable while the agent
//! is running.
//!
//! ## Usage
//!
//! ```rust,ignore
//! fn main() {
//!     observability::init_with_config(observability::LogConfig {
//!         service_name: "tern".into(),
//!         default_level: "debug".into(),
//!         also_stderr: true,
//!         ..Default::default()
//!     });
//!
//!     tracing::info!("agent started");
//! }
//! ```

mod file_writer;
mod json_layer;

use std::path::PathBuf;

pub use file_writer::CentralLogWriter;
pub use json_layer::{JsonLayer, LogEntry};

/// Configuration for the logging system.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Name of the service (e.g., "tern", "tern-replay").
    /// Included in every log line for filtering.
    pub service_name: String,

    /// Default log level filter (e.g., "debug", "info", "warn").
    /// Can be overridden by `RUST_LOG` environment variable.
    pub default_level: String,

    /// Optional custom log file path.
    /// Defaults to `~/.tern/logs/tern.jsonl`.
    pub log_path: Option<PathBuf>,

    /// Also emit logs to stderr for immediate feedback.
    pub also_stderr: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            service_name: "unknown".into(),
            default_level: "info".into(),
            log_path: None,
            also_stderr: false,
        }
    }
}

/// Initialize the observability layer with default settings.
///
/// ```rust,ignore
/// fn main() {
///     observability::init("tern");
///     tracing::info!("ready");
/// }
/// ```
pub fn init(service_name: &str) {
    init_with_config(LogConfig {
        service_name: service_name.into(),
        ..Default::default()
    });
}

/// Initialize the observability layer with custom configuration.
///
/// Falls back to stderr-only logging when the log file cannot be opened.
pub fn init_with_config(config: LogConfig) {
    file_writer::init_file_subscriber(&config);
}

/// Re-export tracing macros for convenience.
/// Services can use `observability::info!()` or `tracing::info!()`.
pub use tracing::{debug, error, info, instrument, trace, warn};

/// Re-export Level for advanced filtering.
pub use tracing::Level;
