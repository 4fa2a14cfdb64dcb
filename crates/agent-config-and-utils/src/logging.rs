//! Logging initialization for the agent.
//!
//! Thin wrapper over the observability crate. Every line goes to the
//! `logs/tern.jsonl` file under the agent's base directory, with a compact
//! copy on stderr while the agent runs in the foreground.

use crate::Paths;

/// Initialize the logging system for the agent.
///
/// `RUST_LOG` takes precedence over `level` when set.
///
/// ```ignore
/// init_logging("info", &paths);
/// tracing::info!("agent started");
/// ```
pub fn init_logging(level: &str, paths: &Paths) {
    observability::init_with_config(observability::LogConfig {
        service_name: "tern".into(),
        default_level: normalize_level(level).into(),
        log_path: Some(paths.log_file()),
        also_stderr: true,
    });
}

fn normalize_level(level: &str) -> &'static str {
    match parse_level(level) {
        tracing::Level::TRACE => "trace",
        tracing::Level::DEBUG => "debug",
        tracing::Level::INFO => "info",
        tracing::Level::WARN => "warn",
        tracing::Level::ERROR => "error",
    }
}

/// Parse a log level string into a tracing Level.
pub fn parse_level(level: &str) -> tracing::Level {
    match level.to_lowercase().as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "info" => tracing::Level::INFO,
        "warn" | "warning" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    }
}
