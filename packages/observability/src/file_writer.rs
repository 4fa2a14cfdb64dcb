//! Central JSONL log file output.
//!
//! Writes structured logs to a single append-only file that can be tailed by
//! external tools.

use crate::json_layer::JsonLayer;
use crate::LogConfig;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Central log file location, `~/.tern/logs/tern.jsonl`.
fn default_log_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".tern").join("logs").join("tern.jsonl"))
}

/// Append-only writer shared by every clone.
#[derive(Clone)]
pub struct CentralLogWriter {
    inner: Arc<Mutex<BufWriter<File>>>,
}

impl CentralLogWriter {
    pub fn new(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new().create(true).append(true).open(path)?;

        Ok(Self {
            inner: Arc::new(Mutex::new(BufWriter::with_capacity(8192, file))),
        })
    }
}

impl Write for CentralLogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut guard = self.inner.lock();
        let written = guard.write(buf)?;
        // Lines must be visible to `tail -f` as soon as they are logged.
        guard.flush()?;
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.lock().flush()
    }
}

#[derive(Clone)]
struct WriterFactory {
    writer: CentralLogWriter,
}

impl<'a> MakeWriter<'a> for WriterFactory {
    type Writer = CentralLogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.writer.clone()
    }
}

fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// Install the global subscriber: JSONL file layer plus optional stderr.
pub(crate) fn init_file_subscriber(config: &LogConfig) {
    let log_path = config.log_path.clone().or_else(default_log_path);

    let (json_layer, open_error) = match log_path.as_deref().map(CentralLogWriter::new) {
        Some(Ok(writer)) => (
            Some(JsonLayer::new(
                config.service_name.clone(),
                WriterFactory { writer },
            )),
            None,
        ),
        Some(Err(e)) => (None, Some(e.to_string())),
        None => (None, Some("home directory not found".to_string())),
    };

    // Without a file there must still be somewhere for lines to go.
    let stderr_layer = if config.also_stderr || json_layer.is_none() {
        Some(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .compact()
                .with_writer(io::stderr)
                .with_filter(env_filter(&config.default_level)),
        )
    } else {
        None
    };

    let result = tracing_subscriber::registry()
        .with(json_layer.map(|l| l.with_filter(env_filter(&config.default_level))))
        .with(stderr_layer)
        .try_init();

    if result.is_err() {
        // A subscriber is already installed (tests, embedding binaries).
        return;
    }

    match (log_path, open_error) {
        (Some(path), None) => tracing::info!(log_path = %path.display(), "observability initialized"),
        (path, Some(error)) => tracing::warn!(
            log_path = ?path,
            error = %error,
            "log file unavailable, logging to stderr only"
        ),
        (None, None) => {}
    }
}
