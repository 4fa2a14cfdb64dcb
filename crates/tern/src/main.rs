//! Tern binary entry point.
//!
//! Usage: tern --org-id <org> --client-id <id> [--input <file.ndjson>]...
//!
//! Runs until interrupted. The first Ctrl+C stops reading inputs and waits
//! for the message being published; a second one exits immediately.
//! Undelivered messages stay on disk for the next run either way.

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use tern::message;
use tern::{DataLimitFeed, Pipeline, PipelineSettings, RedisBroker};
use tracing::{error, info, warn};

/// Tern: crash-safe telemetry forwarder.
#[derive(Parser, Debug)]
#[command(name = "tern")]
#[command(about = "Crash-safe telemetry forwarder with disk-backed queueing and data budgets")]
struct Args {
    /// Base directory for state and logs (defaults to ~/.tern).
    #[arg(long, env = "TERN_BASE_DIR")]
    base_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Broker connection URL.
    #[arg(long, env = "TERN_REDIS_URL")]
    redis_url: Option<String>,

    /// Organization ID used in broker topics.
    #[arg(long)]
    org_id: Option<String>,

    /// Client ID used in broker topics.
    #[arg(long)]
    client_id: Option<String>,

    /// Newline-delimited JSON telemetry file. Repeatable.
    #[arg(long = "input")]
    inputs: Vec<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let paths = match args.base_dir {
        Some(dir) => agent_config_and_utils::Paths::with_base_dir(dir),
        None => agent_config_and_utils::Paths::new()?,
    };
    paths.ensure_dirs()?;

    let mut config = agent_config_and_utils::Config::load(&paths)
        .with_context(|| format!("loading {}", paths.config_file().display()))?;
    if let Some(level) = args.log_level {
        config.log_level = level;
    }
    if let Some(url) = args.redis_url {
        config.redis_url = url;
    }
    if let Some(org_id) = args.org_id {
        config.org_id = org_id;
    }
    if let Some(client_id) = args.client_id {
        config.client_id = client_id;
    }
    if config.org_id.is_empty() || config.client_id.is_empty() {
        anyhow::bail!("org_id and client_id are required (--org-id, --client-id or config.json)");
    }

    agent_config_and_utils::init_logging(&config.log_level, &paths);

    info!(
        base_dir = %paths.base_dir().display(),
        redis_url = %config.redis_url,
        org_id = %config.org_id,
        client_id = %config.client_id,
        storage_limit = ?config.storage_limit_bytes,
        inputs = args.inputs.len(),
        "Tern starting"
    );

    let broker = RedisBroker::connect(&config.redis_url)
        .await
        .with_context(|| format!("connecting to {}", config.redis_url))?;

    let pipeline = Pipeline::new(PipelineSettings::from_config(&config, &paths));
    let feed = DataLimitFeed::new(
        paths.data_limit_feed_file(),
        pipeline.controls(),
        config.data_limit_poll_interval(),
    )
    .spawn();

    let (mut sources, readers) = tern::source::open_all(&args.inputs, &pipeline.persistor()).await?;
    // Keeps the pipeline open after every input reaches end of file.
    let (hold_open, idle) = message::channel();
    sources.push(idle);

    let mut running = pipeline.spawn(broker, sources).await?;

    tokio::select! {
        result = &mut running => {
            feed.abort();
            return match result {
                Ok(Ok(_)) => Ok(()),
                Ok(Err(e)) => Err(e.into()),
                Err(e) => Err(e.into()),
            };
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal, stopping...");
        }
    }

    feed.abort();
    for reader in &readers {
        reader.abort();
    }
    drop(hold_open);

    tokio::select! {
        result = running => match result {
            Ok(Ok(_)) => info!("Tern stopped"),
            Ok(Err(e)) => {
                error!(error = %e, "Pipeline exited with error");
                return Err(e.into());
            }
            Err(e) => return Err(e.into()),
        },
        _ = tokio::signal::ctrl_c() => {
            warn!("Second shutdown signal, exiting now");
        }
    }

    Ok(())
}
