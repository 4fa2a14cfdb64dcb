//! Polling of the data-limit document dropped by the control plane.

use crate::pipeline::PipelineControls;
use agent_config_and_utils::DataLimitConfig;
use std::path::PathBuf;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Re-reads the data-limit file on an interval and applies changes.
pub struct DataLimitFeed {
    path: PathBuf,
    controls: PipelineControls,
    interval: Duration,
    last_applied: Option<DataLimitConfig>,
}

impl DataLimitFeed {
    pub fn new(path: PathBuf, controls: PipelineControls, interval: Duration) -> Self {
        Self {
            path,
            controls,
            interval,
            last_applied: None,
        }
    }

    /// Poll immediately, then once per interval, until aborted.
    pub fn spawn(mut self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            loop {
                ticker.tick().await;
                self.poll().await;
            }
        })
    }

    /// Read the file once. Returns whether an update was applied.
    pub async fn poll(&mut self) -> bool {
        let config = match DataLimitConfig::load_from_file(&self.path) {
            Ok(config) => config,
            Err(e) if e.is_not_found() => {
                debug!(path = %self.path.display(), "no data-limit file");
                return false;
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "ignoring data-limit file");
                return false;
            }
        };

        if self.last_applied.as_ref() == Some(&config) {
            return false;
        }

        info!(
            storage_limit = ?config.storage_limit_bytes(),
            cellular_budget = ?config.cellular().budget_bytes(),
            plan_day = config.cellular().plan_day,
            "applying data limits"
        );
        self.controls.apply(&config).await;
        self.last_applied = Some(config);
        true
    }
}
