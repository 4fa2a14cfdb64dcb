//! Pipeline assembly.
//!
//! ```text
//! sources ─▶ merge ─▶ DataLimiter ─▶ Queue ─▶ Producer ─▶ broker
//!                                      ▲
//!            recovered messages ───────┘
//! ```
//!
//! Messages recovered from disk go straight into the queue: they were
//! counted against the budget in the run that created them. Messages the
//! limiter drops are deleted on the spot, so none of them are recovered.

use crate::broker::{Broker, TopicMap};
use crate::error::{PipelineError, PipelineResult};
use crate::limiter::{DataLimiter, FileStateStore, Period, StateStore};
use crate::merger::merge;
use crate::message::MessageSource;
use crate::persistor::{Persistor, QuotaHandle};
use crate::producer::{Producer, RetryPolicy};
use crate::queue::Queue;
use agent_config_and_utils::{CellularConfig, Config, DataLimitConfig, Paths};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Everything needed to build a pipeline.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub message_dir: PathBuf,
    pub limiter_state_file: PathBuf,
    pub storage_limit: Option<u64>,
    pub topics: TopicMap,
    pub retry: RetryPolicy,
    pub period: Period,
}

impl PipelineSettings {
    pub fn from_config(config: &Config, paths: &Paths) -> Self {
        Self {
            message_dir: paths.message_dir(),
            limiter_state_file: paths.data_limit_state_file(),
            storage_limit: config.storage_limit_bytes,
            topics: TopicMap::for_client(&config.org_id, &config.client_id),
            retry: RetryPolicy {
                attempts: config.send_attempts,
                interval: config.retry_interval(),
            },
            period: Period::default(),
        }
    }
}

/// Runtime knobs of a running pipeline.
#[derive(Debug, Clone)]
pub struct PipelineControls {
    quota: QuotaHandle,
    limiter: mpsc::Sender<CellularConfig>,
}

impl PipelineControls {
    pub fn quota(&self) -> &QuotaHandle {
        &self.quota
    }

    /// Push a data-limit update to the persistor and the limiter.
    pub async fn apply(&self, config: &DataLimitConfig) {
        self.quota.set(config.storage_limit_bytes()).await;
        if self.limiter.send(config.cellular().clone()).await.is_err() {
            debug!("limiter stopped, cellular config not applied");
        }
    }
}

/// An assembled but not yet running pipeline.
pub struct Pipeline<S: StateStore = FileStateStore> {
    settings: PipelineSettings,
    persistor: Arc<Persistor>,
    store: S,
    controls: PipelineControls,
    limiter_config: mpsc::Receiver<CellularConfig>,
}

impl Pipeline<FileStateStore> {
    pub fn new(settings: PipelineSettings) -> Self {
        let store = FileStateStore::new(settings.limiter_state_file.clone());
        Self::with_store(settings, store)
    }
}

impl<S: StateStore> Pipeline<S> {
    pub fn with_store(settings: PipelineSettings, store: S) -> Self {
        let persistor = Arc::new(Persistor::new(
            settings.message_dir.clone(),
            settings.storage_limit,
        ));
        let (tx, rx) = mpsc::channel(1);
        let controls = PipelineControls {
            quota: persistor.quota(),
            limiter: tx,
        };
        Self {
            settings,
            persistor,
            store,
            controls,
            limiter_config: rx,
        }
    }

    /// The persistor sources should create their messages with.
    pub fn persistor(&self) -> Arc<Persistor> {
        self.persistor.clone()
    }

    pub fn controls(&self) -> PipelineControls {
        self.controls.clone()
    }

    /// Recover persisted messages and start every stage.
    ///
    /// The returned task finishes once all `sources` have closed and the
    /// producer has stopped, and hands the broker back.
    pub async fn spawn<B, M>(
        self,
        broker: B,
        sources: Vec<M>,
    ) -> PipelineResult<JoinHandle<PipelineResult<B>>>
    where
        B: Broker + 'static,
        M: MessageSource,
    {
        let recovered = self.persistor.load_all().await;
        info!(
            recovered = recovered.len(),
            sources = sources.len(),
            dir = %self.settings.message_dir.display(),
            "starting pipeline"
        );

        let merged = merge(sources);
        let (limiter, limited) = DataLimiter::new(
            self.store,
            self.settings.period,
            merged,
            self.limiter_config,
            self.persistor.clone(),
        )?;
        let (queue, consumer) = Queue::new(limited, recovered);
        let producer = Producer::new(
            broker,
            self.settings.topics,
            self.persistor,
            self.settings.retry,
        );

        let limiter_task = tokio::spawn(limiter.serve());
        let queue_task = tokio::spawn(queue.serve());
        let producer_task = tokio::spawn(producer.serve(consumer));

        Ok(tokio::spawn(async move {
            let (limiter, queue, producer) = tokio::join!(limiter_task, queue_task, producer_task);
            if let Err(e) = limiter {
                warn!(error = %e, "limiter task failed");
            }
            if let Err(e) = queue {
                warn!(error = %e, "queue task failed");
            }
            let broker = producer.map_err(|e| PipelineError::Task(e.to_string()))?;
            info!("pipeline stopped");
            Ok(broker)
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_settings_from_config() {
        let paths = Paths::with_base_dir(PathBuf::from("/var/lib/tern"));
        let config = Config {
            org_id: "acme".to_string(),
            client_id: "dev-9".to_string(),
            storage_limit_bytes: Some(1_000),
            send_attempts: 3,
            retry_interval_ms: 20,
            ..Config::default()
        };

        let settings = PipelineSettings::from_config(&config, &paths);
        assert_eq!(settings.message_dir, PathBuf::from("/var/lib/tern/message"));
        assert_eq!(
            settings.limiter_state_file,
            PathBuf::from("/var/lib/tern/datalimit.json")
        );
        assert_eq!(settings.storage_limit, Some(1_000));
        assert_eq!(
            settings.retry,
            RetryPolicy {
                attempts: 3,
                interval: Duration::from_millis(20)
            }
        );
        assert_eq!(settings.topics, TopicMap::for_client("acme", "dev-9"));
        assert_eq!(settings.period, Period::Months(1));
    }

    #[tokio::test]
    async fn test_controls_apply_updates_quota() {
        let dir = tempfile::tempdir().unwrap();
        let paths = Paths::with_base_dir(dir.path().to_path_buf());
        let pipeline = Pipeline::new(PipelineSettings::from_config(&Config::default(), &paths));
        let controls = pipeline.controls();

        let update = DataLimitConfig::parse(
            r#"{"config":{"storage":{"storage_limit":3},"data":{"cellular_data_limit":null,"normalized_cell_plan_date":1}}}"#,
        )
        .unwrap();
        // The limiter is not running yet; its update waits in the channel.
        controls.apply(&update).await;

        assert_eq!(controls.quota().get().await, Some(3_000_000));
        assert_eq!(pipeline.persistor().quota().get().await, Some(3_000_000));
    }
}
