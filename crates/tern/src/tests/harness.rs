//! Test harness for pipeline scenario tests.
//!
//! Provides:
//! - MockBroker: an in-memory broker whose failures can be scripted
//! - TestHarness: a pipeline over a temporary directory with one live source

use crate::broker::{Broker, TopicMap};
use crate::error::{PipelineError, PipelineResult};
use crate::limiter::{LimiterState, MemoryStateStore, Period};
use crate::message::{self, MessageSink, Topic};
use crate::persistor::Persistor;
use crate::pipeline::{Pipeline, PipelineControls, PipelineSettings};
use crate::producer::RetryPolicy;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::task::JoinHandle;

/// A message as the broker saw it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Published {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// In-memory broker. Clones share state.
#[derive(Clone, Default)]
pub struct MockBroker {
    published: Arc<Mutex<Vec<Published>>>,
    attempts: Arc<AtomicUsize>,
    fail_remaining: Arc<AtomicUsize>,
    down: Arc<AtomicBool>,
    closed: Arc<AtomicBool>,
}

impl MockBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject the next `n` publishes.
    pub fn fail_next(&self, n: usize) {
        self.fail_remaining.store(n, Ordering::SeqCst);
    }

    /// Reject every publish until brought back up.
    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    pub fn published(&self) -> Vec<Published> {
        self.published.lock().clone()
    }

    pub fn published_payloads(&self) -> Vec<Vec<u8>> {
        self.published().into_iter().map(|p| p.payload).collect()
    }

    pub fn published_count(&self) -> usize {
        self.published.lock().len()
    }

    /// Publish calls, successful or not.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Broker for MockBroker {
    async fn publish(&mut self, topic: &str, payload: &[u8]) -> PipelineResult<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        if self.down.load(Ordering::SeqCst) {
            return Err(PipelineError::Broker("broker down".to_string()));
        }
        let scripted = self
            .fail_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if scripted.is_ok() {
            return Err(PipelineError::Broker("scripted failure".to_string()));
        }

        self.published.lock().push(Published {
            topic: topic.to_string(),
            payload: payload.to_vec(),
        });
        Ok(())
    }

    async fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

pub const ORG: &str = "org";
pub const CLIENT: &str = "client";

/// Knobs for a harness pipeline.
#[derive(Clone)]
pub struct HarnessOptions {
    pub storage_limit: Option<u64>,
    pub limiter_state: Option<LimiterState>,
    pub period: Period,
    pub retry: RetryPolicy,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            storage_limit: None,
            limiter_state: None,
            period: Period::default(),
            retry: RetryPolicy {
                attempts: 3,
                interval: Duration::from_millis(5),
            },
        }
    }
}

/// A running pipeline over a temporary directory.
pub struct TestHarness {
    pub broker: MockBroker,
    pub persistor: Arc<Persistor>,
    pub store: MemoryStateStore,
    pub controls: PipelineControls,
    source: Option<MessageSink>,
    running: Option<JoinHandle<PipelineResult<MockBroker>>>,
    dir: TempDir,
}

impl TestHarness {
    /// Start a pipeline over a fresh directory.
    pub async fn start(options: HarnessOptions) -> Self {
        Self::start_in(TempDir::new().unwrap(), options).await
    }

    /// Start a pipeline over an existing directory, recovering what it holds.
    pub async fn start_in(dir: TempDir, options: HarnessOptions) -> Self {
        let settings = PipelineSettings {
            message_dir: message_dir(&dir),
            limiter_state_file: dir.path().join("datalimit.json"),
            storage_limit: options.storage_limit,
            topics: TopicMap::for_client(ORG, CLIENT),
            retry: options.retry,
            period: options.period,
        };
        let store = MemoryStateStore::new(options.limiter_state);
        let pipeline = Pipeline::with_store(settings, store.clone());
        let persistor = pipeline.persistor();
        let controls = pipeline.controls();

        let broker = MockBroker::new();
        let (tx, rx) = message::channel();
        let running = pipeline.spawn(broker.clone(), vec![rx]).await.unwrap();

        Self {
            broker,
            persistor,
            store,
            controls,
            source: Some(tx),
            running: Some(running),
            dir,
        }
    }

    /// Persist a payload and feed it into the pipeline.
    pub async fn emit(&self, topic: Topic, payload: &[u8]) -> PipelineResult<()> {
        let message = self
            .persistor
            .create_message(topic, payload.to_vec())
            .await?;
        self.source
            .as_ref()
            .expect("source already closed")
            .send(message)
            .await
            .map_err(|_| PipelineError::QueueClosed)
    }

    /// Close the source and wait for the pipeline to stop.
    pub async fn shutdown(&mut self) {
        self.source.take();
        if let Some(running) = self.running.take() {
            tokio::time::timeout(Duration::from_secs(5), running)
                .await
                .expect("pipeline did not stop")
                .unwrap()
                .unwrap();
        }
    }

    /// Stop abruptly, as a crash would: nothing more reaches the broker and
    /// no stage gets to clean up. Hands back the directory for a restart.
    pub fn crash(mut self) -> TempDir {
        self.broker.set_down(true);
        if let Some(running) = self.running.take() {
            running.abort();
        }
        self.dir
    }

    /// Number of message files on disk.
    pub fn files_on_disk(&self) -> usize {
        std::fs::read_dir(message_dir(&self.dir))
            .map(|entries| entries.count())
            .unwrap_or(0)
    }
}

pub fn message_dir(dir: &TempDir) -> PathBuf {
    dir.path().join("message")
}

/// Poll `condition` until it holds or two seconds pass.
pub async fn wait_until<F: Fn() -> bool>(condition: F) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}

/// Give in-flight work a moment to settle.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}
