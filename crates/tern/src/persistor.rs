//! Disk persistence for outgoing messages.
//!
//! Every accepted message is written to its own file under the message
//! directory before it enters the pipeline, and the file is unlinked only
//! once the broker confirms delivery. Whatever is left in the directory at
//! startup is undelivered and gets loaded back.

use crate::error::{PipelineError, PipelineResult};
use crate::message::{self, Message, MessageStream, Topic};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Shared storage limit in bytes. `None` means unbounded.
///
/// The lock is held across the size check and the file write, so limit
/// updates and quota decisions never interleave.
#[derive(Debug, Clone, Default)]
pub struct QuotaHandle {
    limit: Arc<Mutex<Option<u64>>>,
}

impl QuotaHandle {
    pub fn new(limit: Option<u64>) -> Self {
        Self {
            limit: Arc::new(Mutex::new(limit)),
        }
    }

    pub async fn set(&self, limit: Option<u64>) {
        let mut guard = self.limit.lock().await;
        if *guard != limit {
            info!(old = ?*guard, new = ?limit, "storage limit changed");
        }
        *guard = limit;
    }

    pub async fn get(&self) -> Option<u64> {
        *self.limit.lock().await
    }
}

/// Owns one message directory.
#[derive(Debug)]
pub struct Persistor {
    dir: PathBuf,
    quota: QuotaHandle,
    counter: AtomicU64,
    pid: u32,
}

impl Persistor {
    pub fn new(dir: impl Into<PathBuf>, limit: Option<u64>) -> Self {
        Self {
            dir: dir.into(),
            quota: QuotaHandle::new(limit),
            counter: AtomicU64::new(0),
            pid: std::process::id(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Handle for changing the storage limit while the pipeline runs.
    pub fn quota(&self) -> QuotaHandle {
        self.quota.clone()
    }

    /// Persist a payload and return the file-backed message.
    ///
    /// Fails with [`PipelineError::StorageFull`] without touching the disk
    /// when the payload would push stored bytes past 90% of the limit.
    pub async fn create_message(&self, topic: Topic, payload: Vec<u8>) -> PipelineResult<Message> {
        let guard = self.quota.limit.lock().await;

        if let Some(limit) = *guard {
            let used = self.stored_bytes().await?;
            if payload.len() as u64 + used > limit.saturating_mul(9) / 10 {
                return Err(PipelineError::StorageFull { limit, used });
            }
        }

        let message = Message::new(topic, payload);
        let encoded = message.encode()?;
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.write_unique(&encoded).await?;
        drop(guard);

        debug!(path = %path.display(), topic = %topic, bytes = encoded.len(), "message persisted");
        Ok(message.with_path(path))
    }

    /// Write to a fresh `<pid>-<counter>` file. Names left behind by an
    /// earlier process that had the same pid are skipped, never overwritten.
    async fn write_unique(&self, contents: &[u8]) -> PipelineResult<PathBuf> {
        loop {
            let n = self.counter.fetch_add(1, Ordering::Relaxed);
            let path = self.dir.join(format!("{}-{}", self.pid, n));
            let file = tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await;
            let mut file = match file {
                Ok(file) => file,
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e.into()),
            };
            file.write_all(contents).await?;
            file.flush().await?;
            return Ok(path);
        }
    }

    /// Delete a message's backing file. Unbacked or already removed messages
    /// are ignored; other failures are logged.
    pub async fn remove(&self, message: &Message) {
        let Some(path) = message.path() else {
            return;
        };
        match tokio::fs::remove_file(path).await {
            Ok(()) => debug!(path = %path.display(), "message removed"),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %path.display(), "message already removed");
            }
            Err(e) => warn!(path = %path.display(), error = %e, "failed to remove message"),
        }
    }

    /// Total bytes held in the message directory.
    pub async fn stored_bytes(&self) -> PipelineResult<u64> {
        let mut total = 0;
        for path in message_paths(&self.dir).await? {
            match tokio::fs::metadata(&path).await {
                Ok(meta) => total += meta.len(),
                // Removed after delivery while we were counting.
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(total)
    }

    /// Stream every persisted message, in no particular order.
    pub fn load(&self) -> MessageStream {
        let dir = self.dir.clone();
        let (tx, rx) = message::channel();
        tokio::spawn(async move {
            for message in load_dir(&dir).await {
                if tx.send(message).await.is_err() {
                    break;
                }
            }
        });
        rx
    }

    /// Every persisted message, collected.
    pub async fn load_all(&self) -> Vec<Message> {
        let messages = load_dir(&self.dir).await;
        info!(dir = %self.dir.display(), recovered = messages.len(), "loaded persisted messages");
        messages
    }
}

async fn load_dir(dir: &Path) -> Vec<Message> {
    let paths = match message_paths(dir).await {
        Ok(paths) => paths,
        Err(e) => return vec![Message::failed(format!("load {}: {}", dir.display(), e))],
    };

    let mut messages = Vec::with_capacity(paths.len());
    for path in paths {
        let message = match tokio::fs::read(&path).await {
            Ok(raw) => Message::decode(&raw, path),
            Err(e) => Message::failed(format!("{}: {}", path.display(), e)).with_path(path),
        };
        if let Some(error) = message.error() {
            warn!(error = %error, "undecodable message file");
        }
        messages.push(message);
    }
    messages
}

/// A missing directory holds no messages.
async fn message_paths(dir: &Path) -> PipelineResult<Vec<PathBuf>> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut paths = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_file() {
            paths.push(entry.path());
        }
    }
    Ok(paths)
}
