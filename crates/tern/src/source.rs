//! Newline-delimited JSON telemetry input.
//!
//! Each line is one record:
//!
//! ```text
//! {"topic":"event","payload":{"name":"crash","signal":11}}
//! ```
//!
//! The payload's JSON text is kept byte for byte and persisted before it is
//! emitted, so nothing read from the file is lost once it is in the pipeline.

use crate::error::PipelineResult;
use crate::message::{self, MessageStream, Topic};
use crate::persistor::Persistor;
use serde::Deserialize;
use serde_json::value::RawValue;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Deserialize)]
struct Record<'a> {
    topic: String,
    #[serde(borrow)]
    payload: &'a RawValue,
}

/// Reads telemetry records and turns them into persisted messages.
pub struct LineSource {
    name: String,
    persistor: Arc<Persistor>,
}

impl LineSource {
    pub fn new(name: impl Into<String>, persistor: Arc<Persistor>) -> Self {
        Self {
            name: name.into(),
            persistor,
        }
    }

    /// Open `path` and stream its records. The stream closes at end of file.
    pub async fn open(
        path: &Path,
        persistor: Arc<Persistor>,
    ) -> PipelineResult<(MessageStream, JoinHandle<()>)> {
        let file = tokio::fs::File::open(path).await?;
        let source = Self::new(path.display().to_string(), persistor);
        Ok(source.spawn(file))
    }

    /// Stream records read from `reader`.
    pub fn spawn<R>(self, reader: R) -> (MessageStream, JoinHandle<()>)
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let (tx, rx) = message::channel();
        let handle = tokio::spawn(async move {
            let mut lines = BufReader::new(reader).lines();
            let mut accepted = 0u64;
            let mut line_no = 0u64;

            loop {
                let line = match lines.next_line().await {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(e) => {
                        warn!(source = %self.name, error = %e, "input read failed");
                        break;
                    }
                };
                line_no += 1;
                if line.trim().is_empty() {
                    continue;
                }

                let (topic, payload) = match parse_record(&line) {
                    Ok(parsed) => parsed,
                    Err(e) => {
                        warn!(source = %self.name, line = line_no, error = %e, "skipping malformed record");
                        continue;
                    }
                };

                let message = match self.persistor.create_message(topic, payload).await {
                    Ok(message) => message,
                    Err(e) if e.is_storage_full() => {
                        warn!(source = %self.name, line = line_no, error = %e, "storage full, dropping record");
                        continue;
                    }
                    Err(e) => {
                        warn!(source = %self.name, line = line_no, error = %e, "failed to persist record");
                        continue;
                    }
                };

                if tx.send(message).await.is_err() {
                    debug!(source = %self.name, "pipeline closed, stopping input");
                    break;
                }
                accepted += 1;
            }

            info!(source = %self.name, records = accepted, "input finished");
        });
        (rx, handle)
    }
}

fn parse_record(line: &str) -> PipelineResult<(Topic, Vec<u8>)> {
    let record: Record<'_> = serde_json::from_str(line)?;
    let topic = record.topic.parse()?;
    Ok((topic, record.payload.get().as_bytes().to_vec()))
}

/// Open every input file.
pub async fn open_all(
    paths: &[PathBuf],
    persistor: &Arc<Persistor>,
) -> PipelineResult<(Vec<MessageStream>, Vec<JoinHandle<()>>)> {
    let mut streams = Vec::with_capacity(paths.len());
    let mut handles = Vec::with_capacity(paths.len());
    for path in paths {
        let (stream, handle) = LineSource::open(path, persistor.clone()).await?;
        streams.push(stream);
        handles.push(handle);
    }
    Ok((streams, handles))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_parse_record_keeps_payload_verbatim() {
        let (topic, payload) = parse_record(r#"{"topic":"profile","payload":{"a":[1,2]}}"#).unwrap();
        assert_eq!(topic, Topic::Profile);
        assert_eq!(payload, br#"{"a":[1,2]}"#);
    }

    #[test]
    fn test_parse_record_rejects_unknown_topic() {
        assert!(parse_record(r#"{"topic":"metric","payload":1}"#).is_err());
        assert!(parse_record("not json").is_err());
    }

    #[tokio::test]
    async fn test_source_persists_and_skips_bad_lines() {
        let dir = tempdir().unwrap();
        let persistor = Arc::new(Persistor::new(dir.path(), None));
        let input: &'static [u8] = b"{\"topic\":\"event\",\"payload\":\"a\"}\n\ngarbage\n{\"topic\":\"log\",\"payload\":\"b\"}\n";

        let (mut stream, handle) = LineSource::new("test", persistor.clone()).spawn(input);

        let first = stream.recv().await.unwrap();
        let second = stream.recv().await.unwrap();
        assert!(stream.recv().await.is_none());
        handle.await.unwrap();

        assert_eq!(first.topic(), Topic::Event);
        assert_eq!(first.payload(), b"\"a\"");
        assert_eq!(second.topic(), Topic::Log);
        assert!(first.path().unwrap().exists());
        assert_eq!(persistor.load_all().await.len(), 2);
    }

    #[tokio::test]
    async fn test_source_skips_when_storage_full() {
        let dir = tempdir().unwrap();
        let persistor = Arc::new(Persistor::new(dir.path(), Some(10)));
        let input: &'static [u8] = b"{\"topic\":\"event\",\"payload\":\"far too large for the quota\"}\n";

        let (mut stream, handle) = LineSource::new("test", persistor.clone()).spawn(input);

        assert!(stream.recv().await.is_none());
        handle.await.unwrap();
        assert!(persistor.load_all().await.is_empty());
    }

    #[tokio::test]
    async fn test_open_missing_file_fails() {
        let dir = tempdir().unwrap();
        let persistor = Arc::new(Persistor::new(dir.path(), None));
        assert!(LineSource::open(&dir.path().join("absent.ndjson"), persistor).await.is_err());
    }
}
