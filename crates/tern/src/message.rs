//! Telemetry messages and the streams that carry them between stages.

use crate::error::{PipelineError, PipelineResult};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tokio::sync::mpsc;

/// Buffer depth of every inter-stage channel. Stages hand off one message
/// at a time so a slow consumer pushes back on its producer.
pub const STREAM_CAPACITY: usize = 1;

/// Receiving half of an inter-stage channel. Closed when the sender drops.
pub type MessageStream = mpsc::Receiver<Message>;

/// Sending half of an inter-stage channel.
pub type MessageSink = mpsc::Sender<Message>;

/// Create a connected sink/stream pair.
pub fn channel() -> (MessageSink, MessageStream) {
    mpsc::channel(STREAM_CAPACITY)
}

/// Anything that can produce a closable stream of messages.
pub trait MessageSource {
    fn into_stream(self) -> MessageStream;
}

impl MessageSource for MessageStream {
    fn into_stream(self) -> MessageStream {
        self
    }
}

/// Kind of telemetry, which selects the broker topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum Topic {
    Profile,
    Event,
    Log,
}

impl Topic {
    pub const ALL: [Topic; 3] = [Topic::Profile, Topic::Event, Topic::Log];

    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::Profile => "profile",
            Topic::Event => "event",
            Topic::Log => "log",
        }
    }
}

impl From<Topic> for u8 {
    fn from(topic: Topic) -> u8 {
        match topic {
            Topic::Profile => 0,
            Topic::Event => 1,
            Topic::Log => 2,
        }
    }
}

impl TryFrom<u8> for Topic {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Topic::Profile),
            1 => Ok(Topic::Event),
            2 => Ok(Topic::Log),
            other => Err(format!("unknown topic {other}")),
        }
    }
}

impl FromStr for Topic {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "profile" => Ok(Topic::Profile),
            "event" => Ok(Topic::Event),
            "log" => Ok(Topic::Log),
            other => Err(PipelineError::Config(format!("unknown topic: {other}"))),
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit of telemetry on its way to the broker.
///
/// Messages handed out by the persistor are backed by a file that stays on
/// disk until delivery is confirmed. A message carrying an error has no
/// meaningful payload and is always routed to [`Topic::Log`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    topic: Topic,
    payload: Vec<u8>,
    error: Option<String>,
    path: Option<PathBuf>,
}

impl Message {
    /// An in-memory message with no backing file.
    pub fn new(topic: Topic, payload: Vec<u8>) -> Self {
        Self {
            topic,
            payload,
            error: None,
            path: None,
        }
    }

    /// A message reporting a failure instead of carrying telemetry.
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            topic: Topic::Log,
            payload: Vec::new(),
            error: Some(error.into()),
            path: None,
        }
    }

    pub(crate) fn with_path(mut self, path: PathBuf) -> Self {
        self.path = Some(path);
        self
    }

    pub fn topic(&self) -> Topic {
        if self.error.is_some() {
            Topic::Log
        } else {
            self.topic
        }
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Backing file, if the message came from a persistor.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Bytes counted against storage and transmission budgets.
    pub fn size(&self) -> u64 {
        self.payload.len() as u64
    }

    /// Bytes actually published: the error text for failed messages.
    pub fn wire_payload(&self) -> &[u8] {
        match &self.error {
            Some(error) => error.as_bytes(),
            None => &self.payload,
        }
    }

    /// Encode into the on-disk record format.
    pub(crate) fn encode(&self) -> PipelineResult<Vec<u8>> {
        let record = MessageRecord {
            error: self.error.clone(),
            topic: self.topic,
            bytes: self.payload.clone(),
        };
        Ok(serde_json::to_vec(&record)?)
    }

    /// Decode an on-disk record. Failures become an error-bearing message so
    /// one bad file never blocks the rest.
    pub(crate) fn decode(raw: &[u8], path: PathBuf) -> Self {
        match serde_json::from_slice::<MessageRecord>(raw) {
            Ok(record) => Self {
                topic: record.topic,
                payload: record.bytes,
                error: record.error.filter(|e| !e.is_empty()),
                path: Some(path),
            },
            Err(e) => Self::failed(format!("{}: {}", path.display(), e)).with_path(path),
        }
    }
}

#[derive(Serialize, Deserialize)]
struct MessageRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    topic: Topic,
    #[serde(
        default,
        serialize_with = "serialize_base64",
        deserialize_with = "deserialize_base64"
    )]
    bytes: Vec<u8>,
}

fn serialize_base64<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&STANDARD.encode(bytes))
}

fn deserialize_base64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
    match Option::<String>::deserialize(deserializer)? {
        Some(encoded) => STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom),
        None => Ok(Vec::new()),
    }
}
