//! Outbound broker connection.
//!
//! The producer only needs two operations, so the transport sits behind the
//! [`Broker`] trait. [`RedisBroker`] publishes into Redis Streams, one stream
//! per topic.

use crate::error::{PipelineError, PipelineResult};
use crate::message::Topic;
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::Client;
use tracing::{debug, info, warn};

/// A destination for published messages.
#[async_trait]
pub trait Broker: Send {
    /// Publish one payload. Returns once the broker has accepted it.
    async fn publish(&mut self, topic: &str, payload: &[u8]) -> PipelineResult<()>;

    /// Release the connection.
    async fn close(&mut self);
}

/// Broker topic name for each message kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicMap {
    profile: String,
    event: String,
    log: String,
}

impl TopicMap {
    pub fn new(
        profile: impl Into<String>,
        event: impl Into<String>,
        log: impl Into<String>,
    ) -> Self {
        Self {
            profile: profile.into(),
            event: event.into(),
            log: log.into(),
        }
    }

    /// Per-device topics: `c/{profiler,events,logs}/<org>/<id>`.
    pub fn for_client(org_id: &str, client_id: &str) -> Self {
        Self::new(
            format!("c/profiler/{org_id}/{client_id}"),
            format!("c/events/{org_id}/{client_id}"),
            format!("c/logs/{org_id}/{client_id}"),
        )
    }

    pub fn resolve(&self, topic: Topic) -> &str {
        match topic {
            Topic::Profile => &self.profile,
            Topic::Event => &self.event,
            Topic::Log => &self.log,
        }
    }
}

/// Redis Streams publisher.
pub struct RedisBroker {
    client: Client,
    conn: Option<MultiplexedConnection>,
}

impl RedisBroker {
    /// Open a client and establish the first connection.
    pub async fn connect(redis_url: &str) -> PipelineResult<Self> {
        let client = Client::open(redis_url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        info!(url = %redis_url, "connected to broker");
        Ok(Self {
            client,
            conn: Some(conn),
        })
    }

    async fn connection(&mut self) -> PipelineResult<&mut MultiplexedConnection> {
        if self.conn.is_none() {
            debug!("reconnecting to broker");
            self.conn = Some(self.client.get_multiplexed_async_connection().await?);
        }
        self.conn
            .as_mut()
            .ok_or_else(|| PipelineError::Broker("no connection".to_string()))
    }
}

#[async_trait]
impl Broker for RedisBroker {
    async fn publish(&mut self, topic: &str, payload: &[u8]) -> PipelineResult<()> {
        let conn = self.connection().await?;

        // XADD key * payload <bytes>
        let result: redis::RedisResult<String> = redis::cmd("XADD")
            .arg(topic)
            .arg("*")
            .arg("payload")
            .arg(payload)
            .query_async(conn)
            .await;

        match result {
            Ok(id) => {
                debug!(topic = %topic, entry_id = %id, bytes = payload.len(), "published");
                Ok(())
            }
            Err(e) => {
                // Force a fresh connection on the next attempt.
                if e.is_io_error() || e.is_connection_dropped() {
                    warn!(error = %e, "broker connection lost");
                    self.conn = None;
                }
                Err(e.into())
            }
        }
    }

    async fn close(&mut self) {
        if self.conn.take().is_some() {
            info!("broker connection closed");
        }
    }
}
