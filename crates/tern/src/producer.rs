//! Terminal pipeline stage: publish the queue head, then forget it.

use crate::broker::{Broker, TopicMap};
use crate::error::{PipelineError, PipelineResult};
use crate::message::Message;
use crate::persistor::Persistor;
use crate::queue::QueueConsumer;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// How hard to try before giving up on a message for now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    /// Pause after each failed attempt.
    pub interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 10,
            interval: Duration::from_secs(1),
        }
    }
}

/// Drains the queue into a broker.
pub struct Producer<B: Broker> {
    broker: B,
    topics: TopicMap,
    persistor: Arc<Persistor>,
    retry: RetryPolicy,
}

impl<B: Broker> Producer<B> {
    pub fn new(broker: B, topics: TopicMap, persistor: Arc<Persistor>, retry: RetryPolicy) -> Self {
        Self {
            broker,
            topics,
            persistor,
            retry,
        }
    }

    /// Publish heads until the queue closes its output, then close the broker.
    ///
    /// A delivered message has its backing file removed before it is acked.
    /// A message that exhausts its attempts is left at the head and retried;
    /// nothing behind it moves until it goes through.
    pub async fn serve(mut self, mut consumer: QueueConsumer) -> B {
        while let Some(delivery) = consumer.next().await {
            match self.send(delivery.message()).await {
                Ok(()) => {
                    self.persistor.remove(delivery.message()).await;
                    if let Err(e) = delivery.ack().await {
                        warn!(error = %e, "ack after delivery failed");
                        break;
                    }
                }
                Err(e) => {
                    warn!(
                        topic = %delivery.message().topic(),
                        path = ?delivery.message().path(),
                        error = %e,
                        "delivery stalled, head will be retried"
                    );
                    delivery.nack();
                }
            }
        }

        self.broker.close().await;
        info!("producer stopped");
        self.broker
    }

    async fn send(&mut self, message: &Message) -> PipelineResult<()> {
        let topic = self.topics.resolve(message.topic());
        let payload = message.wire_payload();

        for attempt in 1..=self.retry.attempts {
            match self.broker.publish(topic, payload).await {
                Ok(()) => {
                    debug!(topic = %topic, bytes = payload.len(), attempt, "message sent");
                    return Ok(());
                }
                Err(e) => {
                    warn!(topic = %topic, attempt, error = %e, "send failed, retrying");
                    tokio::time::sleep(self.retry.interval).await;
                }
            }
        }

        Err(PipelineError::MaxRetriesExceeded(self.retry.attempts))
    }
}
