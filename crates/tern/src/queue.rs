//! In-memory FIFO over persisted messages.
//!
//! The queue sits between the limiter and the producer so a slow or
//! unreachable broker never stalls the collectors. The consumer peeks at the
//! head and pops it only by acknowledging; until then every peek returns the
//! same message.
//!
//! ```text
//!            push                 peek / ack
//! input ───────────▶ [ m3 m2 m1 ] ◀───────────▶ QueueConsumer
//! ```
//!
//! The transitions live in [`QueueMachine`], which has no I/O and is driven
//! by [`Queue::serve`].

use crate::error::{PipelineError, PipelineResult};
use crate::message::{Message, MessageStream};
use std::collections::VecDeque;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

/// Where the queue is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueState {
    /// Nothing to offer; only input is served.
    Empty,
    /// Input, peeks and acks are all served.
    NonEmpty,
    /// Input closed. Output is closed; acks are still honored.
    Final,
    /// Terminated.
    Done,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueEvent {
    Pushed(Message),
    InputClosed,
    HeadRequested,
    Acked,
    ClientClosed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueEffect {
    /// Hand the head to the consumer without removing it.
    Offer(Message),
    /// No further messages will be offered.
    OutputClosed,
    /// The acknowledged head was removed.
    Popped(Message),
}

/// Queue contents plus state, advanced one event at a time.
#[derive(Debug)]
pub struct QueueMachine {
    state: QueueState,
    items: VecDeque<Message>,
}

impl QueueMachine {
    /// Start with recovered messages at the front.
    pub fn new(recovered: Vec<Message>) -> Self {
        let items: VecDeque<Message> = recovered.into();
        let state = if items.is_empty() {
            QueueState::Empty
        } else {
            QueueState::NonEmpty
        };
        Self { state, items }
    }

    pub fn state(&self) -> QueueState {
        self.state
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn head(&self) -> Option<&Message> {
        self.items.front()
    }

    pub fn step(&mut self, event: QueueEvent) -> Option<QueueEffect> {
        use QueueEvent::*;
        use QueueState::*;

        match (self.state, event) {
            (Done, _) => None,
            (_, ClientClosed) => {
                self.state = Done;
                None
            }

            (Empty | NonEmpty, Pushed(message)) => {
                self.items.push_back(message);
                self.state = NonEmpty;
                None
            }
            (Empty | NonEmpty, InputClosed) => {
                self.state = if self.items.is_empty() { Done } else { Final };
                Some(QueueEffect::OutputClosed)
            }

            (NonEmpty, HeadRequested) => self.items.front().cloned().map(QueueEffect::Offer),
            (NonEmpty, Acked) => {
                let popped = self.items.pop_front();
                if self.items.is_empty() {
                    self.state = Empty;
                }
                popped.map(QueueEffect::Popped)
            }

            (Final, Acked) => {
                let popped = self.items.pop_front();
                if self.items.is_empty() {
                    self.state = Done;
                }
                popped.map(QueueEffect::Popped)
            }

            // Nothing to hand out, nothing to pop, or input already closed.
            (Empty, HeadRequested | Acked) | (Final, _) => None,
        }
    }
}

enum QueueCommand {
    Peek(oneshot::Sender<Message>),
    Ack,
}

/// Task side of the queue.
pub struct Queue {
    machine: QueueMachine,
    input: MessageStream,
    commands: mpsc::Receiver<QueueCommand>,
}

impl Queue {
    /// Build a queue over `input`, seeded with `recovered`.
    pub fn new(input: MessageStream, recovered: Vec<Message>) -> (Self, QueueConsumer) {
        let (tx, rx) = mpsc::channel(1);
        let queue = Self {
            machine: QueueMachine::new(recovered),
            input,
            commands: rx,
        };
        (queue, QueueConsumer { commands: tx })
    }

    /// Run until the input has closed and the consumer is finished.
    pub async fn serve(mut self) {
        debug!(depth = self.machine.len(), "queue started");

        loop {
            let (event, reply) = match self.machine.state() {
                QueueState::Empty => (pushed_or_closed(self.input.recv().await), None),
                QueueState::NonEmpty => {
                    tokio::select! {
                        message = self.input.recv() => (pushed_or_closed(message), None),
                        command = self.commands.recv() => command_event(command),
                    }
                }
                QueueState::Final => command_event(self.commands.recv().await),
                QueueState::Done => break,
            };

            match self.machine.step(event) {
                Some(QueueEffect::Offer(message)) => {
                    if let Some(reply) = reply {
                        let _ = reply.send(message);
                    }
                }
                Some(QueueEffect::OutputClosed) => debug!("queue input closed"),
                Some(QueueEffect::Popped(_)) | None => {}
            }

            debug!(depth = self.machine.len(), state = ?self.machine.state(), "queued messages");
        }

        debug!(depth = self.machine.len(), "queue stopped");
    }
}

fn pushed_or_closed(message: Option<Message>) -> QueueEvent {
    match message {
        Some(message) => QueueEvent::Pushed(message),
        None => QueueEvent::InputClosed,
    }
}

fn command_event(command: Option<QueueCommand>) -> (QueueEvent, Option<oneshot::Sender<Message>>) {
    match command {
        Some(QueueCommand::Peek(reply)) => (QueueEvent::HeadRequested, Some(reply)),
        Some(QueueCommand::Ack) => (QueueEvent::Acked, None),
        None => (QueueEvent::ClientClosed, None),
    }
}

/// Client side of the queue. Dropping it tells the queue no more acks are
/// coming.
pub struct QueueConsumer {
    commands: mpsc::Sender<QueueCommand>,
}

impl QueueConsumer {
    /// Wait for the head. `None` once the queue has closed its output.
    ///
    /// The returned delivery borrows the consumer, so the head must be acked
    /// or released before the next one can be requested.
    pub async fn next(&mut self) -> Option<Delivery<'_>> {
        let (tx, rx) = oneshot::channel();
        self.commands.send(QueueCommand::Peek(tx)).await.ok()?;
        let message = rx.await.ok()?;
        Some(Delivery {
            consumer: self,
            message,
        })
    }
}

/// The current head, on loan until acked or released.
pub struct Delivery<'a> {
    consumer: &'a mut QueueConsumer,
    message: Message,
}

impl Delivery<'_> {
    pub fn message(&self) -> &Message {
        &self.message
    }

    /// Pop the head.
    pub async fn ack(self) -> PipelineResult<()> {
        self.consumer
            .commands
            .send(QueueCommand::Ack)
            .await
            .map_err(|_| PipelineError::QueueClosed)
    }

    /// Leave the head in place; the next peek returns it again.
    pub fn nack(self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{self, Topic};

    fn msg(payload: &str) -> Message {
        Message::new(Topic::Event, payload.as_bytes().to_vec())
    }

    #[test]
    fn test_machine_starts_from_recovered() {
        assert_eq!(QueueMachine::new(vec![]).state(), QueueState::Empty);
        let machine = QueueMachine::new(vec![msg("a")]);
        assert_eq!(machine.state(), QueueState::NonEmpty);
        assert_eq!(machine.head(), Some(&msg("a")));
    }

    #[test]
    fn test_machine_head_is_stable_until_ack() {
        let mut machine = QueueMachine::new(vec![]);
        machine.step(QueueEvent::Pushed(msg("a")));
        assert_eq!(
            machine.step(QueueEvent::HeadRequested),
            Some(QueueEffect::Offer(msg("a")))
        );
        machine.step(QueueEvent::Pushed(msg("b")));
        assert_eq!(
            machine.step(QueueEvent::HeadRequested),
            Some(QueueEffect::Offer(msg("a")))
        );
        assert_eq!(
            machine.step(QueueEvent::Acked),
            Some(QueueEffect::Popped(msg("a")))
        );
        assert_eq!(
            machine.step(QueueEvent::HeadRequested),
            Some(QueueEffect::Offer(msg("b")))
        );
    }

    #[test]
    fn test_machine_drains_to_empty() {
        let mut machine = QueueMachine::new(vec![msg("a")]);
        machine.step(QueueEvent::Acked);
        assert_eq!(machine.state(), QueueState::Empty);
        assert_eq!(machine.step(QueueEvent::HeadRequested), None);
    }

    #[test]
    fn test_machine_final_honors_acks_then_stops() {
        let mut machine = QueueMachine::new(vec![msg("a"), msg("b")]);
        assert_eq!(
            machine.step(QueueEvent::InputClosed),
            Some(QueueEffect::OutputClosed)
        );
        assert_eq!(machine.state(), QueueState::Final);
        assert_eq!(machine.step(QueueEvent::HeadRequested), None);

        machine.step(QueueEvent::Acked);
        assert_eq!(machine.state(), QueueState::Final);
        machine.step(QueueEvent::Acked);
        assert_eq!(machine.state(), QueueState::Done);
    }

    #[test]
    fn test_machine_input_closed_while_empty_terminates() {
        let mut machine = QueueMachine::new(vec![]);
        machine.step(QueueEvent::InputClosed);
        assert_eq!(machine.state(), QueueState::Done);
    }

    #[test]
    fn test_machine_client_closed_terminates() {
        let mut machine = QueueMachine::new(vec![msg("a")]);
        machine.step(QueueEvent::ClientClosed);
        assert_eq!(machine.state(), QueueState::Done);
        assert_eq!(machine.step(QueueEvent::Pushed(msg("b"))), None);
        assert_eq!(machine.len(), 1);
    }

    #[tokio::test]
    async fn test_queue_delivers_in_push_order() {
        let (tx, rx) = message::channel();
        let (queue, mut consumer) = Queue::new(rx, vec![msg("recovered")]);
        let task = tokio::spawn(queue.serve());

        tokio::spawn(async move {
            for payload in ["a", "b", "c"] {
                tx.send(msg(payload)).await.unwrap();
            }
        });

        let mut seen = Vec::new();
        while seen.len() < 4 {
            let delivery = consumer.next().await.unwrap();
            seen.push(String::from_utf8(delivery.message().payload().to_vec()).unwrap());
            delivery.ack().await.unwrap();
        }
        assert_eq!(seen, vec!["recovered", "a", "b", "c"]);

        drop(consumer);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_nack_reoffers_head() {
        let (_tx, rx) = message::channel();
        let (queue, mut consumer) = Queue::new(rx, vec![msg("a"), msg("b")]);
        tokio::spawn(queue.serve());

        let first = consumer.next().await.unwrap();
        assert_eq!(first.message(), &msg("a"));
        first.nack();

        let again = consumer.next().await.unwrap();
        assert_eq!(again.message(), &msg("a"));
    }

    #[tokio::test]
    async fn test_closed_input_ends_consumer() {
        let (tx, rx) = message::channel();
        let (queue, mut consumer) = Queue::new(rx, vec![]);
        let task = tokio::spawn(queue.serve());
        drop(tx);

        assert!(consumer.next().await.is_none());
        drop(consumer);
        task.await.unwrap();
    }
}
