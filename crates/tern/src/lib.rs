//! Tern: crash-safe telemetry forwarding.
//!
//! Telemetry is written to disk the moment it is produced and deleted only
//! after the broker has accepted it, so a crash or an unreachable broker
//! never loses data. A monthly byte budget caps what is sent over metered
//! links.
//!
//! # Architecture
//!
//! ```text
//! LineSource ─┐
//! LineSource ─┼─▶ merge ─▶ DataLimiter ─▶ Queue ─▶ Producer ─▶ Broker
//!     ...    ─┘                            ▲
//!                      Persistor::load_all ┘
//! ```
//!
//! # Guarantees
//!
//! 1. **Persist first**: a message enters the pipeline only once its file is on disk
//! 2. **Delete on delivery**: the file is removed only after a confirmed publish
//! 3. **Head-of-line**: the producer never skips a message it failed to send
//! 4. **Bounded storage**: stored bytes never exceed 90% of the storage limit
//! 5. **Bounded spend**: forwarding stops once 90% of the period budget is used

pub mod broker;
pub mod error;
pub mod feed;
pub mod limiter;
pub mod merger;
pub mod message;
pub mod persistor;
pub mod pipeline;
pub mod producer;
pub mod queue;
pub mod source;

#[cfg(test)]
mod tests;

pub use broker::{Broker, RedisBroker, TopicMap};
pub use error::{PipelineError, PipelineResult};
pub use feed::DataLimitFeed;
pub use limiter::{
    DataLimiter, FileStateStore, LimiterMachine, LimiterState, MemoryStateStore, Period,
    StateStore,
};
pub use merger::merge;
pub use message::{Message, MessageSource, MessageStream, Topic};
pub use persistor::{Persistor, QuotaHandle};
pub use pipeline::{Pipeline, PipelineControls, PipelineSettings};
pub use producer::{Producer, RetryPolicy};
pub use queue::{Delivery, Queue, QueueConsumer, QueueMachine};
pub use source::LineSource;
