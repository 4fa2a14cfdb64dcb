//! Pipeline scenario tests.
//!
//! Each module drives a full pipeline (sources, limiter, queue, producer)
//! against an in-memory broker:
//!
//! - `harness.rs`      - Mock broker and a pipeline over a temporary directory
//! - `ordering.rs`     - Delivery order within a source and after recovery
//! - `crash_safety.rs` - Files outlive crashes and are removed only on delivery
//! - `backpressure.rs` - A failing broker stalls the head without losing it
//! - `quota.rs`        - Storage limit enforcement at persist time
//! - `budget.rs`       - Data budget enforcement and period rollover

mod backpressure;
pub(crate) mod harness;

#[allow(unused_imports)]
pub use harness::{MockBroker, TestHarness};
