//! One JSON object per tracing event.
//!
//! A line carries `timestamp`, `level`, `service`, `pid`, `target`,
//! `message` and, when the event has any, a `fields` object sorted by key.

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::io::Write;
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

/// A rendered log line, borrowing from the event and the layer.
#[derive(Debug, Serialize)]
pub struct LogEntry<'a> {
    pub timestamp: String,
    pub level: &'static str,
    pub service: &'a str,
    pub pid: u32,
    pub target: &'a str,
    pub message: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: BTreeMap<&'static str, Value>,
}

/// Splits the `message` field from the rest.
///
/// Counters and sizes arrive as `u64`, flags as `bool`; everything else,
/// `%`-formatted errors and paths included, goes through `Debug`.
#[derive(Default)]
struct EventFields {
    message: String,
    rest: BTreeMap<&'static str, Value>,
}

impl Visit for EventFields {
    fn record_str(&mut self, field: &Field, value: &str) {
        match field.name() {
            "message" => self.message = value.to_owned(),
            name => {
                self.rest.insert(name, Value::from(value));
            }
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        match field.name() {
            "message" => self.message = format!("{value:?}"),
            name => {
                self.rest.insert(name, Value::from(format!("{value:?}")));
            }
        }
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.rest.insert(field.name(), Value::from(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.rest.insert(field.name(), Value::from(value));
    }
}

/// Layer that appends one JSON line per event to `W`.
pub struct JsonLayer<W> {
    service: String,
    pid: u32,
    writer: W,
}

impl<W> JsonLayer<W> {
    pub fn new(service: String, writer: W) -> Self {
        Self {
            service,
            pid: std::process::id(),
            writer,
        }
    }

    fn render<'a>(&'a self, event: &'a Event<'_>) -> LogEntry<'a> {
        let mut fields = EventFields::default();
        event.record(&mut fields);
        let meta = event.metadata();

        LogEntry {
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
            level: meta.level().as_str(),
            service: &self.service,
            pid: self.pid,
            target: meta.target(),
            message: fields.message,
            fields: fields.rest,
        }
    }
}

impl<S, W> Layer<S> for JsonLayer<W>
where
    S: Subscriber,
    W: for<'w> MakeWriter<'w> + 'static,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let Ok(line) = serde_json::to_string(&self.render(event)) else {
            return;
        };
        let _ = writeln!(self.writer.make_writer(), "{line}");
    }
}
