//! Tracing setup and the admin log ring buffer
//!
//! Besides the usual fmt subscriber, a second layer copies every event
//! into a bounded in-memory ring served by `GET /api/admin/logs`.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt::Write as _;
use std::sync::{Arc, Mutex};
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Ring capacity
const LOG_CAPACITY: usize = 1000;

/// One captured log line
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: String,
    pub target: String,
    pub message: String,
}

/// Shared ring buffer of recent log entries
#[derive(Clone, Default)]
pub struct LogBuffer {
    entries: Arc<Mutex<VecDeque<LogEntry>>>,
}

impl LogBuffer {
    /// Create an empty buffer
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry, evicting the oldest past capacity
    pub fn push(&self, entry: LogEntry) {
        let mut entries = self.entries.lock().expect("log buffer lock");
        if entries.len() == LOG_CAPACITY {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    /// Snapshot of the buffered entries, oldest first
    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries
            .lock()
            .expect("log buffer lock")
            .iter()
            .cloned()
            .collect()
    }
}

struct MessageVisitor {
    message: String,
}

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{value:?}");
        } else {
            if !self.message.is_empty() {
                self.message.push(' ');
            }
            let _ = write!(self.message, "{}={value:?}", field.name());
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        } else {
            if !self.message.is_empty() {
                self.message.push(' ');
            }
            let _ = write!(self.message, "{}={value}", field.name());
        }
    }
}

/// Layer feeding the ring buffer
pub struct RingBufferLayer {
    buffer: LogBuffer,
}

impl RingBufferLayer {
    /// Create a layer writing into the given buffer
    pub fn new(buffer: LogBuffer) -> Self {
        Self { buffer }
    }
}

impl<S: Subscriber> Layer<S> for RingBufferLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        if *metadata.level() > Level::INFO {
            return;
        }
        let mut visitor = MessageVisitor {
            message: String::new(),
        };
        event.record(&mut visitor);
        self.buffer.push(LogEntry {
            timestamp: Utc::now(),
            level: metadata.level().to_string(),
            target: metadata.target().to_string(),
            message: visitor.message,
        });
    }
}

/// Install the global subscriber: env-filtered fmt plus the ring buffer
pub fn init(buffer: LogBuffer) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(RingBufferLayer::new(buffer))
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_evicts_oldest() {
        let buffer = LogBuffer::new();
        for i in 0..(LOG_CAPACITY + 10) {
            buffer.push(LogEntry {
                timestamp: Utc::now(),
                level: "INFO".into(),
                target: "test".into(),
                message: format!("entry {i}"),
            });
        }
        let entries = buffer.entries();
        assert_eq!(entries.len(), LOG_CAPACITY);
        assert_eq!(entries[0].message, "entry 10");
        assert_eq!(entries.last().unwrap().message, format!("entry {}", LOG_CAPACITY + 9));
    }

    #[test]
    fn entries_snapshot_is_ordered() {
        let buffer = LogBuffer::new();
        buffer.push(LogEntry {
            timestamp: Utc::now(),
            level: "INFO".into(),
            target: "a".into(),
            message: "first".into(),
        });
        buffer.push(LogEntry {
            timestamp: Utc::now(),
            level: "WARN".into(),
            target: "b".into(),
            message: "second".into(),
        });
        let entries = buffer.entries();
        assert_eq!(entries[0].message, "first");
        assert_eq!(entries[1].message, "second");
    }
}
