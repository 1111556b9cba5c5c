//! Republishes engine log records as worker events.
//!
//! [`LogBridge::layer`] is installed once into the global `tracing` subscriber.
//! Each worker run attaches a [`LogSubscription`] for its own event channel and
//! the subscription detaches itself when dropped, on every exit path.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

use crate::config::ENGINE_LOG_TARGET;
use crate::worker::{EventSender, WorkerEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Debug,
    Info,
    Warning,
    Error,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Debug => "debug",
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
        }
    }
}

impl From<&Level> for Severity {
    fn from(level: &Level) -> Self {
        match *level {
            Level::ERROR => Severity::Error,
            Level::WARN => Severity::Warning,
            Level::INFO => Severity::Info,
            _ => Severity::Debug,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One engine log line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogRecord {
    pub message: String,
    pub severity: Severity,
}

type Subscribers = Arc<DashMap<u64, EventSender>>;

/// Registry of event channels interested in engine logs.
#[derive(Clone, Default)]
pub struct LogBridge {
    subscribers: Subscribers,
    next_id: Arc<AtomicU64>,
}

impl LogBridge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forward engine records to `events` until the subscription is dropped.
    pub fn subscribe(&self, events: EventSender) -> LogSubscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers.insert(id, events);
        tracing::debug!("Log subscription {id} attached");
        LogSubscription {
            subscribers: Arc::clone(&self.subscribers),
            id,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// The `tracing` layer feeding this bridge.
    pub fn layer(&self) -> LogBridgeLayer {
        LogBridgeLayer {
            subscribers: Arc::clone(&self.subscribers),
        }
    }

    fn publish(subscribers: &Subscribers, record: LogRecord) {
        // Closed channels are left for their subscription's Drop to remove.
        for entry in subscribers.iter() {
            let _ = entry.value().send(WorkerEvent::Log(record.clone()));
        }
    }
}

impl fmt::Debug for LogBridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogBridge")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

/// Attached bridge output. Detaches on drop.
#[derive(Debug)]
pub struct LogSubscription {
    subscribers: Subscribers,
    id: u64,
}

impl Drop for LogSubscription {
    fn drop(&mut self) {
        self.subscribers.remove(&self.id);
    }
}

pub struct LogBridgeLayer {
    subscribers: Subscribers,
}

impl<S: Subscriber> Layer<S> for LogBridgeLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let meta = event.metadata();
        if !meta.target().starts_with(ENGINE_LOG_TARGET) || self.subscribers.is_empty() {
            return;
        }

        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        LogBridge::publish(
            &self.subscribers,
            LogRecord {
                message: visitor.finish(),
                severity: Severity::from(meta.level()),
            },
        );
    }
}

/// Collects the `message` field plus any structured fields as `key=value`.
#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: Vec<String>,
}

impl MessageVisitor {
    fn finish(self) -> String {
        if self.fields.is_empty() {
            return self.message;
        }
        let extra = self.fields.join(" ");
        if self.message.is_empty() {
            extra
        } else {
            format!("{} {extra}", self.message)
        }
    }
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.fields.push(format!("{}={value}", field.name()));
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        } else {
            self.fields.push(format!("{}={value:?}", field.name()));
        }
    }
}
