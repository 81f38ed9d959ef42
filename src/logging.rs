// SPDX-License-Identifier: GPL-3.0-only

//! Structured event log
//!
//! Internal diagnostics go straight to `tracing`. Events that belong to the
//! engine's observable contract (lifecycle transitions, dropped frames,
//! module failures) are additionally sent to a [`LogSink`] so the host
//! application can export them.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;

/// Severity of a [`LogEvent`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl fmt::Display for EventLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EventLevel::Trace => "trace",
            EventLevel::Debug => "debug",
            EventLevel::Info => "info",
            EventLevel::Warn => "warn",
            EventLevel::Error => "error",
        };
        f.write_str(s)
    }
}

/// One structured event
#[derive(Debug, Clone, Serialize)]
pub struct LogEvent {
    pub timestamp: DateTime<Utc>,
    /// Module the event concerns, if any
    pub module: Option<String>,
    pub level: EventLevel,
    pub message: String,
    pub context: Map<String, Value>,
}

impl LogEvent {
    pub fn new(level: EventLevel, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            module: None,
            level,
            message: message.into(),
            context: Map::new(),
        }
    }

    pub fn module(mut self, name: impl Into<String>) -> Self {
        self.module = Some(name.into());
        self
    }

    /// Attach a context field
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.context.insert(key.to_string(), value.into());
        self
    }

    /// Look up a context field
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.context.get(key)
    }
}

/// Destination for structured events
pub trait LogSink: Send + Sync {
    fn emit(&self, event: LogEvent);
}

/// Forwards events into `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn emit(&self, event: LogEvent) {
        let module = event.module.as_deref().unwrap_or("engine");
        let context = Value::Object(event.context);
        match event.level {
            EventLevel::Trace => tracing::trace!(module, %context, "{}", event.message),
            EventLevel::Debug => tracing::debug!(module, %context, "{}", event.message),
            EventLevel::Info => tracing::info!(module, %context, "{}", event.message),
            EventLevel::Warn => tracing::warn!(module, %context, "{}", event.message),
            EventLevel::Error => tracing::error!(module, %context, "{}", event.message),
        }
    }
}

/// Keeps every event in memory
///
/// Mirrors each event to `tracing` as well, so nothing disappears from the
/// console when a memory sink is installed.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<LogEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<LogEvent> {
        self.events.lock().clone()
    }

    /// Events with the given message
    pub fn matching(&self, message: &str) -> Vec<LogEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.message == message)
            .cloned()
            .collect()
    }

    pub fn count(&self, message: &str) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| e.message == message)
            .count()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl LogSink for MemorySink {
    fn emit(&self, event: LogEvent) {
        TracingSink.emit(event.clone());
        self.events.lock().push(event);
    }
}

/// Install the global `tracing` subscriber for binaries
///
/// Set the RUST_LOG environment variable to control the level, e.g.
/// `RUST_LOG=debug` or `RUST_LOG=camera_plugins=debug`. Defaults to `warn`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(true)
        .with_level(true)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_sink_counts_by_message() {
        let sink = MemorySink::new();
        sink.emit(LogEvent::new(EventLevel::Info, "frame dropped").with("sequence", 4));
        sink.emit(LogEvent::new(EventLevel::Info, "state transition").module("scanner"));
        sink.emit(LogEvent::new(EventLevel::Info, "frame dropped").with("sequence", 5));

        assert_eq!(sink.count("frame dropped"), 2);
        let transitions = sink.matching("state transition");
        assert_eq!(transitions[0].module.as_deref(), Some("scanner"));
        assert_eq!(sink.matching("frame dropped")[1].field("sequence"), Some(&Value::from(5)));
    }

    #[test]
    fn test_event_serializes_level_lowercase() {
        let event = LogEvent::new(EventLevel::Warn, "x");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["level"], "warn");
    }
}
