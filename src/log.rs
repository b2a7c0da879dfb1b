//! # Structured event sink.
//!
//! The supervisor reports everything it does as named events with typed
//! fields. [`EventSink`] is the seam between the core and whatever
//! backend the embedder uses; [`TracingSink`] is the built-in
//! implementation that forwards to [`tracing`].
//!
//! Event names emitted by the core:
//!
//! | Event | Fields |
//! |---|---|
//! | `agent_start` / `client_start` | `summary` |
//! | `agent_stop` / `client_stop` | |
//! | `agent_stop_requested` / `client_stop_requested` | |
//! | `ssh_started` | `summary` |
//! | `ssh_start_failed` | `error` |
//! | `ssh_exited` | `exit`, `class`, `stderr?` |
//! | `restart_scheduled` | `delay_ms` |
//! | `restart_triggered` | `reason` |
//! | `restart_skipped` | `reason`, `detail` |
//! | `restart_policy_stop` | `policy`, `class?`, `reason?` |
//! | `stop_during_backoff` | |
//!
//! Sinks are invoked after the supervisor releases its locks and must
//! not call back into it.

use serde_json::Value;

/// Severity of an emitted event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Info,
    Error,
}

impl Level {
    /// Returns the uppercase label used in rendered log lines.
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Info => "INFO",
            Level::Error => "ERROR",
        }
    }
}

/// Receives structured events from the supervision core.
pub trait EventSink: Send + Sync {
    /// Handles one named event with its fields.
    fn event(&self, level: Level, event: &str, fields: &[(&str, Value)]);

    /// Emits a plain informational message.
    fn info(&self, msg: &str) {
        self.event(Level::Info, "message", &[("msg", Value::from(msg))]);
    }

    /// Emits a plain error message.
    fn error(&self, msg: &str) {
        self.event(Level::Error, "message", &[("msg", Value::from(msg))]);
    }
}

/// Forwards events to the [`tracing`] subscriber installed by the
/// embedder.
///
/// Fields are rendered as one JSON object so downstream formatters can
/// emit a single structured line per event.
pub struct TracingSink;

impl EventSink for TracingSink {
    fn event(&self, level: Level, event: &str, fields: &[(&str, Value)]) {
        let mut map = serde_json::Map::with_capacity(fields.len());
        for (key, value) in fields {
            map.insert((*key).to_string(), value.clone());
        }
        let fields = Value::Object(map);
        match level {
            Level::Info => tracing::info!(target: "sshvisor", event = %event, fields = %fields),
            Level::Error => tracing::error!(target: "sshvisor", event = %event, fields = %fields),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use parking_lot::Mutex;

    struct Recording {
        seen: Mutex<Vec<(Level, String)>>,
    }

    impl EventSink for Recording {
        fn event(&self, level: Level, event: &str, _fields: &[(&str, Value)]) {
            self.seen.lock().push((level, event.to_string()));
        }
    }

    #[test]
    fn provided_helpers_wrap_message_events() {
        let sink = Recording {
            seen: Mutex::new(Vec::new()),
        };
        sink.info("hello");
        sink.error("boom");
        let seen = sink.seen.lock();
        assert_eq!(seen[0], (Level::Info, "message".to_string()));
        assert_eq!(seen[1], (Level::Error, "message".to_string()));
    }

    #[test]
    fn level_labels() {
        assert_eq!(Level::Info.as_str(), "INFO");
        assert_eq!(Level::Error.as_str(), "ERROR");
    }
}
