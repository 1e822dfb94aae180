//! Core-to-UI events.
//!
//! Every long-lived loop in the core (transfer sessions, the live extractor,
//! the folder watcher, each listener) reports to the state-owning layer by
//! sending [`CoreEvent`]s over a channel instead of mutating shared state.
//! [`EventSink`] is the sending half; each loop owns its own clone.
//!
//! Log lines are emitted twice: once as a `tracing` record for diagnostics
//! and once as a timestamped [`CoreEvent::Log`] for whoever renders the
//! activity log.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Severity of a log event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Routine progress
    Info,
    /// Something went wrong but will be retried
    Warn,
    /// An operation failed
    Error,
}

/// Events emitted by the core for UI updates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CoreEvent {
    /// A line of tool output or a lifecycle message
    Log {
        /// Severity
        level: LogLevel,
        /// Message text
        message: String,
        /// When the line was produced
        timestamp: DateTime<Utc>,
    },
    /// A send request has been archived and is ready to transfer
    SendStaged {
        /// Path handed to the transfer tool
        payload: PathBuf,
    },
    /// A manual send attempt finished
    SendFinished {
        /// Whether the transfer completed
        success: bool,
    },
    /// A manual receive attempt finished
    ReceiveFinished {
        /// Whether the transfer completed
        success: bool,
    },
    /// An archive was unpacked and removed
    Extracted {
        /// Original (extension-stripped) name
        name: String,
        /// Directory the content was extracted into
        path: PathBuf,
    },
    /// The folder watcher confirmed delivery of a file
    FilePushed {
        /// Source file that was sent
        path: PathBuf,
    },
    /// The folder watcher loop has exited
    WatcherStopped,
    /// A required external tool is not installed
    ToolMissing {
        /// Name or path of the tool
        tool: String,
    },
    /// The manual transfer state machine changed state
    StateChanged {
        /// New state, as displayed
        state: String,
    },
}

/// Cloneable sending half of the core event channel.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<CoreEvent>,
}

impl EventSink {
    /// Create a sink and the receiver the UI reads events from.
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<CoreEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Emit an event. A closed receiver is ignored.
    pub fn emit(&self, event: CoreEvent) {
        let _ = self.tx.send(event);
    }

    /// Emit an informational log line.
    pub fn info(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::info!("{message}");
        self.log(LogLevel::Info, message);
    }

    /// Emit a warning log line.
    pub fn warn(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!("{message}");
        self.log(LogLevel::Warn, message);
    }

    /// Emit an error log line.
    pub fn error(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::error!("{message}");
        self.log(LogLevel::Error, message);
    }

    /// Forward one line of raw tool output.
    pub fn output(&self, line: &str) {
        tracing::debug!(target: "packrelay_core::tool_output", "{line}");
        self.log(LogLevel::Info, line.to_string());
    }

    fn log(&self, level: LogLevel, message: String) {
        self.emit(CoreEvent::Log {
            level,
            message,
            timestamp: Utc::now(),
        });
    }
}

/// Collect all events currently buffered in a receiver.
///
/// Handy for tests and for UIs that render in batches.
pub fn drain(rx: &mut mpsc::UnboundedReceiver<CoreEvent>) -> Vec<CoreEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
