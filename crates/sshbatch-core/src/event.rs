//! Event channel between a run and its consumer
//!
//! Two unbounded multi-producer/single-consumer queues: one for log lines,
//! one for status values. Producers never block and ignore a consumer that
//! went away. The consumer may poll without blocking or await the next item.

use std::fmt;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use crate::state::ExecutionStatus;

/// Where a log line came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogOrigin {
    /// Remote command standard output
    Stdout,
    /// Remote command standard error
    Stderr,
    /// The runner itself
    System,
}

impl fmt::Display for LogOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LogOrigin::Stdout => "stdout",
            LogOrigin::Stderr => "stderr",
            LogOrigin::System => "system",
        };
        f.write_str(name)
    }
}

/// Importance of a log line
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// One line of output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEvent {
    pub origin: LogOrigin,
    pub severity: Severity,
    pub line: String,
    pub timestamp: DateTime<Utc>,
}

impl LogEvent {
    /// Line tagged with an arbitrary origin
    pub fn new(origin: LogOrigin, severity: Severity, line: impl Into<String>) -> Self {
        Self {
            origin,
            severity,
            line: line.into(),
            timestamp: Utc::now(),
        }
    }

    /// Informational runner message
    pub fn system(line: impl Into<String>) -> Self {
        Self::new(LogOrigin::System, Severity::Info, line)
    }

    /// Runner warning
    pub fn warning(line: impl Into<String>) -> Self {
        Self::new(LogOrigin::System, Severity::Warning, line)
    }

    /// Runner error
    pub fn error(line: impl Into<String>) -> Self {
        Self::new(LogOrigin::System, Severity::Error, line)
    }

    /// Line read from a remote output stream
    pub fn output(origin: LogOrigin, line: impl Into<String>) -> Self {
        Self::new(origin, Severity::Info, line)
    }
}

impl fmt::Display for LogEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.origin, self.severity) {
            (LogOrigin::System, Severity::Info) => f.write_str(&self.line),
            (LogOrigin::System, Severity::Warning) => write!(f, "[warning] {}", self.line),
            (LogOrigin::System, Severity::Error) => write!(f, "[error] {}", self.line),
            (origin, Severity::Error) => write!(f, "[{origin} reader error] {}", self.line),
            (origin, _) => write!(f, "[{origin}] {}", self.line),
        }
    }
}

/// Create an unbounded queue
#[must_use]
pub fn queue<T>() -> (EventSender<T>, EventReceiver<T>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventSender { tx }, EventReceiver { rx })
}

/// Producer side of a queue; cheap to clone
#[derive(Debug)]
pub struct EventSender<T> {
    tx: mpsc::UnboundedSender<T>,
}

impl<T> Clone for EventSender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T> EventSender<T> {
    /// Enqueue without blocking; dropped silently if the consumer is gone
    pub fn send(&self, event: T) {
        let _ = self.tx.send(event);
    }

    /// Whether the consumer dropped its receiver
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Consumer side of a queue
#[derive(Debug)]
pub struct EventReceiver<T> {
    rx: mpsc::UnboundedReceiver<T>,
}

impl<T> EventReceiver<T> {
    /// Next queued item, or `None` right away if the queue is empty
    pub fn try_recv(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    /// Everything queued right now
    pub fn drain(&mut self) -> Vec<T> {
        let mut items = Vec::new();
        while let Ok(item) = self.rx.try_recv() {
            items.push(item);
        }
        items
    }

    /// Wait for the next item; `None` once every sender is dropped and the queue is empty
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }
}

/// Sink for log lines
pub type LogSink = EventSender<LogEvent>;
/// Sink for status transitions
pub type StatusSink = EventSender<ExecutionStatus>;
