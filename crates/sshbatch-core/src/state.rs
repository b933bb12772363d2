//! Run lifecycle state machine

use std::fmt;

use tracing::info;

use crate::event::StatusSink;

/// Lifecycle of one run
///
/// `Connecting` is initial. `Done`, `Error` and `Stopped` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionStatus {
    Connecting,
    Running,
    Done,
    Error,
    Stopped,
}

impl ExecutionStatus {
    /// Whether no further status can follow
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ExecutionStatus::Done | ExecutionStatus::Error | ExecutionStatus::Stopped
        )
    }

    /// Check if a transition is valid
    #[must_use]
    pub fn can_transition_to(self, to: ExecutionStatus) -> bool {
        use ExecutionStatus::{Connecting, Done, Error, Running, Stopped};

        matches!(
            (self, to),
            (Connecting, Running | Error | Stopped) | (Running, Done | Error | Stopped)
        )
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExecutionStatus::Connecting => "connecting",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Done => "done",
            ExecutionStatus::Error => "error",
            ExecutionStatus::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Owns the current status of a run and publishes transitions
///
/// Re-entering the current status emits nothing. Transitions that would
/// leave a terminal status or move backwards are ignored.
#[derive(Debug)]
pub(crate) struct StatusTracker {
    current: Option<ExecutionStatus>,
    sink: StatusSink,
}

impl StatusTracker {
    pub(crate) fn new(sink: StatusSink) -> Self {
        Self {
            current: None,
            sink,
        }
    }

    /// Emit `status` if it is a valid change; returns whether it was emitted
    pub(crate) fn update(&mut self, status: ExecutionStatus) -> bool {
        let allowed = match self.current {
            None => status == ExecutionStatus::Connecting,
            Some(current) if current == status => false,
            Some(current) => current.can_transition_to(status),
        };
        if !allowed {
            return false;
        }

        info!(from = ?self.current, to = %status, "status transition");
        self.current = Some(status);
        self.sink.send(status);
        true
    }

    pub(crate) fn current(&self) -> Option<ExecutionStatus> {
        self.current
    }

    pub(crate) fn is_terminal(&self) -> bool {
        self.current.is_some_and(ExecutionStatus::is_terminal)
    }
}
