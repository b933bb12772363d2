//! sshbatch-core: Command sequences and the run state machine
//!
//! Loads command lists, drives a `SessionRunner` over a connector from
//! sshbatch-exec and reports log lines plus status transitions through
//! non-blocking event queues.

pub mod cancel;
pub mod commands;
pub mod config;
pub mod error;
pub mod event;
pub mod reader;
pub mod runner;
pub mod settings;
pub mod state;

pub use cancel::CancellationSignal;
pub use commands::{CommandDescriptor, CommandSequence, load_commands, parse_commands};
pub use config::{FailurePolicy, RunnerConfig};
pub use error::{LoadError, SettingsError};
pub use event::{
    EventReceiver, EventSender, LogEvent, LogOrigin, LogSink, Severity, StatusSink, queue,
};
pub use runner::SessionRunner;
pub use settings::{ConnectionSettings, SettingsStore};
pub use state::ExecutionStatus;
