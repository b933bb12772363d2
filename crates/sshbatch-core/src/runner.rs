//! `SessionRunner`: drives one run against one host
//!
//! Connects, executes every command of a sequence in order while streaming
//! stdout/stderr through two readers per command, and publishes status
//! transitions `Connecting -> Running -> Done | Error | Stopped`.
//!
//! Failures never escape `run`: they are reported as log lines followed by
//! the `Error` status, since the consumer lives on another task.

use std::sync::Arc;

use sshbatch_exec::error::{ExecError, FailureClass};
use sshbatch_exec::process::RemoteProcess;
use sshbatch_exec::result::{CommandExit, ConnectionParams};
use sshbatch_exec::traits::{Connector, RemoteSession};
use tokio::task::JoinHandle;
use tokio::time::{Instant, timeout_at};
use tracing::{error, info, instrument, warn};

use crate::cancel::CancellationSignal;
use crate::commands::{CommandDescriptor, CommandSequence};
use crate::config::{FailurePolicy, RunnerConfig};
use crate::event::{LogEvent, LogOrigin, LogSink, Severity, StatusSink};
use crate::reader;
use crate::state::{ExecutionStatus, StatusTracker};

/// Commands are shortened to this many characters in completion lines
const SUMMARY_COMMAND_CHARS: usize = 30;

/// Executes command sequences over connections opened by a `Connector`
pub struct SessionRunner {
    connector: Arc<dyn Connector>,
    config: RunnerConfig,
}

impl std::fmt::Debug for SessionRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRunner")
            .field("connector", &self.connector.connector_type())
            .field("config", &self.config)
            .finish()
    }
}

impl SessionRunner {
    pub fn new(connector: Arc<dyn Connector>, config: RunnerConfig) -> Self {
        Self { connector, config }
    }

    /// Run `commands` against the host in `params`
    ///
    /// Blocks the calling task for the whole run; spawn it to keep the
    /// consumer responsive. Exactly one terminal status is emitted and it is
    /// also returned. `params` (and its credential) is dropped before this
    /// returns.
    #[instrument(skip_all, fields(target = %params.target(), commands = commands.len()))]
    pub async fn run(
        &self,
        params: ConnectionParams,
        commands: &CommandSequence,
        log: LogSink,
        status: StatusSink,
        cancel: CancellationSignal,
    ) -> ExecutionStatus {
        let mut ctx = RunContext {
            log,
            tracker: StatusTracker::new(status),
        };

        ctx.status(ExecutionStatus::Connecting);
        ctx.info(format!("connecting to {}...", params.target()));

        let connected = self
            .connector
            .connect(&params, self.config.connect_timeout())
            .await;
        drop(params);

        match connected {
            Ok(mut session) => {
                ctx.info("connected");
                ctx.status(ExecutionStatus::Running);

                if let Err(e) = self
                    .run_sequence(session.as_mut(), commands, &mut ctx, &cancel)
                    .await
                {
                    ctx.error(failure_message(&e));
                    ctx.status(ExecutionStatus::Error);
                }

                let closed = session.close().await;
                ctx.info("connection closed");
                if let Err(e) = closed {
                    ctx.error(format!("error while closing connection: {e}"));
                }
            }
            Err(e) => {
                ctx.error(failure_message(&e));
                ctx.status(ExecutionStatus::Error);
                ctx.info("connection closed");
            }
        }

        if !ctx.tracker.is_terminal() {
            ctx.status(ExecutionStatus::Error);
        }
        ctx.tracker.current().unwrap_or(ExecutionStatus::Error)
    }

    /// Iterate the sequence; sets `Done`, `Stopped` or (abort policy) `Error`
    ///
    /// A cancel that lands during the last command sets nothing, so the run
    /// ends through the `Error` fallback in `run`.
    async fn run_sequence(
        &self,
        session: &mut dyn RemoteSession,
        commands: &CommandSequence,
        ctx: &mut RunContext,
        cancel: &CancellationSignal,
    ) -> Result<(), ExecError> {
        let total = commands.len();

        for (index, descriptor) in commands.iter().enumerate() {
            let position = index + 1;

            if cancel.is_cancelled() {
                ctx.warn(format!("cancelled before command {position}/{total}"));
                ctx.status(ExecutionStatus::Stopped);
                return Ok(());
            }

            if descriptor.is_blank() {
                ctx.warn(format!("skipping command {position}: empty command"));
                continue;
            }

            ctx.info(running_line(position, total, descriptor));

            let exit = self
                .run_command(session, descriptor.command(), ctx, cancel)
                .await?;

            ctx.info(format!(
                "command '{}' finished ({exit})",
                summarize(descriptor.command())
            ));

            if !exit.success() {
                ctx.error(format!(
                    "command {position} exited with code {}",
                    exit.code()
                ));
                if self.config.failure_policy == FailurePolicy::Abort {
                    ctx.error(format!("aborting after failed command {position}/{total}"));
                    ctx.status(ExecutionStatus::Error);
                    return Ok(());
                }
            }
        }

        if cancel.is_cancelled() {
            ctx.warn("cancelled during the last command");
        } else {
            ctx.info("all commands completed");
            ctx.status(ExecutionStatus::Done);
        }
        Ok(())
    }

    /// Dispatch one command and wait for its exit and drained output
    async fn run_command(
        &self,
        session: &mut dyn RemoteSession,
        command: &str,
        ctx: &RunContext,
        cancel: &CancellationSignal,
    ) -> Result<CommandExit, ExecError> {
        let RemoteProcess {
            stdout,
            stderr,
            exit,
        } = session.exec(command).await?;

        let stdout_reader = tokio::spawn(reader::drain(
            stdout,
            LogOrigin::Stdout,
            ctx.log.clone(),
            cancel.clone(),
        ));
        let stderr_reader = tokio::spawn(reader::drain(
            stderr,
            LogOrigin::Stderr,
            ctx.log.clone(),
            cancel.clone(),
        ));

        let exit = exit.wait().await;

        let deadline = Instant::now() + self.config.reader_grace();
        self.join_reader(stdout_reader, LogOrigin::Stdout, deadline, ctx)
            .await;
        self.join_reader(stderr_reader, LogOrigin::Stderr, deadline, ctx)
            .await;

        Ok(exit)
    }

    /// Wait for a reader until `deadline`, abandoning it afterwards
    async fn join_reader(
        &self,
        handle: JoinHandle<()>,
        origin: LogOrigin,
        deadline: Instant,
        ctx: &RunContext,
    ) {
        let abort = handle.abort_handle();
        match timeout_at(deadline, handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!(origin = %origin, error = %e, "stream reader failed");
                ctx.log
                    .send(LogEvent::new(origin, Severity::Error, format!("reader failed: {e}")));
            }
            Err(_) => {
                abort.abort();
                ctx.warn(format!(
                    "{origin} reader did not finish within {:?}, trailing output may be missing",
                    self.config.reader_grace()
                ));
            }
        }
    }
}

/// Log and status plumbing for one run
struct RunContext {
    log: LogSink,
    tracker: StatusTracker,
}

impl RunContext {
    fn status(&mut self, status: ExecutionStatus) {
        self.tracker.update(status);
    }

    fn info(&self, line: impl Into<String>) {
        let line = line.into();
        info!("{line}");
        self.log.send(LogEvent::system(line));
    }

    fn warn(&self, line: impl Into<String>) {
        let line = line.into();
        warn!("{line}");
        self.log.send(LogEvent::warning(line));
    }

    fn error(&self, line: impl Into<String>) {
        let line = line.into();
        error!("{line}");
        self.log.send(LogEvent::error(line));
    }
}

fn running_line(position: usize, total: usize, descriptor: &CommandDescriptor) -> String {
    match descriptor.description() {
        Some(description) if !description.is_empty() => format!(
            "running {position}/{total}: {} ({description})",
            descriptor.command()
        ),
        _ => format!("running {position}/{total}: {}", descriptor.command()),
    }
}

fn summarize(command: &str) -> String {
    if command.chars().count() <= SUMMARY_COMMAND_CHARS {
        return command.to_string();
    }
    let head: String = command.chars().take(SUMMARY_COMMAND_CHARS).collect();
    format!("{head}...")
}

/// User-facing line for a run-terminating failure
fn failure_message(err: &ExecError) -> String {
    let hint = match err.class() {
        FailureClass::Authentication => Some("check the user name and credential"),
        FailureClass::Timeout => Some("check the host, port and network"),
        FailureClass::Network => Some("check that the host is reachable"),
        FailureClass::Protocol | FailureClass::Unexpected => None,
    };
    match hint {
        Some(hint) => format!("{err} ({hint})"),
        None => err.to_string(),
    }
}
