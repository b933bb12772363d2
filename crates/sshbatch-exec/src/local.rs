//! Local command execution using `tokio::process`
//!
//! Stands in for a remote host: every command runs through `sh -c` on this
//! machine and is streamed the same way an SSH channel is.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::{debug, error, instrument};

use crate::error::ExecError;
use crate::process::{ProcessFeed, READ_CHUNK_SIZE, RemoteProcess, StreamKind};
use crate::result::{CommandExit, ConnectionParams};
use crate::traits::{Connector, RemoteSession};

/// Connector that never leaves the local machine
#[derive(Debug, Clone, Default)]
pub struct LocalConnector;

impl LocalConnector {
    /// Create a new local connector
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for LocalConnector {
    async fn connect(
        &self,
        params: &ConnectionParams,
        _timeout: Duration,
    ) -> Result<Box<dyn RemoteSession>, ExecError> {
        debug!(target_host = %params.host, "using local session");
        Ok(Box::new(LocalSession))
    }

    fn connector_type(&self) -> &'static str {
        "local"
    }
}

/// Session whose commands are local child processes
#[derive(Debug)]
struct LocalSession;

#[async_trait]
impl RemoteSession for LocalSession {
    #[instrument(skip(self), level = "debug")]
    async fn exec(&mut self, command: &str) -> Result<RemoteProcess, ExecError> {
        debug!(command = %command, "executing local command");

        // Use shell to support pipes, redirections, etc.
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| ExecError::Unexpected(format!("failed to spawn process: {e}")))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ExecError::Unexpected("stdout not captured".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| ExecError::Unexpected("stderr not captured".to_string()))?;

        let (mut feed, process) = RemoteProcess::channel();
        let command = command.to_string();

        tokio::spawn(async move {
            tokio::join!(
                copy_stream(stdout, StreamKind::Stdout, &feed),
                copy_stream(stderr, StreamKind::Stderr, &feed),
            );
            feed.close_output();

            let exit = match child.wait().await {
                Ok(status) => match status.code() {
                    Some(code) => CommandExit::Code(u32::try_from(code).unwrap_or(u32::MAX)),
                    None => signal_exit(&status),
                },
                Err(e) => {
                    error!(command = %command, error = %e, "failed to wait for child");
                    CommandExit::Unknown
                }
            };
            debug!(command = %command, exit = %exit, "local command completed");
            feed.exit(exit);
        });

        Ok(process)
    }

    async fn close(&mut self) -> Result<(), ExecError> {
        Ok(())
    }
}

async fn copy_stream<R>(mut reader: R, kind: StreamKind, feed: &ProcessFeed)
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; READ_CHUNK_SIZE];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => feed.push(kind, &buf[..n]),
            Err(e) => {
                feed.fail(kind, ExecError::Unexpected(e.to_string()));
                break;
            }
        }
    }
}

#[cfg(unix)]
fn signal_exit(status: &std::process::ExitStatus) -> CommandExit {
    use std::os::unix::process::ExitStatusExt;

    status
        .signal()
        .map_or(CommandExit::Unknown, |sig| CommandExit::Signal(sig.to_string()))
}

#[cfg(not(unix))]
fn signal_exit(_status: &std::process::ExitStatus) -> CommandExit {
    CommandExit::Unknown
}
