//! Handle to one running remote command
//!
//! A transport produces a `ProcessFeed`/`RemoteProcess` pair per command. The
//! feed side pushes output chunks and the exit status, the process side is
//! split between two stream readers and the task waiting for the exit.

use tokio::sync::{mpsc, oneshot};

use crate::error::ExecError;
use crate::result::CommandExit;

/// Largest chunk delivered on an output stream
pub const READ_CHUNK_SIZE: usize = 4096;

/// One item on an output stream
pub type StreamItem = Result<Vec<u8>, ExecError>;

/// Which output stream of the remote command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Stdout,
    Stderr,
}

/// Receiving half of one output stream
///
/// Yields chunks in the order the transport received them. `None` means the
/// command finished and every buffered chunk has been delivered.
#[derive(Debug)]
pub struct OutputStream {
    rx: mpsc::UnboundedReceiver<StreamItem>,
}

impl OutputStream {
    /// Wait for the next chunk
    pub async fn next_chunk(&mut self) -> Option<StreamItem> {
        self.rx.recv().await
    }
}

/// Resolves once the remote command has exited
#[derive(Debug)]
pub struct ExitWaiter {
    rx: oneshot::Receiver<CommandExit>,
}

impl ExitWaiter {
    /// Wait for the exit status; a feed dropped without one yields `Unknown`
    pub async fn wait(self) -> CommandExit {
        self.rx.await.unwrap_or(CommandExit::Unknown)
    }
}

/// Running remote command, split into its observable parts
#[derive(Debug)]
pub struct RemoteProcess {
    pub stdout: OutputStream,
    pub stderr: OutputStream,
    pub exit: ExitWaiter,
}

impl RemoteProcess {
    /// Create a connected feed/process pair
    #[must_use]
    pub fn channel() -> (ProcessFeed, RemoteProcess) {
        let (stdout_tx, stdout_rx) = mpsc::unbounded_channel();
        let (stderr_tx, stderr_rx) = mpsc::unbounded_channel();
        let (exit_tx, exit_rx) = oneshot::channel();

        let feed = ProcessFeed {
            stdout: Some(stdout_tx),
            stderr: Some(stderr_tx),
            exit: Some(exit_tx),
        };
        let process = RemoteProcess {
            stdout: OutputStream { rx: stdout_rx },
            stderr: OutputStream { rx: stderr_rx },
            exit: ExitWaiter { rx: exit_rx },
        };
        (feed, process)
    }
}

/// Producing half, owned by the transport
#[derive(Debug)]
pub struct ProcessFeed {
    stdout: Option<mpsc::UnboundedSender<StreamItem>>,
    stderr: Option<mpsc::UnboundedSender<StreamItem>>,
    exit: Option<oneshot::Sender<CommandExit>>,
}

impl ProcessFeed {
    /// Push bytes onto a stream, split into `READ_CHUNK_SIZE` pieces
    pub fn push(&self, kind: StreamKind, data: &[u8]) {
        if let Some(tx) = self.sender(kind) {
            for chunk in data.chunks(READ_CHUNK_SIZE) {
                // receiver gone means the reader gave up, nothing to do
                let _ = tx.send(Ok(chunk.to_vec()));
            }
        }
    }

    /// Report a transport error on a stream
    pub fn fail(&self, kind: StreamKind, error: ExecError) {
        if let Some(tx) = self.sender(kind) {
            let _ = tx.send(Err(error));
        }
    }

    /// Close both output streams; readers see the end after draining
    pub fn close_output(&mut self) {
        self.stdout = None;
        self.stderr = None;
    }

    /// Report the exit status; only the first call has an effect
    pub fn exit(&mut self, exit: CommandExit) {
        if let Some(tx) = self.exit.take() {
            let _ = tx.send(exit);
        }
    }

    /// Whether the exit status has been reported
    #[must_use]
    pub fn has_exited(&self) -> bool {
        self.exit.is_none()
    }

    fn sender(&self, kind: StreamKind) -> Option<&mpsc::UnboundedSender<StreamItem>> {
        match kind {
            StreamKind::Stdout => self.stdout.as_ref(),
            StreamKind::Stderr => self.stderr.as_ref(),
        }
    }
}
