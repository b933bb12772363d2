//! Per-stream reader turning output chunks into log lines

use sshbatch_exec::process::OutputStream;
use tracing::{debug, warn};

use crate::cancel::CancellationSignal;
use crate::event::{LogEvent, LogOrigin, LogSink, Severity};

/// Splits a byte stream on `\n`, keeping the unterminated tail
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `chunk` and return every line it completed, without the `\n`
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);

        let mut lines = Vec::new();
        let mut start = 0;
        while let Some(offset) = self.pending[start..].iter().position(|&b| b == b'\n') {
            let end = start + offset;
            lines.push(decode(&self.pending[start..end]));
            start = end + 1;
        }
        self.pending.drain(..start);
        lines
    }

    /// Take the unterminated tail, if any
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let line = decode(&self.pending);
        self.pending.clear();
        Some(line)
    }
}

/// Invalid UTF-8 becomes U+FFFD instead of an error
fn decode(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

/// Read `stream` until it ends or `cancel` is set, logging each line as `origin`
///
/// The partial last line is flushed on both exits. A transport error on the
/// stream is logged with the reader's origin and ends the reader.
pub async fn drain(
    mut stream: OutputStream,
    origin: LogOrigin,
    log: LogSink,
    cancel: CancellationSignal,
) {
    let mut buffer = LineBuffer::new();

    loop {
        let item = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                debug!(origin = %origin, "reader cancelled");
                break;
            }
            item = stream.next_chunk() => item,
        };

        match item {
            Some(Ok(chunk)) => {
                for line in buffer.push(&chunk) {
                    log.send(LogEvent::output(origin, line));
                }
            }
            Some(Err(e)) => {
                warn!(origin = %origin, error = %e, "stream read failed");
                log.send(LogEvent::new(origin, Severity::Error, e.to_string()));
                break;
            }
            None => break,
        }
    }

    if let Some(rest) = buffer.finish() {
        log.send(LogEvent::output(origin, rest));
    }
}
