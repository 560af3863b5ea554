//! Reading protocol events from a launched assistant process.

use std::collections::VecDeque;
use std::io;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::stream::{ProtocolEvent, StreamParser};
use crate::transport::{BoxedReader, BoxedWriter, LaunchedProcess, ProcessControl};

/// Next item from a process stream.
#[derive(Debug)]
pub(crate) enum StreamItem {
    /// A decoded protocol event
    Event(ProtocolEvent),
    /// The worker was aborted; the process has been killed
    Cancelled,
    /// Stdout reached end of file
    End,
}

/// How the process ended.
#[derive(Debug)]
pub(crate) struct ProcessExit {
    /// Exit code; `None` when killed by a signal
    pub code: Option<i32>,
    /// Everything the process wrote to stderr
    pub stderr: String,
}

/// Stdout parser, stderr collector and control handle of one process.
pub(crate) struct ProcessStream {
    stdin: Option<BoxedWriter>,
    stdout: BoxedReader,
    parser: StreamParser,
    pending: VecDeque<ProtocolEvent>,
    eof: bool,
    stderr: Option<JoinHandle<String>>,
    control: Box<dyn ProcessControl>,
}

impl ProcessStream {
    pub(crate) fn new(process: LaunchedProcess) -> Self {
        let LaunchedProcess {
            stdin,
            stdout,
            mut stderr,
            control,
        } = process;

        let collector = tokio::spawn(async move {
            let mut buf = Vec::new();
            if let Err(e) = stderr.read_to_end(&mut buf).await {
                debug!(error = %e, "stderr read ended with error");
            }
            String::from_utf8_lossy(&buf).into_owned()
        });

        Self {
            stdin,
            stdout,
            parser: StreamParser::new(),
            pending: VecDeque::new(),
            eof: false,
            stderr: Some(collector),
            control,
        }
    }

    /// Next event, end of stream, or cancellation (which kills the process).
    pub(crate) async fn next(&mut self, token: &CancellationToken) -> io::Result<StreamItem> {
        let mut buf = [0u8; 8192];
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Ok(StreamItem::Event(event));
            }
            if self.eof {
                return Ok(StreamItem::End);
            }

            tokio::select! {
                _ = token.cancelled() => {
                    self.kill().await;
                    return Ok(StreamItem::Cancelled);
                }
                read = self.stdout.read(&mut buf) => {
                    let n = read?;
                    if n == 0 {
                        self.eof = true;
                        self.pending.extend(self.parser.finish());
                    } else {
                        self.pending.extend(self.parser.push(&buf[..n]));
                    }
                }
            }
        }
    }

    /// Write one newline-delimited JSON message to stdin.
    pub(crate) async fn write_line(&mut self, json: &str) -> io::Result<()> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "stdin is closed"))?;
        stdin.write_all(json.as_bytes()).await?;
        stdin.write_all(b"\n").await?;
        stdin.flush().await?;
        Ok(())
    }

    /// Close stdin so the process sees end of input.
    pub(crate) async fn close_stdin(&mut self) {
        if let Some(mut stdin) = self.stdin.take() {
            let _ = stdin.shutdown().await;
        }
    }

    /// Kill the process; failures are logged.
    pub(crate) async fn kill(&mut self) {
        if let Err(e) = self.control.kill().await {
            warn!(error = %e, "failed to kill assistant process");
        }
    }

    /// Close stdin, wait for exit and collect stderr.
    pub(crate) async fn finish(mut self) -> io::Result<ProcessExit> {
        self.close_stdin().await;
        let code = self.control.wait().await?;
        let stderr = match self.stderr.take() {
            Some(task) => task.await.unwrap_or_default(),
            None => String::new(),
        };
        Ok(ProcessExit { code, stderr })
    }
}
