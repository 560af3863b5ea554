//! Process launching for the assistant executable.
//!
//! [`ProcessLauncher`] is the seam between workers and the OS process table.
//! [`TokioLauncher`] spawns real child processes; [`MockLauncher`] replays a
//! scripted transcript so worker tests never start a process.
//!
//! A launched process is exposed as raw pipes plus a [`ProcessControl`]
//! handle. Workers own the reader loops; the launcher only creates I/O.

use std::collections::VecDeque;
use std::ffi::OsString;
use std::fmt;
use std::io;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::sync::Notify;
use tracing::debug;

/// Boxed async reader for a child pipe.
pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

/// Boxed async writer for a child pipe.
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// What to launch and how.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaunchSpec {
    /// Executable path or name
    pub program: PathBuf,
    /// Arguments, in order
    pub args: Vec<String>,
    /// Working directory
    pub cwd: Option<PathBuf>,
    /// Variables set on top of the inherited environment
    pub env_set: Vec<(String, OsString)>,
    /// Inherited variables to remove
    pub env_remove: Vec<String>,
    /// Whether stdin is piped (otherwise null)
    pub pipe_stdin: bool,
}

/// Lifecycle control for a launched process.
#[async_trait]
pub trait ProcessControl: Send {
    /// Wait for exit. `None` when the process was killed by a signal.
    async fn wait(&mut self) -> io::Result<Option<i32>>;

    /// Terminate the process. Killing an exited process is not an error.
    async fn kill(&mut self) -> io::Result<()>;
}

/// Raw I/O handles produced by a successful launch.
pub struct LaunchedProcess {
    /// Child stdin, when [`LaunchSpec::pipe_stdin`] was set
    pub stdin: Option<BoxedWriter>,
    /// Child stdout
    pub stdout: BoxedReader,
    /// Child stderr
    pub stderr: BoxedReader,
    /// Wait/kill handle
    pub control: Box<dyn ProcessControl>,
}

impl fmt::Debug for LaunchedProcess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LaunchedProcess")
            .field("stdin", &self.stdin.is_some())
            .finish_non_exhaustive()
    }
}

/// Starts processes for workers.
///
/// Object-safe via [`async_trait`] so workers can hold `Arc<dyn ProcessLauncher>`.
///
/// # Errors
///
/// `launch` returns an I/O error if the process cannot be started.
#[async_trait]
pub trait ProcessLauncher: Send + Sync + fmt::Debug {
    /// Start the process described by `spec`.
    async fn launch(&self, spec: LaunchSpec) -> io::Result<LaunchedProcess>;
}

/// Launcher that spawns real child processes via `tokio::process`.
#[derive(Debug, Default, Clone)]
pub struct TokioLauncher;

struct TokioChild(Child);

#[async_trait]
impl ProcessControl for TokioChild {
    async fn wait(&mut self) -> io::Result<Option<i32>> {
        Ok(self.0.wait().await?.code())
    }

    async fn kill(&mut self) -> io::Result<()> {
        match self.0.kill().await {
            Err(e) if e.kind() == io::ErrorKind::InvalidInput => Ok(()),
            other => other,
        }
    }
}

#[async_trait]
impl ProcessLauncher for TokioLauncher {
    async fn launch(&self, spec: LaunchSpec) -> io::Result<LaunchedProcess> {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args);
        if let Some(ref cwd) = spec.cwd {
            cmd.current_dir(cwd);
        }
        for key in &spec.env_remove {
            cmd.env_remove(key);
        }
        for (key, value) in &spec.env_set {
            cmd.env(key, value);
        }

        cmd.stdin(if spec.pipe_stdin {
            std::process::Stdio::piped()
        } else {
            std::process::Stdio::null()
        })
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .kill_on_drop(true);

        let mut child = cmd.spawn()?;
        debug!(program = %spec.program.display(), pid = ?child.id(), "launched process");

        let missing = |name: &str| io::Error::other(format!("child {name} was not piped"));
        let stdin = match child.stdin.take() {
            Some(s) => Some(Box::new(s) as BoxedWriter),
            None if spec.pipe_stdin => return Err(missing("stdin")),
            None => None,
        };
        let stdout = child.stdout.take().ok_or_else(|| missing("stdout"))?;
        let stderr = child.stderr.take().ok_or_else(|| missing("stderr"))?;

        Ok(LaunchedProcess {
            stdin,
            stdout: Box::new(stdout),
            stderr: Box::new(stderr),
            control: Box::new(TokioChild(child)),
        })
    }
}

// ─── Mock launcher ──────────────────────────────────────────────────────────

/// Scripted behaviour for one mock launch.
#[derive(Debug, Clone, Default)]
pub struct MockScript {
    /// Stdout chunks written immediately, in order
    pub stdout_chunks: Vec<Vec<u8>>,
    /// When set, stdout stays open after `stdout_chunks` until
    /// [`MockLauncherHandle::release`] or a kill
    pub hold_open: bool,
    /// Stdout chunks written after release (not written when killed)
    pub after_release_chunks: Vec<Vec<u8>>,
    /// Full stderr text
    pub stderr: String,
    /// Exit code reported by `wait`
    pub exit_code: i32,
    /// Fail the launch with this message (as `NotFound`)
    pub launch_error: Option<String>,
}

impl MockScript {
    /// Script emitting `lines` (each newline-terminated) and exiting 0.
    pub fn lines<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            stdout_chunks: lines
                .into_iter()
                .map(|l| format!("{}\n", l.as_ref()).into_bytes())
                .collect(),
            ..Default::default()
        }
    }

    /// Set the exit code.
    pub fn exit_code(mut self, code: i32) -> Self {
        self.exit_code = code;
        self
    }

    /// Set stderr text.
    pub fn stderr(mut self, text: impl Into<String>) -> Self {
        self.stderr = text.into();
        self
    }

    /// Keep stdout open until released, then emit `lines`.
    pub fn then_after_release<I, S>(mut self, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.hold_open = true;
        self.after_release_chunks = lines
            .into_iter()
            .map(|l| format!("{}\n", l.as_ref()).into_bytes())
            .collect();
        self
    }

    /// Keep stdout open until released or killed.
    pub fn held_open(mut self) -> Self {
        self.hold_open = true;
        self
    }

    /// Fail the launch.
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            launch_error: Some(message.into()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Default)]
struct MockState {
    launches: Mutex<Vec<LaunchSpec>>,
    stdin: Mutex<Vec<u8>>,
    stdin_activity: Notify,
    killed: AtomicBool,
    release: Notify,
}

/// Inspection handle for a [`MockLauncher`].
#[derive(Debug, Clone)]
pub struct MockLauncherHandle {
    state: Arc<MockState>,
}

impl MockLauncherHandle {
    /// Every launch spec received, in order.
    pub fn launches(&self) -> Vec<LaunchSpec> {
        lock(&self.state.launches).clone()
    }

    /// Number of launches.
    pub fn launch_count(&self) -> usize {
        lock(&self.state.launches).len()
    }

    /// Everything written to stdin across launches, as UTF-8.
    pub fn stdin_text(&self) -> String {
        String::from_utf8_lossy(&lock(&self.state.stdin)).into_owned()
    }

    /// Wait until stdin contains `needle`.
    pub async fn wait_for_stdin(&self, needle: &str) {
        loop {
            let notified = self.state.stdin_activity.notified();
            if self.stdin_text().contains(needle) {
                return;
            }
            notified.await;
        }
    }

    /// Whether any launched process was killed.
    pub fn was_killed(&self) -> bool {
        self.state.killed.load(Ordering::SeqCst)
    }

    /// Let a held-open script continue.
    pub fn release(&self) {
        self.state.release.notify_one();
    }
}

/// Launcher replaying [`MockScript`]s instead of starting processes.
///
/// Scripts queued with [`MockLauncher::push_script`] are used first, one per
/// launch; afterwards the default script is reused.
#[derive(Debug)]
pub struct MockLauncher {
    scripts: Mutex<VecDeque<MockScript>>,
    default_script: MockScript,
    state: Arc<MockState>,
}

impl MockLauncher {
    /// Launcher that replays `script` for every launch.
    pub fn new(script: MockScript) -> (Self, MockLauncherHandle) {
        let state = Arc::new(MockState::default());
        (
            Self {
                scripts: Mutex::new(VecDeque::new()),
                default_script: script,
                state: state.clone(),
            },
            MockLauncherHandle { state },
        )
    }

    /// Queue a script for the next unscripted launch.
    pub fn push_script(&self, script: MockScript) {
        lock(&self.scripts).push_back(script);
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct CaptureWriter {
    state: Arc<MockState>,
}

impl AsyncWrite for CaptureWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        lock(&self.state.stdin).extend_from_slice(buf);
        self.state.stdin_activity.notify_waiters();
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

struct MockControl {
    state: Arc<MockState>,
    exit_code: i32,
    killed_here: bool,
    writer_done: Option<tokio::task::JoinHandle<()>>,
}

#[async_trait]
impl ProcessControl for MockControl {
    async fn wait(&mut self) -> io::Result<Option<i32>> {
        if let Some(task) = self.writer_done.take() {
            let _ = task.await;
        }
        if self.killed_here {
            Ok(None)
        } else {
            Ok(Some(self.exit_code))
        }
    }

    async fn kill(&mut self) -> io::Result<()> {
        self.killed_here = true;
        self.state.killed.store(true, Ordering::SeqCst);
        self.state.release.notify_one();
        Ok(())
    }
}

#[async_trait]
impl ProcessLauncher for MockLauncher {
    async fn launch(&self, spec: LaunchSpec) -> io::Result<LaunchedProcess> {
        let pipe_stdin = spec.pipe_stdin;
        lock(&self.state.launches).push(spec);

        let script = lock(&self.scripts)
            .pop_front()
            .unwrap_or_else(|| self.default_script.clone());

        if let Some(message) = script.launch_error {
            return Err(io::Error::new(io::ErrorKind::NotFound, message));
        }

        let (mut out_tx, out_rx) = tokio::io::duplex(64 * 1024);
        let (mut err_tx, err_rx) = tokio::io::duplex(64 * 1024);

        let state = self.state.clone();
        let writer = tokio::spawn(async move {
            let _ = err_tx.write_all(script.stderr.as_bytes()).await;
            drop(err_tx);

            for chunk in &script.stdout_chunks {
                if out_tx.write_all(chunk).await.is_err() {
                    return;
                }
            }
            if script.hold_open {
                state.release.notified().await;
                if !state.killed.load(Ordering::SeqCst) {
                    for chunk in &script.after_release_chunks {
                        if out_tx.write_all(chunk).await.is_err() {
                            return;
                        }
                    }
                }
            }
        });

        let stdin = pipe_stdin.then(|| {
            Box::new(CaptureWriter {
                state: self.state.clone(),
            }) as BoxedWriter
        });

        Ok(LaunchedProcess {
            stdin,
            stdout: Box::new(out_rx),
            stderr: Box::new(err_rx),
            control: Box::new(MockControl {
                state: self.state.clone(),
                exit_code: script.exit_code,
                killed_here: false,
                writer_done: Some(writer),
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn mock_replays_script_and_records_launch() {
        let script = MockScript::lines(["{\"a\":1}", "{\"b\":2}"])
            .stderr("warn")
            .exit_code(3);
        let (launcher, handle) = MockLauncher::new(script);

        let spec = LaunchSpec {
            program: PathBuf::from("claude"),
            args: vec!["-p".into()],
            ..Default::default()
        };
        let mut proc = launcher.launch(spec.clone()).await.unwrap();

        let mut out = String::new();
        proc.stdout.read_to_string(&mut out).await.unwrap();
        let mut err = String::new();
        proc.stderr.read_to_string(&mut err).await.unwrap();

        assert_eq!(out, "{\"a\":1}\n{\"b\":2}\n");
        assert_eq!(err, "warn");
        assert_eq!(proc.control.wait().await.unwrap(), Some(3));
        assert!(proc.stdin.is_none());
        assert_eq!(handle.launches(), vec![spec]);
    }

    #[tokio::test]
    async fn held_open_script_continues_after_release() {
        let script = MockScript::lines(["first"]).then_after_release(["second"]);
        let (launcher, handle) = MockLauncher::new(script);
        let mut proc = launcher
            .launch(LaunchSpec {
                pipe_stdin: true,
                ..Default::default()
            })
            .await
            .unwrap();

        let mut stdin = proc.stdin.take().unwrap();
        stdin.write_all(b"hello\n").await.unwrap();
        handle.wait_for_stdin("hello").await;
        handle.release();

        let mut out = String::new();
        proc.stdout.read_to_string(&mut out).await.unwrap();
        assert_eq!(out, "first\nsecond\n");
        assert_eq!(handle.stdin_text(), "hello\n");
    }

    #[tokio::test]
    async fn kill_ends_held_stream_without_late_chunks() {
        let script = MockScript::lines(["first"]).then_after_release(["late"]);
        let (launcher, handle) = MockLauncher::new(script);
        let mut proc = launcher.launch(LaunchSpec::default()).await.unwrap();

        proc.control.kill().await.unwrap();
        let mut out = String::new();
        proc.stdout.read_to_string(&mut out).await.unwrap();

        assert_eq!(out, "first\n");
        assert_eq!(proc.control.wait().await.unwrap(), None);
        assert!(handle.was_killed());
    }

    #[tokio::test]
    async fn queued_scripts_take_precedence() {
        let (launcher, handle) = MockLauncher::new(MockScript::lines(["default"]));
        launcher.push_script(MockScript::failing("no such file"));

        let err = launcher.launch(LaunchSpec::default()).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
        assert!(launcher.launch(LaunchSpec::default()).await.is_ok());
        assert_eq!(handle.launch_count(), 2);
    }

    #[tokio::test]
    async fn tokio_launcher_reports_missing_program() {
        let result = TokioLauncher
            .launch(LaunchSpec {
                program: PathBuf::from("/definitely/not/a/real/program"),
                ..Default::default()
            })
            .await;
        assert!(result.is_err());
    }
}
