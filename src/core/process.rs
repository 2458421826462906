//! # OS process spawning and watching.
//!
//! [`spawn`] starts the child described by a [`ProcessSpec`] and hands back a
//! [`ProcessHandle`]. The child itself is owned by a watcher task:
//!
//! ```text
//! spawn() ──► Child ──► watcher task
//!              │           ├─ child.wait()      ──► ProcessExited ──► on_exit(code)
//!              │           └─ kill_rx.recv()    ──► start_kill()
//!              ├─ stdout ──► pump ──► OutputLine events
//!              └─ stderr ──► pump ──► ErrorLine events   (when captured)
//! ```
//!
//! The watcher never touches supervisor state; `on_exit` is expected to enqueue.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::machine::RunType;
use crate::events::{Bus, Event, EventKind};

/// How long the watcher waits for output pumps to drain after the child exited.
const PUMP_GRACE: Duration = Duration::from_millis(200);

/// Identity of a managed child: what to run and how.
#[derive(Clone, Debug)]
pub struct ProcessSpec {
    /// Program to execute.
    pub path: PathBuf,
    /// Arguments, in order.
    pub args: Vec<String>,
    /// Working directory (inherits the host's when `None`).
    pub working_dir: Option<PathBuf>,
    /// Extra environment variables.
    pub env: Vec<(String, String)>,
    /// Capture stderr as `ErrorLine` events (stdout is always captured).
    pub capture_stderr: bool,
    /// Whether the child is expected to exit on its own.
    pub run_type: RunType,
}

impl ProcessSpec {
    /// Describes `path` with no arguments, a `SelfTerminating` run type and stderr inherited.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            args: Vec::new(),
            working_dir: None,
            env: Vec::new(),
            capture_stderr: false,
            run_type: RunType::default(),
        }
    }

    /// Appends one argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Appends several arguments.
    pub fn args<I, A>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Sets the working directory.
    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Adds an environment variable.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Enables or disables stderr capture.
    pub fn capture_stderr(mut self, capture: bool) -> Self {
        self.capture_stderr = capture;
        self
    }

    /// Sets the run type.
    pub fn run_type(mut self, run_type: RunType) -> Self {
        self.run_type = run_type;
        self
    }

    /// Short name derived from the program's file stem (`"/usr/bin/sleep"` → `"sleep"`).
    pub fn label(&self) -> String {
        file_stem(&self.path)
    }
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

/// Snapshot of the managed OS process.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProcessInfo {
    /// OS process id.
    pub pid: u32,
    /// Exit code once the process terminated (`-1` when killed by a signal).
    pub exit_code: Option<i32>,
}

/// Supervisor-side handle to a spawned child.
///
/// Dropping it does not kill the child; the watcher keeps reporting its exit.
pub(crate) struct ProcessHandle {
    pid: u32,
    kill_tx: mpsc::Sender<()>,
}

impl ProcessHandle {
    pub(crate) fn pid(&self) -> u32 {
        self.pid
    }

    /// Requests forced termination. Returns false if the child is already gone.
    pub(crate) fn kill(&self) -> bool {
        match self.kill_tx.try_send(()) {
            Ok(()) | Err(mpsc::error::TrySendError::Full(())) => true,
            Err(mpsc::error::TrySendError::Closed(())) => false,
        }
    }
}

/// Spawns the child and its watcher. `on_exit` runs once with the exit code.
///
/// Must be called within a tokio runtime.
pub(crate) fn spawn<F>(
    spec: &ProcessSpec,
    label: Arc<str>,
    bus: Bus,
    on_exit: F,
) -> std::io::Result<ProcessHandle>
where
    F: FnOnce(i32) + Send + 'static,
{
    let mut cmd = Command::new(&spec.path);
    cmd.args(&spec.args)
        .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(if spec.capture_stderr {
            Stdio::piped()
        } else {
            Stdio::inherit()
        });
    if let Some(dir) = &spec.working_dir {
        cmd.current_dir(dir);
    }

    let mut child = cmd.spawn()?;
    let pid = child.id().unwrap_or_default();
    debug!(%label, pid, path = %spec.path.display(), "process spawned");

    let mut pumps = Vec::with_capacity(2);
    if let Some(stdout) = child.stdout.take() {
        pumps.push(tokio::spawn(pump(
            stdout,
            EventKind::OutputLine,
            Arc::clone(&label),
            pid,
            bus.clone(),
        )));
    }
    if let Some(stderr) = child.stderr.take() {
        pumps.push(tokio::spawn(pump(
            stderr,
            EventKind::ErrorLine,
            Arc::clone(&label),
            pid,
            bus.clone(),
        )));
    }

    let (kill_tx, mut kill_rx) = mpsc::channel::<()>(1);
    tokio::spawn(async move {
        let status = loop {
            tokio::select! {
                status = child.wait() => break status,
                Some(()) = kill_rx.recv() => {
                    if let Err(err) = child.start_kill() {
                        warn!(%label, pid, error = %err, "kill failed; process already gone");
                    }
                }
            }
        };

        let code = match status {
            Ok(status) => status.code().unwrap_or(-1),
            Err(err) => {
                warn!(%label, pid, error = %err, "failed to wait for process");
                -1
            }
        };

        let _ = tokio::time::timeout(PUMP_GRACE, futures::future::join_all(pumps)).await;

        bus.publish(
            Event::new(EventKind::ProcessExited)
                .with_supervisor(Arc::clone(&label))
                .with_pid(pid)
                .with_exit_code(code),
        );
        on_exit(code);
    });

    Ok(ProcessHandle { pid, kill_tx })
}

async fn pump<R>(reader: R, kind: EventKind, label: Arc<str>, pid: u32, bus: Bus)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => bus.publish(
                Event::new(kind)
                    .with_supervisor(Arc::clone(&label))
                    .with_pid(pid)
                    .with_line(line),
            ),
            Ok(None) => break,
            Err(err) => {
                debug!(%label, pid, error = %err, "output stream closed");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_is_file_stem() {
        assert_eq!(ProcessSpec::new("/opt/sim/Arena.x86_64").label(), "Arena");
        assert_eq!(ProcessSpec::new("sleep").label(), "sleep");
    }

    #[test]
    fn builder_accumulates() {
        let spec = ProcessSpec::new("sh")
            .arg("-c")
            .args(["exit 0"])
            .env("A", "1")
            .capture_stderr(true)
            .run_type(RunType::NonTerminating);
        assert_eq!(spec.args, vec!["-c", "exit 0"]);
        assert_eq!(spec.env, vec![("A".to_string(), "1".to_string())]);
        assert!(spec.capture_stderr);
        assert_eq!(spec.run_type, RunType::NonTerminating);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn reports_exit_code_and_output() {
        let bus = Bus::new(64);
        let mut rx = bus.subscribe();
        let (tx, done) = tokio::sync::oneshot::channel();

        let spec = ProcessSpec::new("sh").args(["-c", "echo hello; echo oops >&2; exit 7"]);
        let spec = spec.capture_stderr(true);
        let handle = spawn(&spec, Arc::from("sh"), bus.clone(), move |code| {
            let _ = tx.send(code);
        })
        .unwrap();
        assert!(handle.pid() > 0);
        assert_eq!(done.await.unwrap(), 7);

        let mut kinds = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            kinds.push((ev.kind, ev.line.as_deref().map(str::to_string)));
        }
        assert!(kinds.contains(&(EventKind::OutputLine, Some("hello".into()))));
        assert!(kinds.contains(&(EventKind::ErrorLine, Some("oops".into()))));
        assert_eq!(kinds.last().map(|k| k.0), Some(EventKind::ProcessExited));
        assert!(!handle.kill());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn kill_terminates_child() {
        let (tx, done) = tokio::sync::oneshot::channel();
        let handle = spawn(
            &ProcessSpec::new("sleep").arg("30"),
            Arc::from("sleep"),
            Bus::new(8),
            move |code| {
                let _ = tx.send(code);
            },
        )
        .unwrap();

        assert!(handle.kill());
        let code = tokio::time::timeout(Duration::from_secs(5), done)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(code, -1);
    }

    #[tokio::test]
    async fn missing_program_is_a_spawn_error() {
        let res = spawn(
            &ProcessSpec::new("/definitely/not/here"),
            Arc::from("x"),
            Bus::new(8),
            |_| {},
        );
        assert!(res.is_err());
    }
}
