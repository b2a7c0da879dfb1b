//! # Child process plumbing.
//!
//! [`ChildSpec`] is what the caller-supplied build callback produces:
//! a fully configured command line for one spawn. [`spawn`] turns it
//! into a running process with drained pipes and exactly one waiter.
//!
//! ## The single waiter
//!
//! Waiting on the same OS process from two places is a race and can
//! reap the wrong process. Every spawn therefore gets one dedicated
//! waiter task that owns the [`tokio::process::Child`], observes its
//! exit, stores the outcome, and fires a completion token. The stop
//! sequence and the restart loop both wait on that token; neither ever
//! touches the OS wait directly. Signals are delivered by PID so they
//! do not need the child handle.

use std::io;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;

use crate::error::SupervisorError;
use crate::tail::LineRing;

/// Error type produced by build callbacks.
pub type BuildError = Box<dyn std::error::Error + Send + Sync>;

/// Result of one build callback invocation.
pub type BuildResult = Result<ChildSpec, BuildError>;

/// Number of stderr lines retained for classification.
pub(crate) const STDERR_TAIL_LINES: usize = 10;

/// Configured child process specification, produced once per spawn by
/// the build callback.
///
/// The supervisor wires the pipes itself: stdout is drained and
/// discarded, stderr feeds the classification tail.
#[derive(Debug, Clone)]
pub struct ChildSpec {
    /// Program to execute.
    pub program: String,
    /// Arguments, in order.
    pub args: Vec<String>,
    /// Extra environment entries layered over the inherited environment.
    pub envs: Vec<(String, String)>,
    /// Working directory; `None` inherits the supervisor's.
    pub cwd: Option<PathBuf>,
}

impl ChildSpec {
    /// Creates a spec for `program` with no arguments.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
            cwd: None,
        }
    }

    /// Appends one argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Appends several arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Adds an environment entry.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    /// Sets the working directory.
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }
}

/// Shared handle to one spawned child.
///
/// The waiter task holds the [`Child`] itself; everyone else holds this
/// handle and interacts through the completion token and PID signals.
pub(crate) struct SpawnHandle {
    pid: Option<u32>,
    epoch: u64,
    done: CancellationToken,
    outcome: Mutex<Option<io::Result<ExitStatus>>>,
    pub(crate) tail: Arc<LineRing>,
}

impl SpawnHandle {
    /// Spawn epoch this child belongs to.
    pub(crate) fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Resolves when the waiter has observed the child's exit.
    pub(crate) async fn wait_done(&self) {
        self.done.cancelled().await;
    }

    /// Takes the exit outcome recorded by the waiter, if any.
    pub(crate) fn take_outcome(&self) -> Option<io::Result<ExitStatus>> {
        self.outcome.lock().take()
    }

    /// Asks the child to wind down (SIGINT).
    pub(crate) fn interrupt(&self) {
        self.signal_child(InterruptKind::Interrupt);
    }

    /// Asks the child to terminate (SIGTERM), used by restart triggers.
    pub(crate) fn terminate(&self) {
        self.signal_child(InterruptKind::Terminate);
    }

    /// Force-kills the child (SIGKILL).
    pub(crate) fn kill(&self) {
        self.signal_child(InterruptKind::Kill);
    }

    #[cfg(unix)]
    fn signal_child(&self, kind: InterruptKind) {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        let Some(pid) = self.pid else { return };
        let signal = match kind {
            InterruptKind::Interrupt => Signal::SIGINT,
            InterruptKind::Terminate => Signal::SIGTERM,
            InterruptKind::Kill => Signal::SIGKILL,
        };
        // Delivery failure means the child is already gone; the waiter
        // will observe that.
        let _ = kill(Pid::from_raw(pid as i32), signal);
    }

    #[cfg(not(unix))]
    fn signal_child(&self, _kind: InterruptKind) {}
}

enum InterruptKind {
    Interrupt,
    Terminate,
    Kill,
}

/// Spawns the child described by `spec` and wires its plumbing.
///
/// On success the returned handle's waiter, stdout drain, and stderr
/// drain are already running.
pub(crate) fn spawn(spec: &ChildSpec, epoch: u64) -> Result<Arc<SpawnHandle>, SupervisorError> {
    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    for (key, value) in &spec.envs {
        cmd.env(key, value);
    }
    if let Some(dir) = &spec.cwd {
        cmd.current_dir(dir);
    }

    let mut child = cmd
        .spawn()
        .map_err(|source| SupervisorError::Spawn { source })?;

    let stdout = take_pipe(child.stdout.take(), &mut child, "stdout")?;
    let stderr = take_pipe(child.stderr.take(), &mut child, "stderr")?;

    let tail = Arc::new(LineRing::new(STDERR_TAIL_LINES));
    tokio::spawn(drain(stdout, None));
    tokio::spawn(drain(stderr, Some(tail.clone())));

    let handle = Arc::new(SpawnHandle {
        pid: child.id(),
        epoch,
        done: CancellationToken::new(),
        outcome: Mutex::new(None),
        tail,
    });

    let waiter = handle.clone();
    tokio::spawn(async move {
        let result = child.wait().await;
        *waiter.outcome.lock() = Some(result);
        waiter.done.cancel();
    });

    Ok(handle)
}

fn take_pipe<T>(
    pipe: Option<T>,
    child: &mut Child,
    name: &str,
) -> Result<T, SupervisorError> {
    match pipe {
        Some(pipe) => Ok(pipe),
        None => {
            let _ = child.start_kill();
            Err(SupervisorError::Spawn {
                source: io::Error::other(format!("{name} pipe unavailable")),
            })
        }
    }
}

/// Drains a pipe line by line until EOF, optionally into the tail ring.
async fn drain<R: AsyncRead + Unpin>(reader: R, tail: Option<Arc<LineRing>>) {
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if let Some(tail) = &tail {
            tail.push(line);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spec_builder_accumulates() {
        let spec = ChildSpec::new("ssh")
            .arg("-N")
            .args(["-R", "0.0.0.0:2222:localhost:22"])
            .env("SSH_AUTH_SOCK", "/tmp/agent.sock")
            .current_dir("/tmp");
        assert_eq!(spec.program, "ssh");
        assert_eq!(spec.args, vec!["-N", "-R", "0.0.0.0:2222:localhost:22"]);
        assert_eq!(spec.envs.len(), 1);
        assert_eq!(spec.cwd.as_deref(), Some(std::path::Path::new("/tmp")));
    }

    #[tokio::test]
    async fn waiter_reports_exit_once() {
        let spec = ChildSpec::new("sh").args(["-c", "exit 7"]);
        let handle = spawn(&spec, 1).unwrap();
        handle.wait_done().await;

        let outcome = handle.take_outcome().unwrap().unwrap();
        assert_eq!(outcome.code(), Some(7));
        // The outcome is consumed exactly once.
        assert!(handle.take_outcome().is_none());
    }

    #[tokio::test]
    async fn stderr_feeds_the_tail() {
        let spec = ChildSpec::new("sh").args(["-c", "echo out; echo err 1>&2; exit 1"]);
        let handle = spawn(&spec, 1).unwrap();
        handle.wait_done().await;
        // Give the drain a moment to consume the closed pipe.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        assert_eq!(handle.tail.lines(), vec!["err"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn kill_unblocks_the_waiter() {
        let spec = ChildSpec::new("sleep").arg("30");
        let handle = spawn(&spec, 1).unwrap();
        handle.kill();
        tokio::time::timeout(std::time::Duration::from_secs(5), handle.wait_done())
            .await
            .expect("waiter must observe the kill");

        let status = handle.take_outcome().unwrap().unwrap();
        assert!(!status.success());
        assert_eq!(status.code(), None, "killed children have no exit code");
    }
}
