//! Bounded shell execution inside the workspace.
//!
//! Commands run under `sh -c` with the repository directory as working
//! directory, a cleared environment (PATH/HOME/LANG/TERM preserved),
//! null stdin, and captured stdout/stderr. A hard wall-clock timeout
//! bounds every run; on expiry the whole process group is SIGKILLed so
//! no background process outlives the run, and the outcome is reported
//! as [`RunExit::TimedOut`] — never mapped to an exit code, never
//! treated as success.

use std::fmt;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

use super::WorkspaceError;

/// Maximum bytes of stdout or stderr retained per run (1 MiB each).
/// Prevents memory exhaustion from chatty or adversarial commands.
pub const MAX_CAPTURED_BYTES: usize = 1024 * 1024;

/// How a workspace command finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunExit {
    /// Process exited with the given code.
    Code(i32),
    /// Process was terminated by a signal.
    Signal(i32),
    /// The wall-clock timeout expired and the process group was killed.
    TimedOut,
}

impl RunExit {
    /// True only for a clean zero exit. Timeouts and signals are never
    /// success.
    #[must_use]
    pub const fn success(&self) -> bool {
        matches!(self, Self::Code(0))
    }

    /// The exit code, if the process exited on its own.
    #[must_use]
    pub const fn code(&self) -> Option<i32> {
        match self {
            Self::Code(c) => Some(*c),
            _ => None,
        }
    }
}

impl fmt::Display for RunExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Code(c) => write!(f, "exit code {c}"),
            Self::Signal(s) => write!(f, "killed by signal {s}"),
            Self::TimedOut => f.write_str("timed out"),
        }
    }
}

/// Captured result of a workspace command.
#[derive(Debug, Clone)]
pub struct RunOutput {
    /// How the command finished.
    pub exit: RunExit,
    /// Captured stdout, truncated to [`MAX_CAPTURED_BYTES`].
    pub stdout: String,
    /// Captured stderr, truncated to [`MAX_CAPTURED_BYTES`].
    pub stderr: String,
}

pub(super) async fn run_in(
    cwd: &Path,
    command: &str,
    limit: Duration,
) -> Result<RunOutput, WorkspaceError> {
    debug!(%command, timeout_ms = limit.as_millis() as u64, "executing workspace command");

    let mut cmd = Command::new("sh");
    cmd.arg("-c")
        .arg(command)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    // Hermetic environment: inherit only what command execution needs.
    cmd.env_clear();
    for key in ["PATH", "HOME", "LANG", "TERM"] {
        if let Ok(value) = std::env::var(key) {
            cmd.env(key, value);
        }
    }
    cmd.env("GIT_TERMINAL_PROMPT", "0");

    // Own process group, so a timeout can kill the command and every
    // process it spawned in one stroke.
    #[cfg(unix)]
    cmd.process_group(0);

    let child = cmd.spawn().map_err(|e| WorkspaceError::Spawn {
        command: command.to_string(),
        reason: e.to_string(),
    })?;
    let pid = child.id();

    match timeout(limit, child.wait_with_output()).await {
        Ok(Ok(output)) => Ok(RunOutput {
            exit: classify(output.status),
            stdout: capture(output.stdout),
            stderr: capture(output.stderr),
        }),
        Ok(Err(e)) => Err(WorkspaceError::Io(e)),
        Err(_) => {
            warn!(%command, "command exceeded timeout, killing process group");
            kill_process_group(pid);
            Ok(RunOutput {
                exit: RunExit::TimedOut,
                stdout: String::new(),
                stderr: format!("timed out after {} ms", limit.as_millis()),
            })
        }
    }
}

fn classify(status: std::process::ExitStatus) -> RunExit {
    if let Some(code) = status.code() {
        return RunExit::Code(code);
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return RunExit::Signal(signal);
        }
    }
    RunExit::Code(-1)
}

fn capture(bytes: Vec<u8>) -> String {
    if bytes.len() > MAX_CAPTURED_BYTES {
        let mut s = String::from_utf8_lossy(&bytes[..MAX_CAPTURED_BYTES]).into_owned();
        s.push_str("\n[output truncated]");
        s
    } else {
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

#[cfg(unix)]
fn kill_process_group(pid: Option<u32>) {
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let Some(pid) = pid else { return };
    // With process_group(0) the child's pid is its pgid.
    if let Err(e) = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
        // ESRCH means the group already exited between timeout and kill.
        if e != nix::errno::Errno::ESRCH {
            warn!(pid, "failed to kill process group: {e}");
        }
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: Option<u32>) {
    // kill_on_drop already terminated the direct child.
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn captures_stdout_and_stderr_separately() {
        let temp = tempfile::tempdir().expect("tempdir");
        let out = run_in(temp.path(), "echo out; echo err >&2", Duration::from_secs(5))
            .await
            .expect("run");
        assert_eq!(out.exit, RunExit::Code(0));
        assert_eq!(out.stdout.trim(), "out");
        assert_eq!(out.stderr.trim(), "err");
    }

    #[tokio::test]
    async fn nonzero_exit_is_verbatim() {
        let temp = tempfile::tempdir().expect("tempdir");
        let out = run_in(temp.path(), "exit 42", Duration::from_secs(5))
            .await
            .expect("run");
        assert_eq!(out.exit, RunExit::Code(42));
    }

    #[tokio::test]
    async fn timeout_kills_background_children() {
        let temp = tempfile::tempdir().expect("tempdir");
        let out = run_in(
            temp.path(),
            "sleep 30 & sleep 30",
            Duration::from_millis(200),
        )
        .await
        .expect("run");
        assert_eq!(out.exit, RunExit::TimedOut);
    }

    #[test]
    fn timeout_is_never_success() {
        assert!(!RunExit::TimedOut.success());
        assert!(!RunExit::Signal(9).success());
        assert!(!RunExit::Code(1).success());
        assert!(RunExit::Code(0).success());
    }
}
