//! Sandboxed repository workspace state machine.
//!
//! A [`Workspace`] owns a single checked-out copy of the target
//! repository at a fixed base revision and drives it between three
//! on-disk states:
//!
//! ```text
//!                  reset()
//!        ┌─────────────────────────────┐
//!        ▼                             │
//!    ┌──────┐  apply_test_changes() ┌───────┐  apply_fix_changes() ┌───────┐
//!    │ Base │ ─────────────────────▶│ Buggy │ ────────────────────▶│ Fixed │
//!    └──────┘                       └───────┘                      └───────┘
//! ```
//!
//! Exactly one state is materialized at any time. Transitions form a
//! total order reachable only by hard-resetting to `Base` and replaying
//! patches — never by reversing a patch — so leftover artifacts from a
//! prior oracle run can never leak across transitions.
//!
//! # Layout
//!
//! ```text
//! <root>/
//!   repo/          checked-out repository (the only tree commands touch)
//!   test.patch     staged test changeset
//!   fix.patch      staged fix changeset
//!   oracle.sh      candidate oracle scripts (written by the validator)
//! ```
//!
//! Patches and oracle scripts live beside the repository, not inside it,
//! so `reset()` (which discards untracked files) cannot destroy them.
//!
//! # Confinement
//!
//! All command execution runs with the repository directory as working
//! directory, a cleared environment, and a hard wall-clock timeout; a
//! timed-out process group is SIGKILLed. Nothing outside `<root>` is
//! read or written by design.

mod exec;

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::diff::ChangeSet;

pub use exec::{MAX_CAPTURED_BYTES, RunExit, RunOutput};

/// Name of the repository checkout under the workspace root.
const REPO_DIR_NAME: &str = "repo";

/// Staged patch file names under the workspace root.
const TEST_PATCH_NAME: &str = "test.patch";
const FIX_PATCH_NAME: &str = "fix.patch";

/// The three materializable repository states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkspaceState {
    /// The pristine base revision.
    Base,
    /// Base plus the test changeset.
    Buggy,
    /// Base plus the test and fix changesets.
    Fixed,
}

impl fmt::Display for WorkspaceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Base => "base",
            Self::Buggy => "buggy",
            Self::Fixed => "fixed",
        };
        f.write_str(s)
    }
}

/// Errors from workspace operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum WorkspaceError {
    /// A staged changeset did not apply cleanly.
    #[error("{patch} patch does not apply cleanly: {stderr}")]
    PatchConflict {
        /// Which patch failed ("test" or "fix").
        patch: String,
        /// Stderr from the last application strategy tried.
        stderr: String,
    },

    /// A git plumbing command failed.
    #[error("git {action} failed: {stderr}")]
    GitCommand {
        /// The git action that failed (e.g. "clone", "checkout").
        action: String,
        /// Captured stderr.
        stderr: String,
    },

    /// A command could not be spawned at all (e.g. missing interpreter).
    ///
    /// Distinct from a command that ran and exited non-zero.
    #[error("failed to spawn command '{command}': {reason}")]
    Spawn {
        /// The command that failed to spawn.
        command: String,
        /// The underlying reason.
        reason: String,
    },

    /// A state transition was requested from the wrong state.
    #[error("cannot {action} from {from} state")]
    InvalidTransition {
        /// Current state.
        from: WorkspaceState,
        /// The requested transition.
        action: &'static str,
    },

    /// The workspace root or repository directory is not usable.
    #[error("invalid workspace: {reason}")]
    InvalidLayout {
        /// What is wrong with the layout.
        reason: String,
    },

    /// I/O error on workspace files.
    #[error("workspace I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A single checked-out repository with deterministic state transitions.
///
/// Single-writer by construction: concurrent sessions must use
/// independent workspace roots.
#[derive(Debug)]
pub struct Workspace {
    root: PathBuf,
    repo_dir: PathBuf,
    state: WorkspaceState,
}

impl Workspace {
    /// Clone `repo_url` into `<root>/repo` and check out `base_rev`.
    ///
    /// # Errors
    ///
    /// Returns [`WorkspaceError::GitCommand`] if the clone or checkout
    /// fails, or [`WorkspaceError::Io`] if the root cannot be created.
    pub fn provision(repo_url: &str, base_rev: &str, root: &Path) -> Result<Self, WorkspaceError> {
        std::fs::create_dir_all(root)?;
        let repo_dir = root.join(REPO_DIR_NAME);

        if !repo_dir.join(".git").is_dir() {
            info!(%repo_url, %base_rev, root = %root.display(), "cloning repository");
            run_git(root, &["clone", repo_url, REPO_DIR_NAME], "clone")?;
        }
        run_git(&repo_dir, &["checkout", "--force", base_rev], "checkout")?;

        Ok(Self {
            root: root.to_path_buf(),
            repo_dir,
            state: WorkspaceState::Base,
        })
    }

    /// Adopt an existing checkout at `<root>/repo`.
    ///
    /// The checkout's current HEAD is taken as the base revision. The
    /// working tree is hard-reset so the adopted workspace starts in a
    /// known `Base` state.
    ///
    /// # Errors
    ///
    /// Returns [`WorkspaceError::InvalidLayout`] if `<root>/repo` is not
    /// a git checkout, or [`WorkspaceError::GitCommand`] if the initial
    /// reset fails.
    pub fn adopt(root: &Path) -> Result<Self, WorkspaceError> {
        let repo_dir = root.join(REPO_DIR_NAME);
        if !repo_dir.join(".git").is_dir() {
            return Err(WorkspaceError::InvalidLayout {
                reason: format!("{} is not a git checkout", repo_dir.display()),
            });
        }
        let mut ws = Self {
            root: root.to_path_buf(),
            repo_dir,
            state: WorkspaceState::Base,
        };
        ws.reset()?;
        Ok(ws)
    }

    /// The workspace root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The repository checkout directory.
    #[must_use]
    pub fn repo_dir(&self) -> &Path {
        &self.repo_dir
    }

    /// The currently materialized state.
    #[must_use]
    pub const fn state(&self) -> WorkspaceState {
        self.state
    }

    /// Stage the test and fix changesets as patch files beside the
    /// repository.
    ///
    /// # Errors
    ///
    /// Returns [`WorkspaceError::Io`] if the patch files cannot be
    /// written.
    pub fn stage_changes(&self, test: &ChangeSet, fix: &ChangeSet) -> Result<(), WorkspaceError> {
        std::fs::write(self.root.join(TEST_PATCH_NAME), test.to_patch())?;
        std::fs::write(self.root.join(FIX_PATCH_NAME), fix.to_patch())?;
        debug!(
            test_files = test.len(),
            fix_files = fix.len(),
            "staged changesets"
        );
        Ok(())
    }

    /// Hard-reset the working tree to the base revision.
    ///
    /// Discards all uncommitted modifications and removes untracked
    /// files and directories left behind by prior oracle runs. Mandatory
    /// before every state transition so transitions are never
    /// order-dependent on leftovers.
    ///
    /// # Errors
    ///
    /// Returns [`WorkspaceError::GitCommand`] if the reset fails.
    pub fn reset(&mut self) -> Result<(), WorkspaceError> {
        // reset --hard restores index and worktree from HEAD; a plain
        // `checkout -- .` would restore from the index, which a failed
        // `git apply --3way` may have dirtied.
        run_git(&self.repo_dir, &["reset", "--hard"], "reset --hard")?;
        run_git(&self.repo_dir, &["clean", "-fd"], "clean -fd")?;
        self.state = WorkspaceState::Base;
        debug!("workspace reset to base");
        Ok(())
    }

    /// Apply the staged test changeset: `Base` → `Buggy`.
    ///
    /// # Errors
    ///
    /// Returns [`WorkspaceError::InvalidTransition`] unless the current
    /// state is `Base`, or [`WorkspaceError::PatchConflict`] if the
    /// patch does not apply cleanly.
    pub fn apply_test_changes(&mut self) -> Result<(), WorkspaceError> {
        if self.state != WorkspaceState::Base {
            return Err(WorkspaceError::InvalidTransition {
                from: self.state,
                action: "apply test changes",
            });
        }
        self.apply_patch(TEST_PATCH_NAME, "test")?;
        self.state = WorkspaceState::Buggy;
        Ok(())
    }

    /// Apply the staged fix changeset on top of the test changes:
    /// `Buggy` → `Fixed`. No reset happens in between.
    ///
    /// # Errors
    ///
    /// Returns [`WorkspaceError::InvalidTransition`] unless the current
    /// state is `Buggy`, or [`WorkspaceError::PatchConflict`] if the
    /// patch does not apply cleanly.
    pub fn apply_fix_changes(&mut self) -> Result<(), WorkspaceError> {
        if self.state != WorkspaceState::Buggy {
            return Err(WorkspaceError::InvalidTransition {
                from: self.state,
                action: "apply fix changes",
            });
        }
        self.apply_patch(FIX_PATCH_NAME, "fix")?;
        self.state = WorkspaceState::Fixed;
        Ok(())
    }

    /// Re-materialize the buggy state from scratch (reset + test patch).
    ///
    /// # Errors
    ///
    /// Propagates reset and patch-application failures.
    pub fn to_buggy(&mut self) -> Result<(), WorkspaceError> {
        self.reset()?;
        self.apply_test_changes()
    }

    /// Re-materialize the fixed state from scratch (reset + test patch +
    /// fix patch).
    ///
    /// # Errors
    ///
    /// Propagates reset and patch-application failures.
    pub fn to_fixed(&mut self) -> Result<(), WorkspaceError> {
        self.to_buggy()?;
        self.apply_fix_changes()
    }

    /// Write a candidate oracle script beside the repository and return
    /// its absolute path.
    ///
    /// The script deliberately lives outside the repo tree: `reset()`
    /// removes untracked files and must not eat the script under test.
    ///
    /// # Errors
    ///
    /// Returns [`WorkspaceError::Io`] if the script cannot be written.
    pub fn write_oracle_script(&self, content: &str) -> Result<PathBuf, WorkspaceError> {
        let path = self.root.join("oracle.sh");
        std::fs::write(&path, content)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))?;
        }
        Ok(path)
    }

    /// Apply a staged patch file with the fallback ladder:
    /// `git apply`, then `git apply --3way`, then `patch -p1`.
    ///
    /// An empty (or absent) patch file applies as a no-op.
    fn apply_patch(&self, patch_name: &str, label: &str) -> Result<(), WorkspaceError> {
        let patch_path = self.root.join(patch_name);
        let content = match std::fs::read_to_string(&patch_path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(WorkspaceError::Io(e)),
        };
        if content.trim().is_empty() {
            debug!(patch = label, "empty patch, nothing to apply");
            return Ok(());
        }

        let patch_arg = patch_path.display().to_string();
        let strategies: &[&[&str]] = &[
            &["apply", patch_arg.as_str()],
            &["apply", "--3way", patch_arg.as_str()],
        ];

        let mut last_stderr = String::new();
        for args in strategies {
            match run_git(&self.repo_dir, args, "apply") {
                Ok(()) => {
                    debug!(patch = label, strategy = ?args, "patch applied");
                    return Ok(());
                }
                Err(WorkspaceError::GitCommand { stderr, .. }) => last_stderr = stderr,
                Err(other) => return Err(other),
            }
        }

        // Last resort: classic patch(1). Some diffs produced by hosting
        // APIs carry context git refuses but patch tolerates.
        match Command::new("patch")
            .arg("-p1")
            .arg("--forward")
            .arg("--input")
            .arg(&patch_path)
            .current_dir(&self.repo_dir)
            .output()
        {
            Ok(output) if output.status.success() => {
                debug!(patch = label, "patch applied via patch -p1");
                return Ok(());
            }
            Ok(output) => {
                let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
                if !stderr.is_empty() {
                    last_stderr = stderr;
                }
            }
            Err(e) => {
                // patch(1) missing is not itself fatal; git's stderr is
                // the better diagnostic.
                warn!(patch = label, "patch(1) unavailable: {e}");
            }
        }

        Err(WorkspaceError::PatchConflict {
            patch: label.to_string(),
            stderr: last_stderr,
        })
    }

    /// Execute a shell command confined to the repository directory.
    ///
    /// See [`exec`] for the execution contract: hermetic environment,
    /// captured output, hard wall-clock timeout with process-group kill.
    /// A timeout is reported as [`RunExit::TimedOut`], never as success.
    ///
    /// # Errors
    ///
    /// Returns [`WorkspaceError::Spawn`] if the shell itself cannot be
    /// started.
    pub async fn run(&self, command: &str, timeout: Duration) -> Result<RunOutput, WorkspaceError> {
        exec::run_in(&self.repo_dir, command, timeout).await
    }
}

/// Run a git subcommand with a hardened environment, capturing stderr
/// into a typed error on failure.
fn run_git(cwd: &Path, args: &[&str], action: &str) -> Result<(), WorkspaceError> {
    let output = Command::new("git")
        .args(args)
        .current_dir(cwd)
        .env("GIT_TERMINAL_PROMPT", "0")
        .env("GIT_CONFIG_NOSYSTEM", "1")
        .output()
        .map_err(|e| WorkspaceError::GitCommand {
            action: action.to_string(),
            stderr: format!("failed to spawn git: {e}"),
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        return Err(WorkspaceError::GitCommand {
            action: action.to_string(),
            stderr: if stderr.is_empty() {
                format!("git exited with {}", output.status)
            } else {
                stderr
            },
        });
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use std::fs;

    use super::*;
    use crate::diff::ChangeSet;

    /// Helper: create a git repo with `src/scheme.py` and one commit,
    /// wrapped in a workspace layout.
    pub(crate) fn create_test_workspace(root: &Path) -> Workspace {
        let repo = root.join(REPO_DIR_NAME);
        fs::create_dir_all(repo.join("src")).expect("create repo dirs");

        let run = |args: &[&str]| {
            let out = Command::new("git")
                .args(args)
                .current_dir(&repo)
                .env("GIT_TERMINAL_PROMPT", "0")
                .env("GIT_CONFIG_NOSYSTEM", "1")
                .output()
                .expect("git");
            assert!(
                out.status.success(),
                "git {args:?} failed: {}",
                String::from_utf8_lossy(&out.stderr)
            );
        };

        run(&["init"]);
        run(&["config", "user.name", "Test"]);
        run(&["config", "user.email", "test@test.invalid"]);

        fs::write(
            repo.join("src/scheme.py"),
            "def is_http(url):\n    return url.startswith(\"http://\")\n",
        )
        .expect("write source");

        run(&["add", "."]);
        run(&["commit", "-m", "initial"]);

        Workspace::adopt(root).expect("adopt workspace")
    }

    pub(crate) fn test_changeset() -> ChangeSet {
        ChangeSet::parse(
            "\
diff --git a/tests/test_scheme.py b/tests/test_scheme.py
new file mode 100644
--- /dev/null
+++ b/tests/test_scheme.py
@@ -0,0 +1,2 @@
+import sys
+sys.exit(0)
",
        )
        .expect("test changeset parses")
    }

    pub(crate) fn fix_changeset() -> ChangeSet {
        ChangeSet::parse(
            "\
diff --git a/src/scheme.py b/src/scheme.py
--- a/src/scheme.py
+++ b/src/scheme.py
@@ -1,2 +1,2 @@
 def is_http(url):
-    return url.startswith(\"http://\")
+    return url.lower().startswith(\"http://\")
",
        )
        .expect("fix changeset parses")
    }

    #[test]
    fn transitions_follow_the_total_order() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut ws = create_test_workspace(temp.path());
        ws.stage_changes(&test_changeset(), &fix_changeset())
            .expect("stage");

        assert_eq!(ws.state(), WorkspaceState::Base);
        ws.apply_test_changes().expect("apply test");
        assert_eq!(ws.state(), WorkspaceState::Buggy);
        assert!(ws.repo_dir().join("tests/test_scheme.py").is_file());

        ws.apply_fix_changes().expect("apply fix");
        assert_eq!(ws.state(), WorkspaceState::Fixed);
        let fixed = fs::read_to_string(ws.repo_dir().join("src/scheme.py")).expect("read");
        assert!(fixed.contains("lower()"));

        ws.reset().expect("reset");
        assert_eq!(ws.state(), WorkspaceState::Base);
        assert!(!ws.repo_dir().join("tests/test_scheme.py").exists());
        let base = fs::read_to_string(ws.repo_dir().join("src/scheme.py")).expect("read");
        assert!(!base.contains("lower()"));
    }

    #[test]
    fn apply_fix_from_base_is_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut ws = create_test_workspace(temp.path());
        ws.stage_changes(&test_changeset(), &fix_changeset())
            .expect("stage");

        let err = ws.apply_fix_changes().unwrap_err();
        assert!(
            matches!(err, WorkspaceError::InvalidTransition { from: WorkspaceState::Base, .. }),
            "expected InvalidTransition, got: {err:?}"
        );
    }

    #[test]
    fn conflicting_patch_reports_patch_conflict() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut ws = create_test_workspace(temp.path());

        let bogus = ChangeSet::parse(
            "\
diff --git a/src/scheme.py b/src/scheme.py
--- a/src/scheme.py
+++ b/src/scheme.py
@@ -1,2 +1,2 @@
 def no_such_context(url):
-    return something_else\n+    return other
",
        )
        .expect("parse");
        ws.stage_changes(&bogus, &fix_changeset()).expect("stage");

        let err = ws.apply_test_changes().unwrap_err();
        assert!(
            matches!(err, WorkspaceError::PatchConflict { .. }),
            "expected PatchConflict, got: {err:?}"
        );
    }

    #[test]
    fn reset_removes_untracked_artifacts() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut ws = create_test_workspace(temp.path());

        fs::write(ws.repo_dir().join("leftover.log"), "junk").expect("write");
        fs::create_dir_all(ws.repo_dir().join("build/out")).expect("mkdir");
        ws.reset().expect("reset");

        assert!(!ws.repo_dir().join("leftover.log").exists());
        assert!(!ws.repo_dir().join("build").exists());
    }

    #[test]
    fn oracle_script_survives_reset() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut ws = create_test_workspace(temp.path());

        let path = ws
            .write_oracle_script("#!/bin/bash\nexit 0\n")
            .expect("write script");
        ws.reset().expect("reset");
        assert!(path.is_file());
    }

    #[tokio::test]
    async fn run_reports_exit_code_verbatim() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut ws = create_test_workspace(temp.path());
        ws.stage_changes(&test_changeset(), &fix_changeset())
            .expect("stage");

        // Independent of prior history: exercise after a full cycle.
        ws.to_fixed().expect("to fixed");
        ws.reset().expect("reset");
        ws.apply_test_changes().expect("apply test");

        let out = ws
            .run("echo marker; exit 1", Duration::from_secs(5))
            .await
            .expect("run");
        assert_eq!(out.exit, RunExit::Code(1));
        assert_eq!(out.stdout.trim(), "marker");
    }

    #[tokio::test]
    async fn run_times_out_and_is_distinguished() {
        let temp = tempfile::tempdir().expect("tempdir");
        let ws = create_test_workspace(temp.path());

        let out = ws
            .run("sleep 5", Duration::from_millis(200))
            .await
            .expect("run");
        assert_eq!(out.exit, RunExit::TimedOut);
        assert!(!out.exit.success());
    }
}
