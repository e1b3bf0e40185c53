//! Two-state differential validation of candidate oracles.
//!
//! The validation protocol is strictly ordered and the pair of observed
//! exit codes is the system's ground truth — nothing else determines
//! correctness:
//!
//! 1. Reset to base, apply the test changeset (a conflict here means the
//!    input task is malformed, not the oracle).
//! 2. Run the oracle → buggy exit code.
//! 3. Apply the fix changeset on top — no reset in between, so the fix
//!    lands over the already-applied test changes.
//! 4. Run the oracle → fixed exit code.
//! 5. Accept iff the buggy run failed and the fixed run passed.
//!
//! A single `validate` call is authoritative. External state (network,
//! timing) can make runs non-deterministic, so the validator never
//! retries transparently; retries are an explicit decision of the
//! calling loop.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::workspace::{RunExit, Workspace, WorkspaceError, WorkspaceState};

/// Default wall-clock budget for one oracle run.
pub const DEFAULT_ORACLE_TIMEOUT: Duration = Duration::from_secs(300);

/// Which setup step of the protocol failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SetupStage {
    /// Resetting the workspace to base.
    Reset,
    /// Applying the test changeset against base.
    ApplyTest,
    /// Applying the fix changeset on top of the buggy state.
    ApplyFix,
}

impl fmt::Display for SetupStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Reset => "reset",
            Self::ApplyTest => "apply test changes",
            Self::ApplyFix => "apply fix changes",
        };
        f.write_str(s)
    }
}

/// Errors that abort a validation run before a verdict exists.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ValidationError {
    /// The input changesets could not be materialized.
    ///
    /// This indicates a malformed task, not an oracle defect, and is
    /// escalated out of the session rather than fed back to the
    /// proposing actor.
    #[error("setup failure during {stage}: {source}")]
    Setup {
        /// The protocol step that failed.
        stage: SetupStage,
        /// The underlying workspace error.
        #[source]
        source: WorkspaceError,
    },

    /// The oracle script could not execute for environment reasons
    /// (e.g. missing interpreter) — distinct from a legitimate non-zero
    /// test result.
    #[error("oracle could not execute in {state} state: {reason}")]
    Environment {
        /// The workspace state during the failed run.
        state: WorkspaceState,
        /// Why execution failed.
        reason: String,
    },

    /// The oracle exceeded its wall-clock budget.
    ///
    /// A hard failure for that run, surfaced distinctly so a hang is
    /// never mistaken for a passing fixed state; not retried here.
    #[error("oracle timed out in {state} state after {timeout_secs}s")]
    Timeout {
        /// The workspace state during the timed-out run.
        state: WorkspaceState,
        /// The budget that was exceeded.
        timeout_secs: u64,
    },
}

/// Labeled outcome of comparing the two exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictCategory {
    /// Buggy run failed, fixed run passed: the oracle discriminates.
    Accepted,
    /// Both runs passed: the oracle does not exercise the bug.
    BothPass,
    /// Both runs failed: the fix does not repair the defect as
    /// exercised, or the oracle is broken.
    BothFail,
    /// Buggy run passed but the fixed run failed — contradictory, and a
    /// strong hint of oracle non-determinism.
    Contradictory,
}

impl VerdictCategory {
    /// Derive the category from the two observed exit codes.
    #[must_use]
    pub const fn of(buggy_exit: i32, fixed_exit: i32) -> Self {
        match (buggy_exit != 0, fixed_exit == 0) {
            (true, true) => Self::Accepted,
            (false, true) => Self::BothPass,
            (true, false) => Self::BothFail,
            (false, false) => Self::Contradictory,
        }
    }

    /// String form used in feedback and persisted records.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Accepted => "accepted",
            Self::BothPass => "both-pass",
            Self::BothFail => "both-fail",
            Self::Contradictory => "fixed-fails-after-buggy-passed",
        }
    }
}

impl fmt::Display for VerdictCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one differential validation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationVerdict {
    /// Exit code observed in the buggy state.
    pub buggy_exit: i32,
    /// Exit code observed in the fixed state.
    pub fixed_exit: i32,
    /// The labeled outcome.
    pub category: VerdictCategory,
}

impl ValidationVerdict {
    /// Acceptance invariant: buggy run failed and fixed run passed.
    #[must_use]
    pub const fn accepted(&self) -> bool {
        matches!(self.category, VerdictCategory::Accepted)
    }
}

/// Orchestrates workspace transitions and oracle executions into a
/// verdict.
#[derive(Debug, Clone)]
pub struct DifferentialValidator {
    oracle_timeout: Duration,
}

impl Default for DifferentialValidator {
    fn default() -> Self {
        Self::new(DEFAULT_ORACLE_TIMEOUT)
    }
}

impl DifferentialValidator {
    /// Validator with the given per-run wall-clock budget.
    #[must_use]
    pub const fn new(oracle_timeout: Duration) -> Self {
        Self { oracle_timeout }
    }

    /// Run the full two-state protocol for `script` against the staged
    /// changesets of `workspace`.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::Setup`] if the input changesets do not
    /// apply, [`ValidationError::Environment`] if the script cannot
    /// execute, or [`ValidationError::Timeout`] if a run exceeds its
    /// budget. All other outcomes — including rejections — are verdicts,
    /// not errors.
    pub async fn validate(
        &self,
        workspace: &mut Workspace,
        script: &str,
    ) -> Result<ValidationVerdict, ValidationError> {
        let script_path =
            workspace
                .write_oracle_script(script)
                .map_err(|source| ValidationError::Setup {
                    stage: SetupStage::Reset,
                    source,
                })?;
        let command = format!("bash '{}'", script_path.display());

        // Step 1: materialize the buggy state.
        workspace.reset().map_err(|source| ValidationError::Setup {
            stage: SetupStage::Reset,
            source,
        })?;
        workspace
            .apply_test_changes()
            .map_err(|source| ValidationError::Setup {
                stage: SetupStage::ApplyTest,
                source,
            })?;

        // Step 2: buggy run.
        let buggy_exit = self.run_oracle(workspace, &command).await?;
        info!(buggy_exit, "oracle run in buggy state");

        // Step 3: fix lands on top of the applied test changes.
        workspace
            .apply_fix_changes()
            .map_err(|source| ValidationError::Setup {
                stage: SetupStage::ApplyFix,
                source,
            })?;

        // Step 4: fixed run.
        let fixed_exit = self.run_oracle(workspace, &command).await?;
        info!(fixed_exit, "oracle run in fixed state");

        // Step 5: verdict.
        let category = VerdictCategory::of(buggy_exit, fixed_exit);
        if category != VerdictCategory::Accepted {
            warn!(buggy_exit, fixed_exit, %category, "oracle rejected");
        }
        Ok(ValidationVerdict {
            buggy_exit,
            fixed_exit,
            category,
        })
    }

    /// Execute the oracle once and fold the outcome to an exit code.
    ///
    /// A signal-terminated run folds to `128 + signal` (shell
    /// convention) so a crashing test counts as failure, never success.
    async fn run_oracle(
        &self,
        workspace: &Workspace,
        command: &str,
    ) -> Result<i32, ValidationError> {
        let state = workspace.state();
        let output = workspace
            .run(command, self.oracle_timeout)
            .await
            .map_err(|e| match e {
                WorkspaceError::Spawn { reason, .. } => {
                    ValidationError::Environment { state, reason }
                }
                other => ValidationError::Environment {
                    state,
                    reason: other.to_string(),
                },
            })?;

        match output.exit {
            RunExit::Code(code) => Ok(code),
            RunExit::Signal(signal) => Ok(128 + signal),
            RunExit::TimedOut => Err(ValidationError::Timeout {
                state,
                timeout_secs: self.oracle_timeout.as_secs(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_covers_all_exit_code_combinations() {
        assert_eq!(VerdictCategory::of(1, 0), VerdictCategory::Accepted);
        assert_eq!(VerdictCategory::of(0, 0), VerdictCategory::BothPass);
        assert_eq!(VerdictCategory::of(1, 1), VerdictCategory::BothFail);
        assert_eq!(VerdictCategory::of(0, 2), VerdictCategory::Contradictory);
    }

    #[test]
    fn acceptance_requires_exact_pattern() {
        let verdict = ValidationVerdict {
            buggy_exit: 2,
            fixed_exit: 0,
            category: VerdictCategory::of(2, 0),
        };
        assert!(verdict.accepted());

        let verdict = ValidationVerdict {
            buggy_exit: 0,
            fixed_exit: 0,
            category: VerdictCategory::of(0, 0),
        };
        assert!(!verdict.accepted());
    }
}
