//! The proposing-actor contract.
//!
//! The actor that invents candidate oracle scripts is external and
//! opaque — typically an LLM agent, but any policy works. It sits
//! behind a fixed request/response contract: each turn it receives the
//! current workspace-visible context plus the feedback from its previous
//! action, and answers with exactly one [`ProposerAction`]. The
//! session's correctness never depends on what the actor chooses.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::validate::VerdictCategory;
use crate::workspace::{RunExit, WorkspaceState};

/// Workspace states the actor may request a switch to.
///
/// `Base` is not offered: exploration happens against the buggy state,
/// optionally comparing with the fixed state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetState {
    /// Base plus test changes, fix withheld.
    Buggy,
    /// Base plus test and fix changes.
    Fixed,
}

/// One turn's response from the proposing actor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposerAction {
    /// Run a read/inspect command in the workspace.
    Execute {
        /// The shell command to run.
        command: String,
    },
    /// Re-materialize the workspace in the given state.
    Switch {
        /// The requested state.
        target: TargetState,
    },
    /// Submit a candidate oracle script for screening and validation.
    Submit {
        /// The full script text.
        script: String,
    },
    /// Give up on this task.
    Abandon {
        /// Why the actor is giving up.
        reason: String,
    },
}

/// The proposing actor itself failed (transport error, malformed
/// response). Distinct from the actor choosing to abandon.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("proposing actor failed: {0}")]
pub struct ProposerError(pub String);

/// Feedback handed to the actor at the start of each turn, describing
/// the outcome of its previous action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnFeedback {
    /// First turn: the task briefing (repository, change description,
    /// test patch excerpt).
    TaskBriefing {
        /// Human-readable briefing text.
        summary: String,
    },
    /// Result of an exploration command.
    CommandResult {
        /// How the command finished.
        exit: RunExit,
        /// Captured stdout (truncated for feedback).
        stdout: String,
        /// Captured stderr (truncated for feedback).
        stderr: String,
    },
    /// An exploration command could not run at all.
    CommandRefused {
        /// Why the command was refused.
        reason: String,
    },
    /// A requested state switch completed.
    Switched {
        /// The state now materialized.
        state: WorkspaceState,
    },
    /// The submitted script was rejected by the static screen.
    ScreeningRejected {
        /// The screen's reason.
        reason: String,
    },
    /// The submitted script ran in both states but did not discriminate.
    ValidationRejected {
        /// The labeled outcome.
        category: VerdictCategory,
        /// Literal exit code observed in the buggy state.
        buggy_exit: i32,
        /// Literal exit code observed in the fixed state.
        fixed_exit: i32,
    },
    /// Validation aborted before a verdict (environment failure or
    /// timeout). The actor may need to fix a hang or a missing
    /// dependency.
    ValidationAborted {
        /// What went wrong.
        reason: String,
    },
}

impl TurnFeedback {
    /// Render the feedback as text for actors that consume prose.
    #[must_use]
    pub fn render(&self) -> String {
        match self {
            Self::TaskBriefing { summary } => summary.clone(),
            Self::CommandResult {
                exit,
                stdout,
                stderr,
            } => {
                let mut out = format!("Command finished: {exit}\n");
                if !stdout.is_empty() {
                    out.push_str("STDOUT:\n");
                    out.push_str(stdout);
                    out.push('\n');
                }
                if !stderr.is_empty() {
                    out.push_str("STDERR:\n");
                    out.push_str(stderr);
                    out.push('\n');
                }
                out
            }
            Self::CommandRefused { reason } => format!("Command could not run: {reason}"),
            Self::Switched { state } => format!("Workspace is now in the {state} state."),
            Self::ScreeningRejected { reason } => format!(
                "VALIDATION FAILED: {reason}. You must execute actual tests. Revise the script \
                 and submit again."
            ),
            Self::ValidationRejected {
                category,
                buggy_exit,
                fixed_exit,
            } => format!(
                "VALIDATION FAILED ({category}):\n\
                 - Buggy state exit code: {buggy_exit} (expected non-zero)\n\
                 - Fixed state exit code: {fixed_exit} (expected zero)\n\
                 The script must FAIL in the buggy state and PASS in the fixed state. Revise and \
                 submit again."
            ),
            Self::ValidationAborted { reason } => {
                format!("VALIDATION ABORTED: {reason}. Fix the script and submit again.")
            }
        }
    }
}

/// Context handed to the actor each turn.
#[derive(Debug)]
pub struct TurnContext<'a> {
    /// 1-based turn number.
    pub turn: u32,
    /// The session's turn budget.
    pub max_turns: u32,
    /// State currently materialized in the workspace.
    pub workspace_state: WorkspaceState,
    /// Outcome of the previous action (or the briefing on turn one).
    pub feedback: &'a TurnFeedback,
    /// Advisory nudge injected at configured turns.
    pub advice: Option<&'a str>,
}

/// A proposing actor.
///
/// Implementations are free-form; the session only requires that each
/// call yields one action. Mock and scripted implementations live
/// alongside for tests and offline drivers.
pub trait Proposer {
    /// Produce the next action for the given turn.
    ///
    /// # Errors
    ///
    /// Returns [`ProposerError`] when the actor itself fails; the
    /// session escalates this rather than retrying.
    fn next_action(&mut self, ctx: &TurnContext<'_>) -> Result<ProposerAction, ProposerError>;
}

/// Replays a fixed sequence of actions; abandons when exhausted.
///
/// Useful for tests and for driving the session with a handcrafted
/// oracle script.
#[derive(Debug, Clone, Default)]
pub struct ScriptedProposer {
    actions: VecDeque<ProposerAction>,
}

impl ScriptedProposer {
    /// A proposer that replays `actions` in order.
    #[must_use]
    pub fn new<I>(actions: I) -> Self
    where
        I: IntoIterator<Item = ProposerAction>,
    {
        Self {
            actions: actions.into_iter().collect(),
        }
    }

    /// A proposer that submits a single script and nothing else.
    #[must_use]
    pub fn submit_once(script: impl Into<String>) -> Self {
        Self::new([ProposerAction::Submit {
            script: script.into(),
        }])
    }
}

impl Proposer for ScriptedProposer {
    fn next_action(&mut self, _ctx: &TurnContext<'_>) -> Result<ProposerAction, ProposerError> {
        Ok(self.actions.pop_front().unwrap_or(ProposerAction::Abandon {
            reason: "scripted actions exhausted".to_string(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scripted_proposer_replays_then_abandons() {
        let mut proposer = ScriptedProposer::new([ProposerAction::Execute {
            command: "ls".to_string(),
        }]);
        let ctx = TurnContext {
            turn: 1,
            max_turns: 5,
            workspace_state: WorkspaceState::Buggy,
            feedback: &TurnFeedback::TaskBriefing {
                summary: String::new(),
            },
            advice: None,
        };
        assert!(matches!(
            proposer.next_action(&ctx).unwrap(),
            ProposerAction::Execute { .. }
        ));
        assert!(matches!(
            proposer.next_action(&ctx).unwrap(),
            ProposerAction::Abandon { .. }
        ));
    }

    #[test]
    fn validation_feedback_carries_literal_exit_codes() {
        let feedback = TurnFeedback::ValidationRejected {
            category: VerdictCategory::BothFail,
            buggy_exit: 1,
            fixed_exit: 1,
        };
        let text = feedback.render();
        assert!(text.contains("Buggy state exit code: 1"));
        assert!(text.contains("Fixed state exit code: 1"));
        assert!(text.contains("both-fail"));
    }
}
