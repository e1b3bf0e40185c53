//! Bounded oracle-building session.
//!
//! An [`OracleSession`] coordinates the external proposing actor, the
//! workspace's exploratory execution surface, the static screen, and
//! the differential validator:
//!
//! ```text
//!                 ┌──────────────────────────────────────────┐
//!                 ▼                                          │
//!           ┌───────────┐  submit   ┌───────────┐  pass  ┌────────────┐
//!           │ EXPLORING │ ─────────▶│ SCREENING │ ──────▶│ VALIDATING │
//!           └───────────┘           └───────────┘        └────────────┘
//!              │     ▲                    │ reject             │
//!              │     └────────────────────┴──── feedback ◀─────┤ reject
//!              │                                               │ accept
//!        turn budget                                           ▼
//!          exhausted ──▶ EXHAUSTED                         ACCEPTED
//! ```
//!
//! Each turn fully completes — including any nested validation — before
//! the actor's next turn begins. Every feedback transition re-materializes
//! the buggy state before returning control, so stale `Fixed` state from
//! a prior validation attempt can never corrupt exploration. Exhausting
//! the turn budget is a legitimate terminal outcome, not an error.

mod proposer;

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::diff::ChangeSet;
use crate::screen::HackingScreen;
use crate::validate::{DifferentialValidator, SetupStage, ValidationError};
use crate::workspace::{Workspace, WorkspaceError};

pub use proposer::{
    Proposer, ProposerAction, ProposerError, ScriptedProposer, TargetState, TurnContext,
    TurnFeedback,
};

/// Bytes of stdout forwarded to the actor per exploration command.
const MAX_FEEDBACK_STDOUT: usize = 3000;

/// Bytes of stderr forwarded to the actor per exploration command.
const MAX_FEEDBACK_STDERR: usize = 2000;

/// Session tuning knobs.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Maximum actor turns before the session ends as exhausted.
    pub max_turns: u32,
    /// Wall-clock budget for one exploration command.
    pub exec_timeout: Duration,
    /// Wall-clock budget for one oracle run during validation.
    pub oracle_timeout: Duration,
    /// Turns at which an advisory nudge is injected.
    pub nudge_turns: Vec<u32>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_turns: 30,
            exec_timeout: Duration::from_secs(120),
            oracle_timeout: Duration::from_secs(300),
            nudge_turns: vec![10, 20],
        }
    }
}

/// The accepted output artifact: everything a downstream packager needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcceptedOracle {
    /// The validated oracle script.
    pub script: String,
    /// The test changeset as unified-diff text.
    pub test_patch: String,
    /// The fix changeset as unified-diff text.
    pub fix_patch: String,
    /// Exit code observed in the buggy state.
    pub buggy_exit: i32,
    /// Exit code observed in the fixed state.
    pub fixed_exit: i32,
}

/// How a session ended.
#[derive(Debug)]
pub enum SessionOutcome {
    /// A discriminating oracle was validated.
    Accepted(Box<AcceptedOracle>),
    /// The turn budget ran out without an accepted oracle. A legitimate
    /// terminal outcome, distinct from any rejection.
    Exhausted {
        /// Turns consumed (equals the budget).
        turns: u32,
    },
    /// The actor gave up explicitly.
    Abandoned {
        /// The actor's reason.
        reason: String,
    },
}

/// Errors that escalate out of the session as unrecoverable.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SessionError {
    /// The provided input changesets do not apply — the task itself is
    /// malformed, not the oracle.
    #[error("input changesets failed to apply during {stage}: {source}")]
    InputChangesets {
        /// The setup step that failed.
        stage: SetupStage,
        /// The underlying workspace error.
        #[source]
        source: WorkspaceError,
    },

    /// A workspace operation outside validation failed fatally.
    #[error("workspace failure: {0}")]
    Workspace(#[from] WorkspaceError),

    /// The proposing actor itself failed.
    #[error(transparent)]
    Proposer(#[from] ProposerError),
}

/// The bounded iterative loop that produces an accepted oracle.
pub struct OracleSession {
    id: Uuid,
    workspace: Workspace,
    screen: HackingScreen,
    validator: DifferentialValidator,
    config: SessionConfig,
    test_patch: String,
    fix_patch: String,
}

impl OracleSession {
    /// Create a session over `workspace` with the given changesets
    /// staged.
    ///
    /// # Errors
    ///
    /// Returns [`WorkspaceError::Io`] if the changesets cannot be
    /// staged.
    pub fn new(
        workspace: Workspace,
        test: &ChangeSet,
        fix: &ChangeSet,
        config: SessionConfig,
    ) -> Result<Self, WorkspaceError> {
        workspace.stage_changes(test, fix)?;
        let validator = DifferentialValidator::new(config.oracle_timeout);
        Ok(Self {
            id: Uuid::new_v4(),
            workspace,
            screen: HackingScreen::new(),
            validator,
            config,
            test_patch: test.to_patch(),
            fix_patch: fix.to_patch(),
        })
    }

    /// Replace the default screen (e.g. with extra allowlisted runners).
    #[must_use]
    pub fn with_screen(mut self, screen: HackingScreen) -> Self {
        self.screen = screen;
        self
    }

    /// The session's unique id.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// The workspace held by this session.
    #[must_use]
    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    /// Tear the session down, returning the workspace in `Base` state.
    ///
    /// # Errors
    ///
    /// Returns the underlying error if the final reset fails.
    pub fn teardown(mut self) -> Result<Workspace, WorkspaceError> {
        self.workspace.reset()?;
        Ok(self.workspace)
    }

    /// Run the session to a terminal outcome.
    ///
    /// `briefing` is the initial context handed to the actor (repository,
    /// change description, test patch excerpt).
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InputChangesets`] if the provided
    /// changesets do not apply, [`SessionError::Workspace`] on fatal
    /// workspace failures, or [`SessionError::Proposer`] if the actor
    /// itself fails. Screening and validation rejections never surface
    /// here — they are fed back to the actor within the turn budget.
    pub async fn run(
        &mut self,
        actor: &mut dyn Proposer,
        briefing: String,
    ) -> Result<SessionOutcome, SessionError> {
        info!(session = %self.id, max_turns = self.config.max_turns, "starting oracle session");

        // Initial materialization of the buggy state. A conflict here is
        // a malformed task and escalates.
        self.workspace
            .to_buggy()
            .map_err(|source| SessionError::InputChangesets {
                stage: setup_stage_of(&source),
                source,
            })?;

        let mut feedback = TurnFeedback::TaskBriefing { summary: briefing };

        for turn in 1..=self.config.max_turns {
            let advice = self.nudge_for(turn);
            let ctx = TurnContext {
                turn,
                max_turns: self.config.max_turns,
                workspace_state: self.workspace.state(),
                feedback: &feedback,
                advice,
            };
            let action = actor.next_action(&ctx)?;

            feedback = match action {
                ProposerAction::Execute { command } => self.explore(&command).await,
                ProposerAction::Switch { target } => {
                    match target {
                        TargetState::Buggy => self.workspace.to_buggy()?,
                        TargetState::Fixed => self.workspace.to_fixed()?,
                    }
                    TurnFeedback::Switched {
                        state: self.workspace.state(),
                    }
                }
                ProposerAction::Submit { script } => match self.check_submission(&script).await? {
                    Submission::Accepted { buggy_exit, fixed_exit } => {
                        info!(session = %self.id, turn, "oracle accepted");
                        self.workspace.reset()?;
                        return Ok(SessionOutcome::Accepted(Box::new(AcceptedOracle {
                            script,
                            test_patch: self.test_patch.clone(),
                            fix_patch: self.fix_patch.clone(),
                            buggy_exit,
                            fixed_exit,
                        })));
                    }
                    Submission::Rejected(feedback) => feedback,
                },
                ProposerAction::Abandon { reason } => {
                    warn!(session = %self.id, turn, %reason, "actor abandoned the task");
                    self.workspace.reset()?;
                    return Ok(SessionOutcome::Abandoned { reason });
                }
            };
        }

        warn!(session = %self.id, turns = self.config.max_turns, "turn budget exhausted");
        self.workspace.reset()?;
        Ok(SessionOutcome::Exhausted {
            turns: self.config.max_turns,
        })
    }

    /// Run one exploration command; failures become feedback, not
    /// errors.
    async fn explore(&self, command: &str) -> TurnFeedback {
        match self
            .workspace
            .run(command, self.config.exec_timeout)
            .await
        {
            Ok(output) => TurnFeedback::CommandResult {
                exit: output.exit,
                stdout: truncate(output.stdout, MAX_FEEDBACK_STDOUT),
                stderr: truncate(output.stderr, MAX_FEEDBACK_STDERR),
            },
            Err(e) => TurnFeedback::CommandRefused {
                reason: e.to_string(),
            },
        }
    }

    /// Screen and validate a submission; all rejection paths
    /// resynchronize the workspace to the buggy state.
    async fn check_submission(&mut self, script: &str) -> Result<Submission, SessionError> {
        if let Err(rejection) = self.screen.screen(script) {
            warn!(session = %self.id, %rejection, "submission failed screening");
            self.resync()?;
            return Ok(Submission::Rejected(TurnFeedback::ScreeningRejected {
                reason: rejection.reason,
            }));
        }

        match self.validator.validate(&mut self.workspace, script).await {
            Ok(verdict) if verdict.accepted() => Ok(Submission::Accepted {
                buggy_exit: verdict.buggy_exit,
                fixed_exit: verdict.fixed_exit,
            }),
            Ok(verdict) => {
                self.resync()?;
                Ok(Submission::Rejected(TurnFeedback::ValidationRejected {
                    category: verdict.category,
                    buggy_exit: verdict.buggy_exit,
                    fixed_exit: verdict.fixed_exit,
                }))
            }
            Err(ValidationError::Setup { stage, source }) => {
                Err(SessionError::InputChangesets { stage, source })
            }
            Err(aborted) => {
                self.resync()?;
                Ok(Submission::Rejected(TurnFeedback::ValidationAborted {
                    reason: aborted.to_string(),
                }))
            }
        }
    }

    /// Re-materialize the buggy state before handing control back to
    /// the actor.
    fn resync(&mut self) -> Result<(), SessionError> {
        self.workspace.to_buggy().map_err(SessionError::Workspace)
    }

    fn nudge_for(&self, turn: u32) -> Option<&'static str> {
        if !self.config.nudge_turns.contains(&turn) {
            return None;
        }
        if turn * 2 >= self.config.max_turns {
            Some(
                "URGENT: submit the evaluation script NOW. A script that installs dependencies \
                 and runs the specific failing test is sufficient.",
            )
        } else {
            Some(
                "You have been exploring for a while. Submit your evaluation script; a simple \
                 script that runs the specific test from the test changes is usually sufficient.",
            )
        }
    }
}

/// Internal result of a submission check.
enum Submission {
    Accepted { buggy_exit: i32, fixed_exit: i32 },
    Rejected(TurnFeedback),
}

/// Best-effort mapping of a workspace error during initial
/// materialization to the protocol step it belongs to.
fn setup_stage_of(error: &WorkspaceError) -> SetupStage {
    match error {
        WorkspaceError::PatchConflict { patch, .. } if patch == "fix" => SetupStage::ApplyFix,
        WorkspaceError::PatchConflict { .. } => SetupStage::ApplyTest,
        _ => SetupStage::Reset,
    }
}

fn truncate(mut s: String, max: usize) -> String {
    if s.len() > max {
        let mut end = max;
        while end > 0 && !s.is_char_boundary(end) {
            end -= 1;
        }
        s.truncate(end);
        s.push_str("\n[truncated]");
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workspace::tests::{create_test_workspace, fix_changeset, test_changeset};

    struct CountingProposer {
        calls: u32,
        action: fn() -> ProposerAction,
    }

    impl Proposer for CountingProposer {
        fn next_action(
            &mut self,
            _ctx: &TurnContext<'_>,
        ) -> Result<ProposerAction, ProposerError> {
            self.calls += 1;
            Ok((self.action)())
        }
    }

    fn grep_only_submit() -> ProposerAction {
        ProposerAction::Submit {
            script: "#!/bin/bash\ngrep -q lower src/scheme.py && exit 0\nexit 1\n".to_string(),
        }
    }

    #[tokio::test]
    async fn exhausts_after_exactly_the_turn_budget() {
        let temp = tempfile::tempdir().expect("tempdir");
        let ws = create_test_workspace(temp.path());
        let config = SessionConfig {
            max_turns: 4,
            ..SessionConfig::default()
        };
        let mut session =
            OracleSession::new(ws, &test_changeset(), &fix_changeset(), config).expect("session");

        let mut actor = CountingProposer {
            calls: 0,
            action: grep_only_submit,
        };
        let outcome = session
            .run(&mut actor, "briefing".to_string())
            .await
            .expect("session run");

        assert!(matches!(outcome, SessionOutcome::Exhausted { turns: 4 }));
        assert_eq!(actor.calls, 4);
    }

    #[tokio::test]
    async fn abandon_terminates_with_reason() {
        let temp = tempfile::tempdir().expect("tempdir");
        let ws = create_test_workspace(temp.path());
        let mut session = OracleSession::new(
            ws,
            &test_changeset(),
            &fix_changeset(),
            SessionConfig::default(),
        )
        .expect("session");

        let mut actor = ScriptedProposer::new([ProposerAction::Abandon {
            reason: "no viable oracle".to_string(),
        }]);
        let outcome = session
            .run(&mut actor, String::new())
            .await
            .expect("session run");

        match outcome {
            SessionOutcome::Abandoned { reason } => assert_eq!(reason, "no viable oracle"),
            other => panic!("expected Abandoned, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn exploration_runs_in_buggy_state() {
        let temp = tempfile::tempdir().expect("tempdir");
        let ws = create_test_workspace(temp.path());
        let mut session = OracleSession::new(
            ws,
            &test_changeset(),
            &fix_changeset(),
            SessionConfig::default(),
        )
        .expect("session");

        struct Inspect {
            seen_state: Option<crate::workspace::WorkspaceState>,
        }
        impl Proposer for Inspect {
            fn next_action(
                &mut self,
                ctx: &TurnContext<'_>,
            ) -> Result<ProposerAction, ProposerError> {
                self.seen_state = Some(ctx.workspace_state);
                Ok(ProposerAction::Abandon {
                    reason: "done".to_string(),
                })
            }
        }

        let mut actor = Inspect { seen_state: None };
        session
            .run(&mut actor, String::new())
            .await
            .expect("session run");
        assert_eq!(actor.seen_state, Some(crate::workspace::WorkspaceState::Buggy));
    }

    #[test]
    fn truncation_marks_cut_output() {
        let long = "x".repeat(MAX_FEEDBACK_STDOUT + 100);
        let cut = truncate(long, MAX_FEEDBACK_STDOUT);
        assert!(cut.ends_with("[truncated]"));
        assert!(cut.len() <= MAX_FEEDBACK_STDOUT + 16);
    }
}
