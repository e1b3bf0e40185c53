//! End-to-end task generation pipeline.
//!
//! Wires the narrow collaborator interfaces around the engine:
//! fetch the change → split the diff → provision a workspace at the
//! base revision → run the oracle session → package the accepted
//! oracle into a task directory (`task.json`, `Dockerfile`,
//! `eval_script.sh`).
//!
//! Batch generation isolates per-task failures: one malformed change
//! does not abort the rest, and a summary record captures the outcome
//! of every attempt.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info};

use crate::config::ForgeConfig;
use crate::diff::{ChangeSet, DiffError, DiffSplit, split};
use crate::fetch::{ChangeFetcher, ChangeRecord, FetchError};
use crate::session::{OracleSession, Proposer, SessionError, SessionOutcome};
use crate::task::detect::{Language, detect_language_from_files, detect_language_in_repo};
use crate::task::{TaskError, TaskRecord, render_dockerfile, sanitize_instance_id};
use crate::workspace::{Workspace, WorkspaceError};

/// Characters of the test patch shown in the actor's briefing.
const BRIEFING_PATCH_EXCERPT: usize = 3000;

/// Errors from a single task generation.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PipelineError {
    /// Fetching the change failed.
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// The diff could not be parsed or split.
    #[error(transparent)]
    Diff(#[from] DiffError),

    /// Workspace provisioning or teardown failed.
    #[error(transparent)]
    Workspace(#[from] WorkspaceError),

    /// The session escalated an unrecoverable failure.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// The task record could not be assembled or persisted.
    #[error(transparent)]
    Task(#[from] TaskError),

    /// The session ended without an accepted oracle — a legitimate
    /// terminal outcome for the session, but fatal for this task.
    #[error("no discriminating oracle: {outcome}")]
    NoOracle {
        /// How the session ended.
        outcome: String,
    },

    /// Task directory I/O failed.
    #[error("pipeline I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A successfully generated task.
#[derive(Debug)]
pub struct GeneratedTask {
    /// Directory holding `task.json`, `Dockerfile`, `eval_script.sh`.
    pub task_dir: PathBuf,
    /// The assembled record.
    pub record: TaskRecord,
}

/// Per-change entry in a batch summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchEntry {
    /// Change number.
    pub number: u64,
    /// Instance id derived from the change.
    pub instance_id: String,
    /// Whether generation succeeded.
    pub ok: bool,
    /// Success path or failure description.
    pub detail: String,
}

/// Summary of a batch run, persisted as `summary.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSummary {
    /// Repository the batch ran against.
    pub repo: String,
    /// Number of successfully generated tasks.
    pub generated: usize,
    /// One entry per attempted change.
    pub entries: Vec<BatchEntry>,
}

/// The orchestrating pipeline.
pub struct Pipeline {
    config: ForgeConfig,
    fetcher: Box<dyn ChangeFetcher>,
}

impl Pipeline {
    /// Pipeline over the given config and metadata collaborator.
    #[must_use]
    pub fn new(config: ForgeConfig, fetcher: Box<dyn ChangeFetcher>) -> Self {
        Self { config, fetcher }
    }

    /// Generate one task from `repo`'s change `number`, driving `actor`
    /// through an oracle session.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] on any stage failure, including
    /// [`PipelineError::NoOracle`] when the session ends exhausted or
    /// abandoned.
    pub async fn generate_task(
        &self,
        repo: &str,
        number: u64,
        actor: &mut dyn Proposer,
    ) -> Result<GeneratedTask, PipelineError> {
        info!(%repo, number, "generating task");

        let change = self.fetcher.fetch_change(repo, number)?;
        let full_diff = ChangeSet::parse(&change.diff)?;
        let diff_split = split(&full_diff, &self.config.classify_policy())?;

        let instance_id = sanitize_instance_id(repo, number);
        let task_dir = self.config.output.dir.join(&instance_id);
        std::fs::create_dir_all(&task_dir)?;

        let workspace = Workspace::provision(
            &change.clone_url(),
            &change.base_commit,
            &task_dir.join("workspace"),
        )?;

        let mut session = OracleSession::new(
            workspace,
            &diff_split.test,
            &diff_split.fix,
            self.config.session_config(),
        )?
        .with_screen(self.config.hacking_screen());

        let briefing = briefing_for(&change, &diff_split);
        let outcome = session.run(actor, briefing).await?;

        let oracle = match outcome {
            SessionOutcome::Accepted(oracle) => *oracle,
            SessionOutcome::Exhausted { turns } => {
                return Err(PipelineError::NoOracle {
                    outcome: format!("turn budget exhausted after {turns} turns"),
                });
            }
            SessionOutcome::Abandoned { reason } => {
                return Err(PipelineError::NoOracle {
                    outcome: format!("abandoned: {reason}"),
                });
            }
        };

        let workspace = session.teardown()?;
        let record = TaskRecord::assemble(&change, &oracle, &self.config.output.registry_user);
        record.validate()?;

        let language = match detect_language_from_files(&change.changed_files) {
            Language::Unknown => detect_language_in_repo(workspace.repo_dir()),
            lang => lang,
        };

        write_executable(&task_dir.join("eval_script.sh"), &oracle.script)?;
        std::fs::write(
            task_dir.join("Dockerfile"),
            render_dockerfile(&record, language),
        )?;
        record.save(&task_dir.join("task.json"))?;

        info!(%instance_id, dir = %task_dir.display(), "task generated");
        Ok(GeneratedTask { task_dir, record })
    }

    /// Generate tasks for several changes of one repository.
    ///
    /// Failures are isolated per change; the returned summary (also
    /// written to `summary.json` under the output directory) records
    /// every attempt.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Io`] only if the summary itself cannot
    /// be written.
    pub async fn generate_batch(
        &self,
        repo: &str,
        numbers: &[u64],
        actor_factory: &mut dyn FnMut() -> Box<dyn Proposer>,
    ) -> Result<BatchSummary, PipelineError> {
        let mut entries = Vec::with_capacity(numbers.len());
        let mut generated = 0usize;

        for (i, &number) in numbers.iter().enumerate() {
            info!(%repo, number, item = i + 1, total = numbers.len(), "batch item");
            let mut actor = actor_factory();
            let entry = match self.generate_task(repo, number, actor.as_mut()).await {
                Ok(task) => {
                    generated += 1;
                    BatchEntry {
                        number,
                        instance_id: task.record.instance_id.clone(),
                        ok: true,
                        detail: task.task_dir.display().to_string(),
                    }
                }
                Err(e) => {
                    error!(%repo, number, "task generation failed: {e}");
                    BatchEntry {
                        number,
                        instance_id: sanitize_instance_id(repo, number),
                        ok: false,
                        detail: e.to_string(),
                    }
                }
            };
            entries.push(entry);
        }

        let summary = BatchSummary {
            repo: repo.to_string(),
            generated,
            entries,
        };
        std::fs::create_dir_all(&self.config.output.dir)?;
        let json = serde_json::to_string_pretty(&summary)
            .map_err(|e| PipelineError::Task(TaskError::Json(e)))?;
        std::fs::write(self.config.output.dir.join("summary.json"), json)?;

        info!(
            generated,
            attempted = numbers.len(),
            "batch generation complete"
        );
        Ok(summary)
    }
}

fn write_executable(path: &std::path::Path, content: &str) -> std::io::Result<()> {
    std::fs::write(path, content)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))?;
    }
    Ok(())
}

/// Initial context handed to the proposing actor.
fn briefing_for(change: &ChangeRecord, diff_split: &DiffSplit) -> String {
    let test_patch = diff_split.test.to_patch();
    let excerpt: String = test_patch.chars().take(BRIEFING_PATCH_EXCERPT).collect();
    let truncated = if test_patch.len() > excerpt.len() {
        "\n…(truncated)"
    } else {
        ""
    };

    format!(
        "Build an evaluation script that distinguishes the buggy and fixed states of this \
         repository.\n\n\
         Repository: {repo}\n\
         Change #{number}: {title}\n\
         Base commit: {base}\n\n\
         The repository is checked out at the base commit with the test changes applied \
         (buggy state). The fix is withheld.\n\n\
         Test changes:\n```diff\n{excerpt}{truncated}\n```\n\n\
         Requirements: the script must exit non-zero in the buggy state and zero in the fixed \
         state, and it must execute actual tests rather than inspecting file contents.",
        repo = change.repo,
        number = change.number,
        title = change.title,
        base = change.base_commit,
    )
}
