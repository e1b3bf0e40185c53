//! Downstream packaging record for accepted oracles.
//!
//! Once a session accepts an oracle, this module assembles the
//! `task.json` record a downstream packager consumes: instance id,
//! problem statement, the gold/test/fix patches, the oracle script, and
//! the observed exit-code pair. Image build and push are the external
//! packaging collaborator's concern; only the Dockerfile text is
//! rendered here.

pub mod detect;
mod dockerfile;

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::fetch::ChangeRecord;
use crate::session::AcceptedOracle;

pub use dockerfile::render_dockerfile;

/// Path fragments that mark a changed file as a test file.
const TEST_FILE_PATTERNS: &[&str] = &[
    "test_", "_test.", "/test/", "/tests/", "spec.", ".spec.", "__test__",
];

/// Errors from task record assembly and persistence.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TaskError {
    /// A required record field is empty.
    #[error("required field is empty: {field}")]
    EmptyField {
        /// The offending field.
        field: &'static str,
    },

    /// Record I/O failed.
    #[error("task record I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Record (de)serialization failed.
    #[error("task record serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// The persisted `task.json` record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRecord {
    /// Stable instance identifier (`owner-repo-number`).
    pub instance_id: String,
    /// Repository identifier (`owner/repo`).
    pub repo: String,
    /// Base revision all three states derive from.
    pub base_commit: String,
    /// Head revision of the original change.
    pub head_commit: String,
    /// Narrative description: linked issue, change body, files touched.
    pub problem_statement: String,
    /// The full original diff.
    pub gold_patch: String,
    /// The test changeset as diff text.
    pub test_patch: String,
    /// The fix changeset as diff text.
    pub fix_patch: String,
    /// Changed files classified as tests.
    pub test_files: Vec<String>,
    /// All changed files.
    pub changed_files: Vec<String>,
    /// Container image name the packager will build.
    pub image_name: String,
    /// The validated oracle script.
    pub eval_script: String,
    /// Exit code observed in the buggy state.
    pub buggy_exit: i32,
    /// Exit code observed in the fixed state.
    pub fixed_exit: i32,
    /// Original change number.
    pub pr_number: u64,
    /// Original change title.
    pub pr_title: String,
    /// Whether the original change was merged.
    pub merged: bool,
    /// When the original change was created.
    pub created_at: Option<DateTime<Utc>>,
}

impl TaskRecord {
    /// Assemble a record from the fetched change and the accepted
    /// oracle.
    #[must_use]
    pub fn assemble(record: &ChangeRecord, oracle: &AcceptedOracle, registry_user: &str) -> Self {
        let instance_id = sanitize_instance_id(&record.repo, record.number);
        let image_name = format!("{registry_user}/taskforge-{instance_id}:latest");
        Self {
            instance_id,
            repo: record.repo.clone(),
            base_commit: record.base_commit.clone(),
            head_commit: record.head_commit.clone(),
            problem_statement: compose_problem_statement(record),
            gold_patch: record.diff.clone(),
            test_patch: oracle.test_patch.clone(),
            fix_patch: oracle.fix_patch.clone(),
            test_files: extract_test_files(&record.changed_files),
            changed_files: record.changed_files.clone(),
            image_name,
            eval_script: oracle.script.clone(),
            buggy_exit: oracle.buggy_exit,
            fixed_exit: oracle.fixed_exit,
            pr_number: record.number,
            pr_title: record.title.clone(),
            merged: record.merged,
            created_at: record.created_at,
        }
    }

    /// Check the record for empty required fields.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::EmptyField`] naming the first empty field.
    pub fn validate(&self) -> Result<(), TaskError> {
        let required: &[(&'static str, &str)] = &[
            ("instance_id", &self.instance_id),
            ("repo", &self.repo),
            ("base_commit", &self.base_commit),
            ("problem_statement", &self.problem_statement),
            ("gold_patch", &self.gold_patch),
            ("image_name", &self.image_name),
            ("eval_script", &self.eval_script),
        ];
        for &(field, value) in required {
            if value.trim().is_empty() {
                return Err(TaskError::EmptyField { field });
            }
        }
        Ok(())
    }

    /// Write the record as pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::Io`] or [`TaskError::Json`] on failure.
    pub fn save(&self, path: &Path) -> Result<(), TaskError> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        info!(path = %path.display(), "saved task record");
        Ok(())
    }

    /// Read a record back from JSON.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::Io`] or [`TaskError::Json`] on failure.
    pub fn load(path: &Path) -> Result<Self, TaskError> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}

/// Stable instance id from repo and change number
/// (`acme/widget` + 42 → `acme-widget-42`).
#[must_use]
pub fn sanitize_instance_id(repo: &str, number: u64) -> String {
    format!("{}-{number}", repo.replace('/', "-"))
}

/// Changed files matching test-path conventions.
#[must_use]
pub fn extract_test_files(changed_files: &[String]) -> Vec<String> {
    changed_files
        .iter()
        .filter(|f| {
            let lower = f.to_ascii_lowercase();
            TEST_FILE_PATTERNS.iter().any(|p| lower.contains(p))
        })
        .cloned()
        .collect()
}

/// Compose the narrative problem statement: linked issue first, then
/// the change description, then the list of touched files.
#[must_use]
pub fn compose_problem_statement(record: &ChangeRecord) -> String {
    let mut parts: Vec<String> = Vec::new();

    if let Some(issue) = &record.issue {
        parts.push(format!("# Issue #{}: {}\n", issue.number, issue.title));
        parts.push(issue.body.clone());
        parts.push("\n---\n".to_string());
    }

    parts.push(format!(
        "# Pull Request #{}: {}\n",
        record.number, record.title
    ));
    parts.push(record.body.clone());

    if !record.changed_files.is_empty() {
        parts.push("\n## Files Changed\n".to_string());
        for file in &record.changed_files {
            parts.push(format!("- {file}"));
        }
    }

    parts.join("\n")
}
