//! Narrow interface to the remote code-hosting metadata service.
//!
//! The engine consumes exactly one read-only call per task:
//! `fetch_change(repo, number)` returning the change's diff text, base
//! revision, and narrative description. [`ChangeFetcher`] is that
//! contract; [`GitHubFetcher`] implements it against the GitHub REST
//! API, and [`MockChangeFetcher`] serves canned records for tests and
//! offline runs.

mod github;

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use github::GitHubFetcher;

/// Maximum length for a `owner/repo` identifier.
pub const MAX_REPO_LEN: usize = 256;

/// An issue linked from the change description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkedIssue {
    /// Issue number.
    pub number: u64,
    /// Issue title.
    pub title: String,
    /// Issue body, empty if none.
    pub body: String,
}

/// Metadata and diff for one bug-fix change, as fetched from the
/// hosting service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRecord {
    /// Repository identifier (`owner/repo`).
    pub repo: String,
    /// Change (pull request) number.
    pub number: u64,
    /// Change title.
    pub title: String,
    /// Change description body, empty if none.
    pub body: String,
    /// Base revision the change applies to.
    pub base_commit: String,
    /// Head revision of the change.
    pub head_commit: String,
    /// Paths touched by the change.
    pub changed_files: Vec<String>,
    /// Unified diff with `--- a/<path>` / `+++ b/<path>` headers.
    pub diff: String,
    /// Whether the change was merged.
    pub merged: bool,
    /// When the change was created.
    pub created_at: Option<DateTime<Utc>>,
    /// Issue linked from the body, if any.
    pub issue: Option<LinkedIssue>,
}

impl ChangeRecord {
    /// Clone URL for this record's repository.
    #[must_use]
    pub fn clone_url(&self) -> String {
        format!("https://github.com/{}.git", self.repo)
    }
}

/// Errors from the metadata service.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum FetchError {
    /// The service answered with a non-success status.
    #[error("service returned status {status} for {endpoint}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// The endpoint that failed.
        endpoint: String,
    },

    /// The change does not exist.
    #[error("change {repo}#{number} not found")]
    NotFound {
        /// Repository identifier.
        repo: String,
        /// Change number.
        number: u64,
    },

    /// Transport-level failure (connect, TLS, read).
    #[error("transport error: {0}")]
    Transport(String),

    /// The response body could not be decoded.
    #[error("failed to decode response: {0}")]
    Decode(String),

    /// The request itself was invalid.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

/// The collaborator contract: one read-only fetch per task.
pub trait ChangeFetcher {
    /// Fetch the metadata and diff for `repo`'s change `number`.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError`] on transport, status, or decode failures.
    fn fetch_change(&self, repo: &str, number: u64) -> Result<ChangeRecord, FetchError>;
}

/// In-memory fetcher serving canned records.
#[derive(Debug, Clone, Default)]
pub struct MockChangeFetcher {
    records: HashMap<(String, u64), ChangeRecord>,
}

impl MockChangeFetcher {
    /// An empty mock.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a record to be served for its repo/number pair.
    pub fn insert(&mut self, record: ChangeRecord) {
        self.records
            .insert((record.repo.clone(), record.number), record);
    }
}

impl ChangeFetcher for MockChangeFetcher {
    fn fetch_change(&self, repo: &str, number: u64) -> Result<ChangeRecord, FetchError> {
        self.records
            .get(&(repo.to_string(), number))
            .cloned()
            .ok_or_else(|| FetchError::NotFound {
                repo: repo.to_string(),
                number,
            })
    }
}
