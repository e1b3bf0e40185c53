//! Unified-diff model and test/fix partitioning.
//!
//! A pull request's change arrives as one unified diff. This module parses
//! it into per-file [`FileDiff`] blocks, groups them into a [`ChangeSet`],
//! and (in [`splitter`]) partitions the set into the test-relevant and
//! fix-relevant changesets that drive the two-state validation protocol.
//!
//! Per-file blocks keep their verbatim diff text, so any subset of files
//! re-concatenates into a syntactically valid patch that applies in
//! isolation.

mod parser;
pub mod splitter;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use splitter::{ClassifyPolicy, DiffSplit, Label, split};

/// Maximum accepted size for an input diff (8 MiB).
/// Prevents memory exhaustion from oversized or adversarial inputs.
pub const MAX_DIFF_LEN: usize = 8 * 1024 * 1024;

/// Errors from diff parsing and splitting.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DiffError {
    /// The diff text could not be parsed into per-file blocks.
    #[error("malformed diff: {reason}")]
    Malformed {
        /// Why parsing failed.
        reason: String,
    },

    /// The diff contains no test-classified files.
    ///
    /// Without new or modified tests the resulting oracle cannot be
    /// discriminating, so this is fatal to the task.
    #[error("diff contains no test-classified files")]
    NoTestChanges,

    /// The diff contains no fix-classified files.
    ///
    /// With nothing to withhold from the buggy state, the two states are
    /// identical and no oracle can separate them.
    #[error("diff contains no fix-classified files")]
    NoFixChanges,
}

/// How a file is changed by its diff block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileChangeKind {
    /// File is created by the change (`--- /dev/null`).
    Added,
    /// File is deleted by the change (`+++ /dev/null`).
    Removed,
    /// File exists on both sides.
    Modified,
}

/// One file's portion of a unified diff.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDiff {
    /// Repository-relative path of the file (the post-change path, or the
    /// pre-change path for removals).
    pub path: String,
    /// Verbatim diff text for this file, including its headers. Always
    /// newline-terminated.
    pub raw: String,
    /// Whether the file is added, removed, or modified.
    pub kind: FileChangeKind,
}

/// An ordered sequence of per-file diff blocks.
///
/// Changesets produced by [`split`] are mutually exclusive in file-path
/// coverage and each serializes (via [`ChangeSet::to_patch`]) to a diff
/// that applies independently against the base revision.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSet {
    files: Vec<FileDiff>,
}

impl ChangeSet {
    /// Build a changeset from already-parsed file blocks, preserving order.
    #[must_use]
    pub fn from_files(files: Vec<FileDiff>) -> Self {
        Self { files }
    }

    /// Parse a unified diff into a changeset.
    ///
    /// Accepts `git diff` output (blocks delimited by `diff --git` lines)
    /// as well as plain unified diffs whose file blocks start at
    /// `--- <old>` / `+++ <new>` header pairs.
    ///
    /// # Errors
    ///
    /// Returns [`DiffError::Malformed`] if the text is empty, oversized,
    /// or contains no recognizable file header.
    pub fn parse(text: &str) -> Result<Self, DiffError> {
        parser::parse(text)
    }

    /// The per-file blocks, in input order.
    #[must_use]
    pub fn files(&self) -> &[FileDiff] {
        &self.files
    }

    /// Paths covered by this changeset, in input order.
    #[must_use]
    pub fn paths(&self) -> Vec<&str> {
        self.files.iter().map(|f| f.path.as_str()).collect()
    }

    /// True if the changeset covers no files.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Number of files covered.
    #[must_use]
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Serialize back to a unified diff applyable in isolation.
    ///
    /// Returns the empty string for an empty changeset.
    #[must_use]
    pub fn to_patch(&self) -> String {
        let mut out = String::new();
        for file in &self.files {
            out.push_str(&file.raw);
        }
        out
    }
}
