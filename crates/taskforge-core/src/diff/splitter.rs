//! Classification of changed files and changeset splitting.
//!
//! Every file in the input diff resolves to exactly one label:
//!
//! | Label | Meaning |
//! |-------|---------|
//! | `Test` | The change belongs to the test-bearing patch |
//! | `Fix` | The change belongs to the withheld fix patch |
//! | `Ignore` | Docs/metadata, excluded from both patches |
//!
//! Classification is per-file and order-independent. Unmatched paths
//! default to `Fix`: an unclassified change is more likely part of the
//! behavioral fix than a test, and misclassifying a test file as fix
//! would silently weaken the buggy state. Test-marker matches take
//! precedence over everything else by default; the precedence is a
//! policy choice exposed through [`ClassifyPolicy`].

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{ChangeSet, DiffError, FileDiff};

/// Path fragments marking a file as test-relevant.
///
/// Matched case-insensitively as substrings of the repository-relative
/// path.
pub const DEFAULT_TEST_MARKERS: &[&str] = &[
    "test", "spec.", ".spec.", "__test__", "conftest",
];

/// Path fragments marking a file as documentation or repo metadata,
/// excluded from both output changesets.
pub const DEFAULT_IGNORE_MARKERS: &[&str] = &[
    "changelog",
    "changes",
    "history",
    "news",
    "authors",
    "contributing",
    "readme",
    "license",
    ".rst",
    ".md",
    ".gitignore",
    ".github/",
    "docs/",
];

/// Label assigned to a changed file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Label {
    /// Part of the test-bearing changeset.
    Test,
    /// Part of the withheld fix changeset.
    Fix,
    /// Excluded from both changesets.
    Ignore,
}

/// Classification policy: marker lists plus precedence.
#[derive(Debug, Clone)]
pub struct ClassifyPolicy {
    test_markers: Vec<String>,
    ignore_markers: Vec<String>,
    /// When true (default), a test-marker match wins over an
    /// ignore-marker match. Misclassifying a fix or docs file as a test
    /// only weakens discrimination; the reverse can invalidate it.
    prefer_test: bool,
}

impl Default for ClassifyPolicy {
    fn default() -> Self {
        Self {
            test_markers: DEFAULT_TEST_MARKERS.iter().map(ToString::to_string).collect(),
            ignore_markers: DEFAULT_IGNORE_MARKERS
                .iter()
                .map(ToString::to_string)
                .collect(),
            prefer_test: true,
        }
    }
}

impl ClassifyPolicy {
    /// Extend the test-marker list with extra path fragments.
    #[must_use]
    pub fn with_extra_test_markers<I, S>(mut self, extra: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.test_markers.extend(extra.into_iter().map(Into::into));
        self
    }

    /// Extend the ignore-marker list with extra path fragments.
    #[must_use]
    pub fn with_extra_ignore_markers<I, S>(mut self, extra: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ignore_markers.extend(extra.into_iter().map(Into::into));
        self
    }

    /// Set whether a test-marker match outranks an ignore-marker match.
    #[must_use]
    pub const fn prefer_test(mut self, prefer: bool) -> Self {
        self.prefer_test = prefer;
        self
    }

    /// Classify a repository-relative path.
    ///
    /// Total: every path resolves to exactly one label, defaulting to
    /// [`Label::Fix`] when no marker matches.
    #[must_use]
    pub fn classify(&self, path: &str) -> Label {
        let lower = path.to_ascii_lowercase();
        let is_test = self.test_markers.iter().any(|m| lower.contains(m.as_str()));
        let is_ignored = self
            .ignore_markers
            .iter()
            .any(|m| lower.contains(m.as_str()));

        match (is_test, is_ignored) {
            (true, false) => Label::Test,
            (true, true) => {
                if self.prefer_test {
                    Label::Test
                } else {
                    Label::Ignore
                }
            }
            (false, true) => Label::Ignore,
            (false, false) => Label::Fix,
        }
    }
}

/// Result of splitting a full diff into disjoint changesets.
#[derive(Debug, Clone)]
pub struct DiffSplit {
    /// Changes to test files, applied to reach the buggy state.
    pub test: ChangeSet,
    /// Changes to source files, additionally applied to reach the fixed
    /// state.
    pub fix: ChangeSet,
    /// Paths excluded from both changesets, kept for auditability.
    pub ignored: Vec<String>,
}

/// Partition a full diff into test and fix changesets.
///
/// File blocks keep their original relative order within each output
/// changeset. The output path sets are disjoint and, together with
/// `ignored`, cover exactly the input's paths.
///
/// # Errors
///
/// Returns [`DiffError::NoTestChanges`] if no file classifies as test,
/// or [`DiffError::NoFixChanges`] if no file classifies as fix. Either
/// way the input cannot yield a discriminating oracle.
pub fn split(full_diff: &ChangeSet, policy: &ClassifyPolicy) -> Result<DiffSplit, DiffError> {
    let mut test: Vec<FileDiff> = Vec::new();
    let mut fix: Vec<FileDiff> = Vec::new();
    let mut ignored: Vec<String> = Vec::new();

    for file in full_diff.files() {
        match policy.classify(&file.path) {
            Label::Test => {
                debug!(path = %file.path, "classified as test");
                test.push(file.clone());
            }
            Label::Fix => {
                debug!(path = %file.path, "classified as fix");
                fix.push(file.clone());
            }
            Label::Ignore => {
                debug!(path = %file.path, "ignored (docs/metadata)");
                ignored.push(file.path.clone());
            }
        }
    }

    if test.is_empty() {
        return Err(DiffError::NoTestChanges);
    }
    if fix.is_empty() {
        return Err(DiffError::NoFixChanges);
    }

    info!(
        test_files = test.len(),
        fix_files = fix.len(),
        ignored_files = ignored.len(),
        "split diff into test and fix changesets"
    );

    Ok(DiffSplit {
        test: ChangeSet::from_files(test),
        fix: ChangeSet::from_files(fix),
        ignored,
    })
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use proptest::prelude::*;

    use super::*;
    use crate::diff::FileChangeKind;

    fn file(path: &str) -> FileDiff {
        FileDiff {
            path: path.to_string(),
            raw: format!("--- a/{path}\n+++ b/{path}\n@@ -1 +1 @@\n-a\n+b\n"),
            kind: FileChangeKind::Modified,
        }
    }

    #[test]
    fn classifies_test_fix_and_ignored_paths() {
        let policy = ClassifyPolicy::default();
        assert_eq!(policy.classify("tests/test_scheme.py"), Label::Test);
        assert_eq!(policy.classify("src/scheme.py"), Label::Fix);
        assert_eq!(policy.classify("CHANGELOG.md"), Label::Ignore);
        assert_eq!(policy.classify("docs/usage.rst"), Label::Ignore);
        // Unmatched paths default to fix.
        assert_eq!(policy.classify("Makefile"), Label::Fix);
    }

    #[test]
    fn test_marker_outranks_ignore_marker_by_default() {
        let policy = ClassifyPolicy::default();
        // Matches both "test" and ".md".
        assert_eq!(policy.classify("tests/TESTING.md"), Label::Test);

        let ignore_first = ClassifyPolicy::default().prefer_test(false);
        assert_eq!(ignore_first.classify("tests/TESTING.md"), Label::Ignore);
    }

    #[test]
    fn split_partitions_and_preserves_order() {
        let cs = ChangeSet::from_files(vec![
            file("src/a.py"),
            file("tests/test_a.py"),
            file("src/b.py"),
            file("README.md"),
            file("tests/test_b.py"),
        ]);
        let split = split(&cs, &ClassifyPolicy::default()).expect("split");
        assert_eq!(split.test.paths(), vec!["tests/test_a.py", "tests/test_b.py"]);
        assert_eq!(split.fix.paths(), vec!["src/a.py", "src/b.py"]);
        assert_eq!(split.ignored, vec!["README.md"]);
    }

    #[test]
    fn split_without_tests_is_a_hard_error() {
        let cs = ChangeSet::from_files(vec![file("src/a.py")]);
        let err = split(&cs, &ClassifyPolicy::default()).unwrap_err();
        assert!(matches!(err, DiffError::NoTestChanges));
    }

    #[test]
    fn split_without_fix_is_a_hard_error() {
        let cs = ChangeSet::from_files(vec![file("tests/test_a.py")]);
        let err = split(&cs, &ClassifyPolicy::default()).unwrap_err();
        assert!(matches!(err, DiffError::NoFixChanges));
    }

    #[test]
    fn output_changesets_are_valid_patches() {
        let cs = ChangeSet::from_files(vec![file("src/a.py"), file("tests/test_a.py")]);
        let split = split(&cs, &ClassifyPolicy::default()).expect("split");
        let reparsed = ChangeSet::parse(&split.test.to_patch()).expect("test patch parses");
        assert_eq!(reparsed.paths(), vec!["tests/test_a.py"]);
        let reparsed = ChangeSet::parse(&split.fix.to_patch()).expect("fix patch parses");
        assert_eq!(reparsed.paths(), vec!["src/a.py"]);
    }

    proptest! {
        /// Path sets of the two outputs are disjoint and their union with
        /// the ignored set equals the input's path set.
        #[test]
        fn split_is_a_partition(
            segments in proptest::collection::vec("[a-z]{1,8}", 1..20),
        ) {
            let mut files = Vec::new();
            for (i, seg) in segments.iter().enumerate() {
                // Mix of test, source, and docs paths; the index keeps
                // paths unique.
                let path = match i % 3 {
                    0 => format!("tests/test_{seg}_{i}.py"),
                    1 => format!("src/{seg}_{i}.py"),
                    _ => format!("docs/{seg}_{i}.md"),
                };
                files.push(file(&path));
            }
            // Guarantee both required classes are present.
            files.push(file("tests/test_anchor.py"));
            files.push(file("src/anchor.py"));

            let cs = ChangeSet::from_files(files);
            let input: BTreeSet<String> =
                cs.paths().iter().map(ToString::to_string).collect();

            let split = split(&cs, &ClassifyPolicy::default()).expect("split");
            let test: BTreeSet<String> =
                split.test.paths().iter().map(ToString::to_string).collect();
            let fix: BTreeSet<String> =
                split.fix.paths().iter().map(ToString::to_string).collect();
            let ignored: BTreeSet<String> = split.ignored.iter().cloned().collect();

            prop_assert!(test.is_disjoint(&fix));
            prop_assert!(test.is_disjoint(&ignored));
            prop_assert!(fix.is_disjoint(&ignored));

            let mut union = BTreeSet::new();
            union.extend(test);
            union.extend(fix);
            union.extend(ignored);
            prop_assert_eq!(union, input);
        }
    }
}
