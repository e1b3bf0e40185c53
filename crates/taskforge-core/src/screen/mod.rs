//! Static screening of candidate oracle scripts.
//!
//! An oracle that merely greps source files for the fixed string would
//! "discriminate" without ever exercising the bug. This screen rejects
//! such scripts before any empirical run: a candidate must invoke a
//! recognized test-execution mechanism, and a script whose non-trivial
//! commands are all text-inspection utilities is rejected outright.
//!
//! The screen is a necessary-but-not-sufficient gate. It narrows the
//! search space the differential validator has to exercise; it never
//! replaces the two-state empirical check.

use thiserror::Error;
use tracing::debug;

/// Minimum script length in bytes; anything shorter cannot plausibly
/// run a test.
const MIN_SCRIPT_LEN: usize = 10;

/// Maximum script length in bytes (256 KiB). Oversized submissions are
/// rejected rather than scanned.
const MAX_SCRIPT_LEN: usize = 256 * 1024;

/// Recognized test-execution invocations.
///
/// Matched as substrings of the script text, the same way the commands
/// appear when invoked from a shell.
pub const DEFAULT_TEST_RUNNERS: &[&str] = &[
    "pytest",
    "python -m pytest",
    "python -m unittest",
    "python3 -m pytest",
    "python3 -m unittest",
    "tox",
    "nosetests",
    "npm test",
    "npm run test",
    "yarn test",
    "jest",
    "mocha",
    "cargo test",
    "go test",
    "mvn test",
    "mvn verify",
    "gradle test",
    "./gradlew test",
    "make test",
    "make check",
    "rspec",
    "phpunit",
    "ctest",
    "rake test",
];

/// Commands that only inspect text. A script built solely from these
/// cannot exercise the defect.
const TEXT_INSPECTION_COMMANDS: &[&str] = &[
    "grep", "egrep", "fgrep", "rg", "cat", "diff", "cmp", "awk", "sed", "head", "tail", "ls",
    "find", "wc", "sort", "cut", "tr", "stat", "file", "strings",
];

/// Shell words that may precede the actual command in a segment
/// (`if grep …`, `then pytest …`).
const CONTROL_PREFIXES: &[&str] = &["if", "elif", "while", "until", "then", "else", "do", "!", "time"];

/// Commands that do nothing observable on their own; ignored by the
/// analysis.
const TRIVIAL_COMMANDS: &[&str] = &[
    "echo", "exit", "true", "false", "set", "cd", "export", "local", "return", "read", "shift",
    "test", "[", "[[", "{", "}", "fi", "done", "esac", "for", "case", ":",
];

/// Rejection produced by the screen, with a reason suitable for direct
/// feedback to the proposing actor.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("screening rejected: {reason}")]
pub struct ScreeningRejection {
    /// Why the script was rejected.
    pub reason: String,
}

/// Static classifier over oracle script text.
#[derive(Debug, Clone)]
pub struct HackingScreen {
    runners: Vec<String>,
}

impl Default for HackingScreen {
    fn default() -> Self {
        Self::new()
    }
}

impl HackingScreen {
    /// Screen with the default runner allowlist.
    #[must_use]
    pub fn new() -> Self {
        Self {
            runners: DEFAULT_TEST_RUNNERS.iter().map(ToString::to_string).collect(),
        }
    }

    /// Extend the allowlist with additional runner invocations.
    #[must_use]
    pub fn with_extra_runners<I, S>(mut self, extra: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.runners.extend(extra.into_iter().map(Into::into));
        self
    }

    /// Screen a candidate oracle script.
    ///
    /// # Errors
    ///
    /// Returns [`ScreeningRejection`] when the script is too short or
    /// too long, contains no recognized test-runner invocation, or
    /// consists only of text-inspection commands.
    pub fn screen(&self, script: &str) -> Result<(), ScreeningRejection> {
        if script.trim().len() < MIN_SCRIPT_LEN {
            return Err(ScreeningRejection {
                reason: "script is too short to run any test".to_string(),
            });
        }
        if script.len() > MAX_SCRIPT_LEN {
            return Err(ScreeningRejection {
                reason: format!("script exceeds {MAX_SCRIPT_LEN} bytes"),
            });
        }

        if let Some(runner) = self.runners.iter().find(|r| script.contains(r.as_str())) {
            debug!(%runner, "script invokes a recognized test runner");
            return Ok(());
        }

        if inspection_only(script) {
            return Err(ScreeningRejection {
                reason: "script only inspects file contents (grep/cat/diff); it must execute \
                         actual tests"
                    .to_string(),
            });
        }

        Err(ScreeningRejection {
            reason: "script does not invoke any recognized test runner".to_string(),
        })
    }
}

/// True when every non-trivial command in the script is a
/// text-inspection utility.
fn inspection_only(script: &str) -> bool {
    let mut saw_inspection = false;
    for line in script.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        for segment in line.split(['|', ';', '&']) {
            let Some(command) = segment_command(segment) else {
                continue;
            };
            if TRIVIAL_COMMANDS.contains(&command) {
                continue;
            }
            if TEXT_INSPECTION_COMMANDS.contains(&command) {
                saw_inspection = true;
                continue;
            }
            // Anything else is a real command the screen cannot vouch
            // for either way.
            return false;
        }
    }
    saw_inspection
}

/// The effective command of a pipeline segment: the first word after
/// control-flow prefixes and environment assignments, with any leading
/// path stripped.
fn segment_command(segment: &str) -> Option<&str> {
    for word in segment.split_whitespace() {
        let bare = word.rsplit('/').next().unwrap_or(word);
        if CONTROL_PREFIXES.contains(&bare) {
            continue;
        }
        // VAR=value prefix before the command.
        if bare.contains('=') && !bare.starts_with('=') {
            continue;
        }
        return Some(bare);
    }
    None
}
