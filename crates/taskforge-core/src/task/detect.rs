//! Language and test-framework detection.
//!
//! Used to pick Dockerfile templates and to seed the screen's context.
//! Detection is heuristic: changed-file extensions first, repository
//! manifest files as a fallback.

use std::path::Path;

use serde::{Deserialize, Serialize};

/// Primary implementation language of a repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Language {
    Python,
    JavaScript,
    Java,
    Go,
    Rust,
    Unknown,
}

impl Language {
    /// Lowercase identifier used in records and templates.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Python => "python",
            Self::JavaScript => "javascript",
            Self::Java => "java",
            Self::Go => "go",
            Self::Rust => "rust",
            Self::Unknown => "unknown",
        }
    }

    /// Container base image for this language.
    #[must_use]
    pub const fn base_image(&self) -> &'static str {
        match self {
            Self::Python => "python:3.11-slim",
            Self::JavaScript => "node:18-slim",
            Self::Java => "openjdk:17-slim",
            Self::Go => "golang:1.21-alpine",
            Self::Rust => "rust:1.75-slim",
            Self::Unknown => "ubuntu:22.04",
        }
    }
}

/// Detect the language from changed-file extensions.
///
/// Documentation files are skipped; if only docs changed, the result is
/// [`Language::Unknown`] and the caller should fall back to
/// [`detect_language_in_repo`].
#[must_use]
pub fn detect_language_from_files(changed_files: &[String]) -> Language {
    for file in changed_files {
        let lang = match Path::new(file).extension().and_then(|e| e.to_str()) {
            Some("py") => Language::Python,
            Some("js" | "ts" | "jsx" | "tsx") => Language::JavaScript,
            Some("java") => Language::Java,
            Some("go") => Language::Go,
            Some("rs") => Language::Rust,
            _ => continue,
        };
        return lang;
    }
    Language::Unknown
}

/// Detect the language from manifest files in a checkout.
#[must_use]
pub fn detect_language_in_repo(repo_path: &Path) -> Language {
    if repo_path.join("setup.py").exists() || repo_path.join("pyproject.toml").exists() {
        Language::Python
    } else if repo_path.join("package.json").exists() {
        Language::JavaScript
    } else if repo_path.join("pom.xml").exists() {
        Language::Java
    } else if repo_path.join("go.mod").exists() {
        Language::Go
    } else if repo_path.join("Cargo.toml").exists() {
        Language::Rust
    } else {
        Language::Unknown
    }
}

/// Best-guess test framework for a checkout.
#[must_use]
pub fn detect_test_framework(repo_path: &Path, language: Language) -> &'static str {
    match language {
        Language::Python => {
            if repo_path.join("tox.ini").exists() {
                "tox"
            } else {
                // pytest is the overwhelming default for Python repos.
                "pytest"
            }
        }
        Language::JavaScript => {
            let manifest = repo_path.join("package.json");
            if let Ok(content) = std::fs::read_to_string(manifest) {
                if content.contains("\"jest\"") {
                    return "jest";
                }
                if content.contains("\"mocha\"") {
                    return "mocha";
                }
            }
            "npm test"
        }
        Language::Java => "maven",
        Language::Go => "go test",
        Language::Rust => "cargo test",
        Language::Unknown => "unknown",
    }
}
