//! Configuration parsing and management.
//!
//! A single TOML file tunes the pipeline: output layout, session turn
//! budget and timeouts, screen allowlist extensions, and the
//! classification policy. Every field has a default, so an empty config
//! is valid.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::diff::ClassifyPolicy;
use crate::screen::HackingScreen;
use crate::session::SessionConfig;

/// Errors from configuration loading.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    /// The TOML is invalid.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// The parsed config fails validation.
    #[error("invalid config: {0}")]
    Validation(String),
}

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ForgeConfig {
    /// Output directory for generated tasks.
    #[serde(default)]
    pub output: OutputConfig,

    /// Session tuning.
    #[serde(default)]
    pub session: SessionSettings,

    /// Screen allowlist extensions.
    #[serde(default)]
    pub screen: ScreenSettings,

    /// Classification policy.
    #[serde(default)]
    pub classify: ClassifySettings,
}

impl ForgeConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read, parsed, or
    /// validated.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the TOML is invalid or fails
    /// validation.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.session.max_turns == 0 {
            return Err(ConfigError::Validation(
                "session.max_turns must be at least 1".to_string(),
            ));
        }
        if self.session.exec_timeout_secs == 0 || self.session.oracle_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "session timeouts must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    /// The session configuration derived from this config.
    #[must_use]
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            max_turns: self.session.max_turns,
            exec_timeout: Duration::from_secs(self.session.exec_timeout_secs),
            oracle_timeout: Duration::from_secs(self.session.oracle_timeout_secs),
            nudge_turns: self.session.nudge_turns.clone(),
        }
    }

    /// The screen derived from this config.
    #[must_use]
    pub fn hacking_screen(&self) -> HackingScreen {
        HackingScreen::new().with_extra_runners(self.screen.extra_runners.iter().cloned())
    }

    /// The classification policy derived from this config.
    #[must_use]
    pub fn classify_policy(&self) -> ClassifyPolicy {
        ClassifyPolicy::default()
            .with_extra_test_markers(self.classify.extra_test_markers.iter().cloned())
            .with_extra_ignore_markers(self.classify.extra_ignore_markers.iter().cloned())
            .prefer_test(self.classify.prefer_test)
    }
}

/// Output layout settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Base directory for generated tasks.
    #[serde(default = "default_output_dir")]
    pub dir: PathBuf,

    /// Registry user for generated image names.
    #[serde(default = "default_registry_user")]
    pub registry_user: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: default_output_dir(),
            registry_user: default_registry_user(),
        }
    }
}

/// Session tuning settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSettings {
    /// Maximum actor turns.
    #[serde(default = "default_max_turns")]
    pub max_turns: u32,

    /// Exploration command timeout, seconds.
    #[serde(default = "default_exec_timeout")]
    pub exec_timeout_secs: u64,

    /// Oracle run timeout, seconds.
    #[serde(default = "default_oracle_timeout")]
    pub oracle_timeout_secs: u64,

    /// Turns at which advisory nudges are injected.
    #[serde(default = "default_nudge_turns")]
    pub nudge_turns: Vec<u32>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            max_turns: default_max_turns(),
            exec_timeout_secs: default_exec_timeout(),
            oracle_timeout_secs: default_oracle_timeout(),
            nudge_turns: default_nudge_turns(),
        }
    }
}

/// Screen allowlist settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ScreenSettings {
    /// Additional recognized test-runner invocations.
    #[serde(default)]
    pub extra_runners: Vec<String>,
}

/// Classification policy settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifySettings {
    /// Whether a test-marker match outranks an ignore-marker match.
    #[serde(default = "default_true")]
    pub prefer_test: bool,

    /// Additional test-path markers.
    #[serde(default)]
    pub extra_test_markers: Vec<String>,

    /// Additional ignore-path markers.
    #[serde(default)]
    pub extra_ignore_markers: Vec<String>,
}

impl Default for ClassifySettings {
    fn default() -> Self {
        Self {
            prefer_test: true,
            extra_test_markers: Vec::new(),
            extra_ignore_markers: Vec::new(),
        }
    }
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("tasks")
}

fn default_registry_user() -> String {
    "taskforge".to_string()
}

const fn default_max_turns() -> u32 {
    30
}

const fn default_exec_timeout() -> u64 {
    120
}

const fn default_oracle_timeout() -> u64 {
    300
}

fn default_nudge_turns() -> Vec<u32> {
    vec![10, 20]
}

const fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let config = ForgeConfig::from_toml("").expect("parse");
        assert_eq!(config.session.max_turns, 30);
        assert_eq!(config.output.dir, PathBuf::from("tasks"));
        assert!(config.classify.prefer_test);
    }

    #[test]
    fn partial_override_keeps_other_defaults() {
        let config = ForgeConfig::from_toml(
            "\
[session]
max_turns = 5

[screen]
extra_runners = [\"busted\"]
",
        )
        .expect("parse");
        assert_eq!(config.session.max_turns, 5);
        assert_eq!(config.session.exec_timeout_secs, 120);
        assert_eq!(config.screen.extra_runners, vec!["busted"]);
    }

    #[test]
    fn zero_turn_budget_is_rejected() {
        let err = ForgeConfig::from_toml("[session]\nmax_turns = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn derived_session_config_uses_seconds() {
        let config = ForgeConfig::from_toml("[session]\noracle_timeout_secs = 42\n").expect("ok");
        assert_eq!(
            config.session_config().oracle_timeout,
            Duration::from_secs(42)
        );
    }
}
