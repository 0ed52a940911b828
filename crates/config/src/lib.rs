//! Configuration loading, validation, and management for taskweave.
//!
//! Loads configuration from `~/.taskweave/config.toml` with environment
//! variable overrides. Validates all budgets and timeouts at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.taskweave/config.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Single-task decide → act → observe loop
    #[serde(default)]
    pub iteration: IterationConfig,

    /// Plan scheduling
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Reflection-based retries
    #[serde(default)]
    pub reflexion: ReflexionConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationConfig {
    /// Maximum decide → act → observe iterations per run
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,

    /// Timeout for each oracle call
    #[serde(default = "default_oracle_timeout_secs")]
    pub oracle_timeout_secs: u64,

    /// Timeout for each tool call
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,
}

fn default_max_iterations() -> usize {
    10
}
fn default_oracle_timeout_secs() -> u64 {
    60
}
fn default_tool_timeout_secs() -> u64 {
    30
}

impl Default for IterationConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            oracle_timeout_secs: default_oracle_timeout_secs(),
            tool_timeout_secs: default_tool_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Maximum number of tasks running at once
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Iteration budget for each task's sub-run
    #[serde(default = "default_task_max_iterations")]
    pub task_max_iterations: usize,

    /// Wall-clock limit for each task's sub-run
    #[serde(default = "default_task_timeout_secs")]
    pub task_timeout_secs: u64,
}

fn default_concurrency() -> usize {
    4
}
fn default_task_max_iterations() -> usize {
    5
}
fn default_task_timeout_secs() -> u64 {
    300
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            task_max_iterations: default_task_max_iterations(),
            task_timeout_secs: default_task_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReflexionConfig {
    /// Maximum attempts before giving up
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,

    /// Iteration budget for each attempt
    #[serde(default = "default_max_iterations")]
    pub attempt_max_iterations: usize,
}

fn default_max_attempts() -> usize {
    3
}

impl Default for ReflexionConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            attempt_max_iterations: default_max_iterations(),
        }
    }
}

impl OrchestratorConfig {
    /// Load configuration from the default path (~/.taskweave/config.toml).
    ///
    /// Environment overrides (highest priority):
    /// - `TASKWEAVE_MAX_ITERATIONS`
    /// - `TASKWEAVE_CONCURRENCY`
    /// - `TASKWEAVE_MAX_ATTEMPTS`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".taskweave")
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply integer overrides looked up by environment variable name.
    fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        let env_usize = |key: &str| parse_override(key, lookup(key));
        if let Some(v) = env_usize("TASKWEAVE_MAX_ITERATIONS")? {
            self.iteration.max_iterations = v;
        }
        if let Some(v) = env_usize("TASKWEAVE_CONCURRENCY")? {
            self.scheduler.concurrency = v;
        }
        if let Some(v) = env_usize("TASKWEAVE_MAX_ATTEMPTS")? {
            self.reflexion.max_attempts = v;
        }
        Ok(())
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let budgets = [
            ("iteration.max_iterations", self.iteration.max_iterations),
            ("scheduler.concurrency", self.scheduler.concurrency),
            ("scheduler.task_max_iterations", self.scheduler.task_max_iterations),
            ("reflexion.max_attempts", self.reflexion.max_attempts),
            (
                "reflexion.attempt_max_iterations",
                self.reflexion.attempt_max_iterations,
            ),
        ];
        for (name, value) in budgets {
            if value == 0 {
                return Err(ConfigError::ValidationError(format!("{name} must be >= 1")));
            }
        }

        let timeouts = [
            ("iteration.oracle_timeout_secs", self.iteration.oracle_timeout_secs),
            ("iteration.tool_timeout_secs", self.iteration.tool_timeout_secs),
            ("scheduler.task_timeout_secs", self.scheduler.task_timeout_secs),
        ];
        for (name, value) in timeouts {
            if value == 0 {
                return Err(ConfigError::ValidationError(format!(
                    "{name} must be at least 1 second"
                )));
            }
        }

        Ok(())
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }
}

fn parse_override(key: &str, raw: Option<String>) -> Result<Option<usize>, ConfigError> {
    match raw {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::ValidationError(format!("{key} must be an integer, got '{raw}'"))),
        None => Ok(None),
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_is_valid() {
        let config = OrchestratorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.scheduler.concurrency, 4);
        assert_eq!(config.reflexion.max_attempts, 3);
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = OrchestratorConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: OrchestratorConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn zero_budget_rejected() {
        let mut config = OrchestratorConfig::default();
        config.iteration.max_iterations = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("iteration.max_iterations"));
    }

    #[test]
    fn zero_timeout_rejected() {
        let mut config = OrchestratorConfig::default();
        config.iteration.tool_timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let config = OrchestratorConfig::load_from(Path::new("/nonexistent/config.toml")).unwrap();
        assert_eq!(config, OrchestratorConfig::default());
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[scheduler]\nconcurrency = 2\n").unwrap();

        let config = OrchestratorConfig::load_from(file.path()).unwrap();
        assert_eq!(config.scheduler.concurrency, 2);
        assert_eq!(config.scheduler.task_max_iterations, 5);
        assert_eq!(config.iteration.max_iterations, 10);
    }

    #[test]
    fn invalid_file_reports_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[scheduler\nconcurrency = ").unwrap();

        let err = OrchestratorConfig::load_from(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn invalid_values_in_file_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[reflexion]\nmax_attempts = 0\n").unwrap();

        let err = OrchestratorConfig::load_from(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    fn overrides(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: std::collections::HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn env_overrides_replace_file_values() {
        let mut config = OrchestratorConfig::default();
        config
            .apply_overrides(overrides(&[
                ("TASKWEAVE_CONCURRENCY", " 8 "),
                ("TASKWEAVE_MAX_ATTEMPTS", "5"),
            ]))
            .unwrap();

        assert_eq!(config.scheduler.concurrency, 8);
        assert_eq!(config.reflexion.max_attempts, 5);
        assert_eq!(config.iteration.max_iterations, 10);
    }

    #[test]
    fn non_integer_env_override_rejected() {
        let mut config = OrchestratorConfig::default();
        let err = config
            .apply_overrides(overrides(&[("TASKWEAVE_MAX_ITERATIONS", "lots")]))
            .unwrap_err();

        assert!(matches!(err, ConfigError::ValidationError(_)));
        assert!(err.to_string().contains("TASKWEAVE_MAX_ITERATIONS"));
        assert_eq!(config.iteration.max_iterations, 10);
    }

    #[test]
    fn default_toml_generation() {
        let toml_str = OrchestratorConfig::default_toml();
        assert!(toml_str.contains("[scheduler]"));
        assert!(toml_str.contains("concurrency = 4"));
    }
}
