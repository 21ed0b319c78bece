//! Configuration management
//!
//! Settings come from built-in defaults, then an optional YAML file, then
//! `PLINTH_*` environment variables.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Default config file looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "plinth.yaml";

/// Errors raised while loading configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    /// File could not be read
    #[error("Failed to read config '{path}': {source}")]
    Io {
        /// Config path.
        path: String,
        /// Underlying error.
        source: std::io::Error,
    },

    /// File is not valid YAML for [`Config`]
    #[error("Failed to parse config '{path}': {reason}")]
    Parse {
        /// Config path.
        path: String,
        /// Parser message.
        reason: String,
    },

    /// An environment override has an unusable value
    #[error("Invalid value '{value}' for {key}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// Rejected value.
        value: String,
    },
}

/// Application configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Log level
    pub log_level: String,
    /// Directory steps run in
    pub workspace: PathBuf,
    /// JSON-lines run log
    pub run_log: PathBuf,
    /// Shell used for `shell` steps
    pub shell: String,
    /// Timeout for steps that declare none
    pub default_timeout_secs: Option<u64>,
    /// Time between TERM and KILL when stopping a step
    pub kill_grace_ms: u64,
    /// Bytes captured per stream before truncation
    pub output_limit: usize,
    /// Optional YAML credential file
    pub credentials_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            workspace: PathBuf::from("."),
            run_log: PathBuf::from(".plinth/runs.jsonl"),
            shell: "sh".to_string(),
            default_timeout_secs: None,
            kill_grace_ms: 5_000,
            output_limit: 1024 * 1024,
            credentials_file: None,
        }
    }
}

impl Config {
    /// Loads configuration
    ///
    /// Reads `path` if given, else [`DEFAULT_CONFIG_FILE`] if it exists,
    /// then applies `PLINTH_*` overrides from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] for unreadable files or bad override values.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let default_path = Path::new(DEFAULT_CONFIG_FILE);
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None if default_path.is_file() => Self::from_file(default_path)?,
            None => Self::default(),
        };
        config.with_overrides(std::env::vars())
    }

    /// Reads a YAML config file; missing keys take defaults
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] or [`ConfigError::Parse`].
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        serde_yaml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
    }

    /// Applies `PLINTH_*` overrides from key/value pairs
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] for numbers that do not parse.
    pub fn with_overrides<I>(mut self, vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            let invalid = || ConfigError::InvalidValue {
                key: key.clone(),
                value: value.clone(),
            };
            match key.as_str() {
                "PLINTH_LOG_LEVEL" => self.log_level.clone_from(&value),
                "PLINTH_WORKSPACE" => self.workspace = PathBuf::from(&value),
                "PLINTH_RUN_LOG" => self.run_log = PathBuf::from(&value),
                "PLINTH_SHELL" => self.shell.clone_from(&value),
                "PLINTH_DEFAULT_TIMEOUT_SECS" => {
                    self.default_timeout_secs = Some(value.parse().map_err(|_| invalid())?);
                }
                "PLINTH_KILL_GRACE_MS" => {
                    self.kill_grace_ms = value.parse().map_err(|_| invalid())?;
                }
                "PLINTH_OUTPUT_LIMIT" => {
                    self.output_limit = value.parse().map_err(|_| invalid())?;
                }
                "PLINTH_CREDENTIALS_FILE" => self.credentials_file = Some(PathBuf::from(&value)),
                _ => {}
            }
        }
        Ok(self)
    }

    /// Default step timeout
    #[must_use]
    pub fn default_timeout(&self) -> Option<Duration> {
        self.default_timeout_secs.map(Duration::from_secs)
    }

    /// Grace period between TERM and KILL
    #[must_use]
    pub fn kill_grace(&self) -> Duration {
        Duration::from_millis(self.kill_grace_ms)
    }
}
