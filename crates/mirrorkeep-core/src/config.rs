//! Configuration module for mirrorkeep.
//!
//! Provides the typed model of the JSON configuration file, loading (with
//! template bootstrapping when the file is missing), defaults for the
//! optional `settings` section, and settings validation.
//!
//! The include rules themselves are turned into a validated
//! [`Configuration`](crate::domain::rule::Configuration) by
//! [`Configuration::parse`](crate::domain::rule::Configuration::parse).

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::domain::errors::ConfigError;

/// File name looked up next to the executable.
pub const CONFIG_FILE_NAME: &str = "config.json";

/// Environment variable overriding the configuration location.
pub const CONFIG_PATH_ENV: &str = "MIRRORKEEP_CONFIG";

/// Skeleton written when no configuration file exists.
pub const CONFIG_TEMPLATE: &str = r#"{
    "includes" : [
        {
            "paths" : [""],
            "targetPath" : "",
            "excludes" : [""]
        },
        {
            "paths" : [""],
            "targetPath" : ""
        }
    ]
}
"#;

// ---------------------------------------------------------------------------
// File model
// ---------------------------------------------------------------------------

/// Top-level configuration file as written by the user.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Raw include rules; `None` when the key is absent.
    #[serde(default)]
    pub includes: Option<Vec<Option<RawInclude>>>,
    /// Runtime tunables.
    #[serde(default)]
    pub settings: Settings,
}

/// One include rule before path resolution and validation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawInclude {
    pub paths: Option<Vec<String>>,
    pub target_path: Option<String>,
    pub excludes: Option<Vec<String>>,
}

/// Runtime settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    /// Seconds between retry queue passes.
    pub retry_interval_secs: u64,
    /// Seconds between volume table samples.
    pub volume_poll_interval_secs: u64,
    /// Log level: `trace`, `debug`, `info`, `warn`, or `error`.
    pub log_level: String,
    /// Whether to register the daemon for start at login.
    pub autostart: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            retry_interval_secs: 60,
            volume_poll_interval_secs: 2,
            log_level: "info".to_string(),
            autostart: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

impl Config {
    /// Load configuration from the JSON file at `path`.
    ///
    /// When the file does not exist, [`CONFIG_TEMPLATE`] is written there and
    /// [`ConfigError::TemplateCreated`] is returned so the user can edit it
    /// before the next start.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            Self::write_template(path)?;
            return Err(ConfigError::TemplateCreated(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::io(path, e))?;
        Self::from_json(&content)
    }

    /// Parse configuration from a JSON string.
    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(content)?)
    }

    /// Write [`CONFIG_TEMPLATE`] to `path`, creating parent directories.
    pub fn write_template(path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::io(parent, e))?;
        }
        std::fs::write(path, CONFIG_TEMPLATE).map_err(|e| ConfigError::io(path, e))
    }

    /// Location of the configuration file.
    ///
    /// `$MIRRORKEEP_CONFIG` when set, otherwise `config.json` in the
    /// directory of the running executable.
    pub fn default_path() -> PathBuf {
        if let Some(path) = std::env::var_os(CONFIG_PATH_ENV).filter(|p| !p.is_empty()) {
            return PathBuf::from(path);
        }
        std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_path_buf))
            .unwrap_or_else(|| PathBuf::from("."))
            .join(CONFIG_FILE_NAME)
    }
}

// ---------------------------------------------------------------------------
// Settings validation
// ---------------------------------------------------------------------------

/// A single validation error found in the settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path to the offending field, e.g. `"settings.retryIntervalSecs"`.
    pub field: String,
    /// Human-readable explanation.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Valid values for `settings.logLevel`.
pub const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

impl Settings {
    /// Validate the settings and return all errors found.
    ///
    /// An empty vector means the settings are valid.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.retry_interval_secs == 0 {
            errors.push(ValidationError {
                field: "settings.retryIntervalSecs".into(),
                message: "must be greater than 0".into(),
            });
        }
        if self.volume_poll_interval_secs == 0 {
            errors.push(ValidationError {
                field: "settings.volumePollIntervalSecs".into(),
                message: "must be greater than 0".into(),
            });
        }
        if !VALID_LOG_LEVELS.contains(&self.log_level.as_str()) {
            errors.push(ValidationError {
                field: "settings.logLevel".into(),
                message: format!(
                    "invalid level '{}'; valid options: {}",
                    self.log_level,
                    VALID_LOG_LEVELS.join(", ")
                ),
            });
        }

        errors
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
