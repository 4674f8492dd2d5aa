//! Configuration error types
//!
//! This module defines the error taxonomy raised while loading and parsing
//! the include/exclude rule configuration. Only [`ConfigError::PathNotFound`]
//! is non-fatal: it is reported for individual paths that are dropped while
//! the owning rule continues with the remainder.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while loading or parsing the configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Malformed or missing required configuration fields
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    /// A configured path does not exist (dropped, never fatal on its own)
    #[error("Can't find the path '{}'", .0.display())]
    PathNotFound(PathBuf),

    /// The configuration file was absent and a template was written in its place
    #[error(
        "Created configuration template at '{}'. Edit it and restart the application",
        .0.display()
    )]
    TemplateCreated(PathBuf),

    /// The configuration file could not be read or written
    #[error("I/O error at {}: {source}", path.display())]
    Io {
        /// The file being accessed
        path: PathBuf,
        /// The underlying OS error
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not valid JSON for the expected schema
    #[error("Malformed configuration: {0}")]
    Json(#[from] serde_json::Error),
}

impl ConfigError {
    /// Builds an [`ConfigError::Io`] for the given path
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Returns true if startup must halt on this error
    pub fn is_fatal(&self) -> bool {
        !matches!(self, ConfigError::PathNotFound(_))
    }
}
