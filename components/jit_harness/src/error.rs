//! Harness-level errors.
//!
//! These abort a batch before any test runs. Problems local to one test are
//! never raised here; they become that test's classification instead.

use std::path::PathBuf;
use thiserror::Error;

/// Fatal harness error
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("capability environment unavailable: {0}")]
    Capabilities(String),

    #[error("invalid capability report {}: {source}", path.display())]
    InvalidCapabilities {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid filter `{pattern}`: {reason}")]
    InvalidFilter { pattern: String, reason: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl HarnessError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        HarnessError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Result alias for fatal harness errors
pub type HarnessResult<T> = Result<T, HarnessError>;
