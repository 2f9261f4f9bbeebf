//! Configuration error types

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    ValidationError(String),

    #[error("XDG directory error: {0}")]
    XdgError(String),

    #[error("Failed to render configuration as TOML: {0}")]
    SerializeError(#[from] toml::ser::Error),
}

#[derive(Debug, Error)]
pub enum TopologyError {
    #[error("Failed to read topology file at {path}: {source}")]
    ReadError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Topology line {line}: {reason}")]
    SyntaxError { line: usize, reason: String },

    #[error("No topology line for this node ({addr})")]
    NodeNotFound { addr: String },
}

impl TopologyError {
    pub(crate) fn syntax(line: usize, reason: impl Into<String>) -> Self {
        Self::SyntaxError {
            line,
            reason: reason.into(),
        }
    }
}
