//! Core error types for sshbatch-core

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while loading a command list
#[derive(Error, Debug)]
pub enum LoadError {
    /// Command file does not exist
    #[error("command file not found: {}", .0.display())]
    NotFound(PathBuf),

    /// Command file exists but could not be read
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Not valid JSON
    #[error("JSON parse error: {message}")]
    ParseError {
        line: usize,
        column: usize,
        message: String,
    },

    /// Valid JSON with the wrong shape
    #[error("invalid command list: {0}")]
    FormatError(String),
}

impl From<serde_json::Error> for LoadError {
    fn from(err: serde_json::Error) -> Self {
        LoadError::ParseError {
            line: err.line(),
            column: err.column(),
            message: err.to_string(),
        }
    }
}

/// Errors from the persisted connection settings store
#[derive(Error, Debug)]
pub enum SettingsError {
    /// No per-user configuration directory on this platform
    #[error("no configuration directory available")]
    NoConfigDir,

    /// Filesystem failure
    #[error("settings I/O error for {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Serialization failure
    #[error("settings serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}
