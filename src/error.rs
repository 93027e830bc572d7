//! Error types for the index build pipeline.
//!
//! `IndexError` is `Clone` so a single failed build can be handed to every
//! caller that was waiting on the same cache key.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum IndexError {
    /// Archive retrieval or archive read failed. Not retried here.
    #[error("Fetch failed for {repo}@{commit}: {cause}")]
    Fetch {
        repo: String,
        commit: String,
        cause: String,
    },

    /// The diff between the stored commit and the target could not be computed.
    #[error("Diff unavailable for {repo} {old_commit}..{new_commit}: {cause}")]
    DiffUnavailable {
        repo: String,
        old_commit: String,
        new_commit: String,
        cause: String,
    },

    #[error("Parse error in {path}: {reason}")]
    Parse { path: String, reason: String },

    #[error("Store error during {operation}: {cause}")]
    Store {
        operation: &'static str,
        cause: String,
    },

    #[error("Build cancelled")]
    Cancelled,

    #[error("IO error on {path}: {cause}")]
    Io { path: PathBuf, cause: String },

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Channel closed unexpectedly: {0}")]
    ChannelClosed(&'static str),
}

impl IndexError {
    pub fn io(path: impl Into<PathBuf>, err: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            cause: err.to_string(),
        }
    }

    pub fn store(operation: &'static str, err: impl std::fmt::Display) -> Self {
        Self::Store {
            operation,
            cause: err.to_string(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

pub type IndexResult<T> = Result<T, IndexError>;
