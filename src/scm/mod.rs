//! Source-control collaborators.
//!
//! The build pipeline only needs two things from source control: a tar archive
//! of a commit (optionally restricted to some paths) and a path-level diff
//! between two commits. [`SourceControlClient`] is that seam.
//!
//! - [`GitCliClient`] drives a local `git` binary.
//! - [`MemorySourceControl`] keeps commits in memory and builds real tar
//!   archives on demand.

mod git;
mod memory;

pub use git::GitCliClient;
pub use memory::{MemoryEntry, MemorySourceControl};

use std::io::Read;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::types::{Changes, CommitId, RepoName};

/// Tar-format byte stream for one commit.
///
/// Read from a blocking context; the fetcher drives it on a blocking thread.
pub type ArchiveReader = Box<dyn Read + Send>;

#[derive(Error, Debug)]
pub enum ScmError {
    #[error("Repository not found: {0}")]
    RepoNotFound(String),

    #[error("Revision not found: {repo}@{commit}")]
    RevisionNotFound { repo: String, commit: String },

    #[error("`{command}` failed: {stderr}")]
    Command { command: String, stderr: String },

    #[error("Unexpected output from `{command}`: {details}")]
    Protocol { command: String, details: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Operation cancelled")]
    Cancelled,
}

#[async_trait]
pub trait SourceControlClient: Send + Sync {
    /// Open a tar archive of `commit`.
    ///
    /// `paths` of `None` means the whole tree; `Some` restricts the archive to
    /// the given repository-relative paths.
    async fn fetch_archive(
        &self,
        repo: &RepoName,
        commit: &CommitId,
        paths: Option<&[String]>,
        cancel: &CancellationToken,
    ) -> Result<ArchiveReader, ScmError>;

    /// Path-level diff from `old` to `new`. Renames are reported as a deletion
    /// of the old path plus an addition of the new one.
    async fn diff(
        &self,
        repo: &RepoName,
        old: &CommitId,
        new: &CommitId,
        cancel: &CancellationToken,
    ) -> Result<Changes, ScmError>;
}
