//! Core value types shared by every stage of the index build.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Repository identifier as understood by the source-control client.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RepoName(Box<str>);

/// Commit identifier (full SHA or any revision the client resolves).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CommitId(Box<str>);

impl RepoName {
    pub fn new(name: impl Into<Box<str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl CommitId {
    pub fn new(commit: impl Into<Box<str>>) -> Self {
        Self(commit.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RepoName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for CommitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RepoName {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<&str> for CommitId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Identifies one build request: a repository at a commit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SearchArgs {
    pub repo: RepoName,
    pub commit_id: CommitId,
}

impl SearchArgs {
    pub fn new(repo: impl Into<RepoName>, commit_id: impl Into<CommitId>) -> Self {
        Self {
            repo: repo.into(),
            commit_id: commit_id.into(),
        }
    }
}

/// A file pulled out of the archive that passed every content filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseRequest {
    /// Path relative to the repository root, as recorded in the archive.
    pub path: String,
    pub data: Vec<u8>,
}

/// Path-level diff between two commits.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Changes {
    pub added: Vec<String>,
    pub modified: Vec<String>,
    pub deleted: Vec<String>,
}

impl Changes {
    /// Paths whose contents must be re-parsed.
    pub fn added_or_modified(&self) -> Vec<String> {
        self.added
            .iter()
            .chain(self.modified.iter())
            .cloned()
            .collect()
    }

    /// Paths whose existing rows must be dropped from the index.
    pub fn all_touched(&self) -> Vec<String> {
        self.added
            .iter()
            .chain(self.modified.iter())
            .chain(self.deleted.iter())
            .cloned()
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.deleted.is_empty()
    }
}

/// A symbol row as stored in the index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Symbol {
    pub name: String,
    pub path: String,
    /// 1-based line of the definition.
    pub line: u32,
    pub kind: String,
    pub language: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

impl Symbol {
    pub fn new(
        name: impl Into<String>,
        path: impl Into<String>,
        line: u32,
        kind: impl Into<String>,
        language: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            line,
            kind: kind.into(),
            language: language.into(),
            parent: None,
            parent_kind: None,
            signature: None,
        }
    }

    pub fn with_parent(mut self, parent: impl Into<String>, kind: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self.parent_kind = Some(kind.into());
        self
    }

    pub fn with_signature(mut self, signature: impl Into<String>) -> Self {
        self.signature = Some(signature.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_changes_partitions() {
        let changes = Changes {
            added: vec!["a.rs".to_string()],
            modified: vec!["b.rs".to_string()],
            deleted: vec!["c.rs".to_string()],
        };

        assert_eq!(changes.added_or_modified(), vec!["a.rs", "b.rs"]);
        assert_eq!(changes.all_touched(), vec!["a.rs", "b.rs", "c.rs"]);
        assert!(!changes.is_empty());
        assert!(Changes::default().is_empty());
    }

    #[test]
    fn test_search_args_from_str() {
        let args = SearchArgs::new("github.com/org/repo", "deadbeef");
        assert_eq!(args.repo.as_str(), "github.com/org/repo");
        assert_eq!(args.commit_id.to_string(), "deadbeef");
    }
}
