//! Cache keys and their on-disk names.

use sha2::{Digest, Sha256};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::types::{CommitId, RepoName};

/// Version of the index file format.
///
/// Part of every cache key. Bumping it makes every existing index unreachable;
/// old files stay on disk until evicted.
pub const SCHEMA_VERSION: u32 = 1;

/// Prefix of files that are still being built.
pub(crate) const TEMP_PREFIX: &str = ".tmp-";

/// Names one index file: a repository at a commit, in one schema version.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    repo: RepoName,
    commit: CommitId,
    schema_version: u32,
}

impl CacheKey {
    pub fn new(repo: RepoName, commit: CommitId) -> Self {
        Self::with_schema_version(repo, commit, SCHEMA_VERSION)
    }

    pub fn with_schema_version(repo: RepoName, commit: CommitId, schema_version: u32) -> Self {
        Self {
            repo,
            commit,
            schema_version,
        }
    }

    pub fn repo(&self) -> &RepoName {
        &self.repo
    }

    pub fn commit(&self) -> &CommitId {
        &self.commit
    }

    pub fn schema_version(&self) -> u32 {
        self.schema_version
    }

    /// `<sha256 of "{commit}-{schema}">.v{schema}.db`
    pub fn file_name(&self) -> String {
        let component = format!("{}-{}", self.commit, self.schema_version);
        let digest = Sha256::digest(component.as_bytes());
        let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
        format!("{hex}{}", index_suffix(self.schema_version))
    }

    /// Final location of this key's index under `root`.
    pub fn path_in(&self, root: &Path) -> PathBuf {
        repo_dir(root, &self.repo).join(self.file_name())
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{} (v{})", self.repo, self.commit, self.schema_version)
    }
}

fn index_suffix(schema_version: u32) -> String {
    format!(".v{schema_version}.db")
}

/// Directory holding every index of `repo`, whatever the commit.
pub fn repo_dir(root: &Path, repo: &RepoName) -> PathBuf {
    root.join(encode_component(repo.as_str()))
}

/// True for finished index files of the given schema version.
pub fn is_index_file(file_name: &str, schema_version: u32) -> bool {
    !file_name.starts_with(TEMP_PREFIX) && file_name.ends_with(&index_suffix(schema_version))
}

/// True for finished index files of any schema version.
pub(crate) fn is_any_index_file(file_name: &str) -> bool {
    if file_name.starts_with(TEMP_PREFIX) {
        return false;
    }
    let Some(stem) = file_name.strip_suffix(".db") else {
        return false;
    };
    stem.rsplit_once(".v")
        .is_some_and(|(_, version)| !version.is_empty() && version.bytes().all(|b| b.is_ascii_digit()))
}

/// Map any repository name to a single, safe directory name.
///
/// Alphanumerics, `-`, `_` and `.` pass through; everything else (including
/// `/`) is percent-encoded. Names made only of dots are fully encoded so they
/// can never mean the current or parent directory.
pub fn encode_component(name: &str) -> String {
    if name.is_empty() {
        return "%".to_string();
    }
    let only_dots = name.bytes().all(|b| b == b'.');

    let mut encoded = String::with_capacity(name.len());
    for byte in name.bytes() {
        let keep = byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_') || (byte == b'.' && !only_dots);
        if keep {
            encoded.push(byte as char);
        } else {
            encoded.push_str(&format!("%{byte:02X}"));
        }
    }
    encoded
}
