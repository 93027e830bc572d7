//! In-memory source control.
//!
//! Commits are plain maps of path to entry. Archives are produced with the
//! `tar` crate, so readers see the same entry types (directories, symlinks,
//! regular files) a real `git archive` emits.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::io::{self, Cursor, Read};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tar::{EntryType, Header};
use tokio_util::sync::CancellationToken;

use super::{ArchiveReader, ScmError, SourceControlClient};
use crate::types::{Changes, CommitId, RepoName};

/// One tree entry of an in-memory commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemoryEntry {
    File(Vec<u8>),
    Symlink(String),
}

impl MemoryEntry {
    pub fn text(content: impl Into<String>) -> Self {
        Self::File(content.into().into_bytes())
    }
}

type Tree = BTreeMap<String, MemoryEntry>;

#[derive(Default)]
pub struct MemorySourceControl {
    commits: RwLock<HashMap<(RepoName, CommitId), Tree>>,
    fetches: AtomicUsize,
    diffs: AtomicUsize,
    fail_fetches: AtomicBool,
    fail_diffs: AtomicBool,
    read_delay: Mutex<Option<Duration>>,
    fetch_log: Mutex<Vec<Option<Vec<String>>>>,
}

impl MemorySourceControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a commit. Replaces any previous tree for the same id.
    pub fn add_commit<P>(
        &self,
        repo: &str,
        commit: &str,
        entries: impl IntoIterator<Item = (P, MemoryEntry)>,
    ) where
        P: Into<String>,
    {
        let tree: Tree = entries.into_iter().map(|(p, e)| (p.into(), e)).collect();
        self.commits
            .write()
            .insert((RepoName::new(repo), CommitId::new(commit)), tree);
    }

    /// Number of `fetch_archive` calls that produced an archive.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    /// Number of `diff` calls, successful or not.
    pub fn diff_count(&self) -> usize {
        self.diffs.load(Ordering::SeqCst)
    }

    /// Path filters of every archive fetch so far, in call order.
    pub fn fetch_log(&self) -> Vec<Option<Vec<String>>> {
        self.fetch_log.lock().clone()
    }

    pub fn set_fail_fetches(&self, fail: bool) {
        self.fail_fetches.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_diffs(&self, fail: bool) {
        self.fail_diffs.store(fail, Ordering::SeqCst);
    }

    /// Sleep before every read of produced archives, simulating a slow network.
    pub fn set_read_delay(&self, delay: Option<Duration>) {
        *self.read_delay.lock() = delay;
    }

    fn tree(&self, repo: &RepoName, commit: &CommitId) -> Result<Tree, ScmError> {
        self.commits
            .read()
            .get(&(repo.clone(), commit.clone()))
            .cloned()
            .ok_or_else(|| ScmError::RevisionNotFound {
                repo: repo.to_string(),
                commit: commit.to_string(),
            })
    }
}

/// Matches git pathspec semantics for plain paths: exact file or directory prefix.
fn selected(path: &str, filter: Option<&[String]>) -> bool {
    match filter {
        None => true,
        Some(paths) => paths.iter().any(|p| {
            path == p
                || path
                    .strip_prefix(p.as_str())
                    .is_some_and(|rest| rest.starts_with('/'))
        }),
    }
}

fn build_archive(tree: &Tree, filter: Option<&[String]>) -> io::Result<Vec<u8>> {
    let mut builder = tar::Builder::new(Vec::new());
    let mut dirs = BTreeSet::new();

    for (path, entry) in tree.iter().filter(|(p, _)| selected(p, filter)) {
        // Emit parent directories first, the way git archive does.
        let components: Vec<&str> = path.split('/').collect();
        let mut prefix = String::new();
        for component in &components[..components.len() - 1] {
            prefix.push_str(component);
            prefix.push('/');
            if dirs.insert(prefix.clone()) {
                let mut header = Header::new_gnu();
                header.set_entry_type(EntryType::Directory);
                header.set_mode(0o755);
                header.set_size(0);
                header.set_cksum();
                builder.append_data(&mut header, &prefix, io::empty())?;
            }
        }

        match entry {
            MemoryEntry::File(data) => {
                let mut header = Header::new_gnu();
                header.set_entry_type(EntryType::Regular);
                header.set_mode(0o644);
                header.set_size(data.len() as u64);
                header.set_cksum();
                builder.append_data(&mut header, path, data.as_slice())?;
            }
            MemoryEntry::Symlink(target) => {
                let mut header = Header::new_gnu();
                header.set_entry_type(EntryType::Symlink);
                header.set_mode(0o777);
                header.set_size(0);
                builder.append_link(&mut header, path, target)?;
            }
        }
    }

    builder.into_inner()
}

/// Archive reader that trickles data out with a delay per read.
struct SlowReader {
    inner: Cursor<Vec<u8>>,
    delay: Duration,
}

impl Read for SlowReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        std::thread::sleep(self.delay);
        let len = buf.len().min(4096);
        self.inner.read(&mut buf[..len])
    }
}

#[async_trait]
impl SourceControlClient for MemorySourceControl {
    async fn fetch_archive(
        &self,
        repo: &RepoName,
        commit: &CommitId,
        paths: Option<&[String]>,
        cancel: &CancellationToken,
    ) -> Result<ArchiveReader, ScmError> {
        if cancel.is_cancelled() {
            return Err(ScmError::Cancelled);
        }
        if self.fail_fetches.load(Ordering::SeqCst) {
            return Err(ScmError::Command {
                command: "archive".to_string(),
                stderr: "injected fetch failure".to_string(),
            });
        }

        let tree = self.tree(repo, commit)?;
        let archive = build_archive(&tree, paths)?;

        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.fetch_log.lock().push(paths.map(<[String]>::to_vec));

        let reader: ArchiveReader = match *self.read_delay.lock() {
            Some(delay) => Box::new(SlowReader {
                inner: Cursor::new(archive),
                delay,
            }),
            None => Box::new(Cursor::new(archive)),
        };
        Ok(reader)
    }

    async fn diff(
        &self,
        repo: &RepoName,
        old: &CommitId,
        new: &CommitId,
        cancel: &CancellationToken,
    ) -> Result<Changes, ScmError> {
        self.diffs.fetch_add(1, Ordering::SeqCst);
        if cancel.is_cancelled() {
            return Err(ScmError::Cancelled);
        }
        if self.fail_diffs.load(Ordering::SeqCst) {
            return Err(ScmError::Command {
                command: "diff".to_string(),
                stderr: "injected diff failure".to_string(),
            });
        }

        let old_tree = self.tree(repo, old)?;
        let new_tree = self.tree(repo, new)?;

        let mut changes = Changes::default();
        for (path, entry) in &new_tree {
            match old_tree.get(path) {
                None => changes.added.push(path.clone()),
                Some(previous) if previous != entry => changes.modified.push(path.clone()),
                Some(_) => {}
            }
        }
        for path in old_tree.keys() {
            if !new_tree.contains_key(path) {
                changes.deleted.push(path.clone());
            }
        }

        Ok(changes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry_names(archive: Vec<u8>) -> Vec<(String, EntryType)> {
        let mut reader = tar::Archive::new(Cursor::new(archive));
        reader
            .entries()
            .unwrap()
            .map(|e| {
                let e = e.unwrap();
                let name = e.path().unwrap().to_string_lossy().into_owned();
                (name.trim_end_matches('/').to_string(), e.header().entry_type())
            })
            .collect()
    }

    #[test]
    fn test_archive_contains_dirs_files_and_links() {
        let mut tree = Tree::new();
        tree.insert("src/lib.rs".to_string(), MemoryEntry::text("fn a() {}"));
        tree.insert("link".to_string(), MemoryEntry::Symlink("src/lib.rs".to_string()));

        let names = entry_names(build_archive(&tree, None).unwrap());
        assert_eq!(
            names,
            vec![
                ("link".to_string(), EntryType::Symlink),
                ("src".to_string(), EntryType::Directory),
                ("src/lib.rs".to_string(), EntryType::Regular),
            ]
        );
    }

    #[test]
    fn test_archive_path_filter() {
        let mut tree = Tree::new();
        tree.insert("src/a.rs".to_string(), MemoryEntry::text("a"));
        tree.insert("src/b.rs".to_string(), MemoryEntry::text("b"));
        tree.insert("srcx/c.rs".to_string(), MemoryEntry::text("c"));

        let filter = vec!["src/b.rs".to_string()];
        let names = entry_names(build_archive(&tree, Some(filter.as_slice())).unwrap());
        let files: Vec<_> = names
            .into_iter()
            .filter(|(_, t)| t.is_file())
            .map(|(n, _)| n)
            .collect();
        assert_eq!(files, vec!["src/b.rs"]);

        assert!(selected("src/a.rs", Some(&["src".to_string()][..])));
        assert!(!selected("srcx/c.rs", Some(&["src".to_string()][..])));
    }

    #[tokio::test]
    async fn test_diff_between_commits() {
        let scm = MemorySourceControl::new();
        scm.add_commit(
            "repo",
            "c1",
            [
                ("keep.rs", MemoryEntry::text("same")),
                ("edit.rs", MemoryEntry::text("old")),
                ("gone.rs", MemoryEntry::text("bye")),
            ],
        );
        scm.add_commit(
            "repo",
            "c2",
            [
                ("keep.rs", MemoryEntry::text("same")),
                ("edit.rs", MemoryEntry::text("new")),
                ("new.rs", MemoryEntry::text("hi")),
            ],
        );

        let cancel = CancellationToken::new();
        let changes = scm
            .diff(&"repo".into(), &"c1".into(), &"c2".into(), &cancel)
            .await
            .unwrap();

        assert_eq!(changes.added, vec!["new.rs"]);
        assert_eq!(changes.modified, vec!["edit.rs"]);
        assert_eq!(changes.deleted, vec!["gone.rs"]);
        assert_eq!(scm.diff_count(), 1);
    }

    #[tokio::test]
    async fn test_unknown_revision() {
        let scm = MemorySourceControl::new();
        let cancel = CancellationToken::new();
        let result = scm
            .fetch_archive(&"repo".into(), &"nope".into(), None, &cancel)
            .await;
        assert!(matches!(result, Err(ScmError::RevisionNotFound { .. })));
        assert_eq!(scm.fetch_count(), 0);
    }
}
