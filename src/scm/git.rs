//! Source control backed by a local `git` executable.

use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};
use std::process::{Child, ChildStdout, Command, Stdio};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::{ArchiveReader, ScmError, SourceControlClient};
use crate::types::{Changes, CommitId, RepoName};

/// Serves repositories found at `<repos_dir>/<repo name>`.
#[derive(Debug, Clone)]
pub struct GitCliClient {
    repos_dir: PathBuf,
    binary: String,
}

impl GitCliClient {
    pub fn new(repos_dir: impl Into<PathBuf>) -> Self {
        Self {
            repos_dir: repos_dir.into(),
            binary: "git".to_string(),
        }
    }

    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    /// Resolve a repository name to its working directory.
    ///
    /// Names may contain `/` (e.g. `github.com/org/repo`) but never `..`.
    fn repo_dir(&self, repo: &RepoName) -> Result<PathBuf, ScmError> {
        let relative = Path::new(repo.as_str());
        let safe = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        if !safe {
            return Err(ScmError::RepoNotFound(repo.to_string()));
        }

        let dir = self.repos_dir.join(relative);
        if !dir.is_dir() {
            return Err(ScmError::RepoNotFound(repo.to_string()));
        }
        Ok(dir)
    }

    /// Resolve any revision (`HEAD`, a branch, a short SHA) to a full commit id.
    ///
    /// Cache keys must name immutable commits, so callers resolve symbolic
    /// revisions before building.
    pub async fn resolve_commit(&self, repo: &RepoName, revision: &str) -> Result<CommitId, ScmError> {
        let dir = self.repo_dir(repo)?;

        let output = tokio::process::Command::new(&self.binary)
            .arg("-C")
            .arg(&dir)
            .args(["rev-parse", "--verify", "--quiet"])
            .arg(format!("{revision}^{{commit}}"))
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await?;

        if !output.status.success() {
            return Err(ScmError::RevisionNotFound {
                repo: repo.to_string(),
                commit: revision.to_string(),
            });
        }

        let sha = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if sha.is_empty() {
            return Err(ScmError::Protocol {
                command: "git rev-parse".to_string(),
                details: "empty output".to_string(),
            });
        }
        Ok(CommitId::new(sha))
    }
}

#[async_trait]
impl SourceControlClient for GitCliClient {
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
        let dir = self.repo_dir(repo)?;

        // Paths are file names, not patterns: `pages/[id].ts` must not also
        // match `pages/i.ts`.
        let mut command = Command::new(&self.binary);
        command
            .arg("--literal-pathspecs")
            .arg("-C")
            .arg(&dir)
            .args(["archive", "--format=tar", commit.as_str(), "--"]);
        if let Some(paths) = paths {
            command.args(paths);
        }

        let mut child = command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let stdout = child.stdout.take().ok_or_else(|| ScmError::Protocol {
            command: "git archive".to_string(),
            details: "stdout was not captured".to_string(),
        })?;

        tracing::debug!(
            "[git] archive {repo}@{commit} ({} paths)",
            paths.map_or(0, |p| p.len())
        );

        Ok(Box::new(ChildArchive {
            child: Some(child),
            stdout,
        }))
    }

    async fn diff(
        &self,
        repo: &RepoName,
        old: &CommitId,
        new: &CommitId,
        cancel: &CancellationToken,
    ) -> Result<Changes, ScmError> {
        let dir = self.repo_dir(repo)?;

        let output = tokio::process::Command::new(&self.binary)
            .arg("--literal-pathspecs")
            .arg("-C")
            .arg(&dir)
            .args([
                "diff",
                "--name-status",
                "--no-renames",
                "-z",
                old.as_str(),
                new.as_str(),
                "--",
            ])
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();

        let output = tokio::select! {
            output = output => output?,
            _ = cancel.cancelled() => return Err(ScmError::Cancelled),
        };

        if !output.status.success() {
            return Err(ScmError::Command {
                command: "git diff".to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        parse_name_status(&output.stdout)
    }
}

/// Parse `git diff --name-status -z` output: `STATUS\0PATH\0` repeated.
fn parse_name_status(output: &[u8]) -> Result<Changes, ScmError> {
    let mut changes = Changes::default();
    let mut fields = output
        .split(|b| *b == 0)
        .filter(|field| !field.is_empty());

    while let Some(status) = fields.next() {
        let path = fields.next().ok_or_else(|| ScmError::Protocol {
            command: "git diff".to_string(),
            details: "status without path".to_string(),
        })?;
        let path = String::from_utf8_lossy(path).into_owned();

        match status.first() {
            Some(b'A') => changes.added.push(path),
            Some(b'D') => changes.deleted.push(path),
            // Type changes (file <-> symlink) are content changes for our purposes.
            Some(b'M') | Some(b'T') => changes.modified.push(path),
            _ => {
                return Err(ScmError::Protocol {
                    command: "git diff".to_string(),
                    details: format!("unknown status {:?}", String::from_utf8_lossy(status)),
                });
            }
        }
    }

    Ok(changes)
}

/// Archive stream backed by a running `git archive`.
///
/// At EOF the child is reaped so a failed archive (bad revision, missing path)
/// surfaces as a read error instead of a silently short tar.
struct ChildArchive {
    child: Option<Child>,
    stdout: ChildStdout,
}

impl Read for ChildArchive {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.stdout.read(buf)?;
        if n == 0 && !buf.is_empty() {
            if let Some(mut child) = self.child.take() {
                let mut stderr = String::new();
                if let Some(mut pipe) = child.stderr.take() {
                    let _ = pipe.read_to_string(&mut stderr);
                }
                let status = child.wait()?;
                if !status.success() {
                    return Err(io::Error::other(format!(
                        "git archive exited with {status}: {}",
                        stderr.trim()
                    )));
                }
            }
        }
        Ok(n)
    }
}

impl Drop for ChildArchive {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_name_status() {
        let output = b"M\0src/lib.rs\0A\0src/new.rs\0D\0old.rs\0T\0link\0";
        let changes = parse_name_status(output).unwrap();

        assert_eq!(changes.modified, vec!["src/lib.rs", "link"]);
        assert_eq!(changes.added, vec!["src/new.rs"]);
        assert_eq!(changes.deleted, vec!["old.rs"]);
    }

    #[test]
    fn test_parse_name_status_empty() {
        let changes = parse_name_status(b"").unwrap();
        assert!(changes.is_empty());
    }

    #[test]
    fn test_parse_name_status_rejects_dangling_status() {
        let result = parse_name_status(b"M\0");
        assert!(matches!(result, Err(ScmError::Protocol { .. })));
    }

    #[test]
    fn test_repo_dir_rejects_traversal() {
        let temp = tempfile::TempDir::new().unwrap();
        let client = GitCliClient::new(temp.path());

        let result = client.repo_dir(&RepoName::new("../etc"));
        assert!(matches!(result, Err(ScmError::RepoNotFound(_))));

        let result = client.repo_dir(&RepoName::new("missing"));
        assert!(matches!(result, Err(ScmError::RepoNotFound(_))));

        std::fs::create_dir_all(temp.path().join("org/repo")).unwrap();
        assert!(client.repo_dir(&RepoName::new("org/repo")).is_ok());
    }
}
