//! Full and incremental index builds.
//!
//! A build targets one destination file. When an earlier index of the same
//! repository exists and the diff to the target commit is small enough, the
//! earlier file is copied and patched; otherwise the index is built from the
//! whole tree.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::cache::{SCHEMA_VERSION, is_index_file, repo_dir};
use crate::error::{IndexError, IndexResult};
use crate::parsing::{Parser, SymbolStream};
use crate::scm::{ScmError, SourceControlClient};
use crate::storage::{DEFAULT_INSERT_BATCH_SIZE, with_store, with_store_transaction};
use crate::types::{Changes, CommitId, RepoName, SearchArgs};

/// Above this many touched paths an incremental build is not attempted.
///
/// The paths end up in the archive request, which must stay within what the
/// source-control backend accepts.
pub const MAX_TOTAL_PATHS: usize = 999;

/// Above this summed path length (bytes) an incremental build is not attempted.
pub const MAX_TOTAL_PATHS_LENGTH: usize = 100_000;

const COPY_CHUNK_SIZE: usize = 64 * 1024;

/// How an index was produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildMode {
    Full,
    Incremental {
        /// Commit stamped in the index that was copied forward
        base: CommitId,
        touched_paths: usize,
    },
}

#[derive(Debug, Clone)]
pub struct BuildReport {
    pub mode: BuildMode,
    pub symbols_written: usize,
    pub rows_deleted: usize,
    pub elapsed: Duration,
}

/// True when a diff is too large to apply incrementally.
pub fn exceeds_incremental_limits(changes: &Changes) -> bool {
    let touched = changes.all_touched();
    let total_length: usize = touched.iter().map(String::len).sum();
    touched.len() > MAX_TOTAL_PATHS || total_length > MAX_TOTAL_PATHS_LENGTH
}

/// Writes index files. Knows where earlier indexes live, but nothing about
/// cache keys or promotion.
pub struct IndexBuilder {
    cache_root: PathBuf,
    scm: Arc<dyn SourceControlClient>,
    parser: Arc<dyn Parser>,
    insert_batch_size: usize,
}

impl IndexBuilder {
    pub fn new(
        cache_root: impl Into<PathBuf>,
        scm: Arc<dyn SourceControlClient>,
        parser: Arc<dyn Parser>,
    ) -> Self {
        Self {
            cache_root: cache_root.into(),
            scm,
            parser,
            insert_batch_size: DEFAULT_INSERT_BATCH_SIZE,
        }
    }

    pub fn with_insert_batch_size(mut self, size: usize) -> Self {
        self.insert_batch_size = size.max(1);
        self
    }

    /// Build the index for `args` into `dest`.
    ///
    /// On failure `dest` is removed. Background work started for this build is
    /// cancelled when this returns or is dropped.
    pub async fn build(
        &self,
        args: &SearchArgs,
        dest: &Path,
        cancel: &CancellationToken,
    ) -> IndexResult<BuildReport> {
        let cancel = cancel.child_token();
        let _stop_pipeline = cancel.clone().drop_guard();

        let span = tracing::info_span!("build", repo = %args.repo, commit = %args.commit_id);
        let result = self.run(args, dest, &cancel).instrument(span).await;

        if let Err(e) = &result {
            crate::debug_event!("builder", "failed", "{}@{}: {e}", args.repo, args.commit_id);
            if let Err(rm) = tokio::fs::remove_file(dest).await {
                if rm.kind() != std::io::ErrorKind::NotFound {
                    tracing::debug!("[builder] could not remove {}: {rm}", dest.display());
                }
            }
        }
        result
    }

    async fn run(
        &self,
        args: &SearchArgs,
        dest: &Path,
        cancel: &CancellationToken,
    ) -> IndexResult<BuildReport> {
        let started = Instant::now();

        if let Some(previous) = self.find_newest_index(&args.repo).await? {
            if let Some(base) = read_stamped_commit(&previous).await? {
                let changes = self.diff(args, &base, cancel).await?;

                if exceeds_incremental_limits(&changes) {
                    crate::log_event!(
                        "builder",
                        "diff too large, rebuilding from scratch",
                        "{} paths",
                        changes.all_touched().len()
                    );
                } else {
                    let report = self
                        .incremental(args, &previous, base, changes, dest, cancel)
                        .await?;
                    return Ok(finish(report, started));
                }
            } else {
                crate::debug_event!("builder", "previous index is unstamped", "{}", previous.display());
            }
        }

        let report = self.full(args, dest, cancel).await?;
        Ok(finish(report, started))
    }

    async fn diff(
        &self,
        args: &SearchArgs,
        base: &CommitId,
        cancel: &CancellationToken,
    ) -> IndexResult<Changes> {
        let diff = self.scm.diff(&args.repo, base, &args.commit_id, cancel);
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(IndexError::Cancelled),
            result = diff => result,
        };

        result.map_err(|e| match e {
            ScmError::Cancelled => IndexError::Cancelled,
            other => IndexError::DiffUnavailable {
                repo: args.repo.to_string(),
                old_commit: base.to_string(),
                new_commit: args.commit_id.to_string(),
                cause: other.to_string(),
            },
        })
    }

    async fn full(
        &self,
        args: &SearchArgs,
        dest: &Path,
        cancel: &CancellationToken,
    ) -> IndexResult<BuildReport> {
        crate::log_event!("builder", "full build", "{}@{}", args.repo, args.commit_id);

        // Start from an empty file whatever the caller left at `dest`.
        tokio::fs::File::create(dest)
            .await
            .map_err(|e| IndexError::io(dest, e))?;

        let mut symbols = self.parser.parse(args, None, cancel.clone())?;
        let commit = args.commit_id.clone();
        let dest = dest.to_path_buf();
        let cancel = cancel.clone();
        let batch_size = self.insert_batch_size;

        let symbols_written = run_blocking(move || {
            with_store_transaction(&dest, &cancel, batch_size, |store| {
                store.create_meta_table()?;
                store.create_symbols_table()?;
                store.insert_meta(&commit)?;
                let written = store.write_symbols(symbols.blocking_iter(), &cancel)?;
                store.create_symbol_indexes()?;
                Ok(written)
            })
        })
        .await?;

        Ok(BuildReport {
            mode: BuildMode::Full,
            symbols_written,
            rows_deleted: 0,
            elapsed: Duration::ZERO,
        })
    }

    async fn incremental(
        &self,
        args: &SearchArgs,
        previous: &Path,
        base: CommitId,
        changes: Changes,
        dest: &Path,
        cancel: &CancellationToken,
    ) -> IndexResult<BuildReport> {
        let touched = changes.all_touched();
        let added_or_modified = changes.added_or_modified();
        crate::log_event!(
            "builder",
            "incremental build",
            "{}@{} from {base}: {} added, {} modified, {} deleted",
            args.repo,
            args.commit_id,
            changes.added.len(),
            changes.modified.len(),
            changes.deleted.len()
        );

        copy_file(previous, dest, cancel).await?;

        // Nothing to parse for pure deletions; skip the archive request.
        let mut symbols = if added_or_modified.is_empty() {
            SymbolStream::empty()
        } else {
            self.parser.parse(args, Some(added_or_modified), cancel.clone())?
        };

        let commit = args.commit_id.clone();
        let touched_paths = touched.len();
        let dest = dest.to_path_buf();
        let cancel = cancel.clone();
        let batch_size = self.insert_batch_size;

        let (symbols_written, rows_deleted) = run_blocking(move || {
            with_store_transaction(&dest, &cancel, batch_size, |store| {
                store.update_meta(&commit)?;
                let deleted = store.delete_paths(&touched)?;
                let written = store.write_symbols(symbols.blocking_iter(), &cancel)?;
                Ok((written, deleted))
            })
        })
        .await?;

        Ok(BuildReport {
            mode: BuildMode::Incremental {
                base,
                touched_paths,
            },
            symbols_written,
            rows_deleted,
            elapsed: Duration::ZERO,
        })
    }

    /// Most recently modified finished index of `repo`, any commit.
    ///
    /// Only files of the current schema version qualify, so an index in an
    /// older format is never carried forward.
    pub async fn find_newest_index(&self, repo: &RepoName) -> IndexResult<Option<PathBuf>> {
        let dir = repo_dir(&self.cache_root, repo);
        run_blocking(move || newest_index_in(&dir)).await
    }
}

fn newest_index_in(dir: &Path) -> IndexResult<Option<PathBuf>> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(IndexError::io(dir, e)),
    };

    let mut newest: Option<(SystemTime, PathBuf)> = None;
    for entry in entries {
        let entry = entry.map_err(|e| IndexError::io(dir, e))?;
        let name = entry.file_name();
        if !is_index_file(&name.to_string_lossy(), SCHEMA_VERSION) {
            continue;
        }
        let Ok(metadata) = entry.metadata() else {
            continue;
        };
        if !metadata.is_file() {
            continue;
        }
        let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        if newest.as_ref().is_none_or(|(time, _)| modified > *time) {
            newest = Some((modified, entry.path()));
        }
    }

    Ok(newest.map(|(_, path)| path))
}

fn finish(mut report: BuildReport, started: Instant) -> BuildReport {
    report.elapsed = started.elapsed();
    crate::log_event!(
        "builder",
        "done",
        "{:?}: {} symbols written, {} rows deleted in {:.2?}",
        report.mode,
        report.symbols_written,
        report.rows_deleted,
        report.elapsed
    );
    report
}

async fn read_stamped_commit(path: &Path) -> IndexResult<Option<CommitId>> {
    let path = path.to_path_buf();
    run_blocking(move || with_store(&path, |store| store.get_commit())).await
}

async fn run_blocking<T, F>(f: F) -> IndexResult<T>
where
    F: FnOnce() -> IndexResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| IndexError::store("blocking task", e))?
}

/// Byte-for-byte copy that gives up as soon as `cancel` fires.
async fn copy_file(src: &Path, dest: &Path, cancel: &CancellationToken) -> IndexResult<u64> {
    let mut reader = tokio::fs::File::open(src)
        .await
        .map_err(|e| IndexError::io(src, e))?;
    let mut writer = tokio::fs::File::create(dest)
        .await
        .map_err(|e| IndexError::io(dest, e))?;

    let mut buffer = vec![0u8; COPY_CHUNK_SIZE];
    let mut copied = 0u64;
    loop {
        if cancel.is_cancelled() {
            return Err(IndexError::Cancelled);
        }
        let n = reader
            .read(&mut buffer)
            .await
            .map_err(|e| IndexError::io(src, e))?;
        if n == 0 {
            break;
        }
        writer
            .write_all(&buffer[..n])
            .await
            .map_err(|e| IndexError::io(dest, e))?;
        copied += n as u64;
    }

    writer.flush().await.map_err(|e| IndexError::io(dest, e))?;
    writer.sync_all().await.map_err(|e| IndexError::io(dest, e))?;
    Ok(copied)
}
