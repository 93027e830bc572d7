//! On-disk index cache with per-key build deduplication.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs::{self, File};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant, SystemTime};

use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;

use super::key::{TEMP_PREFIX, is_any_index_file};
use super::{CacheKey, IndexHandle};
use crate::error::{IndexError, IndexResult};

/// Temp files older than this are leftovers of a crashed process.
const STALE_TEMP_AGE: Duration = Duration::from_secs(60 * 60);

type InFlight = Arc<OnceCell<IndexResult<PathBuf>>>;

/// Outcome of one [`DiskCache::evict`] pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct EvictionStats {
    pub files: usize,
    pub removed: usize,
    pub bytes_before: u64,
    pub bytes_after: u64,
    pub stale_temps_removed: usize,
}

/// Index files under `<root>/<encoded repo>/<key file name>`.
pub struct DiskCache {
    root: PathBuf,
    inflight: Mutex<HashMap<CacheKey, InFlight>>,
}

impl DiskCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            inflight: Mutex::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, key: &CacheKey) -> PathBuf {
        key.path_in(&self.root)
    }

    /// Keys with a build currently registered.
    pub fn in_flight(&self) -> usize {
        self.inflight.lock().len()
    }

    /// Return a handle to the index for `key`, building it with `build` when it
    /// is not on disk yet.
    ///
    /// `build` receives a fresh file path and must leave a complete index there.
    /// Concurrent calls for the same key share one build and all observe its
    /// outcome, error included. A build whose caller is cancelled is awaited
    /// until it has cleaned up, then the next waiter starts over with its own
    /// `build`.
    pub async fn open_with_key<F, Fut>(
        &self,
        key: &CacheKey,
        cancel: &CancellationToken,
        build: F,
    ) -> IndexResult<IndexHandle>
    where
        F: FnOnce(PathBuf, CancellationToken) -> Fut,
        Fut: Future<Output = IndexResult<()>>,
    {
        if cancel.is_cancelled() {
            return Err(IndexError::Cancelled);
        }

        let final_path = self.path_for(key);
        if final_path.is_file() {
            crate::debug_event!("cache", "hit", "{key}");
            touch(&final_path);
            return IndexHandle::open(key.clone(), final_path);
        }

        let cell = {
            let mut inflight = self.inflight.lock();
            Arc::clone(inflight.entry(key.clone()).or_default())
        };

        let leading = AtomicBool::new(false);
        let init = cell.get_or_try_init(|| async {
            leading.store(true, Ordering::SeqCst);
            match self.fill(key, cancel, build).await {
                // Not shared: the next waiter retries with its own build.
                Err(IndexError::Cancelled) => Err(IndexError::Cancelled),
                other => Ok(other),
            }
        });
        tokio::pin!(init);

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            outcome = &mut init => Some(outcome.cloned()),
        };
        let outcome = match outcome {
            Some(outcome) => outcome,
            // Our own build sees the same token. Dropping it here would let
            // its blocking work recreate the temp file after cleanup, so wait
            // for it to unwind.
            None if leading.load(Ordering::SeqCst) => init.await.cloned(),
            None => Err(IndexError::Cancelled),
        };

        self.release(key, &cell);

        let path = outcome??;
        IndexHandle::open(key.clone(), path)
    }

    async fn fill<F, Fut>(
        &self,
        key: &CacheKey,
        cancel: &CancellationToken,
        build: F,
    ) -> IndexResult<PathBuf>
    where
        F: FnOnce(PathBuf, CancellationToken) -> Fut,
        Fut: Future<Output = IndexResult<()>>,
    {
        let final_path = self.path_for(key);
        // A previous holder of this key may have finished while we queued.
        if final_path.is_file() {
            touch(&final_path);
            return Ok(final_path);
        }

        let dir = final_path
            .parent()
            .ok_or_else(|| IndexError::Cache(format!("no parent for {}", final_path.display())))?;
        fs::create_dir_all(dir).map_err(|e| IndexError::io(dir, e))?;

        let temp = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .tempfile_in(dir)
            .map_err(|e| IndexError::io(dir, e))?
            .into_temp_path();

        crate::log_event!("cache", "building", "{key}");
        let started = Instant::now();

        // On any early return `temp` is dropped and the partial file removed.
        build(temp.to_path_buf(), cancel.clone()).await?;
        if cancel.is_cancelled() {
            return Err(IndexError::Cancelled);
        }

        temp.persist(&final_path)
            .map_err(|e| IndexError::io(&final_path, e.error))?;

        crate::log_event!(
            "cache",
            "promoted",
            "{key} in {:.2?} -> {}",
            started.elapsed(),
            final_path.display()
        );
        Ok(final_path)
    }

    /// Drop the registry entry once its build settled or nobody else waits on it.
    fn release(&self, key: &CacheKey, cell: &InFlight) {
        let mut inflight = self.inflight.lock();
        let remove = inflight.get(key).is_some_and(|current| {
            Arc::ptr_eq(current, cell) && (cell.initialized() || Arc::strong_count(cell) <= 2)
        });
        if remove {
            inflight.remove(key);
        }
    }

    /// Delete least recently used index files until the cache fits in `max_bytes`.
    ///
    /// Index files of every schema version count toward the budget. Temp files
    /// left behind by crashed builds are removed as well.
    pub fn evict(&self, max_bytes: u64) -> IndexResult<EvictionStats> {
        let mut stats = EvictionStats::default();
        let mut files = Vec::new();

        let repos = match fs::read_dir(&self.root) {
            Ok(repos) => repos,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(stats),
            Err(e) => return Err(IndexError::io(&self.root, e)),
        };

        for repo in repos {
            let repo = repo.map_err(|e| IndexError::io(&self.root, e))?;
            if !repo.file_type().is_ok_and(|t| t.is_dir()) {
                continue;
            }
            let repo_path = repo.path();
            let entries = fs::read_dir(&repo_path).map_err(|e| IndexError::io(&repo_path, e))?;

            for entry in entries {
                let entry = entry.map_err(|e| IndexError::io(&repo_path, e))?;
                let name = entry.file_name().to_string_lossy().into_owned();
                // Files may vanish under us; skip whatever cannot be inspected.
                let Ok(metadata) = entry.metadata() else {
                    continue;
                };
                let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);

                if name.starts_with(TEMP_PREFIX) {
                    let age = SystemTime::now()
                        .duration_since(modified)
                        .unwrap_or_default();
                    if age > STALE_TEMP_AGE && fs::remove_file(entry.path()).is_ok() {
                        stats.stale_temps_removed += 1;
                    }
                    continue;
                }
                if is_any_index_file(&name) && metadata.is_file() {
                    files.push((modified, metadata.len(), entry.path()));
                }
            }
        }

        stats.files = files.len();
        stats.bytes_before = files.iter().map(|(_, size, _)| size).sum();
        stats.bytes_after = stats.bytes_before;

        // Oldest first
        files.sort();
        for (_, size, path) in files {
            if stats.bytes_after <= max_bytes {
                break;
            }
            match fs::remove_file(&path) {
                Ok(()) => {
                    crate::debug_event!("cache", "evicted", "{}", path.display());
                    stats.removed += 1;
                    stats.bytes_after -= size;
                }
                Err(e) => tracing::warn!("[cache] failed to evict {}: {e}", path.display()),
            }
        }

        if stats.removed > 0 {
            crate::log_event!(
                "cache",
                "evicted",
                "{} files, {} -> {} bytes",
                stats.removed,
                stats.bytes_before,
                stats.bytes_after
            );
        }
        Ok(stats)
    }
}

/// Mark an index as recently used.
fn touch(path: &Path) {
    let result = File::options()
        .write(true)
        .open(path)
        .and_then(|file| file.set_modified(SystemTime::now()));
    if let Err(e) = result {
        tracing::debug!("[cache] could not touch {}: {e}", path.display());
    }
}
