use parking_lot::Mutex;
use rusqlite::{Connection, OpenFlags};
use std::path::{Path, PathBuf};

use super::CacheKey;
use crate::error::{IndexError, IndexResult};
use crate::storage::{SqliteStore, SymbolQuery};
use crate::types::{CommitId, Symbol};

/// A ready index file, open for reading.
///
/// The connection is opened when the handle is created and closed when it is
/// dropped. While it is open the file contents stay readable even if eviction
/// unlinks the path.
pub struct IndexHandle {
    key: CacheKey,
    path: PathBuf,
    conn: Mutex<Connection>,
}

impl IndexHandle {
    pub(crate) fn open(key: CacheKey, path: PathBuf) -> IndexResult<Self> {
        let conn = Connection::open_with_flags(
            &path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| IndexError::store("open index", e))?;

        // Force the file open now rather than on first query.
        conn.query_row("SELECT COUNT(*) FROM meta", [], |_| Ok(()))
            .map_err(|e| IndexError::store("open index", e))?;

        Ok(Self {
            key,
            path,
            conn: Mutex::new(conn),
        })
    }

    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run read-only store operations against this index.
    pub fn with_store<T>(&self, f: impl FnOnce(&SqliteStore<'_>) -> IndexResult<T>) -> IndexResult<T> {
        let conn = self.conn.lock();
        f(&SqliteStore::new(&conn))
    }

    pub fn commit(&self) -> IndexResult<Option<CommitId>> {
        self.with_store(|store| store.get_commit())
    }

    pub fn symbol_count(&self) -> IndexResult<u64> {
        self.with_store(|store| store.symbol_count())
    }

    pub fn search(&self, query: &SymbolQuery) -> IndexResult<Vec<Symbol>> {
        self.with_store(|store| store.search(query))
    }
}

impl std::fmt::Debug for IndexHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexHandle")
            .field("key", &self.key)
            .field("path", &self.path)
            .finish()
    }
}
