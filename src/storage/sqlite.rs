//! SQLite-backed index store.

use std::path::Path;
use std::time::Duration;

use rusqlite::{Connection, OpenFlags, OptionalExtension, Row, TransactionBehavior, params};
use tokio_util::sync::CancellationToken;

use super::{DEFAULT_INSERT_BATCH_SIZE, SymbolQuery};
use crate::error::{IndexError, IndexResult};
use crate::types::{CommitId, Symbol};

const INSERT_SYMBOL: &str = "INSERT INTO symbols (
    name, namelowercase, path, pathlastcomponentlowercase,
    line, kind, language, parent, parentkind, signature
) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)";

const SELECT_SYMBOL: &str =
    "SELECT name, path, line, kind, language, parent, parentkind, signature FROM symbols";

/// Operations on one open index file.
///
/// Borrows the connection (or the transaction, which derefs to one), so every
/// write made through it belongs to whatever transaction the caller opened.
pub struct SqliteStore<'c> {
    conn: &'c Connection,
    batch_size: usize,
}

impl<'c> SqliteStore<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self {
            conn,
            batch_size: DEFAULT_INSERT_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn create_meta_table(&self) -> IndexResult<()> {
        self.conn
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS meta (
                    id INTEGER PRIMARY KEY CHECK (id = 0),
                    revision TEXT NOT NULL
                );",
            )
            .map_err(|e| IndexError::store("create meta table", e))
    }

    pub fn create_symbols_table(&self) -> IndexResult<()> {
        self.conn
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS symbols (
                    name TEXT NOT NULL,
                    namelowercase TEXT NOT NULL,
                    path TEXT NOT NULL,
                    pathlastcomponentlowercase TEXT NOT NULL,
                    line INTEGER NOT NULL,
                    kind TEXT NOT NULL,
                    language TEXT NOT NULL,
                    parent TEXT,
                    parentkind TEXT,
                    signature TEXT
                );",
            )
            .map_err(|e| IndexError::store("create symbols table", e))
    }

    /// Created after the bulk insert on full builds; cheaper than maintaining
    /// them row by row.
    pub fn create_symbol_indexes(&self) -> IndexResult<()> {
        self.conn
            .execute_batch(
                "CREATE INDEX IF NOT EXISTS idx_symbols_name ON symbols(name);
                 CREATE INDEX IF NOT EXISTS idx_symbols_namelowercase ON symbols(namelowercase);
                 CREATE INDEX IF NOT EXISTS idx_symbols_path ON symbols(path);
                 CREATE INDEX IF NOT EXISTS idx_symbols_pathlastcomponentlowercase
                     ON symbols(pathlastcomponentlowercase);",
            )
            .map_err(|e| IndexError::store("create symbol indexes", e))
    }

    pub fn insert_meta(&self, commit: &CommitId) -> IndexResult<()> {
        self.conn
            .execute(
                "INSERT INTO meta (id, revision) VALUES (0, ?1)",
                params![commit.as_str()],
            )
            .map(|_| ())
            .map_err(|e| IndexError::store("insert meta", e))
    }

    pub fn update_meta(&self, commit: &CommitId) -> IndexResult<()> {
        let updated = self
            .conn
            .execute(
                "UPDATE meta SET revision = ?1 WHERE id = 0",
                params![commit.as_str()],
            )
            .map_err(|e| IndexError::store("update meta", e))?;

        if updated == 0 {
            return Err(IndexError::store("update meta", "no meta row to update"));
        }
        Ok(())
    }

    /// The stamped commit, or `None` for an index that was never stamped.
    pub fn get_commit(&self) -> IndexResult<Option<CommitId>> {
        self.conn
            .query_row("SELECT revision FROM meta WHERE id = 0", [], |row| {
                row.get::<_, String>(0)
            })
            .optional()
            .map(|revision| revision.map(CommitId::new))
            .map_err(|e| IndexError::store("read meta", e))
    }

    /// Insert every symbol from `symbols`, stopping at the first error.
    ///
    /// Cancellation is checked once per batch. Returns the number of rows
    /// written.
    pub fn write_symbols(
        &self,
        symbols: impl IntoIterator<Item = IndexResult<Symbol>>,
        cancel: &CancellationToken,
    ) -> IndexResult<usize> {
        let mut statement = self
            .conn
            .prepare_cached(INSERT_SYMBOL)
            .map_err(|e| IndexError::store("prepare insert", e))?;

        let mut written = 0usize;
        for symbol in symbols {
            let symbol = symbol?;
            if written % self.batch_size == 0 && cancel.is_cancelled() {
                return Err(IndexError::Cancelled);
            }

            statement
                .execute(params![
                    symbol.name,
                    symbol.name.to_lowercase(),
                    symbol.path,
                    last_component(&symbol.path).to_lowercase(),
                    symbol.line,
                    symbol.kind,
                    symbol.language,
                    symbol.parent,
                    symbol.parent_kind,
                    symbol.signature,
                ])
                .map_err(|e| IndexError::store("insert symbol", e))?;
            written += 1;
        }

        Ok(written)
    }

    /// Drop every row belonging to `paths`. Returns the number of rows removed.
    pub fn delete_paths(&self, paths: &[String]) -> IndexResult<usize> {
        let mut statement = self
            .conn
            .prepare_cached("DELETE FROM symbols WHERE path = ?1")
            .map_err(|e| IndexError::store("prepare delete", e))?;

        let mut removed = 0;
        for path in paths {
            removed += statement
                .execute(params![path])
                .map_err(|e| IndexError::store("delete paths", e))?;
        }
        Ok(removed)
    }

    pub fn search(&self, query: &SymbolQuery) -> IndexResult<Vec<Symbol>> {
        let text = query.text.to_lowercase();
        let mut sql = String::from(SELECT_SYMBOL);
        let mut values = Vec::with_capacity(2);

        if query.exact {
            sql.push_str(" WHERE namelowercase = ?1");
            values.push(text);
        } else {
            sql.push_str(" WHERE namelowercase LIKE ?1 ESCAPE '\\'");
            values.push(format!("%{}%", escape_like(&text)));
        }
        if let Some(prefix) = &query.path_prefix {
            sql.push_str(" AND path LIKE ?2 ESCAPE '\\'");
            values.push(format!("{}%", escape_like(prefix)));
        }
        sql.push_str(&format!(" ORDER BY name, path, line LIMIT {}", query.limit));

        let mut statement = self
            .conn
            .prepare(&sql)
            .map_err(|e| IndexError::store("prepare search", e))?;
        let symbols = statement
            .query_map(rusqlite::params_from_iter(values.iter()), symbol_from_row)
            .and_then(|rows| rows.collect::<rusqlite::Result<Vec<_>>>())
            .map_err(|e| IndexError::store("search", e))?;
        Ok(symbols)
    }

    /// Every row, ordered. Meant for comparing whole indexes.
    pub fn all_symbols(&self) -> IndexResult<Vec<Symbol>> {
        let sql = format!("{SELECT_SYMBOL} ORDER BY path, line, name, kind");
        let mut statement = self
            .conn
            .prepare(&sql)
            .map_err(|e| IndexError::store("prepare scan", e))?;
        let symbols = statement
            .query_map([], symbol_from_row)
            .and_then(|rows| rows.collect::<rusqlite::Result<Vec<_>>>())
            .map_err(|e| IndexError::store("scan", e))?;
        Ok(symbols)
    }

    pub fn symbol_count(&self) -> IndexResult<u64> {
        self.conn
            .query_row("SELECT COUNT(*) FROM symbols", [], |row| row.get::<_, i64>(0))
            .map(|count| count as u64)
            .map_err(|e| IndexError::store("count symbols", e))
    }
}

fn symbol_from_row(row: &Row<'_>) -> rusqlite::Result<Symbol> {
    Ok(Symbol {
        name: row.get(0)?,
        path: row.get(1)?,
        line: row.get(2)?,
        kind: row.get(3)?,
        language: row.get(4)?,
        parent: row.get(5)?,
        parent_kind: row.get(6)?,
        signature: row.get(7)?,
    })
}

fn last_component(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn escape_like(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Run `f` against an existing index file opened read-only.
pub fn with_store<T>(
    path: &Path,
    f: impl FnOnce(&SqliteStore<'_>) -> IndexResult<T>,
) -> IndexResult<T> {
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .map_err(|e| IndexError::store("open read-only", e))?;

    f(&SqliteStore::new(&conn))
}

/// Run `f` inside one immediate transaction on the existing file at `path`.
///
/// The file is never created here: a caller whose destination was removed
/// gets a `Store` error instead of resurrecting it.
///
/// The transaction commits only when `f` succeeds and `cancel` has not fired;
/// in every other case it is rolled back.
pub fn with_store_transaction<T>(
    path: &Path,
    cancel: &CancellationToken,
    batch_size: usize,
    f: impl FnOnce(&SqliteStore<'_>) -> IndexResult<T>,
) -> IndexResult<T> {
    if cancel.is_cancelled() {
        return Err(IndexError::Cancelled);
    }

    let mut conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .map_err(|e| IndexError::store("open", e))?;
    conn.busy_timeout(Duration::from_secs(10))
        .map_err(|e| IndexError::store("set busy timeout", e))?;

    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(|e| IndexError::store("begin transaction", e))?;

    let result = f(&SqliteStore::new(&tx).with_batch_size(batch_size))?;

    if cancel.is_cancelled() {
        return Err(IndexError::Cancelled);
    }
    tx.commit()
        .map_err(|e| IndexError::store("commit transaction", e))?;

    Ok(result)
}
