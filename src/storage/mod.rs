//! Index file storage.
//!
//! One index is one SQLite file holding a single-row `meta` table (the stamped
//! commit) and a `symbols` table. All writes for a build happen inside one
//! immediate transaction, so a failed build leaves nothing behind in the file.

mod sqlite;

pub use sqlite::{SqliteStore, with_store, with_store_transaction};

use serde::{Deserialize, Serialize};

/// Default number of rows written between cancellation checks.
pub const DEFAULT_INSERT_BATCH_SIZE: usize = 500;

/// Symbol lookup against a built index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolQuery {
    /// Case-insensitive name to look for
    pub text: String,
    /// Match the whole name instead of a substring
    pub exact: bool,
    /// Restrict to paths starting with this prefix
    pub path_prefix: Option<String>,
    pub limit: usize,
}

impl SymbolQuery {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            exact: false,
            path_prefix: None,
            limit: 100,
        }
    }

    pub fn exact(mut self) -> Self {
        self.exact = true;
        self
    }

    pub fn in_path(mut self, prefix: impl Into<String>) -> Self {
        self.path_prefix = Some(prefix.into());
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }
}
