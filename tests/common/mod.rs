//! Shared fixtures for the integration tests.
#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio_util::sync::CancellationToken;

use symdex::cache::DiskCache;
use symdex::error::IndexResult;
use symdex::fetcher::{ArchiveStreamer, FetchLimiter};
use symdex::indexing::{IndexBuilder, IndexCache};
use symdex::parsing::{ArchiveParser, Parser, RegexExtractor, SymbolStream};
use symdex::scm::{MemoryEntry, MemorySourceControl};
use symdex::types::{SearchArgs, Symbol};

pub const REPO: &str = "github.com/acme/widgets";

/// Counts `parse` calls before delegating.
pub struct CountingParser {
    inner: Arc<dyn Parser>,
    calls: AtomicUsize,
}

impl CountingParser {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Parser for CountingParser {
    fn parse(
        &self,
        args: &SearchArgs,
        paths: Option<Vec<String>>,
        cancel: CancellationToken,
    ) -> IndexResult<SymbolStream> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.parse(args, paths, cancel)
    }
}

pub struct Fixture {
    pub scm: Arc<MemorySourceControl>,
    pub parser: Arc<CountingParser>,
    pub cache: IndexCache,
    pub root: tempfile::TempDir,
    limiter: Arc<FetchLimiter>,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_scm(Arc::new(MemorySourceControl::new()))
    }

    /// A fresh cache root over an existing source-control fixture.
    pub fn with_scm(scm: Arc<MemorySourceControl>) -> Self {
        let root = tempfile::TempDir::new().unwrap();
        let limiter = Arc::new(FetchLimiter::new(4));
        let streamer = ArchiveStreamer::new(scm.clone(), limiter.clone());
        let extractor = Arc::new(RegexExtractor::new().unwrap());
        let parser = Arc::new(CountingParser {
            inner: Arc::new(ArchiveParser::new(streamer, extractor)),
            calls: AtomicUsize::new(0),
        });

        let cache = DiskCache::new(root.path());
        let builder = IndexBuilder::new(root.path(), scm.clone(), parser.clone()).with_insert_batch_size(7);
        let cache = IndexCache::with_builder(cache, builder);

        Self {
            scm,
            parser,
            cache,
            root,
            limiter,
        }
    }

    /// The fetch limiter private to this fixture.
    pub fn limiter(&self) -> &FetchLimiter {
        &self.limiter
    }

    pub fn builder(&self) -> IndexBuilder {
        IndexBuilder::new(self.root.path(), self.scm.clone(), self.parser.clone())
    }

    pub async fn index(&self, commit: &str) -> IndexResult<symdex::IndexHandle> {
        self.cache
            .get_or_build_index(&SearchArgs::new(REPO, commit), &CancellationToken::new())
            .await
    }
}

pub fn all_symbols(handle: &symdex::IndexHandle) -> Vec<Symbol> {
    handle.with_store(|store| store.all_symbols()).unwrap()
}

pub fn rust_file(functions: &[&str]) -> MemoryEntry {
    let body: String = functions.iter().map(|f| format!("pub fn {f}() {{}}\n")).collect();
    MemoryEntry::text(body)
}

/// Base commit: a few source files in several languages plus noise the
/// archive filters must drop.
pub fn base_tree() -> Vec<(String, MemoryEntry)> {
    vec![
        ("src/lib.rs".to_string(), rust_file(&["alpha", "beta"])),
        ("src/util.rs".to_string(), rust_file(&["helper"])),
        (
            "cmd/server/main.go".to_string(),
            MemoryEntry::text("package main\n\nfunc main() {\n}\n"),
        ),
        (
            "scripts/tool.py".to_string(),
            MemoryEntry::text("def run():\n    pass\n\nclass Tool:\n    def go(self):\n        pass\n"),
        ),
        ("package.json".to_string(), MemoryEntry::text("{\"name\": \"widgets\"}")),
        ("assets/logo.bin".to_string(), MemoryEntry::File(vec![0u8, 1, 2, 3])),
        ("docs/empty.rs".to_string(), MemoryEntry::File(Vec::new())),
        ("src/link.rs".to_string(), MemoryEntry::Symlink("lib.rs".to_string())),
    ]
}
