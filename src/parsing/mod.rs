//! Parse stage.
//!
//! [`Parser`] is the seam the builder depends on: commit in, symbols out.
//! [`ArchiveParser`] is the production implementation, feeding archive
//! contents from an [`ArchiveStreamer`](crate::fetcher::ArchiveStreamer)
//! through a synchronous [`SymbolExtractor`].

mod archive;
mod extractor;
mod language;

pub use archive::ArchiveParser;
pub use extractor::{RegexExtractor, SymbolExtractor};
pub use language::Language;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::IndexResult;
use crate::types::{SearchArgs, Symbol};

/// Produces the symbols of a commit, optionally restricted to some paths.
pub trait Parser: Send + Sync {
    /// Start parsing. Symbols arrive on the returned stream; a failure arrives
    /// as a single error element, after which the stream ends.
    fn parse(
        &self,
        args: &SearchArgs,
        paths: Option<Vec<String>>,
        cancel: CancellationToken,
    ) -> IndexResult<SymbolStream>;
}

/// Bounded stream of parse results.
pub struct SymbolStream {
    rx: mpsc::Receiver<IndexResult<Symbol>>,
}

impl SymbolStream {
    pub fn new(rx: mpsc::Receiver<IndexResult<Symbol>>) -> Self {
        Self { rx }
    }

    /// A stream that ends immediately.
    pub fn empty() -> Self {
        let (_, rx) = mpsc::channel(1);
        Self { rx }
    }

    pub async fn next(&mut self) -> Option<IndexResult<Symbol>> {
        self.rx.recv().await
    }

    pub fn blocking_next(&mut self) -> Option<IndexResult<Symbol>> {
        self.rx.blocking_recv()
    }

    /// Blocking iterator view, for feeding the store writer.
    pub fn blocking_iter(&mut self) -> impl Iterator<Item = IndexResult<Symbol>> + '_ {
        std::iter::from_fn(move || self.blocking_next())
    }

    /// Drain the stream, stopping at the first error.
    pub async fn collect_all(mut self) -> IndexResult<Vec<Symbol>> {
        let mut symbols = Vec::new();
        while let Some(item) = self.next().await {
            symbols.push(item?);
        }
        Ok(symbols)
    }
}
