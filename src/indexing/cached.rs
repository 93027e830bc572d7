//! Cache-backed entry point: one ready index per (repository, commit).

use std::path::Path;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::IndexBuilder;
use crate::cache::{CacheKey, DiskCache, EvictionStats, IndexHandle};
use crate::config::Settings;
use crate::error::{IndexError, IndexResult};
use crate::fetcher::{ArchiveStreamer, FetchLimiter};
use crate::parsing::{ArchiveParser, Parser, RegexExtractor};
use crate::scm::SourceControlClient;
use crate::storage::SymbolQuery;
use crate::types::{SearchArgs, Symbol};

/// Returns a ready index for a commit, building it at most once per key no
/// matter how many callers ask concurrently.
pub struct IndexCache {
    builder: Arc<IndexBuilder>,
    cache: DiskCache,
}

impl IndexCache {
    pub fn new(
        cache: DiskCache,
        scm: Arc<dyn SourceControlClient>,
        parser: Arc<dyn Parser>,
    ) -> Self {
        let builder = IndexBuilder::new(cache.root(), scm, parser);
        Self::with_builder(cache, builder)
    }

    pub fn with_builder(cache: DiskCache, builder: IndexBuilder) -> Self {
        Self {
            builder: Arc::new(builder),
            cache,
        }
    }

    /// Wire the production pipeline from settings.
    ///
    /// All caches in the process share one fetch limiter, sized by the first
    /// caller.
    pub fn from_settings(settings: &Settings, scm: Arc<dyn SourceControlClient>) -> IndexResult<Self> {
        let limiter = FetchLimiter::shared(settings.fetch.max_concurrent_fetches);
        let streamer = ArchiveStreamer::new(Arc::clone(&scm), limiter)
            .with_channel_size(settings.fetch.request_channel_size);
        let extractor = RegexExtractor::new()
            .map_err(|e| IndexError::Config(format!("symbol rules failed to compile: {e}")))?;
        let parser = ArchiveParser::new(streamer, Arc::new(extractor))
            .with_channel_size(settings.pipeline.symbol_channel_size);

        let cache = DiskCache::new(&settings.cache.dir);
        let builder = IndexBuilder::new(cache.root(), scm, Arc::new(parser))
            .with_insert_batch_size(settings.pipeline.insert_batch_size);

        Ok(Self::with_builder(cache, builder))
    }

    pub fn root(&self) -> &Path {
        self.cache.root()
    }

    pub fn disk_cache(&self) -> &DiskCache {
        &self.cache
    }

    /// Handle to the index for `args`, building it if it does not exist yet.
    ///
    /// Cancelling `cancel` abandons this caller's wait. A build started on
    /// behalf of this caller stops and leaves nothing in the cache.
    pub async fn get_or_build_index(
        &self,
        args: &SearchArgs,
        cancel: &CancellationToken,
    ) -> IndexResult<IndexHandle> {
        let key = CacheKey::new(args.repo.clone(), args.commit_id.clone());
        let builder = Arc::clone(&self.builder);

        self.cache
            .open_with_key(&key, cancel, |dest, cancel| async move {
                builder.build(args, &dest, &cancel).await.map(|_| ())
            })
            .await
    }

    /// Search the index of `args`, building it first when needed.
    pub async fn search(
        &self,
        args: &SearchArgs,
        query: &SymbolQuery,
        cancel: &CancellationToken,
    ) -> IndexResult<Vec<Symbol>> {
        let handle = self.get_or_build_index(args, cancel).await?;
        let query = query.clone();

        tokio::task::spawn_blocking(move || handle.search(&query))
            .await
            .map_err(|e| IndexError::store("search task", e))?
    }

    /// Trim the cache down to `max_bytes`, least recently used first.
    pub fn evict(&self, max_bytes: u64) -> IndexResult<EvictionStats> {
        self.cache.evict(max_bytes)
    }
}
