//! Content-addressed cache of built index files.
//!
//! Each [`CacheKey`] (repository, commit, schema version) names exactly one
//! file. [`DiskCache::open_with_key`] makes sure at most one build per key runs
//! at a time, and that a file only appears under its final name once the build
//! that produced it succeeded.

mod disk;
mod handle;
mod key;

pub use disk::{DiskCache, EvictionStats};
pub use handle::IndexHandle;
pub use key::{CacheKey, SCHEMA_VERSION, encode_component, is_index_file, repo_dir};
