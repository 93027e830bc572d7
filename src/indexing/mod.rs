//! Index builds and the cache-backed entry point.
//!
//! ```text
//! IndexCache ──► DiskCache (dedupe, promote)
//!     │
//!     └──► IndexBuilder ──► diff? ──► copy + patch   (incremental)
//!                       └──────────► create + fill  (full)
//!                              ▲
//!            Parser ◄── ArchiveStreamer ◄── SourceControlClient
//! ```

mod builder;
mod cached;

pub use builder::{
    BuildMode, BuildReport, IndexBuilder, MAX_TOTAL_PATHS, MAX_TOTAL_PATHS_LENGTH,
    exceeds_incremental_limits,
};
pub use cached::IndexCache;
