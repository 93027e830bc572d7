pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod indexing;
pub mod logging;
pub mod parsing;
pub mod scm;
pub mod storage;
pub mod types;

pub use cache::{CacheKey, DiskCache, IndexHandle, SCHEMA_VERSION};
pub use config::Settings;
pub use error::{IndexError, IndexResult};
pub use fetcher::{ArchiveStreamer, FetchLimiter, ParseRequestStream};
pub use indexing::{BuildMode, BuildReport, IndexBuilder, IndexCache};
pub use parsing::{ArchiveParser, Parser, RegexExtractor, SymbolExtractor, SymbolStream};
pub use scm::{GitCliClient, MemorySourceControl, SourceControlClient};
pub use storage::SymbolQuery;
pub use types::{Changes, CommitId, ParseRequest, RepoName, SearchArgs, Symbol};
