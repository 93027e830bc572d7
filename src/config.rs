//! Configuration module for the symbol index service.
//!
//! This module provides a layered configuration system that supports:
//! - Default values
//! - TOML configuration file
//! - Environment variable overrides
//!
//! # Environment Variables
//!
//! Environment variables must be prefixed with `SYMDEX_` and use double underscores
//! to separate nested levels:
//! - `SYMDEX_FETCH__MAX_CONCURRENT_FETCHES=4` sets `fetch.max_concurrent_fetches`
//! - `SYMDEX_CACHE__DIR=/var/cache/symdex` sets `cache.dir`
//! - `SYMDEX_LOGGING__DEFAULT=debug` sets `logging.default`
//!
//! Index format constants (schema version, incremental thresholds, file filters)
//! are deliberately not configurable; see [`crate::cache::SCHEMA_VERSION`],
//! [`crate::indexing::MAX_TOTAL_PATHS`] and [`crate::fetcher::MAX_FILE_SIZE`].

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::fetcher::DEFAULT_MAX_CONCURRENT_FETCHES;

const CONFIG_DIR: &str = ".symdex";
const CONFIG_FILE: &str = "settings.toml";

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    /// Version of the configuration schema
    #[serde(default = "default_version")]
    pub version: u32,

    /// On-disk index cache
    #[serde(default)]
    pub cache: CacheConfig,

    /// Archive fetching
    #[serde(default)]
    pub fetch: FetchConfig,

    /// Parse/insert pipeline sizing
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Local git repositories used by the CLI
    #[serde(default)]
    pub git: GitConfig,

    /// Log levels
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CacheConfig {
    /// Root directory of the index cache
    #[serde(default = "default_cache_dir")]
    pub dir: PathBuf,

    /// Size budget enforced by eviction, in megabytes
    #[serde(default = "default_max_size_mb")]
    pub max_size_mb: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct FetchConfig {
    /// Process-wide limit on simultaneous archive fetches
    #[serde(default = "default_max_concurrent_fetches")]
    pub max_concurrent_fetches: usize,

    /// Capacity of the queue between the archive reader and the parser
    #[serde(default = "default_request_channel_size")]
    pub request_channel_size: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PipelineConfig {
    /// Capacity of the queue between the parser and the store writer
    #[serde(default = "default_symbol_channel_size")]
    pub symbol_channel_size: usize,

    /// Rows written per prepared-statement batch
    #[serde(default = "default_insert_batch_size")]
    pub insert_batch_size: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct GitConfig {
    /// Directory holding one git repository per repo name
    #[serde(default = "default_repos_dir")]
    pub repos_dir: PathBuf,

    /// Git executable
    #[serde(default = "default_git_binary")]
    pub binary: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    /// Default level for all targets
    #[serde(default = "default_log_level")]
    pub default: String,

    /// Per-target overrides, e.g. `symdex::cache = "debug"`
    #[serde(default)]
    pub modules: HashMap<String, String>,
}

// Default value functions
fn default_version() -> u32 {
    1
}
fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .map(|dir| dir.join("symdex"))
        .unwrap_or_else(|| PathBuf::from(CONFIG_DIR).join("cache"))
}
fn default_max_size_mb() -> u64 {
    10_000
}
fn default_max_concurrent_fetches() -> usize {
    DEFAULT_MAX_CONCURRENT_FETCHES
}
fn default_request_channel_size() -> usize {
    64
}
fn default_symbol_channel_size() -> usize {
    1024
}
fn default_insert_batch_size() -> usize {
    500
}
fn default_repos_dir() -> PathBuf {
    PathBuf::from(".")
}
fn default_git_binary() -> String {
    "git".to_string()
}
fn default_log_level() -> String {
    "warn".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: default_version(),
            cache: CacheConfig::default(),
            fetch: FetchConfig::default(),
            pipeline: PipelineConfig::default(),
            git: GitConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: default_cache_dir(),
            max_size_mb: default_max_size_mb(),
        }
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_concurrent_fetches: default_max_concurrent_fetches(),
            request_channel_size: default_request_channel_size(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            symbol_channel_size: default_symbol_channel_size(),
            insert_batch_size: default_insert_batch_size(),
        }
    }
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            repos_dir: default_repos_dir(),
            binary: default_git_binary(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            default: default_log_level(),
            modules: HashMap::new(),
        }
    }
}

impl CacheConfig {
    pub fn max_size_bytes(&self) -> u64 {
        self.max_size_mb.saturating_mul(1024 * 1024)
    }
}

impl Settings {
    /// Load configuration from all sources
    pub fn load() -> Result<Self, Box<figment::Error>> {
        let config_path = Self::find_workspace_config()
            .unwrap_or_else(|| PathBuf::from(CONFIG_DIR).join(CONFIG_FILE));

        Self::figment(config_path).extract().map_err(Box::new)
    }

    /// Load configuration from a specific file (env overrides still apply)
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, Box<figment::Error>> {
        Self::figment(path.as_ref().to_path_buf())
            .extract()
            .map_err(Box::new)
    }

    fn figment(config_path: PathBuf) -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Settings::default()))
            .merge(Toml::file(config_path))
            // Double underscore separates nested levels, single underscore stays
            .merge(Env::prefixed("SYMDEX_").map(|key| {
                key.as_str().to_lowercase().replace("__", ".").into()
            }))
    }

    /// Find `.symdex/settings.toml`, searching from the current directory up to root
    fn find_workspace_config() -> Option<PathBuf> {
        let current = std::env::current_dir().ok()?;

        for ancestor in current.ancestors() {
            let config_dir = ancestor.join(CONFIG_DIR);
            if config_dir.is_dir() {
                return Some(config_dir.join(CONFIG_FILE));
            }
        }

        None
    }

    /// Save current configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), Box<dyn std::error::Error>> {
        let parent = path.as_ref().parent().ok_or("Invalid path")?;
        std::fs::create_dir_all(parent)?;

        let toml_string = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_string)?;

        Ok(())
    }

    /// Create a default settings file in the current directory
    pub fn init_config_file(force: bool) -> Result<PathBuf, Box<dyn std::error::Error>> {
        let config_path = PathBuf::from(CONFIG_DIR).join(CONFIG_FILE);

        if !force && config_path.exists() {
            return Err("Configuration file already exists. Use --force to overwrite".into());
        }

        Settings::default().save(&config_path)?;
        Ok(config_path)
    }
}
