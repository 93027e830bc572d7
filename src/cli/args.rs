//! CLI argument parsing using clap.

use clap::{
    Parser, Subcommand,
    builder::styling::{AnsiColor, Effects, Styles},
};
use std::path::PathBuf;

fn clap_cargo_style() -> Styles {
    Styles::styled()
        .header(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .usage(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .literal(AnsiColor::Green.on_default())
        .placeholder(AnsiColor::Green.on_default())
}

/// Per-commit symbol indexes
#[derive(Parser, Debug)]
#[command(
    name = "symdex",
    version = env!("CARGO_PKG_VERSION"),
    about = "Build and query per-commit symbol indexes",
    long_about = "Build symbol indexes for repository commits, reusing earlier indexes \
                  of the same repository when the diff is small.",
    next_line_help = true,
    styles = clap_cargo_style()
)]
pub struct Cli {
    /// Path to custom settings.toml file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Location of one commit.
#[derive(clap::Args, Debug, Clone)]
pub struct CommitArgs {
    /// Repository name, resolved as a directory under the repos dir
    #[arg(short, long)]
    pub repo: String,

    /// Commit to index (any revision git can resolve)
    #[arg(long, default_value = "HEAD")]
    pub commit: String,

    /// Directory holding the git repositories (overrides config)
    #[arg(long, env = "SYMDEX_REPOS_DIR")]
    pub repos_dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Write the default settings file
    #[command(about = "Set up .symdex directory with default configuration")]
    Init {
        /// Force overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Build (or reuse) the index of a commit
    #[command(
        about = "Build the symbol index of a commit",
        after_help = "Examples:\n  symdex index --repo myrepo --commit main\n  symdex index --repo github.com/org/repo --commit 3f2a9c1 --repos-dir /srv/git"
    )]
    Index {
        #[command(flatten)]
        commit: CommitArgs,
    },

    /// Search the index of a commit, building it first when needed
    #[command(
        about = "Search symbols of a commit",
        after_help = "Examples:\n  symdex search --repo myrepo parse\n  symdex search --repo myrepo --exact --path src/ Config"
    )]
    Search {
        #[command(flatten)]
        commit: CommitArgs,

        /// Symbol name (substring, case-insensitive)
        query: String,

        /// Match whole names only
        #[arg(long)]
        exact: bool,

        /// Only paths starting with this prefix
        #[arg(long)]
        path: Option<String>,

        /// Maximum number of results
        #[arg(short, long, default_value_t = 20)]
        limit: usize,

        /// Output JSON lines
        #[arg(long)]
        json: bool,
    },

    /// Trim the cache to its configured size
    #[command(about = "Remove least recently used indexes until the cache fits its budget")]
    Evict {
        /// Budget in megabytes (overrides cache.max_size_mb)
        #[arg(long)]
        max_size_mb: Option<u64>,
    },

    /// Show current configuration settings
    #[command(about = "Display active settings")]
    Config,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_search() {
        let cli = Cli::try_parse_from([
            "symdex", "search", "--repo", "r", "--commit", "abc", "--exact", "main",
        ])
        .unwrap();
        match cli.command {
            Commands::Search {
                commit,
                query,
                exact,
                limit,
                ..
            } => {
                assert_eq!(commit.repo, "r");
                assert_eq!(commit.commit, "abc");
                assert_eq!(query, "main");
                assert!(exact);
                assert_eq!(limit, 20);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_commit_defaults_to_head() {
        let cli = Cli::try_parse_from(["symdex", "index", "--repo", "r"]).unwrap();
        let Commands::Index { commit } = cli.command else {
            panic!("expected index");
        };
        assert_eq!(commit.commit, "HEAD");
    }
}
