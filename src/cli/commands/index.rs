//! Index command - build or reuse the index of one commit.

use tokio_util::sync::CancellationToken;

use crate::cli::CommitArgs;
use crate::config::Settings;

pub async fn run(commit: &CommitArgs, settings: &Settings, cancel: &CancellationToken) -> anyhow::Result<()> {
    let (cache, args) = super::open_cache(settings, commit).await?;

    let handle = cache.get_or_build_index(&args, cancel).await?;
    let symbols = handle.symbol_count()?;

    println!("{}@{}", args.repo, args.commit_id);
    println!("  index:   {}", handle.path().display());
    println!("  symbols: {symbols}");
    Ok(())
}
