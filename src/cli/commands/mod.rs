//! Command implementations for the CLI.

pub mod evict;
pub mod index;
pub mod init;
pub mod search;

use std::sync::Arc;

use anyhow::Context;

use crate::cli::CommitArgs;
use crate::config::Settings;
use crate::indexing::IndexCache;
use crate::scm::GitCliClient;
use crate::types::{RepoName, SearchArgs};

/// Index cache over the local git repositories, plus the resolved target commit.
pub(crate) async fn open_cache(
    settings: &Settings,
    commit: &CommitArgs,
) -> anyhow::Result<(IndexCache, SearchArgs)> {
    let repos_dir = commit
        .repos_dir
        .clone()
        .unwrap_or_else(|| settings.git.repos_dir.clone());
    let git = GitCliClient::new(repos_dir).with_binary(&settings.git.binary);

    let repo = RepoName::new(commit.repo.as_str());
    let commit_id = git
        .resolve_commit(&repo, &commit.commit)
        .await
        .with_context(|| format!("resolving {}@{}", commit.repo, commit.commit))?;

    let cache = IndexCache::from_settings(settings, Arc::new(git))
        .context("setting up the index pipeline")?;

    Ok((cache, SearchArgs::new(repo, commit_id)))
}
