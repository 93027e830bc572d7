use clap::Parser;
use tokio_util::sync::CancellationToken;

use symdex::Settings;
use symdex::cli::commands::{evict, index, init, search};
use symdex::cli::{Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let settings = match &cli.config {
        Some(path) => Settings::load_from(path),
        None => Settings::load(),
    }
    .unwrap_or_else(|e| {
        eprintln!("Configuration error: {e}");
        Settings::default()
    });

    symdex::logging::init_with_config(&settings.logging);

    // Ctrl-C cancels whatever build is running; partial files are discarded.
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("Interrupted, cancelling...");
                cancel.cancel();
            }
        });
    }

    match cli.command {
        Commands::Init { force } => init::run_init(force),
        Commands::Config => init::run_config(&settings),
        Commands::Index { commit } => index::run(&commit, &settings, &cancel).await,
        Commands::Search {
            commit,
            query,
            exact,
            path,
            limit,
            json,
        } => {
            let options = search::SearchOptions {
                query,
                exact,
                path,
                limit,
                json,
            };
            search::run(&commit, options, &settings, &cancel).await
        }
        Commands::Evict { max_size_mb } => evict::run(max_size_mb, &settings),
    }
}
