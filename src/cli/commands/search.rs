//! Search command - query the symbols of one commit.

use tokio_util::sync::CancellationToken;

use crate::cli::CommitArgs;
use crate::config::Settings;
use crate::storage::SymbolQuery;
use crate::types::Symbol;

pub struct SearchOptions {
    pub query: String,
    pub exact: bool,
    pub path: Option<String>,
    pub limit: usize,
    pub json: bool,
}

pub async fn run(
    commit: &CommitArgs,
    options: SearchOptions,
    settings: &Settings,
    cancel: &CancellationToken,
) -> anyhow::Result<()> {
    let (cache, args) = super::open_cache(settings, commit).await?;

    let mut query = SymbolQuery::new(options.query).with_limit(options.limit);
    if options.exact {
        query = query.exact();
    }
    if let Some(prefix) = options.path {
        query = query.in_path(prefix);
    }

    let symbols = cache.search(&args, &query, cancel).await?;

    if options.json {
        for symbol in &symbols {
            println!("{}", serde_json::to_string(symbol)?);
        }
        return Ok(());
    }

    if symbols.is_empty() {
        eprintln!("No symbols matching '{}'", query.text);
        return Ok(());
    }
    for symbol in &symbols {
        println!("{}", format_symbol(symbol));
    }
    Ok(())
}

fn format_symbol(symbol: &Symbol) -> String {
    let mut line = format!("{}:{}  {} {}", symbol.path, symbol.line, symbol.kind, symbol.name);
    if let Some(parent) = &symbol.parent {
        line.push_str(&format!("  (in {parent})"));
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_symbol() {
        let symbol = Symbol::new("run", "src/main.rs", 12, "method", "rust").with_parent("App", "struct");
        assert_eq!(format_symbol(&symbol), "src/main.rs:12  method run  (in App)");

        let symbol = Symbol::new("main", "main.go", 3, "function", "go");
        assert_eq!(format_symbol(&symbol), "main.go:3  function main");
    }
}
