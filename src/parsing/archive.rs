//! Parser over archive contents.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{Parser, SymbolExtractor, SymbolStream};
use crate::error::{IndexError, IndexResult};
use crate::fetcher::ArchiveStreamer;
use crate::types::SearchArgs;

const DEFAULT_CHANNEL_SIZE: usize = 1024;

/// Fetches a commit through an [`ArchiveStreamer`] and runs every file
/// through a [`SymbolExtractor`] on a blocking thread.
#[derive(Clone)]
pub struct ArchiveParser {
    streamer: ArchiveStreamer,
    extractor: Arc<dyn SymbolExtractor>,
    channel_size: usize,
}

impl ArchiveParser {
    pub fn new(streamer: ArchiveStreamer, extractor: Arc<dyn SymbolExtractor>) -> Self {
        Self {
            streamer,
            extractor,
            channel_size: DEFAULT_CHANNEL_SIZE,
        }
    }

    /// Capacity of the queue between the parser and the store writer.
    pub fn with_channel_size(mut self, size: usize) -> Self {
        self.channel_size = size.max(1);
        self
    }

    pub fn streamer(&self) -> &ArchiveStreamer {
        &self.streamer
    }
}

impl Parser for ArchiveParser {
    fn parse(
        &self,
        args: &SearchArgs,
        paths: Option<Vec<String>>,
        cancel: CancellationToken,
    ) -> IndexResult<SymbolStream> {
        let mut requests = self.streamer.fetch(args, paths, cancel.clone());
        let (tx, rx) = mpsc::channel(self.channel_size);
        let extractor = Arc::clone(&self.extractor);
        let label = format!("{}@{}", args.repo, args.commit_id);

        tokio::task::spawn_blocking(move || {
            let mut files = 0usize;
            let mut symbols = 0usize;

            while let Some(item) = requests.blocking_next() {
                if cancel.is_cancelled() {
                    let _ = tx.blocking_send(Err(IndexError::Cancelled));
                    return;
                }

                let found = match item.and_then(|request| extractor.extract(&request)) {
                    Ok(found) => found,
                    Err(e) => {
                        let _ = tx.blocking_send(Err(e));
                        return;
                    }
                };

                files += 1;
                symbols += found.len();
                for symbol in found {
                    if tx.blocking_send(Ok(symbol)).is_err() {
                        // Writer gave up; dropping `requests` stops the fetch.
                        return;
                    }
                }
            }

            crate::debug_event!("parser", "parsed", "{label}: {files} files, {symbols} symbols");
        });

        Ok(SymbolStream::new(rx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::FetchLimiter;
    use crate::parsing::RegexExtractor;
    use crate::scm::{MemoryEntry, MemorySourceControl};
    use crate::types::{ParseRequest, Symbol};

    struct FailingExtractor;

    impl SymbolExtractor for FailingExtractor {
        fn extract(&self, request: &ParseRequest) -> IndexResult<Vec<Symbol>> {
            Err(IndexError::Parse {
                path: request.path.clone(),
                reason: "unsupported syntax".to_string(),
            })
        }
    }

    fn parser(extractor: Arc<dyn SymbolExtractor>) -> (Arc<MemorySourceControl>, ArchiveParser) {
        let scm = Arc::new(MemorySourceControl::new());
        scm.add_commit(
            "repo",
            "c1",
            [
                ("src/a.rs", MemoryEntry::text("pub fn alpha() {}\npub struct Beta;\n")),
                ("src/b.py", MemoryEntry::text("def gamma():\n    pass\n")),
                ("notes.txt", MemoryEntry::text("fn not_code() {}")),
            ],
        );
        let streamer = ArchiveStreamer::new(scm.clone(), Arc::new(FetchLimiter::new(2)));
        (scm, ArchiveParser::new(streamer, extractor).with_channel_size(4))
    }

    #[tokio::test]
    async fn test_parse_whole_commit() {
        let (_, parser) = parser(Arc::new(RegexExtractor::new().unwrap()));

        let mut symbols = parser
            .parse(&SearchArgs::new("repo", "c1"), None, CancellationToken::new())
            .unwrap()
            .collect_all()
            .await
            .unwrap();
        symbols.sort();

        let names: Vec<_> = symbols.iter().map(|s| (s.path.as_str(), s.name.as_str())).collect();
        assert_eq!(
            names,
            vec![("src/a.rs", "Beta"), ("src/a.rs", "alpha"), ("src/b.py", "gamma")]
        );
    }

    #[tokio::test]
    async fn test_parse_path_subset() {
        let (scm, parser) = parser(Arc::new(RegexExtractor::new().unwrap()));

        let symbols = parser
            .parse(
                &SearchArgs::new("repo", "c1"),
                Some(vec!["src/b.py".to_string()]),
                CancellationToken::new(),
            )
            .unwrap()
            .collect_all()
            .await
            .unwrap();

        assert_eq!(symbols.len(), 1);
        assert_eq!(symbols[0].name, "gamma");
        assert_eq!(scm.fetch_log(), vec![Some(vec!["src/b.py".to_string()])]);
    }

    #[tokio::test]
    async fn test_extractor_error_ends_stream() {
        let (_, parser) = parser(Arc::new(FailingExtractor));

        let mut stream = parser
            .parse(&SearchArgs::new("repo", "c1"), None, CancellationToken::new())
            .unwrap();

        assert!(matches!(stream.next().await, Some(Err(IndexError::Parse { .. }))));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_fetch_error_is_forwarded() {
        let (scm, parser) = parser(Arc::new(RegexExtractor::new().unwrap()));
        scm.set_fail_fetches(true);

        let result = parser
            .parse(&SearchArgs::new("repo", "c1"), None, CancellationToken::new())
            .unwrap()
            .collect_all()
            .await;
        assert!(matches!(result, Err(IndexError::Fetch { .. })));
    }

    #[tokio::test]
    async fn test_empty_stream() {
        let symbols = SymbolStream::empty().collect_all().await.unwrap();
        assert!(symbols.is_empty());
    }
}
