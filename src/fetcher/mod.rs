//! Archive streaming stage.
//!
//! Turns a commit snapshot into a stream of [`ParseRequest`]s:
//!
//! 1. Wait for a ticket from the process-wide [`FetchLimiter`]
//! 2. Ask the source-control client for a tar archive
//! 3. Walk the archive on a blocking thread, filter entries, push survivors
//!    into a bounded channel
//!
//! The ticket is held until the archive has been read to the end, so the limit
//! bounds open archive streams, not just request starts.

mod archive;
mod limiter;

pub use archive::{
    ArchiveStats, BINARY_SNIFF_WINDOW, MAX_FILE_SIZE, READ_CHUNK_SIZE, ReadError, SkipReason,
    looks_binary, read_archive, should_parse,
};
pub use limiter::{DEFAULT_MAX_CONCURRENT_FETCHES, FetchLimiter, FetchTicket};

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{IndexError, IndexResult};
use crate::scm::{ScmError, SourceControlClient};
use crate::types::{ParseRequest, SearchArgs};

const DEFAULT_CHANNEL_SIZE: usize = 64;

/// Produces filtered archive contents for a commit.
#[derive(Clone)]
pub struct ArchiveStreamer {
    client: Arc<dyn SourceControlClient>,
    limiter: Arc<FetchLimiter>,
    channel_size: usize,
}

impl ArchiveStreamer {
    pub fn new(client: Arc<dyn SourceControlClient>, limiter: Arc<FetchLimiter>) -> Self {
        Self {
            client,
            limiter,
            channel_size: DEFAULT_CHANNEL_SIZE,
        }
    }

    /// Capacity of the queue between the archive reader and its consumer.
    pub fn with_channel_size(mut self, size: usize) -> Self {
        self.channel_size = size.max(1);
        self
    }

    pub fn client(&self) -> &Arc<dyn SourceControlClient> {
        &self.client
    }

    pub fn limiter(&self) -> &Arc<FetchLimiter> {
        &self.limiter
    }

    /// Start fetching `args.commit_id`, restricted to `paths` when given.
    ///
    /// Must be called from within a tokio runtime. The returned stream yields
    /// requests in archive order and ends either cleanly or with exactly one
    /// error element.
    pub fn fetch(
        &self,
        args: &SearchArgs,
        paths: Option<Vec<String>>,
        cancel: CancellationToken,
    ) -> ParseRequestStream {
        let (tx, rx) = mpsc::channel(self.channel_size);
        let client = Arc::clone(&self.client);
        let limiter = Arc::clone(&self.limiter);
        let args = args.clone();

        tokio::spawn(async move {
            let result = stream_archive(client, limiter, &args, paths, cancel, tx.clone()).await;
            match result {
                Ok(stats) => crate::debug_event!(
                    "fetcher",
                    "archive done",
                    "{}@{}: {} entries, {} emitted, {} skipped",
                    args.repo,
                    args.commit_id,
                    stats.entries,
                    stats.emitted,
                    stats.skipped
                ),
                Err(e) => {
                    crate::debug_event!("fetcher", "archive failed", "{}@{}: {e}", args.repo, args.commit_id);
                    // Receiver may already be gone; nothing left to tell.
                    let _ = tx.send(Err(e)).await;
                }
            }
        });

        ParseRequestStream { rx }
    }
}

async fn stream_archive(
    client: Arc<dyn SourceControlClient>,
    limiter: Arc<FetchLimiter>,
    args: &SearchArgs,
    paths: Option<Vec<String>>,
    cancel: CancellationToken,
    tx: mpsc::Sender<IndexResult<ParseRequest>>,
) -> IndexResult<ArchiveStats> {
    let ticket = limiter.acquire(&cancel).await?;

    crate::debug_event!(
        "fetcher",
        "fetching",
        "{}@{} ({})",
        args.repo,
        args.commit_id,
        paths
            .as_ref()
            .map_or_else(|| "full tree".to_string(), |p| format!("{} paths", p.len()))
    );

    let reader = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(IndexError::Cancelled),
        reader = client.fetch_archive(&args.repo, &args.commit_id, paths.as_deref(), &cancel) => {
            reader.map_err(|e| fetch_error(args, e))?
        }
    };

    let read_cancel = cancel.clone();
    let outcome = tokio::task::spawn_blocking(move || {
        // Released when the archive has been fully consumed or abandoned.
        let _ticket = ticket;
        read_archive(reader, &read_cancel, |request| {
            tx.blocking_send(Ok(request)).is_ok()
        })
    })
    .await
    .map_err(|e| IndexError::Fetch {
        repo: args.repo.to_string(),
        commit: args.commit_id.to_string(),
        cause: format!("archive reader panicked: {e}"),
    })?;

    match outcome {
        Ok(stats) => Ok(stats),
        Err(ReadError::Cancelled) => Err(IndexError::Cancelled),
        Err(ReadError::Io(e)) if cancel.is_cancelled() => {
            tracing::trace!("[fetcher] read error after cancellation: {e}");
            Err(IndexError::Cancelled)
        }
        Err(ReadError::Io(e)) => Err(IndexError::Fetch {
            repo: args.repo.to_string(),
            commit: args.commit_id.to_string(),
            cause: e.to_string(),
        }),
    }
}

fn fetch_error(args: &SearchArgs, err: ScmError) -> IndexError {
    match err {
        ScmError::Cancelled => IndexError::Cancelled,
        other => IndexError::Fetch {
            repo: args.repo.to_string(),
            commit: args.commit_id.to_string(),
            cause: other.to_string(),
        },
    }
}

/// Receiving end of [`ArchiveStreamer::fetch`].
pub struct ParseRequestStream {
    rx: mpsc::Receiver<IndexResult<ParseRequest>>,
}

impl ParseRequestStream {
    pub async fn next(&mut self) -> Option<IndexResult<ParseRequest>> {
        self.rx.recv().await
    }

    /// For consumers running on a blocking thread.
    pub fn blocking_next(&mut self) -> Option<IndexResult<ParseRequest>> {
        self.rx.blocking_recv()
    }

    /// Drain the stream, stopping at the first error.
    pub async fn collect_all(mut self) -> IndexResult<Vec<ParseRequest>> {
        let mut requests = Vec::new();
        while let Some(item) = self.next().await {
            requests.push(item?);
        }
        Ok(requests)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scm::{MemoryEntry, MemorySourceControl};
    use std::time::Duration;

    fn streamer(scm: Arc<MemorySourceControl>, slots: usize) -> ArchiveStreamer {
        ArchiveStreamer::new(scm, Arc::new(FetchLimiter::new(slots))).with_channel_size(2)
    }

    fn sample_repo() -> Arc<MemorySourceControl> {
        let scm = Arc::new(MemorySourceControl::new());
        scm.add_commit(
            "repo",
            "c1",
            [
                ("b.rs", MemoryEntry::text("fn b() {}")),
                ("a.rs", MemoryEntry::text("fn a() {}")),
                ("data.json", MemoryEntry::text("{}")),
                ("empty.rs", MemoryEntry::text("")),
                ("link.rs", MemoryEntry::Symlink("a.rs".to_string())),
                ("blob.bin", MemoryEntry::File(vec![1, 0, 2, 3])),
                ("huge.rs", MemoryEntry::File(vec![b'x'; 600 * 1024])),
                ("src/lib.rs", MemoryEntry::text("pub fn lib() {}")),
            ],
        );
        scm
    }

    #[tokio::test]
    async fn test_fetch_full_tree_filters_entries() {
        let scm = sample_repo();
        let streamer = streamer(Arc::clone(&scm), 2);

        let requests = streamer
            .fetch(&SearchArgs::new("repo", "c1"), None, CancellationToken::new())
            .collect_all()
            .await
            .unwrap();

        let paths: Vec<_> = requests.iter().map(|r| r.path.as_str()).collect();
        assert_eq!(paths, vec!["a.rs", "b.rs", "src/lib.rs"]);
        assert_eq!(scm.fetch_count(), 1);
        assert_eq!(streamer.limiter().available(), 2);
    }

    #[tokio::test]
    async fn test_fetch_path_subset() {
        let scm = sample_repo();
        let streamer = streamer(Arc::clone(&scm), 2);

        let requests = streamer
            .fetch(
                &SearchArgs::new("repo", "c1"),
                Some(vec!["src/lib.rs".to_string()]),
                CancellationToken::new(),
            )
            .collect_all()
            .await
            .unwrap();

        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].path, "src/lib.rs");
        assert_eq!(scm.fetch_log(), vec![Some(vec!["src/lib.rs".to_string()])]);
    }

    #[tokio::test]
    async fn test_fetch_failure_is_error_element() {
        let scm = sample_repo();
        scm.set_fail_fetches(true);
        let streamer = streamer(Arc::clone(&scm), 1);

        let mut stream = streamer.fetch(&SearchArgs::new("repo", "c1"), None, CancellationToken::new());
        assert!(matches!(stream.next().await, Some(Err(IndexError::Fetch { .. }))));
        assert!(stream.next().await.is_none());

        // Ticket came back on the error path.
        assert_eq!(streamer.limiter().available(), 1);
    }

    #[tokio::test]
    async fn test_unknown_commit_is_fetch_error() {
        let streamer = streamer(sample_repo(), 1);
        let result = streamer
            .fetch(&SearchArgs::new("repo", "nope"), None, CancellationToken::new())
            .collect_all()
            .await;
        assert!(matches!(result, Err(IndexError::Fetch { .. })));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_cancel_mid_read() {
        let scm = Arc::new(MemorySourceControl::new());
        let files: Vec<_> = (0..64)
            .map(|i| (format!("f{i}.rs"), MemoryEntry::File(vec![b'a'; 8 * 1024])))
            .collect();
        scm.add_commit("repo", "c1", files);
        scm.set_read_delay(Some(Duration::from_millis(5)));

        let streamer = streamer(Arc::clone(&scm), 1);
        let cancel = CancellationToken::new();
        let mut stream = streamer.fetch(&SearchArgs::new("repo", "c1"), None, cancel.clone());

        assert!(matches!(stream.next().await, Some(Ok(_))));
        cancel.cancel();

        let drained = tokio::time::timeout(Duration::from_secs(5), async {
            let mut last = None;
            while let Some(item) = stream.next().await {
                last = Some(item);
            }
            last
        })
        .await
        .expect("stream should end promptly after cancellation");

        assert!(matches!(drained, Some(Err(IndexError::Cancelled))));
        assert_eq!(streamer.limiter().available(), 1);
    }

    #[tokio::test]
    async fn test_cancel_while_waiting_for_ticket() {
        let scm = sample_repo();
        let streamer = streamer(Arc::clone(&scm), 1);
        let held = streamer.limiter().acquire(&CancellationToken::new()).await.unwrap();

        let cancel = CancellationToken::new();
        let mut stream = streamer.fetch(&SearchArgs::new("repo", "c1"), None, cancel.clone());
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();

        assert!(matches!(stream.next().await, Some(Err(IndexError::Cancelled))));
        assert_eq!(scm.fetch_count(), 0);
        drop(held);
    }
}
