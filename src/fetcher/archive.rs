//! Tar entry filtering and reading.
//!
//! Every entry goes through the same checks, first match wins:
//! size limit, regular-file check, `.json` extension, empty content, and a
//! NUL-byte sniff over the start of the file.

use std::io::{self, Read};

use tar::EntryType;
use tokio_util::sync::CancellationToken;

use crate::types::ParseRequest;

/// Largest file we attempt to parse (512 KiB).
pub const MAX_FILE_SIZE: u64 = 1 << 19;

/// Size of the first read from each entry (32 KiB).
pub const READ_CHUNK_SIZE: usize = 32 * 1024;

/// Number of leading bytes inspected for a NUL when deciding if content is binary.
pub const BINARY_SNIFF_WINDOW: usize = 256;

/// Why an archive entry did not become a [`ParseRequest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    TooLarge,
    NotRegularFile,
    Json,
    Empty,
    Binary,
}

/// Counters for one archive pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ArchiveStats {
    pub entries: usize,
    pub emitted: usize,
    pub skipped: usize,
}

#[derive(Debug)]
pub enum ReadError {
    Cancelled,
    Io(io::Error),
}

/// Header-only checks, applied before any content is read.
pub fn should_parse(size: u64, entry_type: EntryType, path: &str) -> Result<(), SkipReason> {
    if size > MAX_FILE_SIZE {
        return Err(SkipReason::TooLarge);
    }
    // `EntryType::Regular` covers both the '0' and legacy '\0' type flags.
    if entry_type != EntryType::Regular {
        return Err(SkipReason::NotRegularFile);
    }
    // JSON files are symbol-less
    if has_json_extension(path) {
        return Err(SkipReason::Json);
    }
    Ok(())
}

/// Extension of the last path component, including a leading dot-only name.
fn has_json_extension(path: &str) -> bool {
    let name = path.rsplit('/').next().unwrap_or(path);
    name.rfind('.').is_some_and(|dot| &name[dot..] == ".json")
}

pub fn looks_binary(prefix: &[u8]) -> bool {
    let window = prefix.len().min(BINARY_SNIFF_WINDOW);
    prefix[..window].contains(&0)
}

/// Fill `buf` from `reader`, stopping early only at end of input.
fn read_prefix(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Read one entry's content, applying the content filters.
pub fn read_entry(
    reader: &mut impl Read,
    path: String,
    size: u64,
) -> io::Result<Result<ParseRequest, SkipReason>> {
    let mut buffer = vec![0u8; READ_CHUNK_SIZE];
    let n = read_prefix(reader, &mut buffer)?;
    if n == 0 {
        return Ok(Err(SkipReason::Empty));
    }
    if looks_binary(&buffer[..n]) {
        return Ok(Err(SkipReason::Binary));
    }

    buffer.truncate(n);
    if (n as u64) < size {
        buffer.reserve((size - n as u64) as usize);
        reader.read_to_end(&mut buffer)?;
    }
    if (buffer.len() as u64) < size {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("archive entry {path} ended after {} of {size} bytes", buffer.len()),
        ));
    }

    Ok(Ok(ParseRequest { path, data: buffer }))
}

/// Reader that refuses to make progress once the build is cancelled.
struct CancellableReader<'a, R> {
    inner: R,
    cancel: &'a CancellationToken,
}

impl<R: Read> Read for CancellableReader<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.cancel.is_cancelled() {
            return Err(io::Error::other("archive read cancelled"));
        }
        self.inner.read(buf)
    }
}

/// Walk a tar stream in entry order, handing each accepted file to `emit`.
///
/// `emit` returns `false` when the consumer has gone away; reading stops early
/// without error in that case.
pub fn read_archive<R: Read>(
    reader: R,
    cancel: &CancellationToken,
    mut emit: impl FnMut(ParseRequest) -> bool,
) -> Result<ArchiveStats, ReadError> {
    let mut archive = tar::Archive::new(CancellableReader {
        inner: reader,
        cancel,
    });
    let mut stats = ArchiveStats::default();

    let io_error = |e: io::Error| {
        if cancel.is_cancelled() {
            ReadError::Cancelled
        } else {
            ReadError::Io(e)
        }
    };

    for entry in archive.entries().map_err(io_error)? {
        if cancel.is_cancelled() {
            return Err(ReadError::Cancelled);
        }

        let mut entry = entry.map_err(io_error)?;
        stats.entries += 1;

        let path = String::from_utf8_lossy(&entry.path_bytes()).into_owned();
        let size = entry.size();
        let entry_type = entry.header().entry_type();

        let outcome = match should_parse(size, entry_type, &path) {
            Ok(()) => read_entry(&mut entry, path, size).map_err(io_error)?,
            Err(reason) => Err(reason),
        };

        match outcome {
            Ok(request) => {
                stats.emitted += 1;
                if !emit(request) {
                    break;
                }
            }
            Err(reason) => {
                stats.skipped += 1;
                tracing::trace!("[fetcher] skipped entry ({reason:?})");
            }
        }
    }

    Ok(stats)
}
