//! Zip archive assembly.
//!
//! [`ArchiveAssembler`] is the sink every asset task writes into. Entries are
//! compressed as they are appended, so by the time the last fetch completes
//! only the central directory is left to write. Appends from concurrent tasks
//! are serialized behind a mutex; entry order inside the container is simply
//! arrival order.

use std::io::{Cursor, Write};

use bytes::Bytes;
use futures_util::stream::{self, Stream};
use parking_lot::Mutex;
use tracing::trace;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::{FontpackError, FontpackResult};

/// Chunk size used when streaming a finished archive.
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// A named payload destined for the archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveEntry {
    /// A fetched asset.
    Binary {
        /// Entry name.
        name: String,
        /// Raw bytes.
        data: Bytes,
    },
    /// The rewritten stylesheet.
    Text {
        /// Entry name.
        name: String,
        /// UTF-8 text.
        text: String,
    },
}

impl ArchiveEntry {
    /// Binary entry.
    pub fn binary(name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self::Binary {
            name: name.into(),
            data: data.into(),
        }
    }

    /// Text entry.
    pub fn text(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self::Text {
            name: name.into(),
            text: text.into(),
        }
    }

    /// Entry name.
    pub fn name(&self) -> &str {
        match self {
            Self::Binary { name, .. } | Self::Text { name, .. } => name,
        }
    }

    /// Payload bytes.
    pub fn payload(&self) -> &[u8] {
        match self {
            Self::Binary { data, .. } => data,
            Self::Text { text, .. } => text.as_bytes(),
        }
    }
}

struct OpenArchive {
    writer: ZipWriter<Cursor<Vec<u8>>>,
    entries: Vec<String>,
}

/// Append-only zip builder shared by the tasks of one run.
pub struct ArchiveAssembler {
    state: Mutex<Option<OpenArchive>>,
    options: SimpleFileOptions,
}

impl std::fmt::Debug for ArchiveAssembler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveAssembler")
            .field("sealed", &self.is_sealed())
            .field("entries", &self.entry_count())
            .finish()
    }
}

impl ArchiveAssembler {
    /// Create an empty archive using deflate compression.
    pub fn new() -> Self {
        Self::with_compression(CompressionMethod::Deflated)
    }

    /// Create an empty archive with a specific compression method.
    pub fn with_compression(method: CompressionMethod) -> Self {
        Self {
            state: Mutex::new(Some(OpenArchive {
                writer: ZipWriter::new(Cursor::new(Vec::new())),
                entries: Vec::new(),
            })),
            options: SimpleFileOptions::default()
                .compression_method(method)
                .unix_permissions(0o644),
        }
    }

    /// Compress `entry` into the archive.
    ///
    /// Fails once the archive has been finalized, or when the name is
    /// already taken.
    pub fn append(&self, entry: ArchiveEntry) -> FontpackResult<()> {
        let mut state = self.state.lock();
        let open = state
            .as_mut()
            .ok_or_else(|| FontpackError::archive_append(entry.name(), "archive already finalized"))?;

        if open.entries.iter().any(|existing| existing == entry.name()) {
            return Err(FontpackError::archive_append(entry.name(), "duplicate entry name"));
        }

        open.writer
            .start_file(entry.name(), self.options)
            .map_err(|e| FontpackError::archive_append(entry.name(), e))?;
        open.writer
            .write_all(entry.payload())
            .map_err(|e| FontpackError::archive_append(entry.name(), e))?;

        trace!(name = entry.name(), bytes = entry.payload().len(), "archive entry appended");
        open.entries.push(entry.name().to_string());
        Ok(())
    }

    /// Number of entries appended so far.
    pub fn entry_count(&self) -> usize {
        self.state.lock().as_ref().map_or(0, |open| open.entries.len())
    }

    /// Whether [`finalize`](Self::finalize) has been called.
    pub fn is_sealed(&self) -> bool {
        self.state.lock().is_none()
    }

    /// Seal the archive and return the finished container.
    ///
    /// The assembler rejects every later call, including a second finalize.
    pub fn finalize(&self) -> FontpackResult<FinishedArchive> {
        let open = self
            .state
            .lock()
            .take()
            .ok_or_else(|| FontpackError::archive_finalize("archive already finalized"))?;

        let cursor = open
            .writer
            .finish()
            .map_err(FontpackError::archive_finalize)?;

        Ok(FinishedArchive {
            bytes: Bytes::from(cursor.into_inner()),
            entries: open.entries,
        })
    }
}

impl Default for ArchiveAssembler {
    fn default() -> Self {
        Self::new()
    }
}

/// A sealed zip container.
#[derive(Debug, Clone)]
pub struct FinishedArchive {
    bytes: Bytes,
    entries: Vec<String>,
}

impl FinishedArchive {
    /// Total size in bytes.
    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    /// Entry names in the order they were appended.
    pub fn entry_names(&self) -> &[String] {
        &self.entries
    }

    /// The whole container.
    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    /// Stream the container in chunks of at most `chunk_size` bytes.
    pub fn into_stream(self, chunk_size: usize) -> impl Stream<Item = Bytes> + Send + 'static {
        let chunk_size = chunk_size.max(1);
        let bytes = self.bytes;
        let chunks: Vec<Bytes> = (0..bytes.len())
            .step_by(chunk_size)
            .map(|start| bytes.slice(start..(start + chunk_size).min(bytes.len())))
            .collect();
        stream::iter(chunks)
    }
}
