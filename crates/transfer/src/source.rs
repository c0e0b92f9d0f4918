//! Local byte sources for uploads.
//!
//! A source is a transient handle to the file the user selected. It is never
//! persisted: after a restart an unfinished upload has no source until one
//! is attached again.

use std::fmt;
use std::io::{Read, Seek, SeekFrom};
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;

/// Random-access bytes an upload reads its chunks from.
pub trait ByteSource: Send + Sync + fmt::Debug {
    /// Total length in bytes.
    fn len(&self) -> u64;

    /// Reads exactly the bytes in `range`.
    fn read_range(&self, range: Range<u64>) -> std::io::Result<Bytes>;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Shared handle stored on upload items.
pub type SharedSource = Arc<dyn ByteSource>;

/// A file on the local filesystem, reopened for every read.
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
    len: u64,
}

impl FileSource {
    /// Opens `path` and records its current length.
    pub fn open(path: &Path) -> std::io::Result<Self> {
        let len = std::fs::metadata(path)?.len();
        Ok(Self {
            path: path.to_path_buf(),
            len,
        })
    }

    /// The file's path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ByteSource for FileSource {
    fn len(&self) -> u64 {
        self.len
    }

    fn read_range(&self, range: Range<u64>) -> std::io::Result<Bytes> {
        let mut file = std::fs::File::open(&self.path)?;
        file.seek(SeekFrom::Start(range.start))?;
        let size = usize::try_from(range.end.saturating_sub(range.start))
            .map_err(|_| std::io::Error::other("chunk does not fit in memory"))?;
        let mut buf = vec![0u8; size];
        file.read_exact(&mut buf)?;
        Ok(Bytes::from(buf))
    }
}

/// Bytes already held in memory.
#[derive(Clone)]
pub struct MemorySource {
    data: Bytes,
}

impl MemorySource {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { data: data.into() }
    }
}

impl fmt::Debug for MemorySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemorySource")
            .field("len", &self.data.len())
            .finish()
    }
}

impl ByteSource for MemorySource {
    fn len(&self) -> u64 {
        self.data.len() as u64
    }

    fn read_range(&self, range: Range<u64>) -> std::io::Result<Bytes> {
        let out_of_bounds = || {
            std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("range {range:?} exceeds {} bytes", self.data.len()),
            )
        };
        let start = usize::try_from(range.start).map_err(|_| out_of_bounds())?;
        let end = usize::try_from(range.end).map_err(|_| out_of_bounds())?;
        if start > end || end > self.data.len() {
            return Err(out_of_bounds());
        }
        Ok(self.data.slice(start..end))
    }
}
