//! Readable blob streams handed out by [`ContentStore::get`](crate::ContentStore::get).

use std::fmt;
use std::io::{self, Read, Seek, SeekFrom};

/// A reader that can also seek.
pub trait ReadSeek: Read + Seek + Send {}

impl<T: Read + Seek + Send> ReadSeek for T {}

/// Byte stream over a stored blob.
///
/// Backends that can serve random access hand out `Seekable` streams; purely
/// sequential backends (network fetches, decoders) hand out `Sequential` ones
/// and callers that need offsets must handle the unsupported seek.
pub enum ContentStream {
    Seekable(Box<dyn ReadSeek>),
    Sequential(Box<dyn Read + Send>),
}

impl ContentStream {
    pub fn seekable(reader: impl Read + Seek + Send + 'static) -> Self {
        Self::Seekable(Box::new(reader))
    }

    pub fn sequential(reader: impl Read + Send + 'static) -> Self {
        Self::Sequential(Box::new(reader))
    }

    pub fn is_seekable(&self) -> bool {
        matches!(self, Self::Seekable(_))
    }

    /// Seek the underlying stream. Sequential streams fail with
    /// [`io::ErrorKind::Unsupported`].
    pub fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        match self {
            Self::Seekable(inner) => inner.seek(pos),
            Self::Sequential(_) => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "underlying stream does not support seeking",
            )),
        }
    }
}

impl Read for ContentStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Seekable(inner) => inner.read(buf),
            Self::Sequential(inner) => inner.read(buf),
        }
    }
}

impl fmt::Debug for ContentStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Seekable(_) => f.write_str("ContentStream::Seekable"),
            Self::Sequential(_) => f.write_str("ContentStream::Sequential"),
        }
    }
}
