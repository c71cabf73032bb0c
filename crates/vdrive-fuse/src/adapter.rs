//! Filesystem view of a [`Drive`].
//!
//! Every entry is one of the [`Node`] variants. Committed files are read-only;
//! a name with no record is a pending file that becomes real only when a
//! write session on it is flushed with data.
//!
//! Open descriptors live in a handle table. Each handle has its own lock and
//! no table-wide lock is held across a drive call.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use vdrive_config::{log_fs_debug, log_fs_info, log_fs_warn};
use vdrive_core::{read_range, Context, ContentStream, Drive, DriveError, File};

use crate::FsError;

pub const DIR_PERM: u16 = 0o755;
pub const EXISTING_FILE_PERM: u16 = 0o444;
pub const PENDING_FILE_PERM: u16 = 0o666;

/// Largest file a write session may buffer: 1 GiB.
pub const DEFAULT_MAX_FILE_SIZE: u64 = 1 << 30;

/// A filesystem entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    /// The drive root. Lists every record.
    Directory,
    /// A committed record.
    ExistingFile(File),
    /// A name with no record yet.
    PendingFile { key: String },
    /// An open read or write session.
    OpenDescriptor { fh: u64, key: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Directory,
    File,
}

/// Attributes reported for a node. Access, modify and change times are
/// all `mtime`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeAttr {
    pub kind: NodeKind,
    pub size: u64,
    pub mtime: SystemTime,
    pub perm: u16,
}

enum Descriptor {
    Reading {
        key: String,
        stream: ContentStream,
    },
    Writing {
        key: String,
        buffer: Vec<u8>,
        dirty: bool,
    },
}

impl Descriptor {
    fn key(&self) -> &str {
        match self {
            Descriptor::Reading { key, .. } | Descriptor::Writing { key, .. } => key,
        }
    }
}

fn lock(handle: &Mutex<Descriptor>) -> MutexGuard<'_, Descriptor> {
    handle.lock().unwrap_or_else(|p| p.into_inner())
}

/// Grow or shrink `buffer` to `len`, failing instead of aborting when the
/// allocation cannot be satisfied.
fn resize_buffer(buffer: &mut Vec<u8>, len: usize) -> Result<(), FsError> {
    if len > buffer.len() {
        buffer
            .try_reserve_exact(len - buffer.len())
            .map_err(|_| FsError::Io)?;
    }
    buffer.resize(len, 0);
    Ok(())
}

pub struct DriveFs {
    drive: Arc<Drive>,
    cx: Context,
    handles: DashMap<u64, Arc<Mutex<Descriptor>>>,
    next_fh: AtomicU64,
    max_file_size: u64,
}

impl DriveFs {
    pub fn new(drive: Arc<Drive>) -> Self {
        Self::with_context(drive, Context::background())
    }

    /// Use `cx` for every drive call; cancelling it fails in-flight work.
    pub fn with_context(drive: Arc<Drive>, cx: Context) -> Self {
        Self {
            drive,
            cx,
            handles: DashMap::new(),
            next_fh: AtomicU64::new(1),
            max_file_size: DEFAULT_MAX_FILE_SIZE,
        }
    }

    /// Cap the size a write session may grow to.
    pub fn with_max_file_size(mut self, max: u64) -> Self {
        self.max_file_size = max;
        self
    }

    pub fn max_file_size(&self) -> u64 {
        self.max_file_size
    }

    /// Buffer length for a session growing to `end`, if within the cap.
    fn checked_len(&self, key: &str, end: u64) -> Result<usize, FsError> {
        if end > self.max_file_size {
            log_fs_warn!(
                "Write beyond buffer limit",
                key = key,
                requested = end,
                limit = self.max_file_size
            );
            return Err(FsError::FileTooLarge);
        }
        usize::try_from(end).map_err(|_| FsError::FileTooLarge)
    }

    pub fn drive(&self) -> &Arc<Drive> {
        &self.drive
    }

    pub fn open_handles(&self) -> usize {
        self.handles.len()
    }

    /// Resolve `name` in the root directory. Unknown names are pending files.
    pub fn lookup(&self, name: &str) -> Result<Node, FsError> {
        if name.is_empty() {
            return Err(FsError::NotFound);
        }
        match self.drive.stat(name) {
            Ok(file) => Ok(Node::ExistingFile(file)),
            Err(DriveError::NotFound(_)) => Ok(Node::PendingFile {
                key: name.to_string(),
            }),
            Err(e) => Err(FsError::from_drive("lookup", name, e)),
        }
    }

    /// Root directory entries.
    pub fn read_dir(&self) -> Result<Vec<File>, FsError> {
        self.drive
            .list("")
            .map(|list| list.into_files())
            .map_err(|e| FsError::from_drive("list", "", e))
    }

    pub fn attr(&self, node: &Node) -> NodeAttr {
        match node {
            Node::Directory => NodeAttr {
                kind: NodeKind::Directory,
                size: 0,
                mtime: UNIX_EPOCH,
                perm: DIR_PERM,
            },
            Node::ExistingFile(file) => NodeAttr {
                kind: NodeKind::File,
                size: file.size,
                mtime: file.modified().unwrap_or(UNIX_EPOCH),
                perm: EXISTING_FILE_PERM,
            },
            Node::PendingFile { .. } => NodeAttr {
                kind: NodeKind::File,
                size: 0,
                mtime: SystemTime::now(),
                perm: PENDING_FILE_PERM,
            },
            Node::OpenDescriptor { fh, key } => match self.buffered_len(*fh) {
                Some(size) => NodeAttr {
                    kind: NodeKind::File,
                    size,
                    mtime: SystemTime::now(),
                    perm: PENDING_FILE_PERM,
                },
                None => match self.drive.stat(key) {
                    Ok(file) => self.attr(&Node::ExistingFile(file)),
                    Err(_) => self.attr(&Node::PendingFile { key: key.clone() }),
                },
            },
        }
    }

    /// Size of a write session's buffer, `None` for other handles.
    fn buffered_len(&self, fh: u64) -> Option<u64> {
        let handle = self.handle(fh).ok()?;
        let desc = lock(&handle);
        match &*desc {
            Descriptor::Writing { buffer, .. } => Some(buffer.len() as u64),
            Descriptor::Reading { .. } => None,
        }
    }

    /// Open `node` for reading or writing.
    ///
    /// Existing files open read-only; pending files open for writing only.
    pub fn open(&self, node: &Node, write: bool) -> Result<Node, FsError> {
        let (key, desc) = match (node, write) {
            (Node::Directory, _) => return Err(FsError::IsDirectory),
            (Node::OpenDescriptor { .. }, _) => return Err(FsError::BadHandle),
            (Node::ExistingFile(_), true) => return Err(FsError::ReadOnly),
            (Node::PendingFile { .. }, false) => return Err(FsError::NotFound),
            (Node::ExistingFile(file), false) => {
                let stream = self
                    .drive
                    .get(&self.cx, &file.key)
                    .map_err(|e| FsError::from_drive("open", &file.key, e))?;
                (
                    file.key.clone(),
                    Descriptor::Reading {
                        key: file.key.clone(),
                        stream,
                    },
                )
            }
            (Node::PendingFile { key }, true) => (
                key.clone(),
                Descriptor::Writing {
                    key: key.clone(),
                    buffer: Vec::new(),
                    dirty: false,
                },
            ),
        };

        let fh = self.next_fh.fetch_add(1, Ordering::Relaxed);
        self.handles.insert(fh, Arc::new(Mutex::new(desc)));
        log_fs_debug!("Opened", fh = fh, key = key.as_str(), write = write);
        Ok(Node::OpenDescriptor { fh, key })
    }

    fn handle(&self, fh: u64) -> Result<Arc<Mutex<Descriptor>>, FsError> {
        self.handles
            .get(&fh)
            .map(|h| Arc::clone(h.value()))
            .ok_or(FsError::BadHandle)
    }

    /// Read up to `size` bytes at `offset`.
    pub fn read(&self, fh: u64, offset: u64, size: usize) -> Result<Vec<u8>, FsError> {
        let handle = self.handle(fh)?;
        let mut desc = lock(&handle);
        match &mut *desc {
            Descriptor::Reading { key, stream } => {
                read_range(stream, offset, size).map_err(|e| FsError::from_drive("read", key, e))
            }
            Descriptor::Writing { buffer, .. } => {
                let start = (offset as usize).min(buffer.len());
                let end = start.saturating_add(size).min(buffer.len());
                Ok(buffer[start..end].to_vec())
            }
        }
    }

    /// Write `data` at `offset` into a write session's buffer.
    ///
    /// Fails with [`FsError::FileTooLarge`] when the session would grow past
    /// the configured maximum; the buffer is left untouched.
    pub fn write(&self, fh: u64, offset: u64, data: &[u8]) -> Result<usize, FsError> {
        let handle = self.handle(fh)?;
        let mut desc = lock(&handle);
        match &mut *desc {
            Descriptor::Reading { .. } => Err(FsError::BadHandle),
            Descriptor::Writing { key, buffer, dirty } => {
                let end = offset
                    .checked_add(data.len() as u64)
                    .ok_or(FsError::FileTooLarge)?;
                let end = self.checked_len(key, end)?;
                let start = end - data.len();
                if buffer.len() < end {
                    resize_buffer(buffer, end)?;
                }
                buffer[start..end].copy_from_slice(data);
                *dirty = true;
                Ok(data.len())
            }
        }
    }

    /// Resize a write session's buffer.
    pub fn truncate(&self, fh: u64, size: u64) -> Result<(), FsError> {
        let handle = self.handle(fh)?;
        let mut desc = lock(&handle);
        match &mut *desc {
            Descriptor::Reading { .. } => Err(FsError::ReadOnly),
            Descriptor::Writing { key, buffer, dirty } => {
                let size = self.checked_len(key, size)?;
                if buffer.len() != size {
                    resize_buffer(buffer, size)?;
                    *dirty = true;
                }
                Ok(())
            }
        }
    }

    /// Commit a dirty, non-empty write buffer to the drive.
    ///
    /// Returns the committed record, or `None` when there was nothing to commit.
    pub fn flush(&self, fh: u64) -> Result<Option<File>, FsError> {
        let handle = self.handle(fh)?;
        let mut desc = lock(&handle);
        match &mut *desc {
            Descriptor::Reading { .. } => Ok(None),
            Descriptor::Writing { key, buffer, dirty } => {
                if !*dirty || buffer.is_empty() {
                    return Ok(None);
                }
                let file = self
                    .drive
                    .add(&self.cx, key, buffer.as_slice())
                    .map_err(|e| FsError::from_drive("flush", key, e))?;
                *dirty = false;
                log_fs_info!("Committed", key = key.as_str(), size = file.size);
                Ok(Some(file))
            }
        }
    }

    /// Flush and drop the handle. The handle is dropped even if the flush
    /// fails, and the buffered data is lost.
    pub fn release(&self, fh: u64) -> Result<Option<File>, FsError> {
        let result = self.flush(fh);
        if let Some((_, handle)) = self.handles.remove(&fh) {
            let desc = lock(&handle);
            if let (Err(_), Descriptor::Writing { key, buffer, .. }) = (&result, &*desc) {
                log_fs_warn!(
                    "Discarding unflushed buffer",
                    key = key.as_str(),
                    bytes = buffer.len()
                );
            }
            log_fs_debug!("Released", fh = fh, key = desc.key());
        }
        result
    }
}
