//! # vdrive-index
//!
//! Replicated-style metadata index for vdrive.
//!
//! The index maps string keys to opaque byte values. Its durable form is an
//! append-only operation log; the in-memory view is rebuilt on open from the
//! latest snapshot plus a (possibly bounded) replay of the log entries newer
//! than that snapshot.
//!
//! ## Storage Backends
//!
//! - `LmdbIndex`: op log and head pointers in LMDB, snapshots as content blobs
//! - `MemoryIndex`: same semantics in memory, for tests and ephemeral drives
//!
//! Access control lives next to the index (`AccessController`), since grants
//! are scoped to one index address.

pub mod access;
pub mod address;
pub mod lmdb;
pub mod memory;
mod oplog;

pub use access::{AccessController, AclError, LmdbAccessController, MemoryAccessController};
pub use address::IndexAddress;
pub use lmdb::LmdbIndex;
pub use memory::MemoryIndex;

use std::collections::BTreeMap;
use std::io;

use thiserror::Error;
use vdrive_cas::{CasError, ContentId};

/// Snapshots are stored through the content store, so their id is a content id.
pub type SnapshotId = ContentId;

/// Permission granted to an index's creator on first open.
pub const WRITE_PERMISSION: &str = "write";

/// Errors that can occur during index operations
#[derive(Error, Debug)]
pub enum IndexError {
    #[error("LMDB error: {0}")]
    Heed(#[from] heed::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Content store error: {0}")]
    Cas(#[from] CasError),

    #[error("Serialization error: {0}")]
    Bincode(#[from] bincode::Error),

    #[error("Invalid index address: {0}")]
    InvalidAddress(String),

    #[error("Index not found: {0}")]
    NotFound(String),

    #[error("Snapshot corrupted: {0}")]
    CorruptSnapshot(String),

    #[error("Index is closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, IndexError>;

/// Key → value mapping shared by cooperating writers.
///
/// Implementations are safe for concurrent `put`/`get`/`delete`/`all` without
/// external locking. Writes to the same key race; the last one to land wins.
pub trait MetadataIndex: Send + Sync {
    /// Fully qualified address of this index.
    fn address(&self) -> &IndexAddress;

    /// Identity of the local writer.
    fn identity(&self) -> &str;

    fn put(&self, key: &str, value: Vec<u8>) -> Result<()>;

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Delete a key. Deleting an absent key is a no-op.
    fn delete(&self, key: &str) -> Result<()>;

    /// Point-in-time copy of every entry. Not a live cursor.
    fn all(&self) -> Result<BTreeMap<String, Vec<u8>>>;

    /// Replace the in-memory view with the latest snapshot.
    ///
    /// Returns `Ok(None)` when no snapshot has been saved yet.
    fn load_snapshot(&self) -> Result<Option<SnapshotId>>;

    /// Apply log entries newer than the current view, at most `limit` of them.
    /// Returns the number of entries applied.
    fn replay(&self, limit: Option<usize>) -> Result<usize>;

    /// Write a full dump of the current view and make it the latest snapshot.
    fn save_snapshot(&self) -> Result<SnapshotId>;

    /// Flush and refuse further operations.
    fn close(&self) -> Result<()>;
}
