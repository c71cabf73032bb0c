//! # vdrive-cas
//!
//! Content-addressed blob storage for vdrive.
//!
//! Blobs are addressed by their BLAKE3 hash and laid out with a 2-level
//! fan-out. A blob is only protected from collection while it carries a pin
//! marker; pins live in a parallel tree so that pinning never rewrites blob
//! data.
//!
//! ## Directory Layout
//!
//! ```text
//! <root>/
//! ├── blake3/ab/cd/abcd1234...   # blob bytes
//! ├── pins/ab/cd/abcd1234...     # empty marker, present while pinned
//! └── tmp/                       # in-flight writes
//! ```

mod memory;
mod stream;

pub use memory::MemoryStore;
pub use stream::{ContentStream, ReadSeek};

use std::fmt;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;
use tracing::{debug, instrument};
use walkdir::WalkDir;

/// BLAKE3 hash type (32 bytes)
pub type Blake3Hash = [u8; 32];

/// Errors that can occur during content store operations
#[derive(Error, Debug)]
pub enum CasError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Blob not found: {id}")]
    NotFound { id: ContentId },

    #[error("Blob not pinned: {id}")]
    NotPinned { id: ContentId },

    #[error("Hash mismatch: expected {expected}, got {actual}")]
    HashMismatch { expected: String, actual: String },

    #[error("Invalid content id: {0:?}")]
    InvalidId(String),
}

pub type Result<T> = std::result::Result<T, CasError>;

/// Opaque content address. Identical bytes always produce the same id.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentId(Blake3Hash);

impl ContentId {
    /// Compute the id of the given bytes.
    #[inline]
    pub fn of(data: &[u8]) -> Self {
        Self(*blake3::hash(data).as_bytes())
    }

    pub fn from_hash(hash: Blake3Hash) -> Self {
        Self(hash)
    }

    pub fn as_bytes(&self) -> &Blake3Hash {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self> {
        let mut hash = [0u8; 32];
        hex::decode_to_slice(s, &mut hash).map_err(|_| CasError::InvalidId(s.to_string()))?;
        Ok(Self(hash))
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentId({})", self.to_hex())
    }
}

impl FromStr for ContentId {
    type Err = CasError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_hex(s)
    }
}

// Hex on the wire keeps encoded records readable and independent of the
// serializer's treatment of fixed-size arrays.
impl Serialize for ContentId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ContentId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        ContentId::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Content-addressed blob storage with pinning.
///
/// Implementations must be safe to call concurrently. `add` for identical
/// bytes from several callers converges on the same id.
pub trait ContentStore: Send + Sync {
    /// Store everything readable from `reader` and pin the result.
    fn add(&self, reader: &mut dyn Read) -> Result<ContentId>;

    /// Open a stream over a stored blob. Works for unpinned blobs that have
    /// not been collected yet.
    fn get(&self, id: &ContentId) -> Result<ContentStream>;

    fn pin(&self, id: &ContentId) -> Result<()>;

    /// Remove the pin. Fails with [`CasError::NotPinned`] if there is none.
    fn unpin(&self, id: &ContentId) -> Result<()>;

    fn is_pinned(&self, id: &ContentId) -> Result<bool>;
}

/// Counter for unique temp file names within this process
static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// On-disk content store
///
/// Stores blobs indexed by their BLAKE3 hash with a 2-char prefix fan-out.
#[derive(Debug, Clone)]
pub struct CasStore {
    root: PathBuf,
}

impl CasStore {
    /// Create a new store at the given root directory.
    ///
    /// The directory will be created if it doesn't exist.
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(root.join("tmp"))?;
        Ok(Self { root })
    }

    /// Get the root path of the store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn fan_out(&self, tree: &str, id: &ContentId) -> PathBuf {
        let hex = id.to_hex();
        self.root.join(tree).join(&hex[..2]).join(&hex[2..4]).join(&hex)
    }

    fn blob_path(&self, id: &ContentId) -> PathBuf {
        self.fan_out("blake3", id)
    }

    fn pin_path(&self, id: &ContentId) -> PathBuf {
        self.fan_out("pins", id)
    }

    /// Check if a blob exists in the store.
    pub fn exists(&self, id: &ContentId) -> bool {
        self.blob_path(id).exists()
    }

    /// Read a blob fully and verify it against its id.
    pub fn read_verified(&self, id: &ContentId) -> Result<Vec<u8>> {
        let mut data = Vec::new();
        self.get(id)?.read_to_end(&mut data)?;

        let actual = ContentId::of(&data);
        if actual != *id {
            return Err(CasError::HashMismatch {
                expected: id.to_hex(),
                actual: actual.to_hex(),
            });
        }
        Ok(data)
    }

    /// Stream `reader` into a temp file while hashing, then move it into
    /// place. Returns the id without pinning.
    fn write_blob(&self, reader: &mut dyn Read) -> Result<ContentId> {
        let temp_path = self.root.join("tmp").join(format!(
            "{}.{}.tmp",
            std::process::id(),
            TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));

        let mut hasher = blake3::Hasher::new();
        let written = (|| -> io::Result<()> {
            let mut file = File::create(&temp_path)?;
            let mut buf = [0u8; 64 * 1024];
            loop {
                let n = match reader.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => n,
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => return Err(e),
                };
                hasher.update(&buf[..n]);
                file.write_all(&buf[..n])?;
            }
            file.sync_all()
        })();
        if let Err(e) = written {
            let _ = fs::remove_file(&temp_path);
            return Err(CasError::Io(e));
        }

        let id = ContentId::from_hash(*hasher.finalize().as_bytes());
        let path = self.blob_path(&id);

        // Deduplication: identical bytes are already in place
        if path.exists() {
            let _ = fs::remove_file(&temp_path);
            return Ok(id);
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        // Atomic rename - if another thread beat us, that's fine (same content)
        if let Err(e) = fs::rename(&temp_path, &path) {
            let _ = fs::remove_file(&temp_path);
            if path.exists() {
                return Ok(id);
            }
            return Err(CasError::Io(e));
        }

        Ok(id)
    }

    /// Get statistics about the store.
    pub fn stats(&self) -> Result<CasStats> {
        let mut stats = CasStats::default();

        let blake3_dir = self.root.join("blake3");
        if !blake3_dir.exists() {
            return Ok(stats);
        }

        for entry in WalkDir::new(&blake3_dir).min_depth(3).max_depth(3) {
            let entry = entry.map_err(|e| CasError::Io(io::Error::other(e)))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Some(id) = entry
                .file_name()
                .to_str()
                .and_then(|name| ContentId::from_hex(name).ok())
            else {
                continue;
            };

            stats.blob_count += 1;
            stats.total_bytes += entry.metadata().map_err(|e| CasError::Io(io::Error::other(e)))?.len();
            if self.pin_path(&id).exists() {
                stats.pinned_count += 1;
            }
        }

        Ok(stats)
    }
}

impl ContentStore for CasStore {
    #[instrument(skip(self, reader), level = "debug")]
    fn add(&self, reader: &mut dyn Read) -> Result<ContentId> {
        let id = self.write_blob(reader)?;
        self.pin(&id)?;
        debug!(%id, "stored and pinned blob");
        Ok(id)
    }

    #[instrument(skip(self), level = "debug")]
    fn get(&self, id: &ContentId) -> Result<ContentStream> {
        match File::open(self.blob_path(id)) {
            Ok(file) => Ok(ContentStream::seekable(file)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(CasError::NotFound { id: *id }),
            Err(e) => Err(CasError::Io(e)),
        }
    }

    fn pin(&self, id: &ContentId) -> Result<()> {
        if !self.exists(id) {
            return Err(CasError::NotFound { id: *id });
        }
        let path = self.pin_path(id);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        File::create(path)?;
        Ok(())
    }

    fn unpin(&self, id: &ContentId) -> Result<()> {
        match fs::remove_file(self.pin_path(id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(CasError::NotPinned { id: *id }),
            Err(e) => Err(CasError::Io(e)),
        }
    }

    fn is_pinned(&self, id: &ContentId) -> Result<bool> {
        Ok(self.pin_path(id).exists())
    }
}

/// Statistics about the content store
#[derive(Debug, Clone, Default)]
pub struct CasStats {
    /// Number of unique blobs stored
    pub blob_count: u64,
    /// Total bytes stored (deduplicated)
    pub total_bytes: u64,
    /// Blobs currently protected by a pin
    pub pinned_count: u64,
}

impl CasStats {
    /// Calculate average blob size
    pub fn avg_blob_size(&self) -> u64 {
        if self.blob_count == 0 {
            0
        } else {
            self.total_bytes / self.blob_count
        }
    }
}
