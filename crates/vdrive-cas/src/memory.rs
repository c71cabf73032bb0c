//! In-memory content store.
//!
//! Behaves like [`CasStore`](crate::CasStore) without touching disk. Used as a
//! test double and for ephemeral drives.

use std::io::{self, Cursor, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::{DashMap, DashSet};

use crate::{CasError, ContentId, ContentStore, ContentStream, Result};

#[derive(Debug, Default)]
pub struct MemoryStore {
    blobs: DashMap<ContentId, Arc<[u8]>>,
    pins: DashSet<ContentId>,
    sequential: AtomicBool,
    reject_adds: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hand out non-seekable streams from `get`, like a network-backed store.
    pub fn with_sequential_reads(self) -> Self {
        self.sequential.store(true, Ordering::Relaxed);
        self
    }

    /// Make every subsequent `add` fail.
    pub fn reject_adds(&self, reject: bool) {
        self.reject_adds.store(reject, Ordering::Relaxed);
    }

    pub fn contains(&self, id: &ContentId) -> bool {
        self.blobs.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }

    pub fn pinned_count(&self) -> usize {
        self.pins.len()
    }
}

impl ContentStore for MemoryStore {
    fn add(&self, reader: &mut dyn Read) -> Result<ContentId> {
        if self.reject_adds.load(Ordering::Relaxed) {
            return Err(CasError::Io(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "store rejects writes",
            )));
        }

        let mut data = Vec::new();
        reader.read_to_end(&mut data)?;
        let id = ContentId::of(&data);
        self.blobs.entry(id).or_insert_with(|| Arc::from(data));
        self.pins.insert(id);
        Ok(id)
    }

    fn get(&self, id: &ContentId) -> Result<ContentStream> {
        let data = self
            .blobs
            .get(id)
            .map(|blob| Arc::clone(blob.value()))
            .ok_or(CasError::NotFound { id: *id })?;

        if self.sequential.load(Ordering::Relaxed) {
            Ok(ContentStream::sequential(Cursor::new(data)))
        } else {
            Ok(ContentStream::seekable(Cursor::new(data)))
        }
    }

    fn pin(&self, id: &ContentId) -> Result<()> {
        if !self.blobs.contains_key(id) {
            return Err(CasError::NotFound { id: *id });
        }
        self.pins.insert(*id);
        Ok(())
    }

    fn unpin(&self, id: &ContentId) -> Result<()> {
        self.pins
            .remove(id)
            .map(|_| ())
            .ok_or(CasError::NotPinned { id: *id })
    }

    fn is_pinned(&self, id: &ContentId) -> Result<bool> {
        Ok(self.pins.contains(id))
    }
}
