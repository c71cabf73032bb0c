//! In-memory metadata index.
//!
//! Keeps an op log and snapshot head in a shared backend so a test can
//! [`reopen`](MemoryIndex::reopen) the same index and exercise recovery
//! without LMDB.

use std::collections::BTreeMap;
use std::io::Read;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use dashmap::DashMap;
use vdrive_cas::{ContentId, ContentStore};

use crate::oplog::{Op, Snapshot};
use crate::{IndexAddress, IndexError, MetadataIndex, Result, SnapshotId};

#[derive(Default)]
struct Backend {
    ops: Mutex<Vec<Op>>,
    head: Mutex<Option<ContentId>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|p| p.into_inner())
}

pub struct MemoryIndex {
    address: IndexAddress,
    identity: String,
    content: Arc<dyn ContentStore>,
    backend: Arc<Backend>,
    state: DashMap<String, Vec<u8>>,
    /// Number of log entries folded into `state`
    applied: AtomicUsize,
    closed: AtomicBool,
}

impl MemoryIndex {
    pub fn new(address: IndexAddress, identity: impl Into<String>, content: Arc<dyn ContentStore>) -> Self {
        Self {
            address,
            identity: identity.into(),
            content,
            backend: Arc::default(),
            state: DashMap::new(),
            applied: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// A fresh, empty view over the same log and snapshot head.
    pub fn reopen(&self) -> Self {
        Self {
            address: self.address.clone(),
            identity: self.identity.clone(),
            content: Arc::clone(&self.content),
            backend: Arc::clone(&self.backend),
            state: DashMap::new(),
            applied: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        }
    }

    pub fn log_len(&self) -> usize {
        lock(&self.backend.ops).len()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(IndexError::Closed);
        }
        Ok(())
    }

    /// Fold logged ops not yet in the view, at most `max`. Callers hold the
    /// log lock and pass its contents.
    fn fold_pending(&self, ops: &[Op], max: usize) -> usize {
        let start = self.applied.load(Ordering::Acquire);
        let pending = ops.get(start..).unwrap_or_default();
        let take = pending.len().min(max);
        for op in &pending[..take] {
            op.apply(&self.state);
        }
        self.applied.store(start + take, Ordering::Release);
        take
    }

    fn append(&self, op: Op) {
        let mut ops = lock(&self.backend.ops);
        self.fold_pending(&ops, usize::MAX);
        op.apply(&self.state);
        ops.push(op);
        self.applied.store(ops.len(), Ordering::Release);
    }
}

impl MetadataIndex for MemoryIndex {
    fn address(&self) -> &IndexAddress {
        &self.address
    }

    fn identity(&self) -> &str {
        &self.identity
    }

    fn put(&self, key: &str, value: Vec<u8>) -> Result<()> {
        self.ensure_open()?;
        self.append(Op::Put {
            key: key.to_string(),
            value,
        });
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.ensure_open()?;
        Ok(self.state.get(key).map(|v| v.value().clone()))
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.ensure_open()?;
        if self.state.contains_key(key) {
            self.append(Op::Delete {
                key: key.to_string(),
            });
        }
        Ok(())
    }

    fn all(&self) -> Result<BTreeMap<String, Vec<u8>>> {
        self.ensure_open()?;
        Ok(self
            .state
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect())
    }

    fn load_snapshot(&self) -> Result<Option<SnapshotId>> {
        self.ensure_open()?;
        let Some(id) = *lock(&self.backend.head) else {
            return Ok(None);
        };

        let mut bytes = Vec::new();
        self.content.get(&id)?.read_to_end(&mut bytes)?;
        let snapshot = Snapshot::decode(&bytes, &self.address)?;

        let _ops = lock(&self.backend.ops);
        let seq = snapshot.seq as usize;
        snapshot.restore_into(&self.state);
        self.applied.store(seq, Ordering::Release);
        Ok(Some(id))
    }

    fn replay(&self, limit: Option<usize>) -> Result<usize> {
        self.ensure_open()?;
        let ops = lock(&self.backend.ops);
        Ok(self.fold_pending(&ops, limit.unwrap_or(usize::MAX)))
    }

    fn save_snapshot(&self) -> Result<SnapshotId> {
        self.ensure_open()?;
        let bytes = {
            let ops = lock(&self.backend.ops);
            self.fold_pending(&ops, usize::MAX);
            let seq = self.applied.load(Ordering::Acquire) as u64;
            Snapshot::capture(&self.address, seq, &self.state).encode()?
        };
        let id = self.content.add(&mut bytes.as_slice())?;

        let previous = lock(&self.backend.head).replace(id);
        if let Some(previous) = previous.filter(|p| *p != id) {
            if let Err(e) = self.content.unpin(&previous) {
                tracing::warn!(snapshot = %previous, "Failed to unpin superseded snapshot: {}", e);
            }
        }
        Ok(id)
    }

    fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}
