//! LMDB-backed metadata index with op log and content-addressed snapshots.
//!
//! Dual-layer layout:
//! - Durable layer (LMDB): append-only op log keyed by sequence number, plus
//!   the snapshot head pointer and access control lists
//! - View layer (DashMap): the current key → value mapping, rebuilt on open
//!   from the latest snapshot and a replay of newer ops
//!
//! Snapshots are bincode dumps written through the [`ContentStore`], so the
//! head pointer is just a content id.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use dashmap::DashMap;
use heed::byteorder::BigEndian;
use heed::types::{DecodeIgnore, SerdeBincode, Str, U64};
use heed::{Database, Env, EnvOpenOptions};
use tracing::{debug, info, warn};
use vdrive_cas::{ContentId, ContentStore};

use crate::access::LmdbAccessController;
use crate::oplog::{Op, Snapshot};
use crate::{IndexAddress, IndexError, MetadataIndex, Result, SnapshotId, WRITE_PERMISSION};

type OpsDb = Database<U64<BigEndian>, SerdeBincode<Op>>;
pub(crate) type AclDb = Database<Str, SerdeBincode<BTreeSet<String>>>;

const SNAPSHOT_HEAD: &str = "snapshot";
const IDENTITY_FILE: &str = "identity";

pub struct LmdbIndex {
    env: Env,

    /// Sequence number → op
    ops_db: OpsDb,

    /// Head pointers (latest snapshot id)
    meta_db: Database<Str, Str>,

    /// Permission → identities
    acl_db: AclDb,

    address: IndexAddress,
    identity: String,
    path: PathBuf,
    content: Arc<dyn ContentStore>,

    /// Current view
    state: DashMap<String, Vec<u8>>,

    /// Highest op sequence folded into `state`
    applied_seq: AtomicU64,

    /// Serializes append-then-apply so log order matches view order
    write_lock: Mutex<()>,

    closed: AtomicBool,
}

impl LmdbIndex {
    /// Default LMDB map size: 1GB (expandable)
    const DEFAULT_MAP_SIZE: usize = 1024 * 1024 * 1024;

    /// Maximum readers
    const MAX_READERS: u32 = 128;

    /// Open the index for `address` below `directory`.
    ///
    /// The index lives at `<directory>/<hash>/<name>`. Without `create`, a
    /// missing index fails with [`IndexError::NotFound`]. A freshly created
    /// index grants `write` to the local identity.
    pub fn open<P: AsRef<Path>>(
        directory: P,
        address: IndexAddress,
        create: bool,
        content: Arc<dyn ContentStore>,
    ) -> Result<Self> {
        let directory = directory.as_ref();
        let path = address.local_path(directory);
        let is_new = !path.join("data.mdb").exists();

        if is_new && !create {
            return Err(IndexError::NotFound(address.to_string()));
        }

        fs::create_dir_all(&path)?;
        let identity = load_or_create_identity(directory)?;

        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(Self::DEFAULT_MAP_SIZE)
                .max_readers(Self::MAX_READERS)
                .max_dbs(3)
                .open(&path)?
        };

        let mut wtxn = env.write_txn()?;
        let ops_db: OpsDb = env.create_database(&mut wtxn, Some("ops"))?;
        let meta_db: Database<Str, Str> = env.create_database(&mut wtxn, Some("meta"))?;
        let acl_db: AclDb = env.create_database(&mut wtxn, Some("acl"))?;
        if is_new {
            let mut writers = BTreeSet::new();
            writers.insert(identity.clone());
            acl_db.put(&mut wtxn, WRITE_PERMISSION, &writers)?;
        }
        wtxn.commit()?;

        if is_new {
            info!(address = %address, "Created index at {:?}", path);
        } else {
            debug!(address = %address, "Opened index at {:?}", path);
        }

        Ok(Self {
            env,
            ops_db,
            meta_db,
            acl_db,
            address,
            identity,
            path,
            content,
            state: DashMap::new(),
            applied_seq: AtomicU64::new(0),
            write_lock: Mutex::new(()),
            closed: AtomicBool::new(false),
        })
    }

    /// Access controller sharing this index's environment.
    pub fn access_controller(&self) -> LmdbAccessController {
        LmdbAccessController::new(self.env.clone(), self.acl_db)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of entries in the op log.
    pub fn log_len(&self) -> Result<u64> {
        let rtxn = self.env.read_txn()?;
        Ok(self.ops_db.len(&rtxn)?)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(IndexError::Closed);
        }
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        self.write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Fold logged ops newer than `applied_seq` into the view, at most `max`.
    /// Callers hold `write_lock`.
    fn fold_pending(&self, txn: &heed::RoTxn<'_>, max: usize) -> Result<usize> {
        let start = self.applied_seq.load(Ordering::Acquire) + 1;

        let mut applied = 0usize;
        let mut last = None;
        for entry in self.ops_db.range(txn, &(start..))? {
            if applied >= max {
                break;
            }
            let (seq, op) = entry?;
            op.apply(&self.state);
            last = Some(seq);
            applied += 1;
        }

        if let Some(seq) = last {
            self.applied_seq.store(seq, Ordering::Release);
        }
        Ok(applied)
    }

    /// Append `op` to the log, then fold it into the view.
    ///
    /// Ops left behind by a bounded replay are folded first, so `applied_seq`
    /// never moves past an entry the view has not seen.
    fn append(&self, op: Op) -> Result<()> {
        let _guard = self.lock();

        let mut wtxn = self.env.write_txn()?;
        let behind = self.fold_pending(&wtxn, usize::MAX)?;
        if behind > 0 {
            debug!(address = %self.address, behind, "Caught up op log before write");
        }
        let seq = self
            .ops_db
            .remap_data_type::<DecodeIgnore>()
            .last(&wtxn)?
            .map(|(seq, _)| seq + 1)
            .unwrap_or(1);
        self.ops_db.put(&mut wtxn, &seq, &op)?;
        wtxn.commit()?;

        op.apply(&self.state);
        self.applied_seq.store(seq, Ordering::Release);
        Ok(())
    }

    fn snapshot_head(&self) -> Result<Option<ContentId>> {
        let rtxn = self.env.read_txn()?;
        match self.meta_db.get(&rtxn, SNAPSHOT_HEAD)? {
            Some(hex) => Ok(Some(ContentId::from_hex(hex)?)),
            None => Ok(None),
        }
    }
}

impl MetadataIndex for LmdbIndex {
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
        })
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.ensure_open()?;
        Ok(self.state.get(key).map(|v| v.value().clone()))
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.ensure_open()?;
        if !self.state.contains_key(key) {
            return Ok(());
        }
        self.append(Op::Delete {
            key: key.to_string(),
        })
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
        let Some(id) = self.snapshot_head()? else {
            debug!(address = %self.address, "No snapshot to load");
            return Ok(None);
        };

        let mut bytes = Vec::new();
        self.content
            .get(&id)?
            .read_to_end(&mut bytes)
            .map_err(IndexError::Io)?;
        let snapshot = Snapshot::decode(&bytes, &self.address)?;

        let _guard = self.lock();
        let seq = snapshot.seq;
        let entries = snapshot.entries.len();
        snapshot.restore_into(&self.state);
        self.applied_seq.store(seq, Ordering::Release);

        info!(address = %self.address, snapshot = %id, seq, entries, "Loaded snapshot");
        Ok(Some(id))
    }

    fn replay(&self, limit: Option<usize>) -> Result<usize> {
        self.ensure_open()?;
        let _guard = self.lock();

        let rtxn = self.env.read_txn()?;
        let applied = self.fold_pending(&rtxn, limit.unwrap_or(usize::MAX))?;
        debug!(address = %self.address, applied, "Replayed op log");
        Ok(applied)
    }

    fn save_snapshot(&self) -> Result<SnapshotId> {
        self.ensure_open()?;
        let _guard = self.lock();

        // A snapshot must cover every op up to its seq.
        let behind = self.fold_pending(&self.env.read_txn()?, usize::MAX)?;
        if behind > 0 {
            debug!(address = %self.address, behind, "Caught up op log before snapshot");
        }
        let seq = self.applied_seq.load(Ordering::Acquire);
        let bytes = Snapshot::capture(&self.address, seq, &self.state).encode()?;
        let id = self.content.add(&mut bytes.as_slice())?;

        let previous = self.snapshot_head()?;
        let mut wtxn = self.env.write_txn()?;
        self.meta_db.put(&mut wtxn, SNAPSHOT_HEAD, &id.to_hex())?;
        wtxn.commit()?;

        if let Some(previous) = previous.filter(|p| *p != id) {
            if let Err(e) = self.content.unpin(&previous) {
                warn!(snapshot = %previous, "Failed to unpin superseded snapshot: {}", e);
            }
        }

        info!(address = %self.address, snapshot = %id, seq, "Saved snapshot");
        Ok(id)
    }

    fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.env.force_sync()?;
        debug!(address = %self.address, "Closed index");
        Ok(())
    }
}

/// Read the local writer identity, generating it on first use.
fn load_or_create_identity(directory: &Path) -> io::Result<String> {
    let path = directory.join(IDENTITY_FILE);
    if let Ok(existing) = fs::read_to_string(&path) {
        let existing = existing.trim();
        if !existing.is_empty() {
            return Ok(existing.to_string());
        }
    }

    let identity = uuid::Uuid::new_v4().to_string();
    fs::write(&path, &identity)?;
    Ok(identity)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AccessController;
    use tempfile::TempDir;
    use vdrive_cas::CasStore;

    struct Fixture {
        _temp: TempDir,
        index_dir: PathBuf,
        content: Arc<CasStore>,
    }

    fn fixture() -> Fixture {
        let temp = TempDir::new().unwrap();
        let content = Arc::new(CasStore::new(temp.path().join("cas")).unwrap());
        Fixture {
            index_dir: temp.path().join("index"),
            _temp: temp,
            content,
        }
    }

    fn open(f: &Fixture, create: bool) -> Result<LmdbIndex> {
        LmdbIndex::open(
            &f.index_dir,
            IndexAddress::determine("test").unwrap(),
            create,
            f.content.clone(),
        )
    }

    #[test]
    fn test_put_get_delete() {
        let f = fixture();
        let index = open(&f, true).unwrap();

        index.put("a", b"1".to_vec()).unwrap();
        index.put("b", b"2".to_vec()).unwrap();
        assert_eq!(index.get("a").unwrap(), Some(b"1".to_vec()));

        index.delete("a").unwrap();
        assert_eq!(index.get("a").unwrap(), None);
        assert_eq!(index.all().unwrap().len(), 1);
        assert_eq!(index.log_len().unwrap(), 3);
    }

    #[test]
    fn test_delete_missing_writes_nothing() {
        let f = fixture();
        let index = open(&f, true).unwrap();
        index.delete("ghost").unwrap();
        assert_eq!(index.log_len().unwrap(), 0);
    }

    #[test]
    fn test_missing_without_create() {
        let f = fixture();
        assert!(matches!(open(&f, false), Err(IndexError::NotFound(_))));
    }

    #[test]
    fn test_full_replay_after_reopen() {
        let f = fixture();
        let identity = {
            let index = open(&f, true).unwrap();
            index.put("a", b"1".to_vec()).unwrap();
            index.put("b", b"2".to_vec()).unwrap();
            index.delete("a").unwrap();
            index.close().unwrap();
            index.identity().to_string()
        };

        let index = open(&f, false).unwrap();
        assert_eq!(index.identity(), identity);
        assert_eq!(index.load_snapshot().unwrap(), None);
        assert_eq!(index.replay(None).unwrap(), 3);

        let all = index.all().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all["b"], b"2".to_vec());
    }

    #[test]
    fn test_snapshot_only_restore() {
        let f = fixture();
        {
            let index = open(&f, true).unwrap();
            for i in 0..10 {
                index.put(&format!("key{i}"), vec![i as u8]).unwrap();
            }
            index.save_snapshot().unwrap();
            index.put("late", b"x".to_vec()).unwrap();
            index.close().unwrap();
        }

        let index = open(&f, false).unwrap();
        assert!(index.load_snapshot().unwrap().is_some());
        assert_eq!(index.replay(Some(0)).unwrap(), 0);
        assert_eq!(index.all().unwrap().len(), 10);

        // The remaining tail is still available.
        assert_eq!(index.replay(None).unwrap(), 1);
        assert_eq!(index.get("late").unwrap(), Some(b"x".to_vec()));
    }

    #[test]
    fn test_bounded_replay() {
        let f = fixture();
        {
            let index = open(&f, true).unwrap();
            for i in 0..5 {
                index.put(&format!("k{i}"), vec![i]).unwrap();
            }
        }

        let index = open(&f, false).unwrap();
        assert_eq!(index.replay(Some(2)).unwrap(), 2);
        assert_eq!(index.all().unwrap().len(), 2);
        assert_eq!(index.replay(Some(10)).unwrap(), 3);
        assert_eq!(index.all().unwrap().len(), 5);
    }

    #[test]
    fn test_write_after_bounded_replay_keeps_unreplayed_ops() {
        let f = fixture();
        {
            let index = open(&f, true).unwrap();
            index.put("a", b"1".to_vec()).unwrap();
            index.save_snapshot().unwrap();
            index.put("tail", b"2".to_vec()).unwrap();
            index.close().unwrap();
        }

        {
            let index = open(&f, false).unwrap();
            index.load_snapshot().unwrap();
            assert_eq!(index.replay(Some(0)).unwrap(), 0);
            index.put("new", b"3".to_vec()).unwrap();
            assert_eq!(index.get("tail").unwrap(), Some(b"2".to_vec()));
            index.save_snapshot().unwrap();
            index.close().unwrap();
        }

        let index = open(&f, false).unwrap();
        index.load_snapshot().unwrap();
        index.replay(None).unwrap();
        let keys: Vec<String> = index.all().unwrap().into_keys().collect();
        assert_eq!(keys, vec!["a", "new", "tail"]);
    }

    #[test]
    fn test_snapshot_after_bounded_replay_covers_log() {
        let f = fixture();
        {
            let index = open(&f, true).unwrap();
            for i in 0..4 {
                index.put(&format!("k{i}"), vec![i]).unwrap();
            }
            index.close().unwrap();
        }

        {
            let index = open(&f, false).unwrap();
            assert_eq!(index.replay(Some(1)).unwrap(), 1);
            index.save_snapshot().unwrap();
            assert_eq!(index.all().unwrap().len(), 4);
            index.close().unwrap();
        }

        let index = open(&f, false).unwrap();
        index.load_snapshot().unwrap();
        assert_eq!(index.replay(Some(0)).unwrap(), 0);
        assert_eq!(index.all().unwrap().len(), 4);
    }

    #[test]
    fn test_new_snapshot_unpins_previous() {
        let f = fixture();
        let index = open(&f, true).unwrap();

        index.put("a", b"1".to_vec()).unwrap();
        let first = index.save_snapshot().unwrap();
        assert!(f.content.is_pinned(&first).unwrap());

        index.put("b", b"2".to_vec()).unwrap();
        let second = index.save_snapshot().unwrap();
        assert_ne!(first, second);
        assert!(f.content.is_pinned(&second).unwrap());
        assert!(!f.content.is_pinned(&first).unwrap());

        // Unchanged view saves the same blob and keeps it pinned.
        assert_eq!(index.save_snapshot().unwrap(), second);
        assert!(f.content.is_pinned(&second).unwrap());
    }

    #[test]
    fn test_closed_rejects_operations() {
        let f = fixture();
        let index = open(&f, true).unwrap();
        index.close().unwrap();
        index.close().unwrap();
        assert!(matches!(index.put("a", vec![]), Err(IndexError::Closed)));
        assert!(matches!(index.get("a"), Err(IndexError::Closed)));
        assert!(matches!(index.save_snapshot(), Err(IndexError::Closed)));
    }

    #[test]
    fn test_creator_has_write() {
        let f = fixture();
        let index = open(&f, true).unwrap();
        let acl = index.access_controller();
        assert_eq!(
            acl.granted(WRITE_PERMISSION).unwrap(),
            vec![index.identity().to_string()]
        );
    }
}
