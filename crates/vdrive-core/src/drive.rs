//! The drive: key → file orchestration over a content store, a metadata index
//! and an access controller.
//!
//! Pin/index ordering:
//! - add: content is pinned before the record is written, so a record never
//!   points at collectible content. A failed index write leaves an inert
//!   pinned orphan.
//! - remove: content is unpinned (only if currently pinned) before the record
//!   is deleted, so a retried remove after a partial failure still succeeds.

use std::fmt;
use std::fs;
use std::io::{self, Read, SeekFrom};
use std::path::Path;
use std::sync::Arc;

use tracing::field::display;
use vdrive_cas::{ContentId, ContentStore, ContentStream};
use vdrive_config::{log_drive_debug, log_drive_info, log_drive_warn, log_index_info, log_index_warn};
use vdrive_index::{AccessController, IndexAddress, LmdbIndex, MetadataIndex, SnapshotId};

use crate::codec::Codec;
use crate::{Context, DriveError, File, ListResult, OpenOptions, Result};

pub struct Drive {
    name: String,
    address: IndexAddress,
    identity: String,
    content: Arc<dyn ContentStore>,
    index: Arc<dyn MetadataIndex>,
    access: Arc<dyn AccessController>,
    codec: Arc<dyn Codec>,
}

impl Drive {
    /// Open the drive named or addressed by `resolve`, backed by an LMDB
    /// index under `options.directory`.
    ///
    /// Without `create`, a drive that does not exist locally fails with an
    /// index `NotFound`.
    pub fn open(
        content: Arc<dyn ContentStore>,
        resolve: &str,
        options: OpenOptions,
    ) -> Result<Self> {
        if resolve.is_empty() {
            return Err(DriveError::InvalidArgument("resolve name must not be empty"));
        }
        let address = IndexAddress::resolve(resolve)?;

        let index = LmdbIndex::open(
            &options.directory,
            address,
            options.create,
            Arc::clone(&content),
        )?;
        let access: Arc<dyn AccessController> = match &options.access_controller {
            Some(access) => Arc::clone(access),
            None => Arc::new(index.access_controller()),
        };

        Self::from_parts(content, Arc::new(index), access, options)
    }

    /// Build a drive from already-open collaborators and restore its view.
    pub fn from_parts(
        content: Arc<dyn ContentStore>,
        index: Arc<dyn MetadataIndex>,
        access: Arc<dyn AccessController>,
        options: OpenOptions,
    ) -> Result<Self> {
        let address = index.address().clone();
        let drive = Self {
            name: address.name().to_string(),
            identity: index.identity().to_string(),
            address,
            content,
            index,
            access,
            codec: options.codec,
        };
        drive.restore(options.replay_limit)?;
        Ok(drive)
    }

    /// Load the latest snapshot, then replay newer log entries.
    ///
    /// A missing snapshot starts from an empty view. An unreadable one is
    /// logged and the full log is replayed instead, ignoring `replay_limit`.
    fn restore(&self, replay_limit: Option<usize>) -> Result<()> {
        let limit = match self.index.load_snapshot() {
            Ok(Some(id)) => {
                log_index_info!("Restored snapshot", address = display(&self.address), snapshot = display(id));
                replay_limit
            }
            Ok(None) => replay_limit,
            Err(e) => {
                log_index_warn!(
                    "Snapshot unavailable, replaying full log",
                    address = display(&self.address),
                    error = display(&e)
                );
                None
            }
        };
        let replayed = self.index.replay(limit)?;
        log_drive_debug!("Drive opened", name = self.name.as_str(), replayed = replayed);
        Ok(())
    }

    /// Human-readable drive name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Fully qualified index address, `/vdrive/<hash>/<name>`.
    pub fn address(&self) -> &IndexAddress {
        &self.address
    }

    /// Local identity recorded as the owner of added files.
    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn content_store(&self) -> &Arc<dyn ContentStore> {
        &self.content
    }

    /// Add the local file at `path` under `key`.
    pub fn add_file(&self, cx: &Context, key: &str, path: impl AsRef<Path>) -> Result<File> {
        let path = path.as_ref();
        if key.is_empty() {
            return Err(DriveError::InvalidArgument("key must not be empty"));
        }
        if path.as_os_str().is_empty() {
            return Err(DriveError::InvalidArgument("source path must not be empty"));
        }
        cx.check()?;

        let source = fs::File::open(path)?;
        self.add(cx, key, source)
    }

    /// Store everything `reader` yields under `key`, replacing any previous
    /// record. The superseded content stays pinned.
    pub fn add(&self, cx: &Context, key: &str, reader: impl Read) -> Result<File> {
        if key.is_empty() {
            return Err(DriveError::InvalidArgument("key must not be empty"));
        }
        cx.check()?;

        let mut counting = CountingReader::new(reader, cx);
        let id = match self.content.add(&mut counting) {
            Ok(id) => id,
            Err(_) if cx.is_done() => return Err(DriveError::Cancelled),
            Err(e) => return Err(e.into()),
        };
        let size = counting.count;

        if cx.is_done() {
            self.release_orphan(&id);
            return Err(DriveError::Cancelled);
        }

        let file = File::new(key, id, size, self.identity.as_str());
        let encoded = self
            .codec
            .marshal(&file)
            .map_err(|source| DriveError::Encode {
                key: key.to_string(),
                source,
            })?;

        if let Err(e) = self.index.put(key, encoded) {
            log_drive_warn!(
                "Index write failed, content left pinned",
                key = key,
                cid = display(id),
                error = display(&e)
            );
            return Err(e.into());
        }

        log_drive_info!("File added", key = key, cid = display(id), size = size);
        Ok(file)
    }

    /// Best-effort unpin of content whose record was never written.
    fn release_orphan(&self, id: &ContentId) {
        if let Err(e) = self.content.unpin(id) {
            log_drive_warn!(
                "Failed to unpin cancelled content",
                cid = display(id),
                error = display(&e)
            );
        }
    }

    /// Open the content stored under `key`.
    pub fn get(&self, cx: &Context, key: &str) -> Result<ContentStream> {
        let file = self.stat(key)?;
        cx.check()?;
        Ok(self.content.get(&file.content_id)?)
    }

    /// Look up the record for `key` without touching content.
    pub fn stat(&self, key: &str) -> Result<File> {
        if key.is_empty() {
            return Err(DriveError::InvalidArgument("key must not be empty"));
        }
        let bytes = self
            .index
            .get(key)?
            .ok_or_else(|| DriveError::NotFound(key.to_string()))?;
        self.decode(key, &bytes)
    }

    fn decode(&self, key: &str, bytes: &[u8]) -> Result<File> {
        self.codec
            .unmarshal(bytes)
            .map_err(|source| DriveError::CorruptRecord {
                key: key.to_string(),
                source,
            })
    }

    /// Records whose key contains `prefix` anywhere, sorted by key.
    ///
    /// Records that fail to decode are logged and skipped.
    pub fn list(&self, prefix: &str) -> Result<ListResult> {
        let files = self
            .index
            .all()?
            .into_iter()
            .filter(|(key, _)| key.contains(prefix))
            .filter_map(|(key, bytes)| match self.decode(&key, &bytes) {
                Ok(file) => Some(file),
                Err(e) => {
                    log_drive_warn!("Skipping unreadable record", key = key.as_str(), error = display(&e));
                    None
                }
            })
            .collect();
        Ok(ListResult::new(files))
    }

    /// Unpin the content behind `key` (if pinned) and delete the record.
    pub fn remove(&self, cx: &Context, key: &str) -> Result<()> {
        let file = self.stat(key)?;
        cx.check()?;

        if self.content.is_pinned(&file.content_id)? {
            self.content.unpin(&file.content_id)?;
        }
        self.index.delete(key)?;

        log_drive_info!("File removed", key = key, cid = display(file.content_id));
        Ok(())
    }

    pub fn grant(&self, identity: &str, permission: &str) -> Result<()> {
        self.access.grant(permission, identity)?;
        log_drive_info!("Permission granted", identity = identity, permission = permission);
        Ok(())
    }

    pub fn revoke(&self, identity: &str, permission: &str) -> Result<()> {
        self.access.revoke(permission, identity)?;
        log_drive_info!("Permission revoked", identity = identity, permission = permission);
        Ok(())
    }

    /// Identities holding `permission`.
    pub fn granted(&self, permission: &str) -> Result<Vec<String>> {
        Ok(self.access.granted(permission)?)
    }

    /// Save a snapshot of the current view.
    pub fn snapshot(&self, cx: &Context) -> Result<SnapshotId> {
        cx.check()?;
        Ok(self.index.save_snapshot()?)
    }

    /// Snapshot, then close the index.
    ///
    /// A failed snapshot is logged and does not stop the close; the next open
    /// falls back to a longer log replay.
    pub fn close(self, cx: &Context) -> Result<()> {
        match self.snapshot(cx) {
            Ok(id) => log_drive_info!("Snapshot saved", name = self.name.as_str(), snapshot = display(id)),
            Err(e) => log_drive_warn!(
                "Snapshot failed on close",
                name = self.name.as_str(),
                error = display(&e)
            ),
        }
        self.index.close()?;
        log_drive_debug!("Drive closed", name = self.name.as_str());
        Ok(())
    }
}

impl fmt::Debug for Drive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Drive")
            .field("name", &self.name)
            .field("address", &self.address.to_string())
            .field("identity", &self.identity)
            .finish()
    }
}

/// Read at most `len` bytes of `stream` starting at `offset`.
///
/// Fails with [`DriveError::InvalidSeek`] when the stream cannot seek.
pub fn read_range(stream: &mut ContentStream, offset: u64, len: usize) -> Result<Vec<u8>> {
    stream
        .seek(SeekFrom::Start(offset))
        .map_err(DriveError::InvalidSeek)?;
    let mut buf = Vec::with_capacity(len.min(1 << 20));
    stream.take(len as u64).read_to_end(&mut buf)?;
    Ok(buf)
}

/// Counts bytes passed through and stops once the context is done.
struct CountingReader<'a, R> {
    inner: R,
    cx: &'a Context,
    count: u64,
}

impl<'a, R: Read> CountingReader<'a, R> {
    fn new(inner: R, cx: &'a Context) -> Self {
        Self { inner, cx, count: 0 }
    }
}

impl<R: Read> Read for CountingReader<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.cx.is_done() {
            return Err(io::Error::new(io::ErrorKind::Other, "operation cancelled"));
        }
        let n = self.inner.read(buf)?;
        self.count += n as u64;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CodecError, JsonCodec};
    use vdrive_cas::MemoryStore;
    use vdrive_index::{MemoryAccessController, MemoryIndex};

    struct Harness {
        drive: Drive,
        store: Arc<MemoryStore>,
        index: Arc<MemoryIndex>,
    }

    fn harness_with(store: MemoryStore) -> Harness {
        let store = Arc::new(store);
        let index = Arc::new(MemoryIndex::new(
            IndexAddress::determine("unit").unwrap(),
            "me",
            store.clone(),
        ));
        let drive = Drive::from_parts(
            store.clone(),
            index.clone(),
            Arc::new(MemoryAccessController::new()),
            OpenOptions::new(),
        )
        .unwrap();
        Harness { drive, store, index }
    }

    fn harness() -> Harness {
        harness_with(MemoryStore::new())
    }

    fn read_all(mut stream: ContentStream) -> Vec<u8> {
        let mut out = Vec::new();
        stream.read_to_end(&mut out).unwrap();
        out
    }

    #[test]
    fn test_add_get_roundtrip() {
        let h = harness();
        let cx = Context::background();
        let file = h.drive.add(&cx, "hello.txt", &b"hello world"[..]).unwrap();

        assert_eq!(file.size, 11);
        assert_eq!(file.owner, "me");
        assert_eq!(read_all(h.drive.get(&cx, "hello.txt").unwrap()), b"hello world");
        assert_eq!(h.drive.stat("hello.txt").unwrap(), file);
    }

    #[test]
    fn test_empty_payload_is_a_valid_file() {
        let h = harness();
        let cx = Context::background();
        let file = h.drive.add(&cx, "empty", io::empty()).unwrap();
        assert_eq!(file.size, 0);
        assert!(read_all(h.drive.get(&cx, "empty").unwrap()).is_empty());
    }

    #[test]
    fn test_empty_key_rejected_without_side_effects() {
        let h = harness();
        let cx = Context::background();

        assert!(matches!(h.drive.add(&cx, "", &b"x"[..]), Err(DriveError::InvalidArgument(_))));
        assert!(matches!(h.drive.add_file(&cx, "", "/etc/hosts"), Err(DriveError::InvalidArgument(_))));
        assert!(matches!(h.drive.add_file(&cx, "k", ""), Err(DriveError::InvalidArgument(_))));
        assert!(matches!(h.drive.get(&cx, ""), Err(DriveError::InvalidArgument(_))));
        assert!(matches!(h.drive.stat(""), Err(DriveError::InvalidArgument(_))));

        assert!(h.store.is_empty());
        assert_eq!(h.index.log_len(), 0);
    }

    #[test]
    fn test_missing_key() {
        let h = harness();
        let cx = Context::background();
        assert!(h.drive.stat("nope").unwrap_err().is_not_found());
        assert!(h.drive.get(&cx, "nope").unwrap_err().is_not_found());
        assert!(h.drive.remove(&cx, "nope").unwrap_err().is_not_found());
    }

    #[test]
    fn test_pin_invariant_and_idempotent_remove() {
        let h = harness();
        let cx = Context::background();
        let file = h.drive.add(&cx, "doc", &b"pinned bytes"[..]).unwrap();
        assert!(h.store.is_pinned(&file.content_id).unwrap());

        h.drive.remove(&cx, "doc").unwrap();
        assert!(!h.store.is_pinned(&file.content_id).unwrap());
        assert!(h.drive.remove(&cx, "doc").unwrap_err().is_not_found());
    }

    #[test]
    fn test_remove_retry_after_external_unpin() {
        let h = harness();
        let cx = Context::background();
        let file = h.drive.add(&cx, "doc", &b"bytes"[..]).unwrap();

        // Simulate a remove that unpinned but crashed before deleting.
        h.store.unpin(&file.content_id).unwrap();
        h.drive.remove(&cx, "doc").unwrap();
        assert!(h.drive.stat("doc").unwrap_err().is_not_found());
    }

    #[test]
    fn test_superseding_add_keeps_old_content_pinned() {
        let h = harness();
        let cx = Context::background();
        let first = h.drive.add(&cx, "k", &b"v1"[..]).unwrap();
        let second = h.drive.add(&cx, "k", &b"v2"[..]).unwrap();

        assert_eq!(read_all(h.drive.get(&cx, "k").unwrap()), b"v2");
        assert!(h.store.is_pinned(&first.content_id).unwrap());
        assert!(h.store.is_pinned(&second.content_id).unwrap());
        assert_eq!(h.drive.list("").unwrap().len(), 1);
    }

    #[test]
    fn test_list_substring_filter() {
        let h = harness();
        let cx = Context::background();
        for key in ["xyz", "abcd", "abc"] {
            h.drive.add(&cx, key, key.as_bytes()).unwrap();
        }

        assert_eq!(h.drive.list("ab").unwrap().keys(), vec!["abc", "abcd"]);
        assert_eq!(h.drive.list("").unwrap().keys(), vec!["abc", "abcd", "xyz"]);
        assert_eq!(h.drive.list("bc").unwrap().keys(), vec!["abc", "abcd"]);
        assert!(h.drive.list("nothing").unwrap().is_empty());
    }

    #[test]
    fn test_corrupt_record() {
        let h = harness();
        let cx = Context::background();
        h.drive.add(&cx, "good", &b"ok"[..]).unwrap();
        h.index.put("bad", b"{not json".to_vec()).unwrap();

        assert!(matches!(h.drive.stat("bad"), Err(DriveError::CorruptRecord { .. })));
        assert!(matches!(h.drive.get(&cx, "bad"), Err(DriveError::CorruptRecord { .. })));
        assert_eq!(h.drive.list("").unwrap().keys(), vec!["good"]);
    }

    #[test]
    fn test_content_store_failure_writes_no_record() {
        let h = harness();
        let cx = Context::background();
        h.store.reject_adds(true);

        assert!(matches!(h.drive.add(&cx, "k", &b"x"[..]), Err(DriveError::ContentStore(_))));
        assert_eq!(h.index.log_len(), 0);
    }

    #[test]
    fn test_cancelled_before_add() {
        let h = harness();
        let cx = Context::background();
        cx.cancel();
        assert!(matches!(h.drive.add(&cx, "k", &b"x"[..]), Err(DriveError::Cancelled)));
        assert!(h.store.is_empty());
    }

    #[test]
    fn test_cancelled_mid_stream() {
        struct CancelAfterFirstRead<'a> {
            cx: &'a Context,
            sent: bool,
        }
        impl Read for CancelAfterFirstRead<'_> {
            fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
                if self.sent {
                    return Ok(0);
                }
                self.sent = true;
                self.cx.cancel();
                buf[0] = b'x';
                Ok(1)
            }
        }

        let h = harness();
        let cx = Context::background();
        let reader = CancelAfterFirstRead { cx: &cx, sent: false };
        assert!(matches!(h.drive.add(&cx, "k", reader), Err(DriveError::Cancelled)));
        assert_eq!(h.store.pinned_count(), 0);
        assert_eq!(h.index.log_len(), 0);
    }

    #[test]
    fn test_grant_revoke() {
        let h = harness();
        h.drive.grant("peer-1", "write").unwrap();
        h.drive.grant("peer-1", "write").unwrap();
        assert_eq!(h.drive.granted("write").unwrap(), vec!["peer-1"]);
        h.drive.revoke("peer-1", "write").unwrap();
        assert!(h.drive.granted("write").unwrap().is_empty());
        assert!(matches!(h.drive.grant("", "write"), Err(DriveError::Permission(_))));
    }

    #[test]
    fn test_snapshot_recovery_without_replay() {
        let h = harness();
        let cx = Context::background();
        for i in 0..5 {
            h.drive.add(&cx, &format!("file-{i}"), format!("{i}").as_bytes()).unwrap();
        }
        let index = h.index.clone();
        let store = h.store.clone();
        h.drive.close(&cx).unwrap();

        let reopened = Drive::from_parts(
            store,
            Arc::new(index.reopen()),
            Arc::new(MemoryAccessController::new()),
            OpenOptions::new().replay_limit(Some(0)),
        )
        .unwrap();
        assert_eq!(reopened.list("").unwrap().len(), 5);
        assert_eq!(read_all(reopened.get(&cx, "file-3").unwrap()), b"3");
    }

    #[test]
    fn test_write_after_snapshot_only_open_keeps_log_tail() {
        let h = harness();
        let cx = Context::background();
        h.drive.add(&cx, "a", &b"1"[..]).unwrap();
        h.drive.snapshot(&cx).unwrap();
        h.drive.add(&cx, "tail", &b"2"[..]).unwrap();
        let (index, store) = (h.index.clone(), h.store.clone());
        drop(h);

        let bounded_index = Arc::new(index.reopen());
        let bounded = Drive::from_parts(
            store.clone(),
            bounded_index.clone(),
            Arc::new(MemoryAccessController::new()),
            OpenOptions::new().replay_limit(Some(0)),
        )
        .unwrap();
        assert_eq!(bounded.list("").unwrap().keys(), vec!["a"]);
        bounded.add(&cx, "new", &b"3"[..]).unwrap();
        bounded.close(&cx).unwrap();

        let full = Drive::from_parts(
            store,
            Arc::new(bounded_index.reopen()),
            Arc::new(MemoryAccessController::new()),
            OpenOptions::new(),
        )
        .unwrap();
        assert_eq!(full.list("").unwrap().keys(), vec!["a", "new", "tail"]);
    }

    struct RejectingCodec;

    impl Codec for RejectingCodec {
        fn name(&self) -> &'static str {
            "rejecting"
        }

        fn marshal(&self, _file: &File) -> std::result::Result<Vec<u8>, CodecError> {
            Err(CodecError {
                codec: self.name(),
                message: "cannot encode".into(),
            })
        }

        fn unmarshal(&self, bytes: &[u8]) -> std::result::Result<File, CodecError> {
            JsonCodec.unmarshal(bytes)
        }
    }

    #[test]
    fn test_encode_failure_is_not_a_corrupt_record() {
        let store = Arc::new(MemoryStore::new());
        let index = Arc::new(MemoryIndex::new(
            IndexAddress::determine("encode").unwrap(),
            "me",
            store.clone(),
        ));
        let drive = Drive::from_parts(
            store,
            index.clone(),
            Arc::new(MemoryAccessController::new()),
            OpenOptions::new().codec(Arc::new(RejectingCodec)),
        )
        .unwrap();

        let err = drive.add(&Context::background(), "k", &b"v"[..]).unwrap_err();
        assert!(matches!(err, DriveError::Encode { ref key, .. } if key == "k"));
        assert!(index.all().unwrap().is_empty());
    }

    #[test]
    fn test_close_survives_snapshot_failure() {
        let h = harness();
        let cx = Context::background();
        h.drive.add(&cx, "k", &b"v"[..]).unwrap();
        h.store.reject_adds(true);
        h.drive.close(&cx).unwrap();
    }

    #[test]
    fn test_read_range() {
        let h = harness();
        let cx = Context::background();
        h.drive.add(&cx, "k", &b"0123456789"[..]).unwrap();

        let mut stream = h.drive.get(&cx, "k").unwrap();
        assert_eq!(read_range(&mut stream, 3, 4).unwrap(), b"3456");
        assert_eq!(read_range(&mut stream, 8, 100).unwrap(), b"89");
        assert!(read_range(&mut stream, 20, 4).unwrap().is_empty());
    }

    #[test]
    fn test_read_range_on_sequential_stream() {
        let h = harness_with(MemoryStore::new().with_sequential_reads());
        let cx = Context::background();
        h.drive.add(&cx, "k", &b"abc"[..]).unwrap();

        let mut stream = h.drive.get(&cx, "k").unwrap();
        assert!(matches!(read_range(&mut stream, 1, 1), Err(DriveError::InvalidSeek(_))));
    }
}
