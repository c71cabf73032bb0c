//! FUSE binding for [`DriveFs`].
//!
//! The drive is a flat namespace: inode 1 is the root directory and every
//! key seen through lookup, readdir or create gets an inode of its own.
//!
//! Inode bookkeeping and view lookups are answered on the session thread.
//! Calls that touch content (open, read, write, truncate, flush, release)
//! run on [`Workers`] and reply from there.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use anyhow::Context as _;
use fuser::{
    FileAttr, FileType, Filesystem, MountOption, ReplyAttr, ReplyCreate, ReplyData,
    ReplyDirectory, ReplyEmpty, ReplyEntry, ReplyOpen, ReplyWrite, Request, TimeOrNow,
};
use libc::c_int;
use vdrive_config::{log_fs_debug, log_fs_info, MountConfig};
use vdrive_core::{Context, Drive};

use crate::adapter::{DriveFs, Node, NodeAttr, NodeKind};
use crate::shutdown::{ShutdownSignal, Unmounter};
use crate::worker::Workers;
use crate::{close_shared, FsError};

const ROOT_INO: u64 = 1;
const TTL: Duration = Duration::from_secs(1);
/// Pending names may be created by another writer at any time.
const PENDING_TTL: Duration = Duration::ZERO;
const BLOCK_SIZE: u32 = 4096;

pub struct VdriveFs {
    workers: Workers,
    inodes: HashMap<u64, String>,
    keys: HashMap<String, u64>,
    next_ino: u64,
    uid: u32,
    gid: u32,
    shutdown: ShutdownSignal,
}

impl VdriveFs {
    pub fn new(workers: Workers, shutdown: ShutdownSignal) -> Self {
        // SAFETY: getuid/getgid have no preconditions and cannot fail.
        let (uid, gid) = unsafe { (libc::getuid(), libc::getgid()) };
        Self {
            workers,
            inodes: HashMap::new(),
            keys: HashMap::new(),
            next_ino: ROOT_INO + 1,
            uid,
            gid,
            shutdown,
        }
    }

    fn fs(&self) -> &DriveFs {
        self.workers.fs()
    }

    fn owner(&self) -> (u32, u32) {
        (self.uid, self.gid)
    }

    fn ino_for(&mut self, key: &str) -> u64 {
        if let Some(&ino) = self.keys.get(key) {
            return ino;
        }
        let ino = self.next_ino;
        self.next_ino += 1;
        self.inodes.insert(ino, key.to_string());
        self.keys.insert(key.to_string(), ino);
        ino
    }

    fn node_for(&self, ino: u64) -> Result<Node, FsError> {
        if ino == ROOT_INO {
            return Ok(Node::Directory);
        }
        let key = self.inodes.get(&ino).ok_or(FsError::NotFound)?;
        self.fs().lookup(key)
    }

    fn file_attr(&self, ino: u64, attr: NodeAttr) -> FileAttr {
        file_attr(ino, attr, self.owner())
    }

    fn ttl(node: &Node) -> &'static Duration {
        match node {
            Node::PendingFile { .. } => &PENDING_TTL,
            _ => &TTL,
        }
    }
}

fn file_attr(ino: u64, attr: NodeAttr, (uid, gid): (u32, u32)) -> FileAttr {
    let (kind, nlink) = match attr.kind {
        NodeKind::Directory => (FileType::Directory, 2),
        NodeKind::File => (FileType::RegularFile, 1),
    };
    FileAttr {
        ino,
        size: attr.size,
        blocks: attr.size.div_ceil(BLOCK_SIZE as u64),
        atime: attr.mtime,
        mtime: attr.mtime,
        ctime: attr.mtime,
        crtime: attr.mtime,
        kind,
        perm: attr.perm,
        nlink,
        uid,
        gid,
        rdev: 0,
        flags: 0,
        blksize: BLOCK_SIZE,
    }
}

fn is_write(flags: i32) -> bool {
    flags & libc::O_ACCMODE != libc::O_RDONLY
}

impl Filesystem for VdriveFs {
    fn destroy(&mut self) {
        self.workers.drain();
        log_fs_info!("Filesystem unmounted");
        self.shutdown.trigger();
    }

    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        if parent != ROOT_INO {
            reply.error(libc::ENOENT);
            return;
        }
        let Some(name) = name.to_str() else {
            reply.error(libc::ENOENT);
            return;
        };

        match self.fs().lookup(name) {
            // A pending name is reported as absent so the kernel issues create().
            Ok(Node::PendingFile { .. }) => reply.error(libc::ENOENT),
            Ok(node) => {
                let ino = self.ino_for(name);
                let attr = self.file_attr(ino, self.fs().attr(&node));
                reply.entry(Self::ttl(&node), &attr, 0);
            }
            Err(e) => reply.error(e.errno()),
        }
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, reply: ReplyAttr) {
        match self.node_for(ino) {
            Ok(node) => {
                let attr = self.file_attr(ino, self.fs().attr(&node));
                reply.attr(Self::ttl(&node), &attr);
            }
            Err(e) => reply.error(e.errno()),
        }
    }

    fn setattr(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _mode: Option<u32>,
        _uid: Option<u32>,
        _gid: Option<u32>,
        size: Option<u64>,
        _atime: Option<TimeOrNow>,
        _mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        if let (Some(size), Some(fh)) = (size, fh) {
            let key = self.inodes.get(&ino).cloned().unwrap_or_default();
            let owner = self.owner();
            self.workers.spawn(move |fs| match fs.truncate(fh, size) {
                Ok(()) => {
                    let attr = fs.attr(&Node::OpenDescriptor { fh, key });
                    reply.attr(&PENDING_TTL, &file_attr(ino, attr, owner));
                }
                Err(e) => reply.error(e.errno()),
            });
            return;
        }
        self.getattr(_req, ino, reply);
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        let node = match self.node_for(ino) {
            Ok(node) => node,
            Err(e) => {
                reply.error(e.errno());
                return;
            }
        };
        let write = is_write(flags);
        self.workers.spawn(move |fs| match fs.open(&node, write) {
            Ok(Node::OpenDescriptor { fh, .. }) => reply.opened(fh, 0),
            Ok(_) => reply.error(libc::EIO),
            Err(e) => reply.error(e.errno()),
        });
    }

    fn create(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        _mode: u32,
        _umask: u32,
        flags: i32,
        reply: ReplyCreate,
    ) {
        if parent != ROOT_INO {
            reply.error(libc::ENOENT);
            return;
        }
        let Some(name) = name.to_str() else {
            reply.error(libc::EINVAL);
            return;
        };

        // Opening a pending name only allocates a buffer; no content is read.
        let opened = self
            .fs()
            .lookup(name)
            .and_then(|node| self.fs().open(&node, true));
        match opened {
            Ok(node @ Node::OpenDescriptor { fh, .. }) => {
                let ino = self.ino_for(name);
                let attr = self.file_attr(ino, self.fs().attr(&node));
                reply.created(&PENDING_TTL, &attr, 0, fh, flags as u32);
            }
            Ok(_) => reply.error(libc::EIO),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        let Ok(offset) = u64::try_from(offset) else {
            reply.error(libc::EINVAL);
            return;
        };
        self.workers.spawn(move |fs| match fs.read(fh, offset, size as usize) {
            Ok(data) => reply.data(&data),
            Err(e) => reply.error(e.errno()),
        });
    }

    fn write(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        let Ok(offset) = u64::try_from(offset) else {
            reply.error(libc::EINVAL);
            return;
        };
        let data = data.to_vec();
        self.workers.spawn(move |fs| match fs.write(fh, offset, &data) {
            Ok(n) => reply.written(n as u32),
            Err(e) => reply.error(e.errno()),
        });
    }

    fn flush(&mut self, _req: &Request<'_>, _ino: u64, fh: u64, _lock_owner: u64, reply: ReplyEmpty) {
        self.workers.spawn(move |fs| match fs.flush(fh) {
            Ok(_) => reply.ok(),
            Err(e) => reply.error(e.errno()),
        });
    }

    fn release(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        self.workers.spawn(move |fs| match fs.release(fh) {
            Ok(_) => reply.ok(),
            Err(e) => reply.error(e.errno()),
        });
    }

    fn readdir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        if ino != ROOT_INO {
            reply.error(libc::ENOTDIR);
            return;
        }
        let files = match self.fs().read_dir() {
            Ok(files) => files,
            Err(e) => {
                reply.error(e.errno());
                return;
            }
        };

        let mut entries: Vec<(u64, FileType, String)> = vec![
            (ROOT_INO, FileType::Directory, ".".to_string()),
            (ROOT_INO, FileType::Directory, "..".to_string()),
        ];
        for file in files {
            let ino = self.ino_for(&file.key);
            entries.push((ino, FileType::RegularFile, file.key));
        }

        let skip = usize::try_from(offset).unwrap_or(0);
        for (i, (ino, kind, name)) in entries.into_iter().enumerate().skip(skip) {
            // offset of the next entry
            if reply.add(ino, (i + 1) as i64, kind, name) {
                break;
            }
        }
        reply.ok();
    }

    fn access(&mut self, _req: &Request<'_>, _ino: u64, _mask: c_int, reply: ReplyEmpty) {
        reply.ok();
    }
}

/// Mount `drive` at `mountpoint` and block until `shutdown` is triggered or
/// the filesystem is unmounted externally, then unmount and close the drive.
pub fn mount(
    drive: Arc<Drive>,
    mountpoint: &Path,
    config: &MountConfig,
    shutdown: ShutdownSignal,
) -> anyhow::Result<()> {
    let cx = Context::background();
    let adapter = DriveFs::with_context(Arc::clone(&drive), cx.clone())
        .with_max_file_size(config.max_file_size);
    let workers = Workers::new(adapter, config.workers).context("Failed to start worker pool")?;
    let fs = VdriveFs::new(workers, shutdown.clone());

    let mut opts = vec![
        MountOption::FSName(config.fs_name.clone()),
        MountOption::Subtype(config.subtype.clone()),
        MountOption::RW,
    ];
    if config.allow_other {
        opts.push(MountOption::AllowOther);
    }

    let session = fuser::spawn_mount2(fs, mountpoint, &opts)
        .with_context(|| format!("Failed to mount at {}", mountpoint.display()))?;
    log_fs_info!(
        "Mounted",
        drive = drive.name(),
        mountpoint = tracing::field::display(mountpoint.display())
    );

    // Joining drops the filesystem, which waits for in-flight worker jobs.
    let unmounter = Unmounter::new(move || session.join());
    shutdown.wait();
    if unmounter.unmount() {
        log_fs_debug!("Unmount requested");
    }

    close_shared(drive, &cx)?;
    Ok(())
}
