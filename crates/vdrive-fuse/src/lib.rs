//! # vdrive-fuse
//!
//! Presents a [`Drive`] as a mountable filesystem.
//!
//! - `adapter`: platform-independent node state machine and handle table
//! - `mount`: FUSE binding (Linux, `fuse` feature)
//! - `shutdown`: explicit shutdown signal and idempotent unmount
//! - `worker`: thread pool that serves blocking adapter calls
//!
//! The drive's keys form a single flat directory. Reads of committed files
//! seek the content stream; new files are buffered in memory and committed to
//! the drive when flushed or released.

pub mod adapter;
mod error;
pub mod shutdown;
pub mod worker;

#[cfg(all(feature = "fuse", target_os = "linux"))]
mod mount;

use std::sync::Arc;

use vdrive_config::log_fs_warn;
use vdrive_core::{Context, Drive, DriveError};

pub use adapter::{DriveFs, Node, NodeAttr, NodeKind};
pub use error::FsError;
pub use shutdown::{ShutdownSignal, Unmounter};
pub use worker::Workers;

#[cfg(all(feature = "fuse", target_os = "linux"))]
pub use mount::{mount, VdriveFs};

/// Close `drive` if this is the last reference, otherwise only snapshot it.
pub fn close_shared(drive: Arc<Drive>, cx: &Context) -> Result<(), DriveError> {
    match Arc::try_unwrap(drive) {
        Ok(drive) => drive.close(cx),
        Err(shared) => {
            log_fs_warn!("Drive still in use, saving snapshot without closing", drive = shared.name());
            shared.snapshot(cx).map(|_| ())
        }
    }
}

/// Dummy mount for non-Linux or non-feature builds
#[cfg(not(all(feature = "fuse", target_os = "linux")))]
pub fn mount(
    _drive: Arc<Drive>,
    _mountpoint: &std::path::Path,
    _config: &vdrive_config::MountConfig,
    _shutdown: ShutdownSignal,
) -> anyhow::Result<()> {
    #[cfg(not(target_os = "linux"))]
    anyhow::bail!(
        "FUSE support is only available on Linux (current: {})",
        std::env::consts::OS
    );
    #[cfg(target_os = "linux")]
    anyhow::bail!("vdrive-fuse was built without FUSE support. Compile with --features fuse to enable.");
}

#[cfg(test)]
mod tests {
    use super::*;
    use vdrive_cas::MemoryStore;
    use vdrive_core::OpenOptions;
    use vdrive_index::{IndexAddress, MemoryAccessController, MemoryIndex, MetadataIndex};

    fn drive() -> (Drive, Arc<MemoryIndex>) {
        let store = Arc::new(MemoryStore::new());
        let index = Arc::new(MemoryIndex::new(
            IndexAddress::determine("close").unwrap(),
            "me",
            store.clone(),
        ));
        let drive = Drive::from_parts(
            store,
            index.clone(),
            Arc::new(MemoryAccessController::new()),
            OpenOptions::new(),
        )
        .unwrap();
        (drive, index)
    }

    #[test]
    fn test_close_shared_last_reference_closes() {
        let (drive, index) = drive();
        close_shared(Arc::new(drive), &Context::background()).unwrap();
        assert!(index.all().is_err());
    }

    #[test]
    fn test_close_shared_snapshots_when_still_referenced() {
        let (drive, index) = drive();
        let drive = Arc::new(drive);
        let other = Arc::clone(&drive);
        close_shared(drive, &Context::background()).unwrap();

        assert!(index.all().is_ok());
        assert!(other.stat("missing").unwrap_err().is_not_found());
        assert!(index.reopen().load_snapshot().unwrap().is_some());
    }
}
