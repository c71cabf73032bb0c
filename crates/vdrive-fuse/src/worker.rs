//! Worker pool for adapter calls that can block on the index or content store.
//!
//! FUSE delivers every request on a single session thread. Committing a large
//! buffer or reading a cold blob runs here instead, so other handles keep
//! being served while it completes.

use std::sync::{Arc, Condvar, Mutex, MutexGuard};

use vdrive_config::log_fs_debug;

use crate::DriveFs;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|p| p.into_inner())
}

#[derive(Default)]
struct InFlight {
    count: Mutex<usize>,
    idle: Condvar,
}

impl InFlight {
    fn start(&self) {
        *lock(&self.count) += 1;
    }

    fn finish(&self) {
        let mut count = lock(&self.count);
        *count -= 1;
        if *count == 0 {
            self.idle.notify_all();
        }
    }
}

/// A [`DriveFs`] shared with a fixed set of worker threads.
///
/// Dropping the pool waits for every spawned job, so the adapter (and with
/// it the drive) is released by the time the drop returns.
pub struct Workers {
    fs: Arc<DriveFs>,
    pool: rayon::ThreadPool,
    in_flight: Arc<InFlight>,
}

impl Workers {
    pub fn new(fs: DriveFs, threads: usize) -> Result<Self, rayon::ThreadPoolBuildError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads.max(1))
            .thread_name(|i| format!("vdrive-fs-{}", i))
            .build()?;
        log_fs_debug!("Worker pool started", threads = pool.current_num_threads());
        Ok(Self {
            fs: Arc::new(fs),
            pool,
            in_flight: Arc::default(),
        })
    }

    /// The adapter, for calls cheap enough to answer inline.
    pub fn fs(&self) -> &DriveFs {
        &self.fs
    }

    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Run `job` on a worker thread.
    pub fn spawn<F>(&self, job: F)
    where
        F: FnOnce(&DriveFs) + Send + 'static,
    {
        self.in_flight.start();
        let fs = Arc::clone(&self.fs);
        let in_flight = Arc::clone(&self.in_flight);
        self.pool.spawn(move || {
            job(&fs);
            drop(fs);
            in_flight.finish();
        });
    }

    /// Jobs spawned but not yet finished.
    pub fn pending(&self) -> usize {
        *lock(&self.in_flight.count)
    }

    /// Block until every spawned job has finished.
    pub fn drain(&self) {
        let mut count = lock(&self.in_flight.count);
        while *count > 0 {
            count = self
                .in_flight
                .idle
                .wait(count)
                .unwrap_or_else(|p| p.into_inner());
        }
    }
}

impl Drop for Workers {
    fn drop(&mut self) {
        self.drain();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    use vdrive_cas::MemoryStore;
    use vdrive_core::{Drive, OpenOptions};
    use vdrive_index::{IndexAddress, MemoryAccessController, MemoryIndex};

    use crate::Node;

    const WAIT: Duration = Duration::from_secs(5);

    fn drive() -> Arc<Drive> {
        let store = Arc::new(MemoryStore::new());
        let index = Arc::new(MemoryIndex::new(
            IndexAddress::determine("workers").unwrap(),
            "me",
            store.clone(),
        ));
        let drive = Drive::from_parts(
            store,
            index,
            Arc::new(MemoryAccessController::new()),
            OpenOptions::new(),
        )
        .unwrap();
        Arc::new(drive)
    }

    fn open(fs: &DriveFs, name: &str, write: bool) -> u64 {
        let node = fs.lookup(name).unwrap();
        match fs.open(&node, write).unwrap() {
            Node::OpenDescriptor { fh, .. } => fh,
            other => panic!("expected descriptor, got {:?}", other),
        }
    }

    #[test]
    fn test_stalled_commit_does_not_block_other_handles() {
        let drive = drive();
        let workers = Workers::new(DriveFs::new(Arc::clone(&drive)), 2).unwrap();

        let existing = open(workers.fs(), "existing.txt", true);
        workers.fs().write(existing, 0, b"already here").unwrap();
        workers.fs().release(existing).unwrap();

        let pending = open(workers.fs(), "slow.bin", true);
        workers.fs().write(pending, 0, b"big upload").unwrap();

        // Holds the slow handle until released, like a commit stuck on storage.
        let (gate_tx, gate_rx) = mpsc::channel::<()>();
        let (committed_tx, committed_rx) = mpsc::channel();
        workers.spawn(move |fs| {
            let _ = gate_rx.recv();
            committed_tx.send(fs.release(pending)).unwrap();
        });

        // Lookups on the session thread are still answered.
        assert!(matches!(
            workers.fs().lookup("existing.txt").unwrap(),
            Node::ExistingFile(_)
        ));

        // So are reads on another handle.
        let reader = open(workers.fs(), "existing.txt", false);
        let (read_tx, read_rx) = mpsc::channel();
        workers.spawn(move |fs| {
            read_tx.send(fs.read(reader, 0, 64)).unwrap();
        });
        assert_eq!(read_rx.recv_timeout(WAIT).unwrap().unwrap(), b"already here");
        assert!(committed_rx.try_recv().is_err());
        assert_eq!(workers.pending(), 1);

        gate_tx.send(()).unwrap();
        let file = committed_rx.recv_timeout(WAIT).unwrap().unwrap().unwrap();
        assert_eq!(file.key, "slow.bin");
    }

    #[test]
    fn test_drop_waits_for_jobs_and_releases_drive() {
        let drive = drive();
        let workers = Workers::new(DriveFs::new(Arc::clone(&drive)), 1).unwrap();

        let fh = open(workers.fs(), "late.txt", true);
        workers.spawn(move |fs| {
            thread::sleep(Duration::from_millis(50));
            fs.write(fh, 0, b"written late").unwrap();
            fs.release(fh).unwrap();
        });
        drop(workers);

        assert_eq!(Arc::strong_count(&drive), 1);
        assert_eq!(drive.stat("late.txt").unwrap().size, 12);
    }

    #[test]
    fn test_drain_on_idle_pool_returns() {
        let workers = Workers::new(DriveFs::new(drive()), 0).unwrap();
        assert_eq!(workers.threads(), 1);
        workers.drain();
        assert_eq!(workers.pending(), 0);
    }
}
