//! Test environment abstraction for isolated testing.
//!
//! Provides `TestEnvironment` to manage:
//! - Temporary content store roots
//! - Isolated index directories
//! - Source files to feed into a drive
//!
//! # Usage
//!
//! ```ignore
//! use vdrive_config::testing::TestEnvironment;
//!
//! #[test]
//! fn test_something() {
//!     let env = TestEnvironment::new().unwrap();
//!     let src = env.create_file("notes.txt", b"hello").unwrap();
//!     // open a drive with env.content_root / env.index_dir
//! }
//! ```

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use tempfile::TempDir;

use crate::Config;

/// Atomic counter for unique test IDs
static TEST_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Isolated test environment with unique paths
pub struct TestEnvironment {
    /// Temporary directory (dropped on cleanup)
    _temp_dir: TempDir,
    /// Isolated content store root
    pub content_root: PathBuf,
    /// Isolated index directory
    pub index_dir: PathBuf,
    /// Scratch directory for source files
    pub source_dir: PathBuf,
    /// Unique test ID
    pub test_id: u32,
}

impl TestEnvironment {
    /// Create a new isolated test environment
    pub fn new() -> anyhow::Result<Self> {
        let test_id = TEST_COUNTER.fetch_add(1, Ordering::Relaxed);
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path();

        let content_root = root.join("content");
        let index_dir = root.join("index");
        let source_dir = root.join("source");

        std::fs::create_dir_all(&content_root)?;
        std::fs::create_dir_all(&index_dir)?;
        std::fs::create_dir_all(&source_dir)?;

        Ok(Self {
            _temp_dir: temp_dir,
            content_root,
            index_dir,
            source_dir,
            test_id,
        })
    }

    /// Drive name unique to this environment
    pub fn drive_name(&self) -> String {
        format!("test-drive-{}", self.test_id)
    }

    /// Config pointing at this environment's directories
    pub fn config(&self) -> Config {
        let mut cfg = Config::default();
        cfg.storage.content_root = self.content_root.clone();
        cfg.storage.index_dir = self.index_dir.clone();
        cfg.drive.name = self.drive_name();
        cfg
    }

    /// Create a source file with content
    pub fn create_file(&self, relative_path: &str, content: &[u8]) -> anyhow::Result<PathBuf> {
        let path = self.source_dir.join(relative_path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, content)?;
        Ok(path)
    }
}
