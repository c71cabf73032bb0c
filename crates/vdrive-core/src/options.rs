use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use vdrive_index::AccessController;

use crate::codec::{Codec, JsonCodec};

/// Default index directory, relative to the working directory.
pub const DEFAULT_INDEX_DIR: &str = ".vdrive/index";

/// Options for [`Drive::open`](crate::Drive::open) and
/// [`Drive::from_parts`](crate::Drive::from_parts).
#[derive(Clone)]
pub struct OpenOptions {
    pub(crate) create: bool,
    pub(crate) directory: PathBuf,
    pub(crate) access_controller: Option<Arc<dyn AccessController>>,
    pub(crate) replay_limit: Option<usize>,
    pub(crate) codec: Arc<dyn Codec>,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            create: false,
            directory: PathBuf::from(DEFAULT_INDEX_DIR),
            access_controller: None,
            replay_limit: None,
            codec: Arc::new(JsonCodec),
        }
    }
}

impl OpenOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the drive's index if it does not exist.
    pub fn create(mut self, create: bool) -> Self {
        self.create = create;
        self
    }

    /// Directory holding drive indexes.
    pub fn directory(mut self, directory: impl AsRef<Path>) -> Self {
        self.directory = directory.as_ref().to_path_buf();
        self
    }

    /// Use this controller instead of the index's own ACLs.
    pub fn access_controller(mut self, access: Arc<dyn AccessController>) -> Self {
        self.access_controller = Some(access);
        self
    }

    /// Bound the op-log replay after loading the snapshot. `None` replays
    /// everything, `Some(0)` restores from the snapshot alone.
    pub fn replay_limit(mut self, limit: Option<usize>) -> Self {
        self.replay_limit = limit;
        self
    }

    pub fn codec(mut self, codec: Arc<dyn Codec>) -> Self {
        self.codec = codec;
        self
    }
}

impl fmt::Debug for OpenOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenOptions")
            .field("create", &self.create)
            .field("directory", &self.directory)
            .field("access_controller", &self.access_controller.is_some())
            .field("replay_limit", &self.replay_limit)
            .field("codec", &self.codec.name())
            .finish()
    }
}
