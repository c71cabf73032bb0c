//! # vdrive-core
//!
//! A durable key → file abstraction over three substitutable collaborators:
//!
//! - [`ContentStore`](vdrive_cas::ContentStore): content-addressed blobs with pins
//! - [`MetadataIndex`](vdrive_index::MetadataIndex): key → encoded [`File`] record
//! - [`AccessController`](vdrive_index::AccessController): permission grants
//!
//! [`Drive`] keeps pins and records consistent, restores the index from its
//! latest snapshot on open and writes a new snapshot on close.

pub mod codec;
mod context;
mod drive;
mod error;
mod file;
mod list;
mod options;

pub use codec::{Codec, CodecError, JsonCodec};
pub use context::Context;
pub use drive::{read_range, Drive};
pub use error::{DriveError, Result};
pub use file::{now_timestamp, parse_timestamp, File, TIMESTAMP_FORMAT};
pub use list::{
    human_size, ListResult, LIST_MASK_ALL, LIST_MASK_CID, LIST_MASK_KEY, LIST_MASK_OWNER,
    LIST_MASK_SIZE, LIST_MASK_TIME,
};
pub use options::{OpenOptions, DEFAULT_INDEX_DIR};

pub use vdrive_cas::{ContentId, ContentStream};
pub use vdrive_index::{IndexAddress, SnapshotId, WRITE_PERMISSION};
