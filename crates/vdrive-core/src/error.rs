use std::io;

use thiserror::Error;
use vdrive_cas::CasError;
use vdrive_index::{AclError, IndexError};

use crate::codec::CodecError;

/// Errors returned by [`Drive`](crate::Drive) operations.
#[derive(Error, Debug)]
pub enum DriveError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(&'static str),

    #[error("No such key: {0}")]
    NotFound(String),

    #[error("Corrupt record for key {key}: {source}")]
    CorruptRecord {
        key: String,
        #[source]
        source: CodecError,
    },

    #[error("Cannot encode record for key {key}: {source}")]
    Encode {
        key: String,
        #[source]
        source: CodecError,
    },

    #[error("Content store error: {0}")]
    ContentStore(#[from] CasError),

    #[error("Index error: {0}")]
    Index(#[from] IndexError),

    #[error("Permission error: {0}")]
    Permission(#[from] AclError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Cannot seek content stream: {0}")]
    InvalidSeek(#[source] io::Error),

    #[error("Operation cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, DriveError>;

impl DriveError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, DriveError::NotFound(_))
    }
}
