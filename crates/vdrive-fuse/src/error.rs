use thiserror::Error;
use vdrive_config::log_fs_warn;
use vdrive_core::DriveError;

/// Filesystem-level outcomes. Drive error detail is logged, not surfaced.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FsError {
    #[error("no such entry")]
    NotFound,

    #[error("is a directory")]
    IsDirectory,

    #[error("committed files are read-only")]
    ReadOnly,

    #[error("bad file handle")]
    BadHandle,

    #[error("file exceeds the write buffer limit")]
    FileTooLarge,

    #[error("I/O error")]
    Io,
}

impl FsError {
    pub fn errno(&self) -> i32 {
        match self {
            FsError::NotFound => libc::ENOENT,
            FsError::IsDirectory => libc::EISDIR,
            FsError::ReadOnly => libc::EACCES,
            FsError::BadHandle => libc::EBADF,
            FsError::FileTooLarge => libc::EFBIG,
            FsError::Io => libc::EIO,
        }
    }

    /// Downgrade a drive error, logging the detail.
    pub(crate) fn from_drive(op: &'static str, key: &str, err: DriveError) -> Self {
        if err.is_not_found() {
            return FsError::NotFound;
        }
        log_fs_warn!(
            "Drive operation failed",
            op = op,
            key = key,
            error = tracing::field::display(&err)
        );
        FsError::Io
    }
}
