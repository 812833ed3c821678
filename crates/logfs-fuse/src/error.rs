//! Error handling and errno mapping for the FUSE adapter.
//!
//! Node-level errors come from `logfs-core`; this module turns them (and the
//! adapter's own failures) into the libc codes FUSE replies carry.

use logfs_core::{ContentError, NodeError};
use thiserror::Error;

/// Errors raised by the adapter itself, on top of node errors.
#[derive(Debug, Error)]
pub enum FuseError {
    /// Node operation failed.
    #[error(transparent)]
    Node(#[from] NodeError),

    /// The kernel referenced an inode the adapter does not know.
    #[error("Invalid inode: {0}")]
    InvalidInode(u64),

    /// The kernel referenced a file handle that is not open.
    #[error("Invalid file handle: {0}")]
    InvalidHandle(u64),

    /// Operation needs a directory.
    #[error("Not a directory: inode {0}")]
    NotADirectory(u64),

    /// Operation needs a file.
    #[error("Is a directory: inode {0}")]
    IsADirectory(u64),

    /// rmdir on a directory that still has entries.
    #[error("Directory not empty: {0}")]
    NotEmpty(String),

    /// Name was not valid UTF-8.
    #[error("Name is not valid UTF-8")]
    NonUtf8Name,

    /// Negative read or write offset.
    #[error("Invalid offset: {0}")]
    InvalidOffset(i64),
}

/// Result type for adapter operations.
pub type FuseResult<T> = Result<T, FuseError>;

/// Extension trait to convert errors to errno.
pub trait ToErrno {
    /// Converts this error to a libc error code.
    fn to_errno(&self) -> i32;
}

impl ToErrno for ContentError {
    fn to_errno(&self) -> i32 {
        match self {
            // Content missing behind a live inode is corruption, not ENOENT
            ContentError::NotFound { .. } | ContentError::Unavailable(_) => libc::EIO,
        }
    }
}

impl ToErrno for NodeError {
    fn to_errno(&self) -> i32 {
        match self {
            NodeError::NotFound(_) | NodeError::StaleInode(_) => libc::ENOENT,
            NodeError::AlreadyExists(_) => libc::EEXIST,
            NodeError::InvalidName(_) => libc::EINVAL,
            NodeError::FileTooLarge(_) => libc::EFBIG,
            NodeError::Backend(e) => e.to_errno(),
        }
    }
}

impl ToErrno for FuseError {
    fn to_errno(&self) -> i32 {
        match self {
            FuseError::Node(e) => e.to_errno(),
            FuseError::InvalidInode(_) => libc::ENOENT,
            FuseError::InvalidHandle(_) => libc::EBADF,
            FuseError::NotADirectory(_) => libc::ENOTDIR,
            FuseError::IsADirectory(_) => libc::EISDIR,
            FuseError::NotEmpty(_) => libc::ENOTEMPTY,
            FuseError::NonUtf8Name | FuseError::InvalidOffset(_) => libc::EINVAL,
        }
    }
}
