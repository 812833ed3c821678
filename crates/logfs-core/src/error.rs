//! Error types for the node layer and content backends.
//!
//! Errors are returned synchronously from the operation that produced them.
//! Nothing in this crate retries or falls back; a backend failure reaches the
//! caller exactly as the backend reported it.

use thiserror::Error;

/// Boxed transport error carried by [`ContentError::Unavailable`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors reported by a [`ContentBackend`](crate::content::ContentBackend).
#[derive(Debug, Error)]
pub enum ContentError {
    /// No blob is stored under the requested path.
    #[error("No content stored at path: {path}")]
    NotFound {
        /// The path that was requested.
        path: String,
    },

    /// The backend could not be reached or rejected the request.
    #[error("Content backend unavailable: {0}")]
    Unavailable(#[source] BoxError),
}

impl ContentError {
    /// Wraps any transport error as [`ContentError::Unavailable`].
    pub fn unavailable<E>(err: E) -> Self
    where
        E: Into<BoxError>,
    {
        ContentError::Unavailable(err.into())
    }

    /// Returns true if this is a [`ContentError::NotFound`].
    pub fn is_not_found(&self) -> bool {
        matches!(self, ContentError::NotFound { .. })
    }
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for ContentError {
    fn from(e: redis::RedisError) -> Self {
        ContentError::Unavailable(Box::new(e))
    }
}

/// Result type for content backend calls.
pub type ContentResult<T> = Result<T, ContentError>;

/// Errors returned by [`Dir`](crate::node::Dir) and [`File`](crate::node::File)
/// operations.
#[derive(Debug, Error)]
pub enum NodeError {
    /// The name is not present in the directory.
    #[error("No such entry: {0}")]
    NotFound(String),

    /// The name is already taken and the collision policy rejects overwrites.
    #[error("Entry already exists: {0}")]
    AlreadyExists(String),

    /// The name is empty, contains a separator or NUL, or is `.`/`..`.
    #[error("Invalid entry name: {0:?}")]
    InvalidName(String),

    /// The inode is no longer part of the tree: its record was purged, or
    /// (for a file mutation) its path now names a different node.
    #[error("Stale inode: {0}")]
    StaleInode(u64),

    /// The requested size exceeds [`MAX_FILE_SIZE`](crate::MAX_FILE_SIZE).
    #[error("File too large: {0} bytes")]
    FileTooLarge(u64),

    /// The content backend failed.
    #[error(transparent)]
    Backend(#[from] ContentError),
}

impl NodeError {
    /// Returns true if the error came from the content backend.
    pub fn is_backend(&self) -> bool {
        matches!(self, NodeError::Backend(_))
    }
}

/// Result type for node operations.
pub type NodeResult<T> = Result<T, NodeError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_content_error_display() {
        let e = ContentError::NotFound {
            path: "docs/note.txt".to_string(),
        };
        assert!(e.to_string().contains("docs/note.txt"));
        assert!(e.is_not_found());

        let e = ContentError::unavailable(io::Error::other("connection refused"));
        assert!(e.to_string().contains("connection refused"));
        assert!(!e.is_not_found());
    }

    #[test]
    fn test_backend_error_passes_through_unchanged() {
        let inner = ContentError::unavailable(io::Error::other("timeout"));
        let e: NodeError = inner.into();
        assert!(e.is_backend());
        // transparent: the node error reads exactly like the backend error
        assert_eq!(e.to_string(), "Content backend unavailable: timeout");
    }

    #[test]
    fn test_node_error_display() {
        assert!(NodeError::NotFound("a".into()).to_string().contains('a'));
        assert!(NodeError::AlreadyExists("b".into()).to_string().contains('b'));
        assert!(NodeError::InvalidName("x/y".into()).to_string().contains("x/y"));
        assert!(NodeError::StaleInode(42).to_string().contains("42"));
        assert!(NodeError::FileTooLarge(7).to_string().contains('7'));
    }

    #[test]
    fn test_node_result_type() {
        fn returns_ok() -> NodeResult<u64> {
            Ok(7)
        }

        fn returns_err() -> NodeResult<u64> {
            Err(NodeError::NotFound("gone".into()))
        }

        assert_eq!(returns_ok().unwrap(), 7);
        assert!(returns_err().is_err());
    }
}
