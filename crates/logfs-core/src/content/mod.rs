//! Pluggable blob storage for file content.
//!
//! File nodes keep their bytes in a [`ContentBackend`] keyed by the file's
//! path in the tree (`docs/note.txt`). The backend is injected when the tree
//! is built, so nodes never know whether bytes live in-process
//! ([`MemoryBackend`]) or in a remote key/value store ([`RedisBackend`]).
//!
//! All calls are synchronous. A backend reports failures verbatim and never
//! retries.

mod memory;
#[cfg(feature = "redis")]
mod remote;

pub use memory::MemoryBackend;
#[cfg(feature = "redis")]
pub use remote::RedisBackend;

use crate::error::ContentResult;
use std::fmt::Debug;

/// Key/value storage for file bytes.
pub trait ContentBackend: Send + Sync + Debug {
    /// Stores `content` under `path`, replacing any previous blob.
    fn put(&self, path: &str, content: &[u8]) -> ContentResult<()>;

    /// Returns the blob stored under `path`.
    ///
    /// Fails with [`ContentError::NotFound`](crate::ContentError::NotFound)
    /// if nothing is stored there.
    fn get(&self, path: &str) -> ContentResult<Vec<u8>>;

    /// Returns every stored path starting with `prefix`, sorted.
    fn list_by_prefix(&self, prefix: &str) -> ContentResult<Vec<String>>;

    /// Deletes the blob under `path`. Deleting an absent path succeeds.
    fn delete(&self, path: &str) -> ContentResult<()>;
}

/// Joins a parent content path and an entry name.
///
/// The root's path is the empty string, so its children are keyed by bare name.
pub fn join_path(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{parent}/{name}")
    }
}
