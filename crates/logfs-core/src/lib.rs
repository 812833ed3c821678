//! Core of the logfs in-memory filesystem.
//!
//! A tree of directory and file nodes whose metadata lives in an in-process
//! [`Index`] and whose file bytes live in a pluggable [`ContentBackend`].
//! The crate has no FUSE dependency; a protocol adapter resolves kernel
//! requests to a [`Node`] and calls one operation on it.
//!
//! # Modules
//!
//! - [`index`] - inode counter, attribute records and directory entries
//! - [`content`] - blob storage trait plus memory and Redis backends
//! - [`node`] - `Dir` and `File` operations
//! - [`fs`] - the tree root and path resolution
//!
//! # Example
//!
//! ```
//! use logfs_core::{LogFs, MemoryBackend, NodeKind};
//! use std::sync::Arc;
//!
//! let fs = LogFs::new(Arc::new(MemoryBackend::new()));
//! let root = fs.root();
//! root.mkdir("docs")?;
//!
//! let entries = root.read_dir_all()?;
//! assert_eq!(entries[0].name, "docs");
//! assert_eq!(entries[0].kind, NodeKind::Directory);
//! # Ok::<(), logfs_core::NodeError>(())
//! ```

pub mod attr;
pub mod config;
pub mod content;
pub mod error;
pub mod fs;
pub mod index;
pub mod node;

pub use attr::{Attributes, NodeKind, SetAttr};
pub use config::{CollisionPolicy, FsConfig, MAX_FILE_SIZE};
#[cfg(feature = "redis")]
pub use content::RedisBackend;
pub use content::{ContentBackend, MemoryBackend};
pub use error::{ContentError, ContentResult, NodeError, NodeResult};
pub use fs::LogFs;
pub use index::{DirEntry, Index, Linked, ROOT_INODE};
pub use node::{Dir, File, Node};
