//! FUSE adapter for logfs trees.
//!
//! Exposes a [`LogFs`](logfs_core::LogFs) tree as a mountable filesystem.
//! File content lives in the tree's content backend; each open file is
//! buffered in memory and stored back whole on flush, fsync and release.
//!
//! # Usage
//!
//! ```ignore
//! use logfs_core::{LogFs, MemoryBackend};
//! use logfs_fuse::{LogFuse, spawn_mount};
//! use std::sync::Arc;
//!
//! let fs = LogFs::new(Arc::new(MemoryBackend::new()));
//! let handle = spawn_mount(LogFuse::new(fs), "/mnt/logfs")?;
//! // ...
//! handle.unmount();
//! ```

pub mod backend;
pub mod config;
pub mod error;
pub mod filesystem;
pub mod handles;
pub mod inode;

pub use backend::{FuseMountHandle, mount, spawn_mount};
pub use config::MountConfig;
pub use error::{FuseError, FuseResult, ToErrno};
pub use filesystem::{LogFuse, ReaddirEntry};
pub use handles::{FuseHandle, FuseHandleTable, OpenBuffers, SharedBuffer, WriteBuffer};
pub use inode::{Forgotten, InodeEntry, InodeTable};
