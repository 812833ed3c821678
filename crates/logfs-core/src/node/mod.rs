//! Filesystem nodes.
//!
//! A [`Node`] is either a [`Dir`] or a [`File`]. Both are cheap handles
//! (an inode, a content path and a shared reference to the tree) and hold
//! no state of their own: every read goes to the [`Index`] or the content
//! backend, so two handles for the same inode always agree.
//!
//! Protocol adapters dispatch on the variant once and then call the
//! kind-specific operation.

mod dir;
mod file;

pub use dir::Dir;
pub use file::File;

use crate::attr::{Attributes, NodeKind, SetAttr};
use crate::config::FsConfig;
use crate::content::ContentBackend;
use crate::error::{NodeError, NodeResult};
use crate::index::Index;
use parking_lot::{Mutex, MutexGuard};
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::Arc;

/// Number of stripes serializing content mutations.
const CONTENT_LOCK_STRIPES: usize = 64;

fn stripe(path: &str) -> usize {
    let mut hasher = DefaultHasher::new();
    path.hash(&mut hasher);
    // Stripe count is a small constant, the remainder always fits usize
    #[allow(clippy::cast_possible_truncation)]
    let stripe = (hasher.finish() % CONTENT_LOCK_STRIPES as u64) as usize;
    stripe
}

/// State shared by every node of one tree.
#[derive(Debug)]
pub(crate) struct Tree {
    pub(crate) index: Index,
    pub(crate) content: Arc<dyn ContentBackend>,
    pub(crate) config: FsConfig,
    /// Serializes content put + size update, keyed by content path stripe.
    content_locks: Box<[Mutex<()>]>,
}

impl Tree {
    pub(crate) fn new(content: Arc<dyn ContentBackend>, config: FsConfig) -> Self {
        Self {
            index: Index::new(),
            content,
            config,
            content_locks: (0..CONTENT_LOCK_STRIPES).map(|_| Mutex::new(())).collect(),
        }
    }

    pub(crate) fn attributes(&self, inode: u64) -> NodeResult<Attributes> {
        self.index
            .attributes(inode)
            .ok_or(NodeError::StaleInode(inode))
    }

    pub(crate) fn apply(&self, inode: u64, patch: &SetAttr) -> NodeResult<Attributes> {
        self.index
            .apply(inode, patch)
            .ok_or(NodeError::StaleInode(inode))
    }

    /// Serializes content mutations of whatever node currently owns `path`.
    ///
    /// Keyed by path rather than inode: a detached file and the file that
    /// replaced it share a content key, so they must share a lock too.
    pub(crate) fn content_guard(&self, path: &str) -> MutexGuard<'_, ()> {
        self.content_locks[stripe(path)].lock()
    }
}

/// A directory or a file.
#[derive(Debug, Clone)]
pub enum Node {
    /// A directory node.
    Dir(Dir),
    /// A file node.
    File(File),
}

impl Node {
    /// Returns the inode number.
    pub fn inode(&self) -> u64 {
        match self {
            Node::Dir(d) => d.inode(),
            Node::File(f) => f.inode(),
        }
    }

    /// Returns the node kind.
    pub fn kind(&self) -> NodeKind {
        match self {
            Node::Dir(_) => NodeKind::Directory,
            Node::File(_) => NodeKind::File,
        }
    }

    /// Returns the content path derived from the node's position in the tree.
    pub fn path(&self) -> &str {
        match self {
            Node::Dir(d) => d.path(),
            Node::File(f) => f.path(),
        }
    }

    /// Returns the current attributes.
    pub fn attr(&self) -> NodeResult<Attributes> {
        match self {
            Node::Dir(d) => d.attr(),
            Node::File(f) => f.attr(),
        }
    }

    /// Applies a partial attribute update.
    pub fn setattr(&self, patch: &SetAttr) -> NodeResult<Attributes> {
        match self {
            Node::Dir(d) => d.setattr(patch),
            Node::File(f) => f.setattr(patch),
        }
    }

    /// Returns the directory, if this is one.
    pub fn as_dir(&self) -> Option<&Dir> {
        match self {
            Node::Dir(d) => Some(d),
            Node::File(_) => None,
        }
    }

    /// Returns the file, if this is one.
    pub fn as_file(&self) -> Option<&File> {
        match self {
            Node::File(f) => Some(f),
            Node::Dir(_) => None,
        }
    }

    /// Converts into the directory, if this is one.
    pub fn into_dir(self) -> Option<Dir> {
        match self {
            Node::Dir(d) => Some(d),
            Node::File(_) => None,
        }
    }

    /// Converts into the file, if this is one.
    pub fn into_file(self) -> Option<File> {
        match self {
            Node::File(f) => Some(f),
            Node::Dir(_) => None,
        }
    }
}

impl From<Dir> for Node {
    fn from(dir: Dir) -> Self {
        Node::Dir(dir)
    }
}

impl From<File> for Node {
    fn from(file: File) -> Self {
        Node::File(file)
    }
}

/// Checks that `name` is a single path component.
///
/// Rejects the empty string, `.`, `..`, and names containing `/` or NUL.
pub fn validate_name(name: &str) -> NodeResult<()> {
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\0']) {
        return Err(NodeError::InvalidName(name.to_string()));
    }
    Ok(())
}
