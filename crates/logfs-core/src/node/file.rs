//! File nodes.
//!
//! Bytes live in the content backend under the file's path; the index only
//! tracks the size. Every mutation stores content first and then records the
//! new size, both under the file's content lock, so a completed write always
//! leaves `size == content.len()`.
//!
//! A file that has been removed or replaced keeps its attributes and can
//! still be read, but it no longer owns its path: mutations through it fail
//! with [`NodeError::StaleInode`] instead of overwriting the bytes of
//! whatever node took the name.

use super::Tree;
use crate::attr::{Attributes, SetAttr};
use crate::config::MAX_FILE_SIZE;
use crate::error::{NodeError, NodeResult};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace};

/// Handle to a file in the tree.
#[derive(Clone)]
pub struct File {
    tree: Arc<Tree>,
    inode: u64,
    path: String,
}

impl File {
    pub(crate) fn new(tree: Arc<Tree>, inode: u64, path: String) -> Self {
        Self { tree, inode, path }
    }

    /// Returns the inode number.
    pub fn inode(&self) -> u64 {
        self.inode
    }

    /// Returns the content key.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Returns the current attributes from the index.
    pub fn attr(&self) -> NodeResult<Attributes> {
        self.tree.attributes(self.inode)
    }

    /// Returns the full content.
    pub fn read_all(&self) -> NodeResult<Vec<u8>> {
        let data = self.tree.content.get(&self.path)?;
        trace!(inode = self.inode, len = data.len(), "read_all");
        Ok(data)
    }

    /// Replaces the full content with `data` and returns the number of bytes
    /// written.
    ///
    /// The size attribute is updated only once the backend has accepted the
    /// bytes; on failure attributes are left untouched.
    pub fn write(&self, data: &[u8]) -> NodeResult<usize> {
        check_size(data.len() as u64)?;
        let _guard = self.tree.content_guard(&self.path);
        self.ensure_linked()?;
        self.store(data)?;
        debug!(inode = self.inode, len = data.len(), "write");
        Ok(data.len())
    }

    /// Appends `data` to the current content and returns the number of bytes
    /// appended.
    pub fn append(&self, data: &[u8]) -> NodeResult<usize> {
        let _guard = self.tree.content_guard(&self.path);
        self.ensure_linked()?;
        let mut content = self.load_or_empty()?;
        check_size(content.len() as u64 + data.len() as u64)?;
        content.extend_from_slice(data);
        self.store(&content)?;
        debug!(inode = self.inode, len = data.len(), total = content.len(), "append");
        Ok(data.len())
    }

    /// Applies only the fields present in `patch`.
    ///
    /// A size change truncates or zero-extends the stored content first, so
    /// the size attribute keeps matching the bytes.
    pub fn setattr(&self, patch: &SetAttr) -> NodeResult<Attributes> {
        trace!(inode = self.inode, ?patch, "setattr");
        let Some(size) = patch.size else {
            return self.tree.apply(self.inode, patch);
        };

        check_size(size)?;
        let new_len = usize::try_from(size).map_err(|_| NodeError::FileTooLarge(size))?;

        let _guard = self.tree.content_guard(&self.path);
        self.ensure_linked()?;
        let mut content = self.load_or_empty()?;
        if content.len() != new_len {
            debug!(inode = self.inode, from = content.len(), to = new_len, "resize");
            content.resize(new_len, 0);
            self.tree.content.put(&self.path, &content)?;
        }
        self.tree.apply(self.inode, patch)
    }

    /// Fails unless this inode is still the node at its path. Caller holds
    /// the content guard.
    fn ensure_linked(&self) -> NodeResult<()> {
        if self.tree.index.resolve_path(&self.path) == Some(self.inode) {
            return Ok(());
        }
        debug!(inode = self.inode, path = %self.path, "mutation of detached file");
        Err(NodeError::StaleInode(self.inode))
    }

    fn load_or_empty(&self) -> NodeResult<Vec<u8>> {
        match self.tree.content.get(&self.path) {
            Ok(data) => Ok(data),
            Err(e) if e.is_not_found() => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Caller holds the content guard.
    fn store(&self, data: &[u8]) -> NodeResult<()> {
        self.tree.content.put(&self.path, data)?;
        self.tree
            .apply(self.inode, &SetAttr::new().size(data.len() as u64))?;
        Ok(())
    }
}

fn check_size(size: u64) -> NodeResult<()> {
    if size > MAX_FILE_SIZE {
        return Err(NodeError::FileTooLarge(size));
    }
    Ok(())
}

impl fmt::Debug for File {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("File")
            .field("inode", &self.inode)
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}
