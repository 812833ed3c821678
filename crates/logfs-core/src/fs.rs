//! The filesystem root.

use crate::attr::NodeKind;
use crate::config::FsConfig;
use crate::content::ContentBackend;
use crate::error::{NodeError, NodeResult};
use crate::index::{Index, ROOT_INODE};
use crate::node::{Dir, Node, Tree};
use std::sync::Arc;
use tracing::debug;

/// One in-memory tree backed by a content store.
///
/// Cloning is cheap and yields another handle to the same tree.
///
/// # Example
///
/// ```
/// use logfs_core::{LogFs, MemoryBackend};
/// use std::sync::Arc;
///
/// let fs = LogFs::new(Arc::new(MemoryBackend::new()));
/// let docs = fs.root().mkdir("docs")?;
/// let note = docs.create("note.txt")?;
/// note.write(b"hello")?;
///
/// let found = fs.resolve("docs/note.txt")?;
/// assert_eq!(found.attr()?.size, 5);
/// # Ok::<(), logfs_core::NodeError>(())
/// ```
#[derive(Debug, Clone)]
pub struct LogFs {
    tree: Arc<Tree>,
}

impl LogFs {
    /// Creates a tree with default configuration.
    pub fn new(content: Arc<dyn ContentBackend>) -> Self {
        Self::with_config(content, FsConfig::default())
    }

    /// Creates a tree with the given configuration.
    ///
    /// The root directory is allocated immediately and is always inode 1.
    pub fn with_config(content: Arc<dyn ContentBackend>, config: FsConfig) -> Self {
        let tree = Tree::new(content, config);
        let root = tree
            .index
            .allocate(NodeKind::Directory, tree.config.dir_mode);
        debug_assert_eq!(root.inode, ROOT_INODE);
        debug!(collision = ?tree.config.collision, "tree created");
        Self {
            tree: Arc::new(tree),
        }
    }

    /// Returns the root directory.
    pub fn root(&self) -> Dir {
        Dir::new(Arc::clone(&self.tree), ROOT_INODE, String::new())
    }

    /// Returns the index backing this tree.
    pub fn index(&self) -> &Index {
        &self.tree.index
    }

    /// Returns the content backend.
    pub fn content(&self) -> &Arc<dyn ContentBackend> {
        &self.tree.content
    }

    /// Returns the configuration.
    pub fn config(&self) -> &FsConfig {
        &self.tree.config
    }

    /// Resolves a `/`-separated path by chained lookups from the root.
    ///
    /// Empty components are skipped, so `""` and `"/"` both name the root.
    /// A file in the middle of the path yields [`NodeError::NotFound`].
    pub fn resolve(&self, path: &str) -> NodeResult<Node> {
        let mut node = Node::Dir(self.root());
        for name in path.split('/').filter(|c| !c.is_empty()) {
            let Node::Dir(dir) = node else {
                return Err(NodeError::NotFound(name.to_string()));
            };
            node = dir.lookup(name)?;
        }
        Ok(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::MemoryBackend;

    fn memory_fs() -> LogFs {
        LogFs::new(Arc::new(MemoryBackend::new()))
    }

    #[test]
    fn test_root_is_inode_one() {
        let fs = memory_fs();
        assert_eq!(fs.root().inode(), ROOT_INODE);
        assert_eq!(fs.root().path(), "");
        assert_eq!(fs.index().len(), 1);
    }

    #[test]
    fn test_root_uses_configured_mode() {
        let fs = LogFs::with_config(
            Arc::new(MemoryBackend::new()),
            FsConfig::default().dir_mode(0o755),
        );
        assert_eq!(fs.root().attr().unwrap().mode, 0o755);
        assert_eq!(fs.config().dir_mode, 0o755);
    }

    #[test]
    fn test_resolve() {
        let fs = memory_fs();
        let a = fs.root().mkdir("a").unwrap();
        let f = a.create("f").unwrap();

        assert_eq!(fs.resolve("").unwrap().inode(), ROOT_INODE);
        assert_eq!(fs.resolve("/").unwrap().inode(), ROOT_INODE);
        assert_eq!(fs.resolve("a").unwrap().inode(), a.inode());
        assert_eq!(fs.resolve("/a//f").unwrap().inode(), f.inode());
    }

    #[test]
    fn test_resolve_errors() {
        let fs = memory_fs();
        fs.root().create("f").unwrap();

        assert!(matches!(fs.resolve("missing"), Err(NodeError::NotFound(_))));
        assert!(matches!(fs.resolve("f/below"), Err(NodeError::NotFound(ref n)) if n == "below"));
    }

    #[test]
    fn test_clones_share_tree() {
        let fs = memory_fs();
        let other = fs.clone();
        fs.root().mkdir("shared").unwrap();
        assert!(other.resolve("shared").is_ok());
    }

    #[test]
    fn test_independent_trees() {
        let one = memory_fs();
        let two = memory_fs();
        let a = one.root().mkdir("x").unwrap();
        let b = two.root().mkdir("y").unwrap();
        assert_eq!(a.inode(), 2);
        assert_eq!(b.inode(), 2);
        assert!(two.resolve("x").is_err());
    }
}
