//! Directory nodes.

use super::{File, Node, Tree, validate_name};
use crate::attr::{Attributes, NodeKind, SetAttr};
use crate::content::join_path;
use crate::error::{NodeError, NodeResult};
use crate::index::DirEntry;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Handle to a directory in the tree.
#[derive(Clone)]
pub struct Dir {
    tree: Arc<Tree>,
    inode: u64,
    path: String,
}

impl Dir {
    pub(crate) fn new(tree: Arc<Tree>, inode: u64, path: String) -> Self {
        Self { tree, inode, path }
    }

    /// Returns the inode number.
    pub fn inode(&self) -> u64 {
        self.inode
    }

    /// Returns the content path (empty for the root).
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Returns the current attributes from the index.
    pub fn attr(&self) -> NodeResult<Attributes> {
        self.tree.attributes(self.inode)
    }

    /// Resolves one entry name. No path walking.
    pub fn lookup(&self, name: &str) -> NodeResult<Node> {
        trace!(parent = self.inode, name, "lookup");
        let child = self
            .tree
            .index
            .get_in_dir(self.inode, name)
            .ok_or_else(|| NodeError::NotFound(name.to_string()))?;
        let attr = self.tree.attributes(child)?;
        Ok(self.child(name, attr.inode, attr.kind))
    }

    /// Creates a subdirectory and returns it.
    pub fn mkdir(&self, name: &str) -> NodeResult<Dir> {
        validate_name(name)?;
        let config = &self.tree.config;
        let linked = self.tree.index.link_new(
            self.inode,
            name,
            NodeKind::Directory,
            config.dir_mode,
            config.collision,
        )?;
        debug!(parent = self.inode, name, inode = linked.attr.inode, "mkdir");
        Ok(Dir::new(
            Arc::clone(&self.tree),
            linked.attr.inode,
            join_path(&self.path, name),
        ))
    }

    /// Creates an empty file and returns it.
    ///
    /// Empty content is stored at the file's path so nothing left behind by
    /// an earlier file of the same name can be read back. If the backend
    /// refuses, the new entry is taken out again and the error returned.
    pub fn create(&self, name: &str) -> NodeResult<File> {
        validate_name(name)?;
        let config = &self.tree.config;
        let linked = self.tree.index.link_new(
            self.inode,
            name,
            NodeKind::File,
            config.file_mode,
            config.collision,
        )?;
        let inode = linked.attr.inode;
        let file = File::new(Arc::clone(&self.tree), inode, join_path(&self.path, name));

        let stored = {
            let _guard = self.tree.content_guard(file.path());
            self.tree.content.put(file.path(), &[])
        };
        if let Err(e) = stored {
            warn!(parent = self.inode, name, error = %e, "create: content store failed");
            self.tree
                .index
                .swap_if(self.inode, name, inode, linked.replaced);
            return Err(e.into());
        }

        debug!(parent = self.inode, name, inode, "create");
        Ok(file)
    }

    /// Lists the current entries with each child's inode and kind.
    ///
    /// The result is a snapshot; later changes are not reflected.
    pub fn read_dir_all(&self) -> NodeResult<Vec<DirEntry>> {
        trace!(inode = self.inode, "read_dir_all");
        self.tree
            .index
            .list_dir(self.inode)
            .ok_or(NodeError::StaleInode(self.inode))
    }

    /// Applies only the fields present in `patch`.
    pub fn setattr(&self, patch: &SetAttr) -> NodeResult<Attributes> {
        trace!(inode = self.inode, ?patch, "setattr");
        self.tree.apply(self.inode, patch)
    }

    /// Detaches `name` from this directory.
    ///
    /// Returns the detached child's inode, or `None` if the name was absent
    /// (which is not an error). The child's attributes are kept.
    pub fn remove(&self, name: &str) -> Option<u64> {
        let removed = self.tree.index.remove_from_dir(self.inode, name);
        debug!(parent = self.inode, name, removed = ?removed, "remove");
        removed
    }

    /// Returns true if the directory has no entries.
    pub fn is_empty(&self) -> bool {
        !self.tree.index.has_entries(self.inode)
    }

    fn child(&self, name: &str, inode: u64, kind: NodeKind) -> Node {
        let tree = Arc::clone(&self.tree);
        let path = join_path(&self.path, name);
        match kind {
            NodeKind::Directory => Node::Dir(Dir::new(tree, inode, path)),
            NodeKind::File => Node::File(File::new(tree, inode, path)),
        }
    }
}

impl fmt::Debug for Dir {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dir")
            .field("inode", &self.inode)
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use crate::attr::{NodeKind, SetAttr};
    use crate::config::FsConfig;
    use crate::content::{ContentBackend, MemoryBackend};
    use crate::error::{ContentError, ContentResult, NodeError};
    use crate::fs::LogFs;
    use crate::index::ROOT_INODE;
    use std::io;
    use std::sync::Arc;
    use std::time::{Duration, SystemTime};

    fn memory_fs() -> LogFs {
        LogFs::new(Arc::new(MemoryBackend::new()))
    }

    /// Backend whose writes always fail.
    #[derive(Debug)]
    struct DownBackend;

    impl ContentBackend for DownBackend {
        fn put(&self, _path: &str, _content: &[u8]) -> ContentResult<()> {
            Err(ContentError::unavailable(io::Error::other("down")))
        }
        fn get(&self, path: &str) -> ContentResult<Vec<u8>> {
            Err(ContentError::NotFound { path: path.to_string() })
        }
        fn list_by_prefix(&self, _prefix: &str) -> ContentResult<Vec<String>> {
            Ok(Vec::new())
        }
        fn delete(&self, _path: &str) -> ContentResult<()> {
            Ok(())
        }
    }

    #[test]
    fn test_root_attr() {
        let fs = memory_fs();
        let attr = fs.root().attr().unwrap();
        assert_eq!(attr.inode, ROOT_INODE);
        assert_eq!(attr.kind, NodeKind::Directory);
        assert_eq!(attr.mode, 0o777);
    }

    #[test]
    fn test_mkdir_initial_attributes() {
        let fs = memory_fs();
        let dir = fs.root().mkdir("docs").unwrap();
        let attr = dir.attr().unwrap();
        assert_eq!(attr.kind, NodeKind::Directory);
        assert_eq!(attr.size, 0);
        assert_eq!(attr.atime, attr.ctime);
        assert_eq!(attr.mtime, attr.ctime);
        assert_eq!(dir.path(), "docs");
    }

    #[test]
    fn test_lookup_missing() {
        let fs = memory_fs();
        let err = fs.root().lookup("missing").unwrap_err();
        assert!(matches!(err, NodeError::NotFound(ref n) if n == "missing"));
    }

    #[test]
    fn test_lookup_returns_matching_kind() {
        let fs = memory_fs();
        let root = fs.root();
        root.mkdir("d").unwrap();
        root.create("f").unwrap();

        assert_eq!(root.lookup("d").unwrap().kind(), NodeKind::Directory);
        assert_eq!(root.lookup("f").unwrap().kind(), NodeKind::File);
    }

    #[test]
    fn test_nested_paths() {
        let fs = memory_fs();
        let a = fs.root().mkdir("a").unwrap();
        let b = a.mkdir("b").unwrap();
        let f = b.create("c.txt").unwrap();
        assert_eq!(f.path(), "a/b/c.txt");

        let looked_up = a.lookup("b").unwrap();
        assert_eq!(looked_up.path(), "a/b");
    }

    #[test]
    fn test_mkdir_rejects_invalid_names() {
        let fs = memory_fs();
        for bad in ["", "a/b", ".", ".."] {
            assert!(matches!(
                fs.root().mkdir(bad),
                Err(NodeError::InvalidName(_))
            ));
            assert!(matches!(
                fs.root().create(bad),
                Err(NodeError::InvalidName(_))
            ));
        }
        assert!(fs.root().is_empty());
    }

    #[test]
    fn test_collision_replace_is_silent() {
        let fs = memory_fs();
        let root = fs.root();
        let first = root.mkdir("x").unwrap();
        let second = root.mkdir("x").unwrap();

        assert_ne!(first.inode(), second.inode());
        assert_eq!(root.lookup("x").unwrap().inode(), second.inode());
        assert_eq!(root.read_dir_all().unwrap().len(), 1);
        // The replaced directory still answers attr()
        assert!(first.attr().is_ok());
    }

    #[test]
    fn test_collision_replace_across_kinds() {
        let fs = memory_fs();
        let root = fs.root();
        root.create("x").unwrap();
        root.mkdir("x").unwrap();
        assert_eq!(root.lookup("x").unwrap().kind(), NodeKind::Directory);
    }

    #[test]
    fn test_collision_reject() {
        let fs = LogFs::with_config(Arc::new(MemoryBackend::new()), FsConfig::strict());
        let root = fs.root();
        let first = root.mkdir("x").unwrap();

        assert!(matches!(root.mkdir("x"), Err(NodeError::AlreadyExists(_))));
        assert!(matches!(root.create("x"), Err(NodeError::AlreadyExists(_))));
        assert_eq!(root.lookup("x").unwrap().inode(), first.inode());
    }

    #[test]
    fn test_remove_is_noop_when_absent() {
        let fs = memory_fs();
        let root = fs.root();
        assert!(root.remove("never").is_none());
        assert!(matches!(root.lookup("never"), Err(NodeError::NotFound(_))));
    }

    #[test]
    fn test_remove_detaches_but_keeps_attributes() {
        let fs = memory_fs();
        let root = fs.root();
        let file = root.create("f").unwrap();

        assert_eq!(root.remove("f"), Some(file.inode()));
        assert!(matches!(root.lookup("f"), Err(NodeError::NotFound(_))));
        assert!(file.attr().is_ok());
        assert!(root.is_empty());
    }

    #[test]
    fn test_setattr_partial() {
        let fs = memory_fs();
        let dir = fs.root().mkdir("d").unwrap();
        let before = dir.attr().unwrap();
        let t = SystemTime::UNIX_EPOCH + Duration::from_secs(1);

        let after = dir.setattr(&SetAttr::new().mtime(t)).unwrap();
        assert_eq!(after.mtime, t);
        assert_eq!(after.atime, before.atime);
        assert_eq!(after.size, before.size);
    }

    #[test]
    fn test_create_rolls_back_when_backend_down() {
        let fs = LogFs::new(Arc::new(DownBackend));
        let root = fs.root();

        let err = root.create("f").unwrap_err();
        assert!(err.is_backend());
        assert!(matches!(root.lookup("f"), Err(NodeError::NotFound(_))));

        // mkdir does not touch the backend
        assert!(root.mkdir("d").is_ok());
    }

    #[test]
    fn test_create_rollback_restores_replaced_entry() {
        let fs = LogFs::new(Arc::new(DownBackend));
        let root = fs.root();
        let dir = root.mkdir("x").unwrap();

        assert!(root.create("x").is_err());
        assert_eq!(root.lookup("x").unwrap().inode(), dir.inode());
    }

    #[test]
    fn test_debug_is_compact() {
        let fs = memory_fs();
        let dbg = format!("{:?}", fs.root().mkdir("d").unwrap());
        assert!(dbg.contains("inode: 2"));
        assert!(dbg.contains("\"d\""));
    }
}
