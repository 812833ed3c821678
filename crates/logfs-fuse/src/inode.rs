//! Kernel inode tracking.
//!
//! Inode numbers handed to the kernel are the core's own inode numbers, so no
//! translation is needed. This table only remembers which [`Node`] an inode
//! refers to and how many lookups the kernel holds on it.

use dashmap::DashMap;
use dashmap::mapref::one::Ref;
use logfs_core::{Node, ROOT_INODE};
use std::sync::atomic::{AtomicU64, Ordering};

/// An entry in the inode table.
#[derive(Debug)]
pub struct InodeEntry {
    /// The node this inode resolves to.
    pub node: Node,
    /// Directory the node was reached through.
    pub parent: u64,
    /// Name under `parent`.
    pub name: String,
    /// Lookup count for `forget()` handling.
    nlookup: AtomicU64,
}

impl InodeEntry {
    fn new(node: Node, parent: u64, name: String, nlookup: u64) -> Self {
        Self {
            node,
            parent,
            name,
            nlookup: AtomicU64::new(nlookup),
        }
    }

    /// Increments the lookup count and returns the new value.
    pub fn inc_nlookup(&self) -> u64 {
        self.nlookup.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Decrements the lookup count by `count` and returns the new value.
    /// Returns `None` if the count would go negative.
    pub fn dec_nlookup(&self, count: u64) -> Option<u64> {
        let old = self.nlookup.fetch_sub(count, Ordering::AcqRel);
        if old < count {
            self.nlookup.fetch_add(count, Ordering::Relaxed);
            None
        } else {
            Some(old - count)
        }
    }

    /// Returns the current lookup count.
    pub fn nlookup(&self) -> u64 {
        self.nlookup.load(Ordering::Relaxed)
    }
}

/// What `forget` did with an inode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Forgotten {
    /// Still referenced, or unknown.
    Kept,
    /// Dropped from the table. Carries where it was last linked.
    Evicted {
        /// Former parent inode.
        parent: u64,
        /// Former entry name.
        name: String,
    },
}

/// Thread-safe map from kernel inodes to nodes.
#[derive(Debug)]
pub struct InodeTable {
    entries: DashMap<u64, InodeEntry>,
}

impl InodeTable {
    /// Creates a table holding only the root.
    pub fn new(root: Node) -> Self {
        let entries = DashMap::new();
        entries.insert(
            ROOT_INODE,
            InodeEntry::new(root, ROOT_INODE, String::new(), 1),
        );
        Self { entries }
    }

    /// Records a node returned by lookup, mkdir or create and bumps its
    /// lookup count.
    pub fn insert_lookup(&self, node: Node, parent: u64, name: &str) -> u64 {
        let inode = node.inode();
        self.entries
            .entry(inode)
            .and_modify(|e| {
                e.inc_nlookup();
                if e.parent != parent || e.name != name {
                    e.parent = parent;
                    e.name = name.to_string();
                }
            })
            .or_insert_with(|| InodeEntry::new(node, parent, name.to_string(), 1));
        inode
    }

    /// Records a node seen through readdir without touching its lookup count.
    ///
    /// Readdir replies do not take a kernel reference, so new entries start
    /// at zero.
    pub fn insert_no_lookup_inc(&self, node: Node, parent: u64, name: &str) -> u64 {
        let inode = node.inode();
        self.entries
            .entry(inode)
            .or_insert_with(|| InodeEntry::new(node, parent, name.to_string(), 0));
        inode
    }

    /// Looks up an entry by inode number.
    pub fn get(&self, inode: u64) -> Option<Ref<'_, u64, InodeEntry>> {
        self.entries.get(&inode)
    }

    /// Returns a clone of the node behind `inode`.
    pub fn node(&self, inode: u64) -> Option<Node> {
        self.entries.get(&inode).map(|e| e.node.clone())
    }

    /// Decrements the lookup count and evicts the entry when it reaches zero.
    /// The root is never evicted.
    pub fn forget(&self, inode: u64, nlookup: u64) -> Forgotten {
        if inode == ROOT_INODE {
            return Forgotten::Kept;
        }
        let reached_zero = self
            .entries
            .get(&inode)
            .and_then(|e| e.dec_nlookup(nlookup))
            .is_some_and(|remaining| remaining == 0);
        if !reached_zero {
            return Forgotten::Kept;
        }
        // A lookup may have raced in between; only evict if still at zero
        match self.entries.remove_if(&inode, |_, e| e.nlookup() == 0) {
            Some((_, entry)) => Forgotten::Evicted {
                parent: entry.parent,
                name: entry.name,
            },
            None => Forgotten::Kept,
        }
    }

    /// Returns true if the kernel still holds a lookup on `inode`.
    ///
    /// An entry with no lookups left (one only ever seen through readdir) is
    /// dropped from the table on the way.
    pub fn is_referenced(&self, inode: u64) -> bool {
        if inode == ROOT_INODE {
            return true;
        }
        self.entries.remove_if(&inode, |_, e| e.nlookup() == 0);
        self.entries.contains_key(&inode)
    }

    /// Returns the number of inodes in the table.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the table is empty (never, the root stays).
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
