//! The inode index: attributes and directory membership.
//!
//! [`Index`] is the single source of truth for every node in a tree. It owns
//! the inode counter, the attribute records and the per-directory entry sets,
//! all behind one `parking_lot::Mutex`. Every public method acquires the lock
//! once, reads or writes, and releases it; no method calls another while
//! holding it, so there is no nested acquisition.
//!
//! # Consistency
//!
//! Operations touching the same inode or the same parent's entry set are
//! linearizable in lock-acquisition order. The per-field setters
//! ([`set_atime`](Index::set_atime), [`set_mtime`](Index::set_mtime),
//! [`set_size`](Index::set_size)) are each atomic, but chaining them does not
//! give a combined update; use [`apply`](Index::apply) for that.
//!
//! Entries reference children by inode. A removed entry leaves the child's
//! attribute record in place until [`purge`](Index::purge) is called.

use crate::attr::{Attributes, NodeKind, SetAttr};
use crate::config::CollisionPolicy;
use crate::error::{NodeError, NodeResult};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::SystemTime;
use tracing::{trace, warn};

/// Inode of the root directory. The root is the first allocation of every index.
pub const ROOT_INODE: u64 = 1;

/// Name-to-inode map for one directory.
pub type DirEntries = HashMap<String, u64>;

/// One row of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    /// Entry name within the parent.
    pub name: String,
    /// Child inode.
    pub inode: u64,
    /// Child kind, read from the child's attribute record.
    pub kind: NodeKind,
}

#[derive(Debug)]
struct IndexState {
    /// Next inode to hand out. Never decreases, so inodes are never reused.
    next_inode: u64,
    attrs: HashMap<u64, Attributes>,
    tree: HashMap<u64, DirEntries>,
}

impl IndexState {
    fn alloc(&mut self, kind: NodeKind, mode: u32, now: SystemTime) -> Attributes {
        let inode = self.next_inode;
        self.next_inode += 1;

        let attr = Attributes::new(inode, kind, mode, now);
        self.attrs.insert(inode, attr);
        if kind.is_directory() {
            self.tree.insert(inode, DirEntries::new());
        }
        attr
    }

    fn update<F, T>(&mut self, inode: u64, f: F) -> Option<T>
    where
        F: FnOnce(&mut Attributes) -> T,
    {
        self.attrs.get_mut(&inode).map(f)
    }
}

/// Result of [`Index::link_new`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Linked {
    /// Attributes of the newly allocated node.
    pub attr: Attributes,
    /// Inode previously stored under the same name, if one was replaced.
    pub replaced: Option<u64>,
}

/// Thread-safe store of attributes and directory entries for one tree.
///
/// Multiple indexes may coexist in one process; each has its own inode
/// counter starting at [`ROOT_INODE`].
#[derive(Debug)]
pub struct Index {
    state: Mutex<IndexState>,
}

impl Index {
    /// Creates an empty index. The first [`allocate`](Self::allocate) returns [`ROOT_INODE`].
    pub fn new() -> Self {
        Self {
            state: Mutex::new(IndexState {
                next_inode: ROOT_INODE,
                attrs: HashMap::new(),
                tree: HashMap::new(),
            }),
        }
    }

    /// Allocates a fresh inode and its attribute record in one step.
    ///
    /// All timestamps are set to the current time and size to 0. Directories
    /// also get an empty entry set.
    pub fn allocate(&self, kind: NodeKind, mode: u32) -> Attributes {
        let now = SystemTime::now();
        let attr = self.state.lock().alloc(kind, mode, now);
        trace!(inode = attr.inode, ?kind, "allocated inode");
        attr
    }

    /// Allocates a node and links it into `parent` under `name` atomically.
    ///
    /// With [`CollisionPolicy::Replace`] an existing entry is overwritten and
    /// its node becomes an orphan. With [`CollisionPolicy::Reject`] the call
    /// fails with [`NodeError::AlreadyExists`] and nothing is allocated.
    pub fn link_new(
        &self,
        parent: u64,
        name: &str,
        kind: NodeKind,
        mode: u32,
        policy: CollisionPolicy,
    ) -> NodeResult<Linked> {
        let now = SystemTime::now();
        let mut state = self.state.lock();

        let existing = state.tree.get(&parent).and_then(|e| e.get(name)).copied();
        if let Some(existing) = existing {
            match policy {
                CollisionPolicy::Reject => return Err(NodeError::AlreadyExists(name.to_string())),
                CollisionPolicy::Replace => {
                    warn!(parent, name, replaced = existing, "replacing existing entry");
                }
            }
        }

        let attr = state.alloc(kind, mode, now);
        state
            .tree
            .entry(parent)
            .or_default()
            .insert(name.to_string(), attr.inode);
        Ok(Linked {
            attr,
            replaced: existing,
        })
    }

    /// Returns a copy of the attribute record for `inode`.
    pub fn attributes(&self, inode: u64) -> Option<Attributes> {
        self.state.lock().attrs.get(&inode).copied()
    }

    /// Replaces the whole attribute record for `inode`.
    pub fn set_attributes(&self, inode: u64, attr: Attributes) {
        self.state.lock().attrs.insert(inode, attr);
    }

    /// Applies a partial update under a single lock acquisition.
    ///
    /// Returns the updated record, or `None` if the inode is unknown.
    pub fn apply(&self, inode: u64, patch: &SetAttr) -> Option<Attributes> {
        self.state.lock().update(inode, |attr| {
            attr.apply(patch);
            *attr
        })
    }

    /// Returns the access time of `inode`.
    pub fn atime(&self, inode: u64) -> Option<SystemTime> {
        self.state.lock().attrs.get(&inode).map(|a| a.atime)
    }

    /// Returns the modification time of `inode`.
    pub fn mtime(&self, inode: u64) -> Option<SystemTime> {
        self.state.lock().attrs.get(&inode).map(|a| a.mtime)
    }

    /// Returns the size of `inode`.
    pub fn size(&self, inode: u64) -> Option<u64> {
        self.state.lock().attrs.get(&inode).map(|a| a.size)
    }

    /// Sets the access time. Returns false if the inode is unknown.
    pub fn set_atime(&self, inode: u64, atime: SystemTime) -> bool {
        self.state.lock().update(inode, |a| a.atime = atime).is_some()
    }

    /// Sets the modification time. Returns false if the inode is unknown.
    pub fn set_mtime(&self, inode: u64, mtime: SystemTime) -> bool {
        self.state.lock().update(inode, |a| a.mtime = mtime).is_some()
    }

    /// Sets the size. Returns false if the inode is unknown.
    pub fn set_size(&self, inode: u64, size: u64) -> bool {
        self.state.lock().update(inode, |a| a.size = size).is_some()
    }

    /// Returns a copy of the full entry set of directory `inode`.
    pub fn dir_entries(&self, inode: u64) -> Option<DirEntries> {
        self.state.lock().tree.get(&inode).cloned()
    }

    /// Replaces the whole entry set of directory `inode`.
    pub fn set_dir_entries(&self, inode: u64, entries: DirEntries) {
        self.state.lock().tree.insert(inode, entries);
    }

    /// Inserts or overwrites one entry, creating the entry set if absent.
    pub fn set_in_dir(&self, inode: u64, name: &str, child: u64) {
        self.state
            .lock()
            .tree
            .entry(inode)
            .or_default()
            .insert(name.to_string(), child);
    }

    /// Returns the child inode stored under `name` in directory `inode`.
    pub fn get_in_dir(&self, inode: u64, name: &str) -> Option<u64> {
        self.state
            .lock()
            .tree
            .get(&inode)
            .and_then(|entries| entries.get(name))
            .copied()
    }

    /// Removes `name` from directory `inode`, returning the detached child.
    ///
    /// The child's attribute record is left in place.
    pub fn remove_from_dir(&self, inode: u64, name: &str) -> Option<u64> {
        self.state
            .lock()
            .tree
            .get_mut(&inode)
            .and_then(|entries| entries.remove(name))
    }

    /// Removes `name` from directory `inode` only if it still points at `child`.
    pub fn unlink_if(&self, inode: u64, name: &str, child: u64) -> bool {
        self.swap_if(inode, name, child, None)
    }

    /// Compare-and-swap on one entry.
    ///
    /// If `name` in directory `inode` still points at `expected`, it is set to
    /// `replacement` (or removed when `None`) and true is returned.
    pub fn swap_if(&self, inode: u64, name: &str, expected: u64, replacement: Option<u64>) -> bool {
        let mut state = self.state.lock();
        let Some(entries) = state.tree.get_mut(&inode) else {
            return false;
        };
        if entries.get(name) != Some(&expected) {
            return false;
        }
        match replacement {
            Some(child) => entries.insert(name.to_string(), child),
            None => entries.remove(name),
        };
        true
    }

    /// Lists directory `inode` with each child's kind, as one snapshot.
    ///
    /// Entries whose child has no attribute record are skipped.
    pub fn list_dir(&self, inode: u64) -> Option<Vec<DirEntry>> {
        let state = self.state.lock();
        let entries = state.tree.get(&inode)?;
        let listing = entries
            .iter()
            .filter_map(|(name, child)| {
                state.attrs.get(child).map(|attr| DirEntry {
                    name: name.clone(),
                    inode: attr.inode,
                    kind: attr.kind,
                })
            })
            .collect();
        Some(listing)
    }

    /// Returns true if `inode` is a directory with at least one entry.
    pub fn has_entries(&self, inode: u64) -> bool {
        self.state
            .lock()
            .tree
            .get(&inode)
            .is_some_and(|entries| !entries.is_empty())
    }

    /// Drops the attribute record and entry set of a detached inode.
    ///
    /// The caller is responsible for making sure nothing links to `inode`
    /// any more. The root is never purged.
    pub fn purge(&self, inode: u64) -> Option<Attributes> {
        if inode == ROOT_INODE {
            return None;
        }
        let mut state = self.state.lock();
        state.tree.remove(&inode);
        state.attrs.remove(&inode)
    }

    /// Drops a detached inode and, for a directory, everything below it.
    ///
    /// Descendants for which `keep` returns true are left alone together
    /// with their own subtrees; they are purged later when their holder lets
    /// go of them. `keep` runs under the index lock and must not call back
    /// into the index. Returns the number of attribute records dropped. The
    /// root is never purged.
    pub fn purge_tree<F>(&self, inode: u64, keep: F) -> usize
    where
        F: Fn(u64) -> bool,
    {
        if inode == ROOT_INODE {
            return 0;
        }
        let mut state = self.state.lock();
        let mut pending = vec![inode];
        let mut purged = 0;
        while let Some(next) = pending.pop() {
            if let Some(entries) = state.tree.remove(&next) {
                pending.extend(
                    entries
                        .into_values()
                        .filter(|&child| child != ROOT_INODE && !keep(child)),
                );
            }
            if state.attrs.remove(&next).is_some() {
                purged += 1;
            }
        }
        trace!(inode, purged, "purged subtree");
        purged
    }

    /// Walks a `/`-separated path from the root under one lock and returns
    /// the inode it names. Empty components are skipped.
    pub fn resolve_path(&self, path: &str) -> Option<u64> {
        let state = self.state.lock();
        path.split('/')
            .filter(|c| !c.is_empty())
            .try_fold(ROOT_INODE, |dir, name| {
                state.tree.get(&dir).and_then(|e| e.get(name)).copied()
            })
    }

    /// Number of attribute records, detached ones included.
    pub fn len(&self) -> usize {
        self.state.lock().attrs.len()
    }

    /// Returns true if nothing has been allocated yet.
    pub fn is_empty(&self) -> bool {
        self.state.lock().attrs.is_empty()
    }
}

impl Default for Index {
    fn default() -> Self {
        Self::new()
    }
}
