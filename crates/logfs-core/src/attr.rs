//! Attribute records and partial attribute updates.

use std::time::SystemTime;

/// The kind of a filesystem node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum NodeKind {
    /// A directory holding named entries.
    Directory,
    /// A regular file holding bytes.
    File,
}

impl NodeKind {
    /// Returns true for [`NodeKind::Directory`].
    pub fn is_directory(self) -> bool {
        matches!(self, NodeKind::Directory)
    }

    /// Returns true for [`NodeKind::File`].
    pub fn is_file(self) -> bool {
        matches!(self, NodeKind::File)
    }
}

/// Metadata record for one inode.
///
/// Exactly one record exists per live inode. `ctime` holds the creation
/// instant and is never changed after allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attributes {
    /// Inode number.
    pub inode: u64,
    /// Directory or file.
    pub kind: NodeKind,
    /// Permission bits. Stored, never enforced.
    pub mode: u32,
    /// Size in bytes. For files this matches the content length.
    pub size: u64,
    /// Last access time.
    pub atime: SystemTime,
    /// Last modification time.
    pub mtime: SystemTime,
    /// Creation time.
    pub ctime: SystemTime,
}

impl Attributes {
    /// Creates a record with all three timestamps set to `now` and size 0.
    pub fn new(inode: u64, kind: NodeKind, mode: u32, now: SystemTime) -> Self {
        Self {
            inode,
            kind,
            mode,
            size: 0,
            atime: now,
            mtime: now,
            ctime: now,
        }
    }

    /// Applies the present fields of `patch`, leaving the others untouched.
    pub fn apply(&mut self, patch: &SetAttr) {
        if let Some(atime) = patch.atime {
            self.atime = atime;
        }
        if let Some(mtime) = patch.mtime {
            self.mtime = mtime;
        }
        if let Some(size) = patch.size {
            self.size = size;
        }
        if let Some(mode) = patch.mode {
            self.mode = mode;
        }
    }
}

/// A partial attribute update. Only fields set to `Some` are applied.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SetAttr {
    /// New access time.
    pub atime: Option<SystemTime>,
    /// New modification time.
    pub mtime: Option<SystemTime>,
    /// New size in bytes.
    pub size: Option<u64>,
    /// New permission bits.
    pub mode: Option<u32>,
}

impl SetAttr {
    /// Creates an empty patch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the access time.
    #[must_use]
    pub fn atime(mut self, atime: SystemTime) -> Self {
        self.atime = Some(atime);
        self
    }

    /// Sets the modification time.
    #[must_use]
    pub fn mtime(mut self, mtime: SystemTime) -> Self {
        self.mtime = Some(mtime);
        self
    }

    /// Sets the size.
    #[must_use]
    pub fn size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    /// Sets the permission bits.
    #[must_use]
    pub fn mode(mut self, mode: u32) -> Self {
        self.mode = Some(mode);
        self
    }

    /// Returns true if no field is present.
    pub fn is_empty(&self) -> bool {
        self.atime.is_none() && self.mtime.is_none() && self.size.is_none() && self.mode.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn epoch_plus(secs: u64) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(secs)
    }

    #[test]
    fn test_new_sets_all_timestamps() {
        let now = epoch_plus(100);
        let attr = Attributes::new(3, NodeKind::File, 0o644, now);
        assert_eq!(attr.atime, now);
        assert_eq!(attr.mtime, now);
        assert_eq!(attr.ctime, now);
        assert_eq!(attr.size, 0);
    }

    #[test]
    fn test_apply_only_present_fields() {
        let mut attr = Attributes::new(2, NodeKind::Directory, 0o755, epoch_plus(1));
        attr.apply(&SetAttr::new().mtime(epoch_plus(50)));

        assert_eq!(attr.mtime, epoch_plus(50));
        assert_eq!(attr.atime, epoch_plus(1));
        assert_eq!(attr.ctime, epoch_plus(1));
        assert_eq!(attr.size, 0);
        assert_eq!(attr.mode, 0o755);
    }

    #[test]
    fn test_apply_empty_patch_is_noop() {
        let mut attr = Attributes::new(2, NodeKind::File, 0o600, epoch_plus(9));
        let before = attr;
        let patch = SetAttr::new();
        assert!(patch.is_empty());
        attr.apply(&patch);
        assert_eq!(attr, before);
    }

    #[test]
    fn test_apply_never_touches_ctime() {
        let mut attr = Attributes::new(5, NodeKind::File, 0o644, epoch_plus(10));
        attr.apply(
            &SetAttr::new()
                .atime(epoch_plus(20))
                .mtime(epoch_plus(30))
                .size(99)
                .mode(0o400),
        );
        assert_eq!(attr.ctime, epoch_plus(10));
        assert_eq!(attr.size, 99);
        assert_eq!(attr.mode, 0o400);
    }

    #[test]
    fn test_node_kind_predicates() {
        assert!(NodeKind::Directory.is_directory());
        assert!(!NodeKind::Directory.is_file());
        assert!(NodeKind::File.is_file());
    }
}
