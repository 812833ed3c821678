//! Filesystem configuration.
//!
//! Controls the permission bits given to new nodes and what happens when
//! `mkdir`/`create` targets a name that is already taken.

/// Default permission bits for new directories.
pub const DEFAULT_DIR_MODE: u32 = 0o777;

/// Default permission bits for new files.
pub const DEFAULT_FILE_MODE: u32 = 0o777;

/// Largest content a file may hold. Sizes above this are refused with
/// [`NodeError::FileTooLarge`](crate::NodeError::FileTooLarge).
pub const MAX_FILE_SIZE: u64 = 1 << 32;

/// What `mkdir`/`create` do when the name already exists in the parent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CollisionPolicy {
    /// The new node silently replaces the existing entry (last writer wins).
    /// The replaced node is detached but its attributes stay in the index.
    #[default]
    Replace,
    /// The call fails with [`NodeError::AlreadyExists`](crate::NodeError::AlreadyExists).
    Reject,
}

/// Configuration options for a [`LogFs`](crate::LogFs) tree.
#[derive(Debug, Clone)]
pub struct FsConfig {
    /// Permission bits for directories created by `mkdir` (and the root).
    ///
    /// Default: `0o777`.
    pub dir_mode: u32,

    /// Permission bits for files created by `create`.
    ///
    /// Default: `0o777`.
    pub file_mode: u32,

    /// Name collision handling for `mkdir`/`create`.
    ///
    /// Default: [`CollisionPolicy::Replace`].
    pub collision: CollisionPolicy,
}

impl Default for FsConfig {
    fn default() -> Self {
        Self {
            dir_mode: DEFAULT_DIR_MODE,
            file_mode: DEFAULT_FILE_MODE,
            collision: CollisionPolicy::default(),
        }
    }
}

impl FsConfig {
    /// Creates a configuration that rejects name collisions.
    pub fn strict() -> Self {
        Self {
            collision: CollisionPolicy::Reject,
            ..Default::default()
        }
    }

    /// Sets the directory permission bits.
    #[must_use]
    pub fn dir_mode(mut self, mode: u32) -> Self {
        self.dir_mode = mode;
        self
    }

    /// Sets the file permission bits.
    #[must_use]
    pub fn file_mode(mut self, mode: u32) -> Self {
        self.file_mode = mode;
        self
    }

    /// Sets the collision policy.
    #[must_use]
    pub fn collision(mut self, policy: CollisionPolicy) -> Self {
        self.collision = policy;
        self
    }
}
