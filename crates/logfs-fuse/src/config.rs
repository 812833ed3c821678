//! Mount configuration for the FUSE adapter.

use fuser::MountOption;
use std::time::Duration;

/// Default attribute cache TTL handed to the kernel.
pub const DEFAULT_ATTR_TTL: Duration = Duration::from_secs(60);

/// Name reported as the mount source and subtype.
pub const DEFAULT_FS_NAME: &str = "logfs";

/// Configuration options for mounting a tree.
#[derive(Debug, Clone)]
pub struct MountConfig {
    /// Time-to-live for attributes and entries cached by the kernel.
    ///
    /// Files with an open write buffer are always replied with a zero TTL.
    /// Default: 60 seconds.
    pub attr_ttl: Duration,

    /// `fsname` mount option. Default: `logfs`.
    pub fs_name: String,

    /// `subtype` mount option. Default: `logfs`.
    pub subtype: String,

    /// Unmount automatically when the process exits. Default: true.
    pub auto_unmount: bool,

    /// Let other users access the mount. Needs `user_allow_other` in
    /// `/etc/fuse.conf`. Default: false.
    pub allow_other: bool,

    /// Owner reported for every node.
    pub uid: u32,

    /// Group reported for every node.
    pub gid: u32,
}

impl Default for MountConfig {
    fn default() -> Self {
        Self {
            attr_ttl: DEFAULT_ATTR_TTL,
            fs_name: DEFAULT_FS_NAME.to_string(),
            subtype: DEFAULT_FS_NAME.to_string(),
            auto_unmount: true,
            allow_other: false,
            // SAFETY: getuid/getgid are always safe to call
            uid: unsafe { libc::getuid() },
            gid: unsafe { libc::getgid() },
        }
    }
}

impl MountConfig {
    /// Sets the kernel attribute TTL.
    #[must_use]
    pub fn attr_ttl(mut self, ttl: Duration) -> Self {
        self.attr_ttl = ttl;
        self
    }

    /// Sets the filesystem name shown in the mount table.
    #[must_use]
    pub fn fs_name(mut self, name: impl Into<String>) -> Self {
        self.fs_name = name.into();
        self
    }

    /// Enables or disables automatic unmount on exit.
    #[must_use]
    pub fn auto_unmount(mut self, enabled: bool) -> Self {
        self.auto_unmount = enabled;
        self
    }

    /// Enables or disables access for other users.
    #[must_use]
    pub fn allow_other(mut self, enabled: bool) -> Self {
        self.allow_other = enabled;
        self
    }

    /// Sets the reported owner.
    #[must_use]
    pub fn owner(mut self, uid: u32, gid: u32) -> Self {
        self.uid = uid;
        self.gid = gid;
        self
    }

    /// Builds the fuser mount options.
    pub fn mount_options(&self) -> Vec<MountOption> {
        let mut options = vec![
            MountOption::FSName(self.fs_name.clone()),
            MountOption::Subtype(self.subtype.clone()),
        ];
        if self.auto_unmount {
            options.push(MountOption::AutoUnmount);
        }
        if self.allow_other {
            options.push(MountOption::AllowOther);
        }
        options
    }
}
