//! Mounting a [`LogFuse`] adapter.
//!
//! [`mount`] serves in the foreground until the filesystem is unmounted;
//! [`spawn_mount`] serves from a background session and returns a handle
//! that unmounts when dropped.

use crate::filesystem::LogFuse;
use fuser::BackgroundSession;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Timeout for a graceful `session.join()` before forcing the unmount.
const JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Handle to a background mount.
///
/// Dropping this handle triggers unmount.
pub struct FuseMountHandle {
    session: Option<BackgroundSession>,
    mountpoint: PathBuf,
}

impl FuseMountHandle {
    /// Where the filesystem is mounted.
    pub fn mountpoint(&self) -> &Path {
        &self.mountpoint
    }

    /// Unmounts and waits for the session to finish.
    ///
    /// May block while files are still open.
    pub fn unmount(mut self) {
        info!(mountpoint = %self.mountpoint.display(), "Unmounting FUSE filesystem");
        if let Some(session) = self.session.take() {
            session.join();
        }
        info!(mountpoint = %self.mountpoint.display(), "FUSE unmount successful");
    }

    /// Unmounts with system tools when the session is stuck.
    fn force_unmount(&self) {
        #[cfg(target_os = "macos")]
        {
            let result = std::process::Command::new("diskutil")
                .args(["unmount", "force"])
                .arg(&self.mountpoint)
                .output();
            match result {
                Ok(output) if output.status.success() => {
                    debug!("Force unmount via diskutil succeeded");
                    return;
                }
                _ => debug!("diskutil unmount failed, trying umount"),
            }
            let _ = std::process::Command::new("umount")
                .arg("-f")
                .arg(&self.mountpoint)
                .output();
        }

        #[cfg(target_os = "linux")]
        {
            let _ = std::process::Command::new("fusermount")
                .args(["-uz"])
                .arg(&self.mountpoint)
                .output();
        }
    }
}

impl std::fmt::Debug for FuseMountHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FuseMountHandle")
            .field("mountpoint", &self.mountpoint)
            .field("active", &self.session.is_some())
            .finish()
    }
}

impl Drop for FuseMountHandle {
    fn drop(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        debug!(mountpoint = %self.mountpoint.display(), "Unmounting FUSE filesystem on drop");

        // join() can block on busy handles; wait on a side thread so drop
        // always returns
        let (tx, rx) = mpsc::channel();
        std::thread::spawn(move || {
            session.join();
            let _ = tx.send(());
        });

        match rx.recv_timeout(JOIN_TIMEOUT) {
            Ok(()) => debug!(mountpoint = %self.mountpoint.display(), "Graceful unmount completed"),
            Err(_) => {
                warn!(
                    mountpoint = %self.mountpoint.display(),
                    timeout = ?JOIN_TIMEOUT,
                    "session.join() timed out, forcing unmount"
                );
                self.force_unmount();
            }
        }
    }
}

/// Mounts `fs` at `mountpoint` and serves requests on the calling thread
/// until the filesystem is unmounted.
pub fn mount(fs: LogFuse, mountpoint: impl AsRef<Path>) -> io::Result<()> {
    let mountpoint = mountpoint.as_ref();
    let options = fs.config().mount_options();
    info!(mountpoint = %mountpoint.display(), "Mounting FUSE filesystem");
    fuser::mount2(fs, mountpoint, &options)
}

/// Mounts `fs` at `mountpoint` in a background session.
pub fn spawn_mount(fs: LogFuse, mountpoint: impl AsRef<Path>) -> io::Result<FuseMountHandle> {
    let mountpoint = mountpoint.as_ref().to_path_buf();
    let options = fs.config().mount_options();
    info!(mountpoint = %mountpoint.display(), ?options, "Mounting FUSE filesystem in background");
    let session = fuser::spawn_mount2(fs, &mountpoint, &options)?;
    Ok(FuseMountHandle {
        session: Some(session),
        mountpoint,
    })
}
