//! Test mount harness for FUSE integration tests.
//!
//! `TestMount` mounts a fresh memory-backed tree on a temporary directory and
//! unmounts it on drop.

// Not all tests use all TestMount methods
#![allow(dead_code)]

use logfs_core::{LogFs, MemoryBackend};
use logfs_fuse::{FuseMountHandle, LogFuse, MountConfig, spawn_mount};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;

/// How long to wait for mount to become ready.
const MOUNT_READY_TIMEOUT: Duration = Duration::from_secs(5);

/// How long to wait between mount readiness checks.
const MOUNT_CHECK_INTERVAL: Duration = Duration::from_millis(100);

/// A mounted tree for testing.
pub struct TestMount {
    /// Dropped first: unmounts before the temp dir goes away.
    handle: Option<FuseMountHandle>,
    /// Content backend behind the mount.
    pub backend: Arc<MemoryBackend>,
    /// Path where the tree is mounted.
    pub mount_path: PathBuf,
    _temp: TempDir,
}

impl TestMount {
    /// Mounts an empty tree.
    pub fn new() -> Result<Self, String> {
        let temp = TempDir::new().map_err(|e| format!("Failed to create temp dir: {e}"))?;
        let mount_path = temp.path().join("mnt");
        fs::create_dir(&mount_path).map_err(|e| format!("Failed to create mount point: {e}"))?;

        let backend = Arc::new(MemoryBackend::new());
        let fs = LogFs::new(backend.clone());
        let config = MountConfig::default().fs_name("logfs-test");
        let handle = spawn_mount(LogFuse::with_config(fs, config), &mount_path)
            .map_err(|e| format!("Failed to mount: {e}"))?;

        wait_for_mount(&mount_path)?;

        Ok(Self {
            handle: Some(handle),
            backend,
            mount_path,
            _temp: temp,
        })
    }

    /// Absolute path of `rel` inside the mount.
    pub fn path(&self, rel: &str) -> PathBuf {
        self.mount_path.join(rel)
    }

    pub fn write(&self, rel: &str, content: &[u8]) -> std::io::Result<()> {
        fs::write(self.path(rel), content)
    }

    pub fn read(&self, rel: &str) -> std::io::Result<Vec<u8>> {
        fs::read(self.path(rel))
    }
}

impl Drop for TestMount {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.unmount();
        }
    }
}

/// Polls until the mount point's device differs from its parent's.
fn wait_for_mount(mount_path: &Path) -> Result<(), String> {
    use std::os::unix::fs::MetadataExt;

    let parent_path = mount_path.parent().ok_or("mount_path has no parent")?;
    let parent_dev = fs::metadata(parent_path)
        .map_err(|e| format!("Failed to stat parent: {e}"))?
        .dev();

    let deadline = Instant::now() + MOUNT_READY_TIMEOUT;
    while Instant::now() < deadline {
        if let Ok(meta) = fs::metadata(mount_path)
            && meta.dev() != parent_dev
        {
            return Ok(());
        }
        thread::sleep(MOUNT_CHECK_INTERVAL);
    }
    Err("Mount did not become ready in time (device ID unchanged)".to_string())
}

/// Check if FUSE is available on this system.
pub fn fuse_available() -> bool {
    #[cfg(target_os = "linux")]
    {
        Path::new("/dev/fuse").exists()
    }
    #[cfg(target_os = "macos")]
    {
        Path::new("/Library/Filesystems/macfuse.fs").exists()
    }
    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    {
        false
    }
}

/// Skip test if FUSE is not available.
#[macro_export]
macro_rules! skip_if_no_fuse {
    () => {
        if !$crate::common::fuse_available() {
            eprintln!("Skipping test: FUSE not available on this system");
            return;
        }
    };
}

/// Skip test if mounting fails (common in CI environments).
#[macro_export]
macro_rules! require_mount {
    ($mount_result:expr) => {
        match $mount_result {
            Ok(m) => m,
            Err(e) => {
                eprintln!("Skipping test: {}", e);
                return;
            }
        }
    };
}
