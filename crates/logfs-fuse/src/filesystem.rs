//! FUSE filesystem implementation.
//!
//! [`LogFuse`] implements the fuser `Filesystem` trait on top of a
//! [`LogFs`] tree. Every callback resolves the kernel inode to a core
//! [`Node`], calls one node operation and encodes the result as a reply.
//!
//! | Operation | Node call |
//! |-----------|-----------|
//! | lookup | `Dir::lookup` |
//! | getattr | `Node::attr` |
//! | setattr | `Node::setattr` (or the open write buffer for size) |
//! | mkdir / create | `Dir::mkdir` / `Dir::create` |
//! | readdir | `Dir::read_dir_all` |
//! | open | `File::read_all` into a snapshot or the inode's write buffer |
//! | read / write | handle buffer |
//! | flush / fsync / release | `File::write` of a dirty buffer |
//! | unlink / rmdir | `Dir::remove` |
//!
//! Inodes detached by unlink/rmdir (or replaced by a colliding mkdir/create)
//! keep their attributes until the kernel forgets them, then the record is
//! purged from the index together with whatever was below it. Stored content
//! is never deleted. A buffer still open on a detached file is dropped at
//! flush instead of being written over the file that took its name.

use crate::config::MountConfig;
use crate::error::{FuseError, FuseResult, ToErrno};
use crate::handles::{FuseHandle, FuseHandleTable, OpenBuffers, SharedBuffer, WriteBuffer};
use crate::inode::{Forgotten, InodeTable};
use fuser::{
    FileAttr, FileType, Filesystem, KernelConfig, ReplyAttr, ReplyData, ReplyDirectory,
    ReplyEmpty, ReplyEntry, ReplyOpen, ReplyWrite, Request, TimeOrNow,
};
use libc::c_int;
use logfs_core::{
    Attributes, Dir, File, LogFs, MAX_FILE_SIZE, Node, NodeError, NodeKind, ROOT_INODE, SetAttr,
};
use std::ffi::OsStr;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{debug, info, trace, warn};

/// Block size reported in attributes.
const BLOCK_SIZE: u32 = 4096;

/// One row of a readdir reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReaddirEntry {
    /// Entry inode.
    pub inode: u64,
    /// Offset of the next entry.
    pub offset: i64,
    /// Entry type.
    pub kind: FileType,
    /// Entry name.
    pub name: String,
}

/// FUSE adapter for a [`LogFs`] tree.
pub struct LogFuse {
    /// The tree being served.
    fs: LogFs,
    /// Mount configuration.
    config: MountConfig,
    /// Kernel inode to node mapping.
    inodes: InodeTable,
    /// Open file handles.
    handle_table: FuseHandleTable,
    /// Write buffers of files with at least one write handle.
    ///
    /// While a file has a write handle, getattr reports the buffered size
    /// instead of the stored size, and replies carry a zero TTL.
    open_buffers: OpenBuffers,
}

impl LogFuse {
    /// Creates an adapter with the default mount configuration.
    pub fn new(fs: LogFs) -> Self {
        Self::with_config(fs, MountConfig::default())
    }

    /// Creates an adapter with a custom mount configuration.
    pub fn with_config(fs: LogFs, config: MountConfig) -> Self {
        let inodes = InodeTable::new(fs.root().into());
        Self {
            fs,
            config,
            inodes,
            handle_table: FuseHandleTable::new(),
            open_buffers: OpenBuffers::new(),
        }
    }

    /// Returns the tree being served.
    pub fn fs(&self) -> &LogFs {
        &self.fs
    }

    /// Returns the mount configuration.
    pub fn config(&self) -> &MountConfig {
        &self.config
    }

    fn make_attr(&self, attr: &Attributes) -> FileAttr {
        let size = self.open_buffers.size(attr.inode).unwrap_or(attr.size);
        let (kind, nlink) = match attr.kind {
            NodeKind::Directory => (FileType::Directory, 2),
            NodeKind::File => (FileType::RegularFile, 1),
        };
        FileAttr {
            ino: attr.inode,
            size,
            blocks: size.div_ceil(u64::from(BLOCK_SIZE)),
            atime: attr.atime,
            mtime: attr.mtime,
            ctime: attr.ctime,
            crtime: attr.ctime,
            kind,
            perm: u16::try_from(attr.mode & 0o7777).unwrap_or(0o777),
            nlink,
            uid: self.config.uid,
            gid: self.config.gid,
            rdev: 0,
            blksize: BLOCK_SIZE,
            flags: 0,
        }
    }

    /// TTL for replies about `inode`. Zero while a write buffer is open so
    /// the kernel re-asks for the size.
    fn ttl(&self, inode: u64) -> Duration {
        if self.open_buffers.contains(inode) {
            Duration::ZERO
        } else {
            self.config.attr_ttl
        }
    }

    fn node(&self, ino: u64) -> FuseResult<Node> {
        self.inodes.node(ino).ok_or(FuseError::InvalidInode(ino))
    }

    fn dir(&self, ino: u64) -> FuseResult<Dir> {
        self.node(ino)?
            .into_dir()
            .ok_or(FuseError::NotADirectory(ino))
    }

    fn file(&self, ino: u64) -> FuseResult<File> {
        self.node(ino)?
            .into_file()
            .ok_or(FuseError::IsADirectory(ino))
    }

    fn name_str(name: &OsStr) -> FuseResult<&str> {
        name.to_str().ok_or(FuseError::NonUtf8Name)
    }

    /// Resolves `name` under `parent`, registers the child with the kernel
    /// and returns its attributes.
    pub(crate) fn lookup_child(&self, parent: u64, name: &str) -> FuseResult<FileAttr> {
        let node = self.dir(parent)?.lookup(name)?;
        let attr = node.attr()?;
        self.inodes.insert_lookup(node, parent, name);
        Ok(self.make_attr(&attr))
    }

    pub(crate) fn get_attr(&self, ino: u64) -> FuseResult<FileAttr> {
        let attr = self.node(ino)?.attr()?;
        Ok(self.make_attr(&attr))
    }

    /// Applies a setattr request.
    ///
    /// A size change on a file with an open write buffer truncates the
    /// buffer, whichever handle (if any) the request came through; otherwise
    /// it goes to [`File::setattr`], which resizes the stored content.
    pub(crate) fn set_attr(
        &self,
        ino: u64,
        mut patch: SetAttr,
        fh: Option<u64>,
    ) -> FuseResult<FileAttr> {
        let node = self.node(ino)?;
        if let Some(size) = patch.size {
            if node.kind().is_directory() {
                return Err(FuseError::IsADirectory(ino));
            }
            if size > MAX_FILE_SIZE {
                return Err(NodeError::FileTooLarge(size).into());
            }
            if let Some(buffer) = self.open_buffers.get(ino) {
                let mut buffer = buffer.lock();
                debug!(inode = ino, ?fh, old_size = buffer.size(), new_size = size, "setattr: truncate open buffer");
                buffer.truncate(size);
                patch.size = None;
            }
        }
        let attr = node.setattr(&patch)?;
        Ok(self.make_attr(&attr))
    }

    pub(crate) fn make_dir(&self, parent: u64, name: &str) -> FuseResult<FileAttr> {
        let dir = self.dir(parent)?.mkdir(name)?;
        let attr = dir.attr()?;
        self.inodes.insert_lookup(dir.into(), parent, name);
        Ok(self.make_attr(&attr))
    }

    /// Creates a file and opens a write handle on it.
    pub(crate) fn create_file(&self, parent: u64, name: &str) -> FuseResult<(FileAttr, u64)> {
        let file = self.dir(parent)?.create(name)?;
        let attr = file.attr()?;
        let ino = attr.inode;
        let buffer = self
            .open_buffers
            .open(ino, || Ok::<_, FuseError>(WriteBuffer::new(file.clone(), Vec::new())))?;
        let fh = self.handle_table.insert(FuseHandle::Write(buffer));
        self.inodes.insert_lookup(file.into(), parent, name);
        Ok((self.make_attr(&attr), fh))
    }

    /// Opens a handle. Write opens join the inode's shared buffer, loading
    /// the current content if none is open (nothing for `O_TRUNC`, which
    /// also empties a buffer that is already open); read opens take a
    /// snapshot.
    pub(crate) fn open_file(&self, ino: u64, flags: i32) -> FuseResult<u64> {
        let file = self.file(ino)?;
        let is_write = (flags & libc::O_ACCMODE) != libc::O_RDONLY;
        let is_trunc = (flags & libc::O_TRUNC) != 0;

        let handle = if is_write {
            let mut loaded = false;
            let buffer = self.open_buffers.open(ino, || {
                loaded = true;
                if is_trunc {
                    Ok::<_, FuseError>(WriteBuffer::new_truncated(file))
                } else {
                    let content = file.read_all()?;
                    Ok(WriteBuffer::new(file, content))
                }
            })?;
            if is_trunc && !loaded {
                buffer.lock().truncate(0);
            }
            trace!(inode = ino, handles = self.open_buffers.handles(ino), "open for write");
            FuseHandle::Write(buffer)
        } else {
            FuseHandle::Read(file.read_all()?)
        };
        Ok(self.handle_table.insert(handle))
    }

    pub(crate) fn read_handle(&self, fh: u64, offset: i64, size: u32) -> FuseResult<Vec<u8>> {
        let handle = self
            .handle_table
            .get(fh)
            .ok_or(FuseError::InvalidHandle(fh))?;
        let offset = u64::try_from(offset).map_err(|_| FuseError::InvalidOffset(offset))?;
        Ok(handle.read(offset, size as usize))
    }

    pub(crate) fn write_handle(
        &self,
        ino: u64,
        fh: u64,
        offset: i64,
        data: &[u8],
    ) -> FuseResult<usize> {
        let buffer = self.write_buffer(fh)?;
        let start = u64::try_from(offset).map_err(|_| FuseError::InvalidOffset(offset))?;
        let end = start.saturating_add(data.len() as u64);
        if end > MAX_FILE_SIZE {
            return Err(NodeError::FileTooLarge(end).into());
        }
        let written = buffer.lock().write(start, data);
        trace!(inode = ino, fh, offset = start, written, "buffered write");
        Ok(written)
    }

    /// The shared buffer behind write handle `fh`. EBADF for read handles.
    fn write_buffer(&self, fh: u64) -> FuseResult<SharedBuffer> {
        let handle = self
            .handle_table
            .get(fh)
            .ok_or(FuseError::InvalidHandle(fh))?;
        handle
            .as_write_buffer()
            .cloned()
            .ok_or(FuseError::InvalidHandle(fh))
    }

    /// Stores a dirty write buffer through [`File::write`].
    ///
    /// The buffer stays locked across the store so writes through other
    /// handles of the same inode land either before or after it. A file
    /// that was removed or replaced since it was opened no longer owns its
    /// content key; its buffer is discarded.
    pub(crate) fn flush_handle(&self, fh: u64) -> FuseResult<()> {
        let buffer = {
            let handle = self
                .handle_table
                .get(fh)
                .ok_or(FuseError::InvalidHandle(fh))?;
            match handle.as_write_buffer() {
                Some(buffer) => Arc::clone(buffer),
                None => return Ok(()),
            }
        };

        let mut buffer = buffer.lock();
        if !buffer.is_dirty() {
            return Ok(());
        }
        let inode = buffer.file().inode();
        let stored = buffer.file().write(buffer.content());
        match stored {
            Ok(_) => {
                buffer.mark_clean();
                Ok(())
            }
            Err(NodeError::StaleInode(_)) => {
                debug!(inode, fh, size = buffer.size(), "flush of detached file dropped");
                buffer.mark_clean();
                Ok(())
            }
            Err(e) => {
                warn!(inode, fh, error = %e, "flush failed, buffer kept dirty");
                Err(e.into())
            }
        }
    }

    /// Flushes and closes a handle. The inode's buffer goes away with its
    /// last write handle.
    pub(crate) fn release_handle(&self, ino: u64, fh: u64) -> FuseResult<()> {
        let flushed = self.flush_handle(fh);
        if let Some(FuseHandle::Write(buffer)) = self.handle_table.remove(fh) {
            let inode = buffer.lock().file().inode();
            if self.open_buffers.close(inode) {
                trace!(inode, "last write handle released");
            } else {
                trace!(inode = ino, remaining = self.open_buffers.handles(inode), "write handle released");
            }
        }
        flushed
    }

    /// Lists `ino` starting after `offset`, with `.` and `..` first.
    pub(crate) fn list_dir(&self, ino: u64, offset: i64) -> FuseResult<Vec<ReaddirEntry>> {
        let dir = self.dir(ino)?;
        let parent = self.inodes.get(ino).map_or(ROOT_INODE, |e| e.parent);

        let mut children = dir.read_dir_all()?;
        children.sort_by(|a, b| a.name.cmp(&b.name));

        let mut rows = vec![
            (ino, FileType::Directory, ".".to_string()),
            (parent, FileType::Directory, "..".to_string()),
        ];
        for child in children {
            let kind = match child.kind {
                NodeKind::Directory => FileType::Directory,
                NodeKind::File => FileType::RegularFile,
            };
            if let Ok(node) = dir.lookup(&child.name)
                && node.inode() == child.inode
            {
                self.inodes.insert_no_lookup_inc(node, ino, &child.name);
            }
            rows.push((child.inode, kind, child.name));
        }

        let skip = usize::try_from(offset).unwrap_or(0);
        Ok(rows
            .into_iter()
            .enumerate()
            .skip(skip)
            .map(|(i, (inode, kind, name))| ReaddirEntry {
                inode,
                offset: i64::try_from(i + 1).unwrap_or(i64::MAX),
                kind,
                name,
            })
            .collect())
    }

    pub(crate) fn unlink_file(&self, parent: u64, name: &str) -> FuseResult<()> {
        let dir = self.dir(parent)?;
        let node = dir.lookup(name)?;
        if node.kind().is_directory() {
            return Err(FuseError::IsADirectory(node.inode()));
        }
        dir.remove(name);
        Ok(())
    }

    pub(crate) fn remove_dir(&self, parent: u64, name: &str) -> FuseResult<()> {
        let dir = self.dir(parent)?;
        let node = dir.lookup(name)?;
        let child_ino = node.inode();
        let child = node
            .into_dir()
            .ok_or(FuseError::NotADirectory(child_ino))?;
        if !child.is_empty() {
            return Err(FuseError::NotEmpty(name.to_string()));
        }
        dir.remove(name);
        Ok(())
    }

    /// Drops kernel references. An evicted inode that is no longer linked
    /// where it was last seen is purged from the index along with the part
    /// of its subtree the kernel holds no references to.
    pub(crate) fn forget_inode(&self, ino: u64, nlookup: u64) {
        if let Forgotten::Evicted { parent, name } = self.inodes.forget(ino, nlookup) {
            let index = self.fs.index();
            if index.get_in_dir(parent, &name) != Some(ino) {
                let purged = index.purge_tree(ino, |child| self.inodes.is_referenced(child));
                debug!(inode = ino, parent, name = %name, purged, "purging detached inode");
            }
        }
    }
}

fn resolve_time(time: TimeOrNow) -> SystemTime {
    match time {
        TimeOrNow::SpecificTime(t) => t,
        TimeOrNow::Now => SystemTime::now(),
    }
}

impl Filesystem for LogFuse {
    fn init(&mut self, _req: &Request<'_>, _config: &mut KernelConfig) -> Result<(), c_int> {
        info!(
            fs_name = %self.config.fs_name,
            collision = ?self.fs.config().collision,
            "FUSE filesystem initialized"
        );
        Ok(())
    }

    fn destroy(&mut self) {
        info!(open_handles = self.handle_table.len(), "FUSE filesystem destroyed");
    }

    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let result = Self::name_str(name).and_then(|name| {
            trace!(parent, name, "lookup");
            self.lookup_child(parent, name)
        });
        match result {
            Ok(attr) => reply.entry(&self.ttl(attr.ino), &attr, 0),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn forget(&mut self, _req: &Request<'_>, ino: u64, nlookup: u64) {
        trace!(inode = ino, nlookup, "forget");
        self.forget_inode(ino, nlookup);
    }

    fn batch_forget(&mut self, _req: &Request<'_>, nodes: &[fuser::fuse_forget_one]) {
        trace!(count = nodes.len(), "batch_forget");
        for node in nodes {
            self.forget_inode(node.nodeid, node.nlookup);
        }
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        trace!(inode = ino, "getattr");
        match self.get_attr(ino) {
            Ok(attr) => reply.attr(&self.ttl(ino), &attr),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn setattr(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        mode: Option<u32>,
        uid: Option<u32>,
        gid: Option<u32>,
        size: Option<u64>,
        atime: Option<TimeOrNow>,
        mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        trace!(
            inode = ino,
            mode = ?mode,
            uid = ?uid,
            gid = ?gid,
            size = ?size,
            "setattr"
        );
        // Ownership is fixed by the mount config; uid/gid changes are ignored
        let patch = SetAttr {
            atime: atime.map(resolve_time),
            mtime: mtime.map(resolve_time),
            size,
            mode: mode.map(|m| m & 0o7777),
        };
        match self.set_attr(ino, patch, fh) {
            Ok(attr) => reply.attr(&self.ttl(ino), &attr),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn mkdir(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        _mode: u32,
        _umask: u32,
        reply: ReplyEntry,
    ) {
        let result = Self::name_str(name).and_then(|name| {
            trace!(parent, name, "mkdir");
            self.make_dir(parent, name)
        });
        match result {
            Ok(attr) => reply.entry(&self.config.attr_ttl, &attr, 0),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn create(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        _mode: u32,
        _umask: u32,
        flags: i32,
        reply: fuser::ReplyCreate,
    ) {
        let result = Self::name_str(name).and_then(|name| {
            trace!(parent, name, flags, "create");
            self.create_file(parent, name)
        });
        match result {
            Ok((attr, fh)) => reply.created(&Duration::ZERO, &attr, 0, fh, 0),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        trace!(inode = ino, flags, "open");
        match self.open_file(ino, flags) {
            Ok(fh) => reply.opened(fh, 0),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        trace!(inode = ino, fh, offset, size, "read");
        match self.read_handle(fh, offset, size) {
            Ok(data) => reply.data(&data),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn write(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        trace!(inode = ino, fh, offset, size = data.len(), "write");
        match self.write_handle(ino, fh, offset, data) {
            Ok(written) => reply.written(u32::try_from(written).unwrap_or(u32::MAX)),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn flush(&mut self, _req: &Request<'_>, ino: u64, fh: u64, _lock_owner: u64, reply: ReplyEmpty) {
        trace!(inode = ino, fh, "flush");
        match self.flush_handle(fh) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn fsync(&mut self, _req: &Request<'_>, ino: u64, fh: u64, _datasync: bool, reply: ReplyEmpty) {
        trace!(inode = ino, fh, "fsync");
        match self.flush_handle(fh) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn release(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        trace!(inode = ino, fh, "release");
        match self.release_handle(ino, fh) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn readdir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        trace!(inode = ino, offset, "readdir");
        match self.list_dir(ino, offset) {
            Ok(entries) => {
                for entry in entries {
                    // Buffer full: the kernel asks again from the last offset
                    if reply.add(entry.inode, entry.offset, entry.kind, &entry.name) {
                        break;
                    }
                }
                reply.ok();
            }
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn unlink(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let result = Self::name_str(name).and_then(|name| {
            trace!(parent, name, "unlink");
            self.unlink_file(parent, name)
        });
        match result {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn rmdir(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let result = Self::name_str(name).and_then(|name| {
            trace!(parent, name, "rmdir");
            self.remove_dir(parent, name)
        });
        match result {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.to_errno()),
        }
    }
}
