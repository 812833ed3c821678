//! Open file handles.
//!
//! Files are stored whole, so the adapter buffers open files in memory:
//! reads are served from a snapshot taken at open, writes land in a
//! [`WriteBuffer`] that is stored back with [`File::write`] on flush, fsync
//! and release.
//!
//! All write handles of one inode share a single buffer through
//! [`OpenBuffers`], so every writer sees the others' bytes and the size
//! reported to the kernel stays put until the last writer closes.
//!
//! [`File::write`]: logfs_core::File::write

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use dashmap::mapref::one::Ref;
use logfs_core::File;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// In-memory content of a file opened for writing.
///
/// Offset writes beyond the end zero-fill the gap.
#[derive(Debug)]
pub struct WriteBuffer {
    file: File,
    content: Vec<u8>,
    dirty: bool,
}

impl WriteBuffer {
    /// Creates a buffer holding the file's current content.
    pub fn new(file: File, existing_content: Vec<u8>) -> Self {
        Self {
            file,
            content: existing_content,
            dirty: false,
        }
    }

    /// Creates an empty buffer that is stored on first flush even if nothing
    /// is written (used for `O_TRUNC` opens).
    pub fn new_truncated(file: File) -> Self {
        Self {
            file,
            content: Vec::new(),
            dirty: true,
        }
    }

    /// Writes `data` at `offset` and returns the number of bytes written.
    pub fn write(&mut self, offset: u64, data: &[u8]) -> usize {
        #[allow(clippy::cast_possible_truncation)]
        let offset = offset as usize;
        let end = offset + data.len();
        if end > self.content.len() {
            self.content.resize(end, 0);
        }
        self.content[offset..end].copy_from_slice(data);
        self.dirty = true;
        data.len()
    }

    /// Reads up to `size` bytes at `offset`. Empty past the end.
    pub fn read(&self, offset: u64, size: usize) -> &[u8] {
        read_slice(&self.content, offset, size)
    }

    /// Truncates or zero-extends to `size`.
    pub fn truncate(&mut self, size: u64) {
        #[allow(clippy::cast_possible_truncation)]
        let size = size as usize;
        if size != self.content.len() {
            self.content.resize(size, 0);
            self.dirty = true;
        }
    }

    /// Current buffered size.
    #[inline]
    pub fn size(&self) -> u64 {
        self.content.len() as u64
    }

    /// Check if the buffer holds changes not yet stored.
    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// The file this buffer stores into.
    #[inline]
    pub fn file(&self) -> &File {
        &self.file
    }

    /// Buffered content.
    #[inline]
    pub fn content(&self) -> &[u8] {
        &self.content
    }

    /// Mark the buffer as clean after a successful store, or once the file
    /// it belongs to is gone.
    #[inline]
    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }
}

/// A write buffer shared by every write handle of one inode.
pub type SharedBuffer = Arc<Mutex<WriteBuffer>>;

#[derive(Debug)]
struct OpenBuffer {
    buffer: SharedBuffer,
    handles: usize,
}

/// Write buffers of currently open files, keyed by inode, with the number
/// of write handles holding each.
#[derive(Debug, Default)]
pub struct OpenBuffers {
    buffers: DashMap<u64, OpenBuffer>,
}

impl OpenBuffers {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers one more write handle on `inode`.
    ///
    /// Joins the buffer already open for the inode, or starts one from
    /// `load`. `load` runs without any table lock held; if another open wins
    /// the race its buffer is joined and the loaded one dropped.
    pub fn open<E>(
        &self,
        inode: u64,
        load: impl FnOnce() -> Result<WriteBuffer, E>,
    ) -> Result<SharedBuffer, E> {
        if let Some(mut open) = self.buffers.get_mut(&inode) {
            open.handles += 1;
            return Ok(Arc::clone(&open.buffer));
        }
        let loaded = load()?;
        let shared = match self.buffers.entry(inode) {
            Entry::Occupied(mut slot) => {
                let open = slot.get_mut();
                open.handles += 1;
                Arc::clone(&open.buffer)
            }
            Entry::Vacant(slot) => {
                let buffer = Arc::new(Mutex::new(loaded));
                slot.insert(OpenBuffer {
                    buffer: Arc::clone(&buffer),
                    handles: 1,
                });
                buffer
            }
        };
        Ok(shared)
    }

    /// Drops one write handle on `inode`. Returns true when it was the last
    /// and the buffer was removed.
    pub fn close(&self, inode: u64) -> bool {
        match self.buffers.entry(inode) {
            Entry::Occupied(mut slot) => {
                let open = slot.get_mut();
                open.handles = open.handles.saturating_sub(1);
                if open.handles == 0 {
                    slot.remove();
                    true
                } else {
                    false
                }
            }
            Entry::Vacant(_) => false,
        }
    }

    /// Returns the open buffer of `inode`, if any.
    pub fn get(&self, inode: u64) -> Option<SharedBuffer> {
        self.buffers.get(&inode).map(|open| Arc::clone(&open.buffer))
    }

    /// Buffered size of `inode`, if it has an open buffer.
    pub fn size(&self, inode: u64) -> Option<u64> {
        self.get(inode).map(|buffer| buffer.lock().size())
    }

    /// Returns true if `inode` has an open buffer.
    pub fn contains(&self, inode: u64) -> bool {
        self.buffers.contains_key(&inode)
    }

    /// Number of write handles on `inode`.
    pub fn handles(&self, inode: u64) -> usize {
        self.buffers.get(&inode).map_or(0, |open| open.handles)
    }
}

fn read_slice(content: &[u8], offset: u64, size: usize) -> &[u8] {
    #[allow(clippy::cast_possible_truncation)]
    let offset = offset as usize;
    if offset >= content.len() {
        return &[];
    }
    let end = offset.saturating_add(size).min(content.len());
    &content[offset..end]
}

/// Handle type for FUSE file operations.
#[derive(Debug)]
pub enum FuseHandle {
    /// Read-only handle serving a snapshot taken at open.
    Read(Vec<u8>),
    /// Write handle on the inode's shared buffer.
    Write(SharedBuffer),
}

impl FuseHandle {
    /// Reads up to `size` bytes at `offset` from whichever buffer this holds.
    pub fn read(&self, offset: u64, size: usize) -> Vec<u8> {
        match self {
            FuseHandle::Read(content) => read_slice(content, offset, size).to_vec(),
            FuseHandle::Write(buffer) => buffer.lock().read(offset, size).to_vec(),
        }
    }

    /// Returns the shared write buffer, if this is a write handle.
    pub fn as_write_buffer(&self) -> Option<&SharedBuffer> {
        match self {
            FuseHandle::Write(b) => Some(b),
            FuseHandle::Read(_) => None,
        }
    }
}

/// Thread-safe handle table with auto-incrementing ids.
///
/// Ids start at 1; 0 is never handed out.
#[derive(Debug)]
pub struct FuseHandleTable {
    handles: DashMap<u64, FuseHandle>,
    next_id: AtomicU64,
}

impl FuseHandleTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self {
            handles: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Inserts a handle under a fresh id and returns the id.
    pub fn insert(&self, handle: FuseHandle) -> u64 {
        let mut handle = Some(handle);
        loop {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            if id == 0 {
                continue;
            }
            if let Entry::Vacant(slot) = self.handles.entry(id)
                && let Some(handle) = handle.take()
            {
                slot.insert(handle);
                return id;
            }
        }
    }

    /// Get a reference to a handle.
    pub fn get(&self, fh: u64) -> Option<Ref<'_, u64, FuseHandle>> {
        self.handles.get(&fh)
    }

    /// Removes and returns a handle.
    pub fn remove(&self, fh: u64) -> Option<FuseHandle> {
        self.handles.remove(&fh).map(|(_, h)| h)
    }

    /// Number of open handles.
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// Returns true if no handles are open.
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

impl Default for FuseHandleTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use logfs_core::{LogFs, MemoryBackend};
    use std::collections::HashSet;
    use std::convert::Infallible;
    use std::thread;

    fn test_file() -> File {
        let fs = LogFs::new(Arc::new(MemoryBackend::new()));
        fs.root().create("test.txt").unwrap()
    }

    fn shared(content: &[u8]) -> SharedBuffer {
        Arc::new(Mutex::new(WriteBuffer::new(test_file(), content.to_vec())))
    }

    #[test]
    fn test_write_buffer_new() {
        let buf = WriteBuffer::new(test_file(), vec![1, 2, 3]);
        assert_eq!(buf.size(), 3);
        assert!(!buf.is_dirty());
        assert_eq!(buf.file().path(), "test.txt");
    }

    #[test]
    fn test_write_buffer_new_truncated() {
        let buf = WriteBuffer::new_truncated(test_file());
        assert_eq!(buf.size(), 0);
        assert!(buf.is_dirty());
    }

    #[test]
    fn test_write_buffer_write_in_middle() {
        let mut buf = WriteBuffer::new(test_file(), vec![0; 10]);
        assert_eq!(buf.write(3, b"abc"), 3);
        assert_eq!(&buf.content()[3..6], b"abc");
        assert_eq!(buf.size(), 10);
        assert!(buf.is_dirty());
    }

    #[test]
    fn test_write_buffer_write_extends_with_zeros() {
        let mut buf = WriteBuffer::new(test_file(), vec![1, 2, 3]);
        buf.write(5, b"xyz");
        assert_eq!(buf.content(), &[1, 2, 3, 0, 0, b'x', b'y', b'z']);
    }

    #[test]
    fn test_write_buffer_read() {
        let buf = WriteBuffer::new(test_file(), b"hello world".to_vec());
        assert_eq!(buf.read(0, 5), b"hello");
        assert_eq!(buf.read(6, 100), b"world");
        assert_eq!(buf.read(100, 10), b"");
    }

    #[test]
    fn test_write_buffer_truncate() {
        let mut buf = WriteBuffer::new(test_file(), b"hello".to_vec());
        buf.truncate(5);
        assert!(!buf.is_dirty());
        buf.truncate(2);
        assert_eq!(buf.content(), b"he");
        assert!(buf.is_dirty());
        buf.mark_clean();
        buf.truncate(4);
        assert_eq!(buf.content(), b"he\0\0");
        assert!(buf.is_dirty());
    }

    #[test]
    fn test_handle_read_variants() {
        let read = FuseHandle::Read(b"snapshot".to_vec());
        assert_eq!(read.read(4, 4), b"shot");
        assert!(read.as_write_buffer().is_none());

        let write = FuseHandle::Write(shared(b"buffer"));
        assert_eq!(write.read(0, 3), b"buf");
        assert!(write.as_write_buffer().is_some());
    }

    #[test]
    fn test_open_buffers_share_one_buffer() {
        let buffers = OpenBuffers::new();
        let first = buffers
            .open(7, || Ok::<_, Infallible>(WriteBuffer::new(test_file(), b"ab".to_vec())))
            .unwrap();
        // Second open joins without loading
        let second = buffers
            .open(7, || -> Result<WriteBuffer, Infallible> { panic!("loaded twice") })
            .unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(buffers.handles(7), 2);

        first.lock().write(2, b"cd");
        assert_eq!(buffers.size(7), Some(4));
        assert_eq!(second.lock().content(), b"abcd");

        assert!(!buffers.close(7));
        assert!(buffers.contains(7));
        assert_eq!(buffers.size(7), Some(4));
        assert!(buffers.close(7));
        assert!(!buffers.contains(7));
        assert_eq!(buffers.size(7), None);
        assert!(!buffers.close(7));
    }

    #[test]
    fn test_open_buffers_load_error_registers_nothing() {
        let buffers = OpenBuffers::new();
        let result = buffers.open(3, || Err::<WriteBuffer, _>("backend down"));
        assert_eq!(result.unwrap_err(), "backend down");
        assert!(!buffers.contains(3));
        assert_eq!(buffers.handles(3), 0);
    }

    #[test]
    fn test_handle_table_ids() {
        let table = FuseHandleTable::new();
        let a = table.insert(FuseHandle::Read(vec![]));
        let b = table.insert(FuseHandle::Read(vec![]));
        assert_ne!(a, 0);
        assert_ne!(a, b);
        assert_eq!(table.len(), 2);

        assert!(table.remove(a).is_some());
        assert!(table.remove(a).is_none());
        assert!(table.get(a).is_none());
        assert!(table.get(b).is_some());
    }

    #[test]
    fn test_handle_table_concurrent_inserts() {
        let table = Arc::new(FuseHandleTable::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let table = Arc::clone(&table);
                thread::spawn(move || {
                    (0..100)
                        .map(|_| table.insert(FuseHandle::Read(vec![])))
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let ids: HashSet<u64> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        assert_eq!(ids.len(), 800);
        assert_eq!(table.len(), 800);
    }
}
