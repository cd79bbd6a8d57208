//! Open-handle cache.
//!
//! Content-bearing files read their whole content once at `open` and keep
//! it here until `release`, so chunked reads and writes in between never
//! go back to the data provider.
//!
//! Concurrent requests against the same handle are not serialized: each
//! cache call is atomic on its own, but a `write` racing a `truncate` can
//! interleave between calls. Implementations that need per-handle mutual
//! exclusion can provide it behind [`HandleCache`] without touching the
//! dispatcher.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

use crate::error::{FsError, FsResult};
use crate::transport::DEFAULT_MAX_FRAME_BYTES;

/// Default cap on a handle's buffer. A larger file could not be read back
/// in one frame anyway.
pub const DEFAULT_MAX_FILE_BYTES: usize = DEFAULT_MAX_FRAME_BYTES;

/// `len` as a buffer length, or EIO if it exceeds `max`.
///
/// Growing a buffer to an unchecked, driver-supplied length would abort
/// the process on allocation failure.
pub fn checked_len(len: u64, max: usize) -> FsResult<usize> {
    usize::try_from(len)
        .ok()
        .filter(|&n| n <= max)
        .ok_or_else(|| FsError::io(format!("file size {len} exceeds the {max} byte limit")))
}

/// Storage for per-open file content, keyed by handle.
pub trait HandleCache: Send + Sync {
    /// Store `data` for a newly opened `path` and return its handle.
    fn open(&self, path: &str, data: Vec<u8>) -> u64;

    /// Bytes `[offset, offset + size)`, clamped to the buffer.
    fn read(&self, fh: u64, offset: u64, size: u64) -> FsResult<Vec<u8>>;

    /// Copy `data` in at `offset`, zero-extending the buffer as needed.
    /// Returns the whole buffer after the write. Fails with EIO if the
    /// buffer would grow past [`HandleCache::max_size`].
    fn write(&self, fh: u64, offset: u64, data: &[u8]) -> FsResult<Vec<u8>>;

    /// Replace the buffer of every handle open on `path`.
    fn replace_path(&self, path: &str, data: &[u8]);

    /// Forget a handle. Returns false if it was not open.
    fn release(&self, fh: u64) -> bool;

    /// Number of open handles.
    fn len(&self) -> usize;

    /// Largest buffer a handle may hold.
    fn max_size(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Shared handle cache.
pub type SharedHandleCache = Arc<dyn HandleCache>;

#[derive(Debug)]
struct OpenFile {
    path: String,
    data: Vec<u8>,
}

/// In-memory [`HandleCache`].
///
/// Handle `0` is never issued; it is the null handle of routes without
/// per-open state.
#[derive(Debug)]
pub struct MemoryHandleCache {
    files: DashMap<u64, OpenFile>,
    next: AtomicU64,
    max_size: usize,
}

impl Default for MemoryHandleCache {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryHandleCache {
    pub fn new() -> Self {
        Self {
            files: DashMap::new(),
            next: AtomicU64::new(1),
            max_size: DEFAULT_MAX_FILE_BYTES,
        }
    }

    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }

    /// Wrap a new cache for sharing between routes.
    pub fn shared() -> SharedHandleCache {
        Self::new().into_shared()
    }

    pub fn into_shared(self) -> SharedHandleCache {
        Arc::new(self)
    }
}

/// Clamp `[offset, offset + size)` to `len`.
fn clamp(len: usize, offset: u64, size: u64) -> (usize, usize) {
    let start = usize::try_from(offset).unwrap_or(usize::MAX).min(len);
    let end = start
        .saturating_add(usize::try_from(size).unwrap_or(usize::MAX))
        .min(len);
    (start, end)
}

impl HandleCache for MemoryHandleCache {
    fn open(&self, path: &str, data: Vec<u8>) -> u64 {
        let fh = self.next.fetch_add(1, Ordering::Relaxed);
        self.files.insert(
            fh,
            OpenFile {
                path: path.to_string(),
                data,
            },
        );
        fh
    }

    fn read(&self, fh: u64, offset: u64, size: u64) -> FsResult<Vec<u8>> {
        let file = self.files.get(&fh).ok_or(FsError::StaleHandle(fh))?;
        let (start, end) = clamp(file.data.len(), offset, size);
        Ok(file.data[start..end].to_vec())
    }

    fn write(&self, fh: u64, offset: u64, data: &[u8]) -> FsResult<Vec<u8>> {
        let mut file = self.files.get_mut(&fh).ok_or(FsError::StaleHandle(fh))?;
        let end = offset
            .checked_add(data.len() as u64)
            .ok_or_else(|| FsError::io(format!("write at offset {offset} overflows")))?;
        let end = checked_len(end, self.max_size)?;
        let offset = end - data.len();
        if end > file.data.len() {
            file.data.resize(end, 0);
        }
        file.data[offset..end].copy_from_slice(data);
        Ok(file.data.clone())
    }

    fn replace_path(&self, path: &str, data: &[u8]) {
        for mut file in self.files.iter_mut() {
            if file.path == path {
                file.data = data.to_vec();
            }
        }
    }

    fn release(&self, fh: u64) -> bool {
        self.files.remove(&fh).is_some()
    }

    fn len(&self) -> usize {
        self.files.len()
    }

    fn max_size(&self) -> usize {
        self.max_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handles_start_at_one() {
        let cache = MemoryHandleCache::new();
        let a = cache.open("/a", b"x".to_vec());
        let b = cache.open("/a", b"y".to_vec());
        assert_eq!(a, 1);
        assert_eq!(b, 2);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_read_clamps() {
        let cache = MemoryHandleCache::new();
        let fh = cache.open("/f", b"hello".to_vec());
        assert_eq!(cache.read(fh, 1, 3).unwrap(), b"ell");
        assert_eq!(cache.read(fh, 3, 100).unwrap(), b"lo");
        assert!(cache.read(fh, 5, 10).unwrap().is_empty());
        assert!(cache.read(fh, 1000, 10).unwrap().is_empty());
        assert!(cache.read(fh, 0, u64::MAX).is_ok());
    }

    #[test]
    fn test_write_grows_with_zeros() {
        let cache = MemoryHandleCache::new();
        let fh = cache.open("/f", b"hello".to_vec());
        let full = cache.write(fh, 10, b"x").unwrap();
        assert_eq!(full.len(), 11);
        assert_eq!(&full[5..], b"\0\0\0\0\0x");
        assert_eq!(cache.read(fh, 5, 6).unwrap(), b"\0\0\0\0\0x");
    }

    #[test]
    fn test_write_overwrites_in_place() {
        let cache = MemoryHandleCache::new();
        let fh = cache.open("/f", b"hello world".to_vec());
        let full = cache.write(fh, 0, b"HELLO").unwrap();
        assert_eq!(full, b"HELLO world");
    }

    #[test]
    fn test_write_past_limit_is_io_error() {
        let cache = MemoryHandleCache::new().with_max_size(16);
        let fh = cache.open("/f", b"hello".to_vec());
        assert!(cache.write(fh, 11, b"12345").is_ok());
        assert!(matches!(cache.write(fh, 12, b"12345"), Err(FsError::Io(_))));
        assert!(matches!(cache.write(fh, 1 << 44, b"x"), Err(FsError::Io(_))));
        assert!(matches!(cache.write(fh, u64::MAX, b"x"), Err(FsError::Io(_))));
        // The failed writes left the buffer alone.
        assert_eq!(cache.read(fh, 0, 100).unwrap().len(), 16);
    }

    #[test]
    fn test_checked_len() {
        assert_eq!(checked_len(10, 10).unwrap(), 10);
        assert!(checked_len(11, 10).is_err());
        assert!(checked_len(1 << 44, DEFAULT_MAX_FILE_BYTES).is_err());
    }

    #[test]
    fn test_unknown_handle() {
        let cache = MemoryHandleCache::new();
        assert!(matches!(cache.read(7, 0, 1), Err(FsError::StaleHandle(7))));
        assert!(matches!(cache.write(7, 0, b"a"), Err(FsError::StaleHandle(7))));
        assert!(!cache.release(7));
    }

    #[test]
    fn test_replace_path_only_touches_that_path() {
        let cache = MemoryHandleCache::new();
        let a1 = cache.open("/a", b"aaaa".to_vec());
        let a2 = cache.open("/a", b"aaaa".to_vec());
        let b = cache.open("/b", b"bbbb".to_vec());
        cache.replace_path("/a", b"z");
        assert_eq!(cache.read(a1, 0, 10).unwrap(), b"z");
        assert_eq!(cache.read(a2, 0, 10).unwrap(), b"z");
        assert_eq!(cache.read(b, 0, 10).unwrap(), b"bbbb");
    }

    #[test]
    fn test_release() {
        let cache = MemoryHandleCache::new();
        let fh = cache.open("/f", vec![1, 2, 3]);
        assert!(cache.release(fh));
        assert!(cache.is_empty());
        assert!(cache.read(fh, 0, 1).is_err());
    }
}
