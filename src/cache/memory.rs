//! In-memory cache for encoded thumbnails.
//!
//! [`LruMemoryCache`] tracks the total size of cached thumbnails in bytes and
//! evicts least-recently-used entries when the capacity is exceeded. The
//! number of entries is bounded too, to cap LRU bookkeeping overhead.

use std::num::NonZeroUsize;

use bytes::Bytes;
use lru::LruCache;
use parking_lot::Mutex;

use super::MemoryCache;

/// Default cache capacity: 64MB
pub const DEFAULT_MEMORY_CACHE_CAPACITY: usize = 64 * 1024 * 1024;

/// Default maximum number of entries
pub const DEFAULT_MEMORY_CACHE_ENTRIES: usize = 10_000;

struct Inner {
    entries: LruCache<String, Bytes>,
    current_size: usize,
}

/// Size-bounded LRU cache of encoded thumbnail bytes.
///
/// # Thread Safety
///
/// All operations take a short internal lock, so the cache can be shared
/// across threads via `Arc` and queried synchronously from any thread.
///
/// # Example
///
/// ```
/// use smoothie::cache::{LruMemoryCache, MemoryCache};
/// use bytes::Bytes;
///
/// let cache = LruMemoryCache::with_capacity(1024 * 1024);
/// cache.set("clip-1", Bytes::from_static(&[0xFF, 0xD8, 0xFF, 0xE0]));
///
/// assert!(cache.get("clip-1").is_some());
/// cache.remove("clip-1");
/// assert!(cache.get("clip-1").is_none());
/// ```
pub struct LruMemoryCache {
    inner: Mutex<Inner>,

    /// Maximum total size in bytes
    max_size: usize,
}

impl LruMemoryCache {
    /// Create a cache with the default capacity (64MB).
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MEMORY_CACHE_CAPACITY)
    }

    /// Create a cache holding at most `max_size` bytes.
    pub fn with_capacity(max_size: usize) -> Self {
        Self::with_capacity_and_entries(max_size, DEFAULT_MEMORY_CACHE_ENTRIES)
    }

    /// Create a cache bounded by both total bytes and entry count.
    pub fn with_capacity_and_entries(max_size: usize, max_entries: usize) -> Self {
        let max_entries = NonZeroUsize::new(max_entries).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(Inner {
                entries: LruCache::new(max_entries),
                current_size: 0,
            }),
            max_size,
        }
    }

    /// Check for an entry without updating LRU order.
    pub fn contains(&self, key: &str) -> bool {
        self.inner.lock().entries.contains(key)
    }

    /// Remove every entry.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.current_size = 0;
    }

    /// Number of cached thumbnails.
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }

    /// Current total size of cached thumbnails in bytes.
    pub fn size(&self) -> usize {
        self.inner.lock().current_size
    }

    /// Maximum capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.max_size
    }
}

impl Default for LruMemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCache for LruMemoryCache {
    fn get(&self, key: &str) -> Option<Bytes> {
        self.inner.lock().entries.get(key).cloned()
    }

    fn set(&self, key: &str, value: Bytes) {
        let value_size = value.len();
        let mut inner = self.inner.lock();

        // `push` hands back either the replaced value for this key or the
        // entry evicted by the entry-count bound
        if let Some((_, displaced)) = inner.entries.push(key.to_owned(), value) {
            inner.current_size = inner.current_size.saturating_sub(displaced.len());
        }
        inner.current_size += value_size;

        while inner.current_size > self.max_size {
            match inner.entries.pop_lru() {
                Some((_, evicted)) => {
                    inner.current_size = inner.current_size.saturating_sub(evicted.len());
                }
                None => break,
            }
        }
    }

    fn remove(&self, key: &str) {
        let mut inner = self.inner.lock();
        if let Some(data) = inner.entries.pop(key) {
            inner.current_size = inner.current_size.saturating_sub(data.len());
        }
    }
}
