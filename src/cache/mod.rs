//! Cache layer.
//!
//! The pipeline consumes two caching capabilities and imposes no eviction
//! policy of its own:
//!
//! - [`MemoryCache`]: synchronous, consulted on the caller's thread before
//!   any work is scheduled
//! - [`DiskCache`]: asynchronous, persistent; a failed read is reported as
//!   "not cached" and writes are best-effort
//!
//! Both store encoded thumbnail bytes keyed by the thumbnail's cache key.
//! [`LruMemoryCache`], [`FileDiskCache`] and [`NoDiskCache`] are the bundled
//! implementations.

mod disk;
mod memory;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::CacheError;

pub use disk::{FileDiskCache, NoDiskCache};
pub use memory::{LruMemoryCache, DEFAULT_MEMORY_CACHE_CAPACITY, DEFAULT_MEMORY_CACHE_ENTRIES};

/// In-memory store of encoded thumbnails.
///
/// Implementations must be safe for concurrent use; entries may be evicted
/// at the implementation's discretion.
pub trait MemoryCache: Send + Sync {
    fn get(&self, key: &str) -> Option<Bytes>;

    fn set(&self, key: &str, value: Bytes);

    fn remove(&self, key: &str);
}

/// Persistent store of encoded thumbnails.
#[async_trait]
pub trait DiskCache: Send + Sync {
    /// Read an entry. `None` means "not cached", including when the read
    /// itself failed.
    async fn get(&self, key: &str) -> Option<Bytes>;

    async fn set(&self, key: &str, value: Bytes) -> Result<(), CacheError>;

    async fn remove(&self, key: &str) -> Result<(), CacheError>;
}
