//! Disk cache implementations.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use sha2::{Digest, Sha256};
use tracing::debug;

use super::DiskCache;
use crate::error::CacheError;

// =============================================================================
// FileDiskCache
// =============================================================================

/// Disk cache storing one file per key in a directory.
///
/// Keys are arbitrary strings, so each file is named by the hex SHA-256 of
/// its key. Writes go to a temporary file that is renamed into place, so a
/// concurrent reader sees either the old entry, the new entry, or nothing.
/// The directory is created on first write.
#[derive(Debug)]
pub struct FileDiskCache {
    dir: PathBuf,
    tmp_counter: AtomicU64,
}

impl FileDiskCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            tmp_counter: AtomicU64::new(0),
        }
    }

    /// The cache directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File that holds the entry for `key`.
    pub fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(file_name_for(key))
    }
}

/// Hex SHA-256 of the key.
fn file_name_for(key: &str) -> String {
    hex::encode(Sha256::digest(key.as_bytes()))
}

#[async_trait]
impl DiskCache for FileDiskCache {
    async fn get(&self, key: &str) -> Option<Bytes> {
        match tokio::fs::read(self.path_for(key)).await {
            Ok(data) if !data.is_empty() => Some(Bytes::from(data)),
            Ok(_) => None,
            Err(e) if e.kind() == ErrorKind::NotFound => None,
            Err(e) => {
                debug!(key, error = %e, "Disk cache read failed, treating as miss");
                None
            }
        }
    }

    async fn set(&self, key: &str, value: Bytes) -> Result<(), CacheError> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let target = self.path_for(key);
        let seq = self.tmp_counter.fetch_add(1, Ordering::Relaxed);
        let tmp = self
            .dir
            .join(format!("{}.{}.tmp", file_name_for(key), seq));

        if let Err(e) = tokio::fs::write(&tmp, &value).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        if let Err(e) = tokio::fs::rename(&tmp, &target).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), CacheError> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

// =============================================================================
// NoDiskCache
// =============================================================================

/// Disk cache that stores nothing, for pipelines configured without one.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDiskCache;

#[async_trait]
impl DiskCache for NoDiskCache {
    async fn get(&self, _key: &str) -> Option<Bytes> {
        None
    }

    async fn set(&self, _key: &str, _value: Bytes) -> Result<(), CacheError> {
        Ok(())
    }

    async fn remove(&self, _key: &str) -> Result<(), CacheError> {
        Ok(())
    }
}
