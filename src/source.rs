//! Original image sources.
//!
//! The pipeline fetches source bytes through [`OriginalImageLoader`], so it
//! works with any storage backend (local files, network, a photo library)
//! without being tied to one.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::LoadError;
use crate::request::OriginalImageRequest;

/// Fetches the original bytes of an image.
#[async_trait]
pub trait OriginalImageLoader: Send + Sync {
    /// Load the full original bytes named by `request`.
    async fn load(&self, request: &OriginalImageRequest) -> Result<Bytes, LoadError>;
}

/// Loads originals from the local filesystem.
///
/// The request locator is a path, resolved against `root` when one is set.
#[derive(Debug, Clone, Default)]
pub struct FileImageLoader {
    root: Option<PathBuf>,
}

impl FileImageLoader {
    /// Loader resolving locators as given.
    pub fn new() -> Self {
        Self { root: None }
    }

    /// Loader resolving relative locators against `root`.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
        }
    }

    /// The path a request resolves to.
    pub fn resolve(&self, request: &OriginalImageRequest) -> PathBuf {
        let path = Path::new(request.as_str());
        match &self.root {
            Some(root) if path.is_relative() => root.join(path),
            _ => path.to_path_buf(),
        }
    }
}

#[async_trait]
impl OriginalImageLoader for FileImageLoader {
    async fn load(&self, request: &OriginalImageRequest) -> Result<Bytes, LoadError> {
        let path = self.resolve(request);
        let data = tokio::fs::read(&path).await.map_err(|e| match e.kind() {
            ErrorKind::NotFound => LoadError::NotFound(path.display().to_string()),
            _ => LoadError::Io(format!("{}: {}", path.display(), e)),
        })?;

        if data.is_empty() {
            return Err(LoadError::Empty(path.display().to_string()));
        }
        Ok(Bytes::from(data))
    }
}
