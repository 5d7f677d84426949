//! Public entry point for thumbnail requests.
//!
//! [`ThumbnailLoader`] answers from the memory cache on the caller's thread
//! and hands misses to the [`ThumbnailPipeline`].

use std::sync::Arc;

use tracing::{debug, warn};

use crate::cache::{DiskCache, MemoryCache};
use crate::config::PipelineConfig;
use crate::observer::ThumbnailObserver;
use crate::pipeline::{PipelineStats, ThumbnailPipeline};
use crate::request::{Thumbnail, ThumbnailInfo, ThumbnailRequest};
use crate::source::OriginalImageLoader;

/// Loads, cancels and prefetches thumbnails.
///
/// # Example
///
/// ```ignore
/// use std::sync::Arc;
/// use smoothie::{FileDiskCache, FileImageLoader, LruMemoryCache, PipelineConfig, ThumbnailLoader};
///
/// let loader = ThumbnailLoader::new(
///     PipelineConfig::default(),
///     Arc::new(LruMemoryCache::new()),
///     Arc::new(FileDiskCache::new("/tmp/thumbnails")),
///     Arc::new(FileImageLoader::new()),
/// );
///
/// // Cached thumbnails are delivered before `load` returns
/// loader.load(request.clone(), &observer);
///
/// // The cell scrolled away
/// loader.cancel(&request);
/// ```
#[derive(Clone)]
pub struct ThumbnailLoader {
    pipeline: ThumbnailPipeline,
}

impl ThumbnailLoader {
    /// Create a loader over a new pipeline on the current Tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    pub fn new(
        config: PipelineConfig,
        memory_cache: Arc<dyn MemoryCache>,
        disk_cache: Arc<dyn DiskCache>,
        loader: Arc<dyn OriginalImageLoader>,
    ) -> Self {
        Self::with_pipeline(ThumbnailPipeline::new(
            config,
            memory_cache,
            disk_cache,
            loader,
        ))
    }

    /// Create a loader over an existing pipeline.
    pub fn with_pipeline(pipeline: ThumbnailPipeline) -> Self {
        Self { pipeline }
    }

    /// The underlying pipeline.
    pub fn pipeline(&self) -> &ThumbnailPipeline {
        &self.pipeline
    }

    /// Decode the memory-cached thumbnail for `info`, if any.
    ///
    /// An entry that fails to decode is evicted and reported as a miss.
    pub fn cached(&self, info: &ThumbnailInfo) -> Option<Thumbnail> {
        let memory_cache = self.pipeline.memory_cache();
        let data = memory_cache.get(&info.id)?;

        match self.pipeline.codec().decompress(&data) {
            Ok(thumbnail) => Some(thumbnail),
            Err(e) => {
                warn!(key = %info.id, error = %e, "Evicting undecodable memory cache entry");
                memory_cache.remove(&info.id);
                None
            }
        }
    }

    /// Load a thumbnail.
    ///
    /// A memory cache hit calls `did_success_to_load` before returning and
    /// schedules nothing. Otherwise `did_start_loading` is called and the
    /// request joins the pipeline; its outcome arrives later on a runtime
    /// thread. The observer is held weakly.
    pub fn load(&self, request: ThumbnailRequest, observer: &Arc<dyn ThumbnailObserver>) {
        if let Some(thumbnail) = self.cached(&request.thumbnail_info) {
            debug!(key = %request.cache_key(), request_id = %request.request_id, "Memory cache hit");
            observer.did_success_to_load(&request, thumbnail);
            return;
        }

        observer.did_start_loading(&request);
        self.pipeline.load(request, Some(observer));
    }

    /// Cancel a request. Unknown requests are ignored.
    pub fn cancel(&self, request: &ThumbnailRequest) {
        self.pipeline.cancel(request);
    }

    /// Warm the caches for a thumbnail without observing the result.
    ///
    /// The request is flagged as a prefetch, so it stops contributing work
    /// once the thumbnail is cached. Keys already in memory are skipped.
    pub fn prefetch(&self, request: ThumbnailRequest) {
        if self
            .pipeline
            .memory_cache()
            .get(request.cache_key())
            .is_some()
        {
            return;
        }

        let request = if request.is_prefetch {
            request
        } else {
            request.as_prefetch()
        };
        self.pipeline.load(request, None);
    }

    /// Snapshot of the pipeline counters.
    pub fn stats(&self) -> PipelineStats {
        self.pipeline.stats()
    }
}
