//! # Smoothie
//!
//! An asynchronous thumbnail loading pipeline with memory and disk caching.
//!
//! Callers ask for thumbnails by cache key. Memory cache hits are answered
//! on the caller's thread; misses run through a staged pipeline (disk cache
//! check, original load, downsample, encode, disk cache write, decompress)
//! with bounded concurrency per stage. Concurrent requests for the same key
//! share one pool of work and all receive the same result.
//!
//! ## Features
//!
//! - **Request pooling**: duplicate requests for a key are merged; each can
//!   be cancelled without disturbing the others
//! - **Prefetch**: warm the caches ahead of display; prefetch-only work stops
//!   as soon as the thumbnail is cached
//! - **Pluggable caches and sources**: [`MemoryCache`], [`DiskCache`] and
//!   [`OriginalImageLoader`] are traits, with bundled implementations
//! - **Weak observers**: a pending load never keeps its observer alive
//!
//! ## Architecture
//!
//! - [`loader`] - [`ThumbnailLoader`], the public facade
//! - [`pipeline`] - stage orchestration and per-stage queues
//! - [`pool`] - per-key request pools
//! - [`cache`] - memory and disk cache traits and implementations
//! - [`codec`] - downsample / encode / decompress
//! - [`source`] - original image loaders
//! - [`config`] - CLI and pipeline configuration
//!
//! Failures are binary at the observer boundary: a load either yields a
//! thumbnail or `did_failed_to_load`. Stage errors are typed internally
//! (see [`error`]) and logged through `tracing`.

pub mod cache;
pub mod codec;
pub mod config;
pub mod error;
pub mod loader;
pub mod observer;
pub mod pipeline;
pub mod pool;
pub mod request;
pub mod source;

// Re-export commonly used types
pub use cache::{DiskCache, FileDiskCache, LruMemoryCache, MemoryCache, NoDiskCache};
pub use codec::{jpeg_quality_for, ThumbnailCodec, DEFAULT_COMPRESSION_QUALITY};
pub use config::{Config, OutputFormat, PipelineConfig, QueueLimits};
pub use error::{CacheError, CodecError, LoadError, StageError};
pub use loader::ThumbnailLoader;
pub use observer::ThumbnailObserver;
pub use pipeline::{PipelineStats, ThumbnailPipeline};
pub use pool::RequestPool;
pub use request::{
    OriginalImageRequest, RequestId, Size, Thumbnail, ThumbnailInfo, ThumbnailRequest,
};
pub use source::{FileImageLoader, OriginalImageLoader};
