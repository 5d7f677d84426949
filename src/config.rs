//! Configuration for the thumbnail pipeline.
//!
//! Two layers:
//! - [`PipelineConfig`]: plain settings consumed by the library
//!   (queue widths, compression quality, optional load timeout)
//! - [`Config`]: the `smoothie` command line, with environment variable
//!   fallbacks, which builds a [`PipelineConfig`]
//!
//! # Environment Variables
//!
//! - `SMOOTHIE_CACHE_DIR` - Disk cache directory (default: none, disk cache off)
//! - `SMOOTHIE_MEMORY_CACHE` - Memory cache capacity in bytes (default: 64MB)
//! - `SMOOTHIE_COMPRESSION_QUALITY` - JPEG compression ratio 0.0-1.0 (default: 0.8)
//! - `SMOOTHIE_LOAD_TIMEOUT_MS` - Original load timeout (default: none)
//! - `SMOOTHIE_DISK_READ_QUEUE`, `SMOOTHIE_DATA_LOAD_QUEUE`,
//!   `SMOOTHIE_DOWNSAMPLE_QUEUE`, `SMOOTHIE_ENCODE_QUEUE`,
//!   `SMOOTHIE_DECOMPRESS_QUEUE`, `SMOOTHIE_DISK_WRITE_QUEUE` - stage
//!   concurrency limits

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};

use crate::cache::DEFAULT_MEMORY_CACHE_CAPACITY;
use crate::codec::{is_valid_compression_quality, DEFAULT_COMPRESSION_QUALITY};

// =============================================================================
// Default Values
// =============================================================================

/// Default concurrent disk cache reads.
pub const DEFAULT_DISK_READ_CONCURRENCY: usize = 1;

/// Default concurrent original loads.
pub const DEFAULT_DATA_LOAD_CONCURRENCY: usize = 1;

/// Default concurrent downsample operations.
pub const DEFAULT_DOWNSAMPLE_CONCURRENCY: usize = 2;

/// Default concurrent encode operations.
pub const DEFAULT_ENCODE_CONCURRENCY: usize = 1;

/// Default concurrent decompress operations.
pub const DEFAULT_DECOMPRESS_CONCURRENCY: usize = 2;

/// Default concurrent disk cache writes.
pub const DEFAULT_DISK_WRITE_CONCURRENCY: usize = 1;

/// Default thumbnail edge in points for the command line.
pub const DEFAULT_THUMBNAIL_SIZE: f32 = 128.0;

/// Default display scale for the command line.
pub const DEFAULT_SCALE: f32 = 2.0;

// =============================================================================
// Pipeline Configuration
// =============================================================================

/// Maximum concurrent operations per stage queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueLimits {
    pub disk_read: usize,
    pub data_load: usize,
    pub downsample: usize,
    pub encode: usize,
    pub decompress: usize,
    pub disk_write: usize,
}

impl Default for QueueLimits {
    fn default() -> Self {
        Self {
            disk_read: DEFAULT_DISK_READ_CONCURRENCY,
            data_load: DEFAULT_DATA_LOAD_CONCURRENCY,
            downsample: DEFAULT_DOWNSAMPLE_CONCURRENCY,
            encode: DEFAULT_ENCODE_CONCURRENCY,
            decompress: DEFAULT_DECOMPRESS_CONCURRENCY,
            disk_write: DEFAULT_DISK_WRITE_CONCURRENCY,
        }
    }
}

impl QueueLimits {
    fn all(&self) -> [(&'static str, usize); 6] {
        [
            ("disk_read", self.disk_read),
            ("data_load", self.data_load),
            ("downsample", self.downsample),
            ("encode", self.encode),
            ("decompress", self.decompress),
            ("disk_write", self.disk_write),
        ]
    }
}

/// Settings for [`ThumbnailPipeline`](crate::pipeline::ThumbnailPipeline).
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub queues: QueueLimits,

    /// JPEG compression ratio (0.0-1.0)
    pub compression_quality: f32,

    /// Upper bound on a single original load. `None` waits indefinitely.
    pub load_timeout: Option<Duration>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            queues: QueueLimits::default(),
            compression_quality: DEFAULT_COMPRESSION_QUALITY,
            load_timeout: None,
        }
    }
}

impl PipelineConfig {
    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        for (name, limit) in self.queues.all() {
            if limit == 0 {
                return Err(format!("{name} queue concurrency must be greater than 0"));
            }
        }

        if !is_valid_compression_quality(self.compression_quality) {
            return Err("compression_quality must be between 0.0 and 1.0".to_string());
        }

        if self.load_timeout == Some(Duration::ZERO) {
            return Err("load_timeout must be greater than 0".to_string());
        }

        Ok(())
    }
}

// =============================================================================
// CLI Arguments
// =============================================================================

/// Report format for the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// One line per image
    Text,
    /// A JSON document
    Json,
}

/// Smoothie - generate and cache thumbnails for local images.
///
/// Runs every input through the thumbnail pipeline: disk cache check,
/// original load, downsample, encode, disk cache write, decompress.
#[derive(Parser, Debug, Clone)]
#[command(name = "smoothie")]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// Image files to thumbnail.
    #[arg(required = true)]
    pub inputs: Vec<PathBuf>,

    // =========================================================================
    // Thumbnail Geometry
    // =========================================================================
    /// Longest thumbnail edge in points.
    #[arg(long, default_value_t = DEFAULT_THUMBNAIL_SIZE)]
    pub size: f32,

    /// Display scale (pixels per point).
    #[arg(long, default_value_t = DEFAULT_SCALE)]
    pub scale: f32,

    /// JPEG compression ratio (0.0-1.0).
    #[arg(long, default_value_t = DEFAULT_COMPRESSION_QUALITY, env = "SMOOTHIE_COMPRESSION_QUALITY")]
    pub compression_quality: f32,

    // =========================================================================
    // Cache Configuration
    // =========================================================================
    /// Directory for the disk cache. Without it, only the memory cache is used.
    #[arg(long, env = "SMOOTHIE_CACHE_DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Memory cache capacity in bytes.
    #[arg(long, default_value_t = DEFAULT_MEMORY_CACHE_CAPACITY, env = "SMOOTHIE_MEMORY_CACHE")]
    pub memory_cache: usize,

    /// Only warm the caches; do not decode thumbnails for display.
    #[arg(long, default_value_t = false)]
    pub prefetch: bool,

    // =========================================================================
    // Queue Configuration
    // =========================================================================
    /// Concurrent disk cache reads.
    #[arg(long, default_value_t = DEFAULT_DISK_READ_CONCURRENCY, env = "SMOOTHIE_DISK_READ_QUEUE")]
    pub disk_read_queue: usize,

    /// Concurrent original loads.
    #[arg(long, default_value_t = DEFAULT_DATA_LOAD_CONCURRENCY, env = "SMOOTHIE_DATA_LOAD_QUEUE")]
    pub data_load_queue: usize,

    /// Concurrent downsample operations.
    #[arg(long, default_value_t = DEFAULT_DOWNSAMPLE_CONCURRENCY, env = "SMOOTHIE_DOWNSAMPLE_QUEUE")]
    pub downsample_queue: usize,

    /// Concurrent encode operations.
    #[arg(long, default_value_t = DEFAULT_ENCODE_CONCURRENCY, env = "SMOOTHIE_ENCODE_QUEUE")]
    pub encode_queue: usize,

    /// Concurrent decompress operations.
    #[arg(long, default_value_t = DEFAULT_DECOMPRESS_CONCURRENCY, env = "SMOOTHIE_DECOMPRESS_QUEUE")]
    pub decompress_queue: usize,

    /// Concurrent disk cache writes.
    #[arg(long, default_value_t = DEFAULT_DISK_WRITE_CONCURRENCY, env = "SMOOTHIE_DISK_WRITE_QUEUE")]
    pub disk_write_queue: usize,

    /// Give up on an original load after this many milliseconds.
    #[arg(long, env = "SMOOTHIE_LOAD_TIMEOUT_MS")]
    pub load_timeout_ms: Option<u64>,

    // =========================================================================
    // Output / Logging
    // =========================================================================
    /// Report format.
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,

    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

impl Config {
    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if !(self.size.is_finite() && self.size > 0.0) {
            return Err("size must be greater than 0".to_string());
        }
        if !(self.scale.is_finite() && self.scale > 0.0) {
            return Err("scale must be greater than 0".to_string());
        }
        if self.memory_cache == 0 {
            return Err("memory_cache must be greater than 0".to_string());
        }

        self.pipeline_config().validate()
    }

    /// Build the library-facing pipeline configuration.
    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            queues: QueueLimits {
                disk_read: self.disk_read_queue,
                data_load: self.data_load_queue,
                downsample: self.downsample_queue,
                encode: self.encode_queue,
                decompress: self.decompress_queue,
                disk_write: self.disk_write_queue,
            },
            compression_quality: self.compression_quality,
            load_timeout: self.load_timeout_ms.map(Duration::from_millis),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
