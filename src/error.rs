use thiserror::Error;

/// Errors raised while fetching the original bytes of an image.
#[derive(Debug, Clone, Error)]
pub enum LoadError {
    /// The source does not exist
    #[error("Original image not found: {0}")]
    NotFound(String),

    /// Filesystem or network failure while reading the source
    #[error("I/O error: {0}")]
    Io(String),

    /// The loader produced zero bytes
    #[error("Original image is empty: {0}")]
    Empty(String),

    /// The load did not finish within the configured timeout
    #[error("Loading {source_id} timed out after {millis}ms")]
    Timeout { source_id: String, millis: u64 },
}

/// Errors from the downsample / encode / decompress routines.
#[derive(Debug, Clone, Error)]
pub enum CodecError {
    /// Input bytes could not be decoded as an image
    #[error("Failed to decode image: {message}")]
    Decode { message: String },

    /// The bitmap could not be re-encoded
    #[error("Failed to encode image: {message}")]
    Encode { message: String },

    /// Nothing to decode
    #[error("Image data is empty")]
    EmptyInput,

    /// The blocking codec task was lost (panicked or the runtime shut down)
    #[error("Codec task failed: {0}")]
    Task(String),
}

/// Errors from the on-disk cache.
///
/// Reads never surface these; a failed read is reported as "not cached".
#[derive(Debug, Clone, Error)]
pub enum CacheError {
    /// Filesystem failure
    #[error("Disk cache I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for CacheError {
    fn from(err: std::io::Error) -> Self {
        CacheError::Io(err.to_string())
    }
}

/// Errors from a single pipeline stage.
///
/// These are logged and then collapsed into a failed delivery; observers
/// only ever see success or failure.
#[derive(Debug, Clone, Error)]
pub enum StageError {
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    /// A stage queue was closed while waiting for a slot
    #[error("Stage queue {0} is closed")]
    QueueClosed(&'static str),
}
