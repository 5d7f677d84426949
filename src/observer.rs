//! Callback surface for load results.

use crate::request::{Thumbnail, ThumbnailRequest};

/// Receives the outcome of a thumbnail load.
///
/// Observers are held weakly by the pipeline: registering one does not keep
/// it alive, and an observer dropped while its load is in flight is skipped
/// without error.
///
/// Callbacks run on runtime worker threads (or on the caller's thread for
/// memory cache hits) and should return quickly.
pub trait ThumbnailObserver: Send + Sync {
    /// The thumbnail was not cached in memory and a load has started.
    fn did_start_loading(&self, _request: &ThumbnailRequest) {}

    fn did_success_to_load(&self, request: &ThumbnailRequest, thumbnail: Thumbnail);

    fn did_failed_to_load(&self, request: &ThumbnailRequest);
}
