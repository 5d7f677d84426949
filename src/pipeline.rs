//! Thumbnail pipeline orchestration.
//!
//! The pipeline turns a cache miss into a displayable thumbnail through a
//! fixed sequence of stages, each on its own bounded queue:
//!
//! ```text
//!                ┌──────────────┐ hit  ┌────────────────────┐
//!   load() ─────▶│  DiskCheck   │─────▶│ promote to memory  │──┐
//!                │ (disk_read)  │      │ release prefetches │  │
//!                └──────┬───────┘      └────────────────────┘  │
//!                       │ miss                                 │
//!                       ▼                                      │
//!                ┌──────────────┐                              │
//!                │   DataLoad   │── nothing ──▶ deliver None   │
//!                │ (data_load)  │                              │
//!                └──────┬───────┘                              │
//!                       ▼                                      │
//!                ┌──────────────┐                              │
//!                │  Downsample  │── error ────▶ deliver None   │
//!                │ (downsample) │                              │
//!                └──────┬───────┘                              │
//!                       ▼                                      │
//!                ┌──────────────┐      ┌────────────────────┐  │
//!                │    Encode    │─────▶│ write memory       │  │
//!                │   (encode)   │      │ spawn disk write   │  │
//!                └──────────────┘      │ release prefetches │  │
//!                                      └─────────┬──────────┘  │
//!                                                ▼             │
//!                                      ┌────────────────────┐  │
//!                                      │     Decompress     │◀─┘
//!                                      │    (decompress)    │
//!                                      └─────────┬──────────┘
//!                                                ▼
//!                                       deliver to the pool
//! ```
//!
//! Requests are pooled by cache key: the first request for a key creates a
//! [`RequestPool`] and spawns one task that walks the stages; later requests
//! for the same key join the pool and wait for the same terminal delivery.
//! The map of pools sits behind a single lock, taken at every stage
//! boundary, so pool membership changes are serialized while stage work
//! runs concurrently. Each queue is a semaphore; CPU-bound work runs on the
//! blocking thread pool.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, debug_span, warn, Instrument};

use crate::cache::{DiskCache, MemoryCache};
use crate::codec::ThumbnailCodec;
use crate::config::{PipelineConfig, QueueLimits};
use crate::error::{CodecError, LoadError, StageError};
use crate::observer::ThumbnailObserver;
use crate::pool::RequestPool;
use crate::request::{OriginalImageRequest, Thumbnail, ThumbnailInfo, ThumbnailRequest};
use crate::source::OriginalImageLoader;

// =============================================================================
// Stage Queues
// =============================================================================

/// One bounded-concurrency queue per stage.
struct StageQueues {
    disk_read: Arc<Semaphore>,
    data_load: Arc<Semaphore>,
    downsample: Arc<Semaphore>,
    encode: Arc<Semaphore>,
    decompress: Arc<Semaphore>,
    disk_write: Arc<Semaphore>,
}

impl StageQueues {
    fn new(limits: &QueueLimits) -> Self {
        let queue = |n: usize| Arc::new(Semaphore::new(n.max(1)));
        Self {
            disk_read: queue(limits.disk_read),
            data_load: queue(limits.data_load),
            downsample: queue(limits.downsample),
            encode: queue(limits.encode),
            decompress: queue(limits.decompress),
            disk_write: queue(limits.disk_write),
        }
    }
}

/// Wait for a slot on a stage queue.
async fn enter(
    queue: &Arc<Semaphore>,
    name: &'static str,
) -> Result<OwnedSemaphorePermit, StageError> {
    Arc::clone(queue)
        .acquire_owned()
        .await
        .map_err(|_| StageError::QueueClosed(name))
}

/// Run codec work on the blocking pool while holding a queue slot.
///
/// The slot moves into the blocking closure, so it stays taken until the
/// work really finishes even if the awaiting task is aborted.
async fn run_blocking<T, F>(permit: OwnedSemaphorePermit, work: F) -> Result<T, CodecError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, CodecError> + Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        let _permit = permit;
        work()
    })
    .await
    .map_err(|e| CodecError::Task(e.to_string()))?
}

// =============================================================================
// Statistics
// =============================================================================

/// Snapshot of pipeline counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PipelineStats {
    /// Pools created (one per distinct in-flight cache key)
    pub pools_created: u64,
    /// Requests that joined an existing pool; a repeated request id
    /// replaces its earlier entry and is not counted
    pub requests_joined: u64,
    pub disk_hits: u64,
    pub disk_misses: u64,
    /// Original loads started
    pub loads: u64,
    pub load_failures: u64,
    /// Downsample operations started
    pub downsamples: u64,
    /// Successful encodes; each schedules one disk cache write
    pub encodes: u64,
    /// Decompress operations started
    pub decompressions: u64,
    /// Pools that reached terminal delivery
    pub deliveries: u64,
    /// Terminal deliveries that carried a failure
    pub failed_deliveries: u64,
    /// Pools that stopped early because only prefetches remained
    pub prefetch_early_exits: u64,
    /// Pools removed because every request was cancelled
    pub cancelled_pools: u64,
    /// Disk cache writes finished, successful or not
    pub disk_writes: u64,
    pub disk_write_failures: u64,
    /// Undecodable disk cache entries scheduled for removal
    pub evictions: u64,
    /// Disk cache removals finished, successful or not
    pub disk_removals: u64,
}

impl PipelineStats {
    /// Whether every scheduled disk cache write and removal has finished.
    pub fn disk_idle(&self) -> bool {
        self.disk_writes >= self.encodes && self.disk_removals >= self.evictions
    }
}

#[derive(Default)]
struct StatsCounters {
    pools_created: AtomicU64,
    requests_joined: AtomicU64,
    disk_hits: AtomicU64,
    disk_misses: AtomicU64,
    loads: AtomicU64,
    load_failures: AtomicU64,
    downsamples: AtomicU64,
    encodes: AtomicU64,
    decompressions: AtomicU64,
    deliveries: AtomicU64,
    failed_deliveries: AtomicU64,
    prefetch_early_exits: AtomicU64,
    cancelled_pools: AtomicU64,
    disk_writes: AtomicU64,
    disk_write_failures: AtomicU64,
    evictions: AtomicU64,
    disk_removals: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl StatsCounters {
    fn snapshot(&self) -> PipelineStats {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        PipelineStats {
            pools_created: get(&self.pools_created),
            requests_joined: get(&self.requests_joined),
            disk_hits: get(&self.disk_hits),
            disk_misses: get(&self.disk_misses),
            loads: get(&self.loads),
            load_failures: get(&self.load_failures),
            downsamples: get(&self.downsamples),
            encodes: get(&self.encodes),
            decompressions: get(&self.decompressions),
            deliveries: get(&self.deliveries),
            failed_deliveries: get(&self.failed_deliveries),
            prefetch_early_exits: get(&self.prefetch_early_exits),
            cancelled_pools: get(&self.cancelled_pools),
            disk_writes: get(&self.disk_writes),
            disk_write_failures: get(&self.disk_write_failures),
            evictions: get(&self.evictions),
            disk_removals: get(&self.disk_removals),
        }
    }
}

// =============================================================================
// Pipeline
// =============================================================================

/// Everything a stage task needs to process one pool.
struct Job {
    key: Arc<str>,
    pool_id: u64,
    info: ThumbnailInfo,
    original: OriginalImageRequest,
}

/// How a pool's run ended.
enum Outcome {
    /// Terminal delivery of a thumbnail, or failure
    Deliver(Option<Thumbnail>),
    /// The pool is gone (cancelled, or only prefetches were left)
    Abandon,
}

struct Shared {
    pools: Mutex<HashMap<Arc<str>, RequestPool>>,
    next_pool_id: AtomicU64,
    memory_cache: Arc<dyn MemoryCache>,
    disk_cache: Arc<dyn DiskCache>,
    loader: Arc<dyn OriginalImageLoader>,
    codec: ThumbnailCodec,
    queues: StageQueues,
    load_timeout: Option<Duration>,
    stats: StatsCounters,
    runtime: Handle,
}

/// Pools thumbnail requests by cache key and drives each pool through the
/// disk check / load / downsample / encode / decompress stages.
///
/// Cheap to clone; clones share the same pools, caches and queues.
///
/// # Example
///
/// ```ignore
/// use std::sync::Arc;
/// use smoothie::{FileImageLoader, LruMemoryCache, NoDiskCache, PipelineConfig, ThumbnailPipeline};
///
/// let pipeline = ThumbnailPipeline::new(
///     PipelineConfig::default(),
///     Arc::new(LruMemoryCache::new()),
///     Arc::new(NoDiskCache),
///     Arc::new(FileImageLoader::new()),
/// );
/// pipeline.load(request, Some(&observer));
/// ```
#[derive(Clone)]
pub struct ThumbnailPipeline {
    shared: Arc<Shared>,
}

impl ThumbnailPipeline {
    /// Create a pipeline spawning its work on the current Tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime; use
    /// [`with_runtime`](Self::with_runtime) to pass a handle explicitly.
    pub fn new(
        config: PipelineConfig,
        memory_cache: Arc<dyn MemoryCache>,
        disk_cache: Arc<dyn DiskCache>,
        loader: Arc<dyn OriginalImageLoader>,
    ) -> Self {
        Self::with_runtime(Handle::current(), config, memory_cache, disk_cache, loader)
    }

    /// Create a pipeline spawning its work on `runtime`.
    ///
    /// Requests may then be issued from any thread, inside a runtime or not.
    pub fn with_runtime(
        runtime: Handle,
        config: PipelineConfig,
        memory_cache: Arc<dyn MemoryCache>,
        disk_cache: Arc<dyn DiskCache>,
        loader: Arc<dyn OriginalImageLoader>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                pools: Mutex::new(HashMap::new()),
                next_pool_id: AtomicU64::new(1),
                memory_cache,
                disk_cache,
                loader,
                codec: ThumbnailCodec::new(config.compression_quality),
                queues: StageQueues::new(&config.queues),
                load_timeout: config.load_timeout,
                stats: StatsCounters::default(),
                runtime,
            }),
        }
    }

    /// Start or join the load for `request`'s cache key.
    ///
    /// The first request for a key creates its pool and schedules the disk
    /// check; later ones attach to the pool and receive the same outcome.
    /// The observer, if any, is held weakly.
    pub fn load(&self, request: ThumbnailRequest, observer: Option<&Arc<dyn ThumbnailObserver>>) {
        let shared = &self.shared;
        let key = Arc::clone(&request.thumbnail_info.id);
        let mut pools = shared.pools.lock();

        if let Some(pool) = pools.get_mut(&key) {
            debug!(
                key = %key,
                request_id = %request.request_id,
                prefetch = request.is_prefetch,
                "Joining in-flight pool"
            );
            if pool.append(request, observer) {
                bump(&shared.stats.requests_joined);
            }
            return;
        }

        let pool_id = shared.next_pool_id.fetch_add(1, Ordering::Relaxed);
        let job = Job {
            key: Arc::clone(&key),
            pool_id,
            info: request.thumbnail_info.clone(),
            original: request.original_image_request.clone(),
        };
        debug!(
            key = %key,
            request_id = %request.request_id,
            prefetch = request.is_prefetch,
            pool_id,
            "Creating pool"
        );

        let mut pool = RequestPool::new(pool_id, Arc::clone(&key));
        pool.append(request, observer);

        let span = debug_span!("thumbnail", key = %key, pool_id);
        let task = shared
            .runtime
            .spawn(Arc::clone(shared).run(job).instrument(span));
        pool.set_pending(task.abort_handle());

        pools.insert(key, pool);
        bump(&shared.stats.pools_created);
    }

    /// Detach `request` from its pool.
    ///
    /// When it was the last request for the key, the scheduled work is
    /// aborted and the pool removed. Unknown keys or requests are ignored.
    pub fn cancel(&self, request: &ThumbnailRequest) {
        let shared = &self.shared;
        let mut pools = shared.pools.lock();

        let Some(pool) = pools.get_mut(request.cache_key()) else {
            return;
        };
        if pool.cancel(&request.request_id) {
            debug!(
                key = %request.cache_key(),
                request_id = %request.request_id,
                "Last request cancelled, dropping pool"
            );
            pools.remove(request.cache_key());
            bump(&shared.stats.cancelled_pools);
        }
    }

    /// Whether a pool is in flight for `key`.
    pub fn contains(&self, key: &str) -> bool {
        self.shared.pools.lock().contains_key(key)
    }

    /// Number of pools in flight.
    pub fn in_flight_count(&self) -> usize {
        self.shared.pools.lock().len()
    }

    /// Snapshot of the pipeline counters.
    pub fn stats(&self) -> PipelineStats {
        self.shared.stats.snapshot()
    }

    /// The memory cache the pipeline writes through to.
    pub fn memory_cache(&self) -> &Arc<dyn MemoryCache> {
        &self.shared.memory_cache
    }

    /// The codec used by the stages.
    pub fn codec(&self) -> &ThumbnailCodec {
        &self.shared.codec
    }
}

impl Shared {
    /// Drive one pool from the disk check to terminal delivery.
    async fn run(self: Arc<Self>, job: Job) {
        match self.process(&job).await {
            Outcome::Deliver(thumbnail) => self.deliver(&job, thumbnail),
            Outcome::Abandon => debug!("Pool abandoned"),
        }
    }

    async fn process(self: &Arc<Self>, job: &Job) -> Outcome {
        let mut from_disk = false;
        let encoded = match self.check_disk(job).await {
            Some(data) => {
                from_disk = true;
                debug!(bytes = data.len(), "Disk cache hit");
                self.memory_cache.set(&job.key, data.clone());
                if self.release_prefetches(job) {
                    return Outcome::Abandon;
                }
                data
            }
            None => {
                if !self.is_live(job) {
                    return Outcome::Abandon;
                }
                match self.produce(job).await {
                    Ok(data) => {
                        self.memory_cache.set(&job.key, data.clone());
                        self.spawn_disk_write(job, data.clone());
                        if self.release_prefetches(job) {
                            return Outcome::Abandon;
                        }
                        data
                    }
                    Err(e) => {
                        warn!(error = %e, "Thumbnail generation failed");
                        return Outcome::Deliver(None);
                    }
                }
            }
        };

        match self.decompress(encoded).await {
            Ok(thumbnail) => Outcome::Deliver(Some(thumbnail)),
            Err(e) => {
                warn!(error = %e, "Thumbnail decompression failed");
                if from_disk {
                    self.evict(job);
                }
                Outcome::Deliver(None)
            }
        }
    }

    /// DiskCheck stage.
    async fn check_disk(&self, job: &Job) -> Option<Bytes> {
        let _permit = enter(&self.queues.disk_read, "disk_read").await.ok()?;
        let cached = self.disk_cache.get(&job.key).await;
        match cached {
            Some(_) => bump(&self.stats.disk_hits),
            None => bump(&self.stats.disk_misses),
        }
        cached
    }

    /// DataLoad → Downsample → Encode.
    async fn produce(&self, job: &Job) -> Result<Bytes, StageError> {
        let original = self.load_original(job).await.map_err(|e| {
            bump(&self.stats.load_failures);
            e
        })?;
        debug!(bytes = original.len(), "Original loaded");

        let codec = self.codec;
        let max_pixel_size = job.info.max_pixel_size();

        let permit = enter(&self.queues.downsample, "downsample").await?;
        bump(&self.stats.downsamples);
        let bitmap = run_blocking(permit, move || codec.downsample(&original, max_pixel_size))
            .await?;
        debug!(
            width = bitmap.width(),
            height = bitmap.height(),
            "Downsampled"
        );

        let permit = enter(&self.queues.encode, "encode").await?;
        let encoded = run_blocking(permit, move || codec.encode(&bitmap)).await?;
        bump(&self.stats.encodes);
        debug!(bytes = encoded.len(), "Encoded");

        Ok(encoded)
    }

    /// DataLoad stage.
    async fn load_original(&self, job: &Job) -> Result<Bytes, StageError> {
        let _permit = enter(&self.queues.data_load, "data_load").await?;
        bump(&self.stats.loads);

        let load = self.loader.load(&job.original);
        let data = match self.load_timeout {
            Some(limit) => with_timeout(limit, &job.original, load).await?,
            None => load.await?,
        };
        Ok(data)
    }

    /// Decompress stage.
    async fn decompress(&self, encoded: Bytes) -> Result<Thumbnail, StageError> {
        let permit = enter(&self.queues.decompress, "decompress").await?;
        bump(&self.stats.decompressions);
        let codec = self.codec;
        Ok(run_blocking(permit, move || codec.decompress(&encoded)).await?)
    }

    /// Fire-and-forget disk cache write; failures are only logged.
    fn spawn_disk_write(self: &Arc<Self>, job: &Job, data: Bytes) {
        let shared = Arc::clone(self);
        let key = Arc::clone(&job.key);
        self.runtime.spawn(async move {
            let Ok(_permit) = enter(&shared.queues.disk_write, "disk_write").await else {
                return;
            };
            if let Err(e) = shared.disk_cache.set(&key, data).await {
                bump(&shared.stats.disk_write_failures);
                warn!(key = %key, error = %e, "Disk cache write failed");
            }
            bump(&shared.stats.disk_writes);
        });
    }

    /// Drop an undecodable entry from both caches so the next load
    /// regenerates it from the original.
    fn evict(self: &Arc<Self>, job: &Job) {
        debug!("Evicting undecodable cache entry");
        self.memory_cache.remove(&job.key);
        bump(&self.stats.evictions);

        let shared = Arc::clone(self);
        let key = Arc::clone(&job.key);
        self.runtime.spawn(async move {
            if let Ok(_permit) = enter(&shared.queues.disk_write, "disk_write").await {
                if let Err(e) = shared.disk_cache.remove(&key).await {
                    warn!(key = %key, error = %e, "Disk cache removal failed");
                }
            }
            bump(&shared.stats.disk_removals);
        });
    }

    /// Whether `job`'s pool is still the one registered for its key.
    fn is_live(&self, job: &Job) -> bool {
        self.pools
            .lock()
            .get(&job.key)
            .is_some_and(|pool| pool.id() == job.pool_id)
    }

    /// Drop prefetch requests from the pool. Returns `true` when the pool
    /// should stop: it is gone, or only prefetches were left and it has now
    /// been removed.
    fn release_prefetches(&self, job: &Job) -> bool {
        let mut pools = self.pools.lock();
        let Some(pool) = pools.get_mut(&job.key).filter(|p| p.id() == job.pool_id) else {
            return true;
        };
        if pool.release_prefetches() {
            debug!("Only prefetches left, stopping early");
            pools.remove(&job.key);
            bump(&self.stats.prefetch_early_exits);
            return true;
        }
        false
    }

    /// Terminal delivery. Removes the pool, then notifies its observers
    /// outside the lock so callbacks may issue new requests.
    fn deliver(&self, job: &Job, thumbnail: Option<Thumbnail>) {
        let pool = {
            let mut pools = self.pools.lock();
            match pools.get(&job.key) {
                Some(pool) if pool.id() == job.pool_id => pools.remove(&job.key),
                _ => None,
            }
        };
        let Some(pool) = pool else {
            return;
        };

        bump(&self.stats.deliveries);
        if thumbnail.is_none() {
            bump(&self.stats.failed_deliveries);
        }
        let notified = pool.did_load(thumbnail);
        debug!(notified, "Delivered");
    }
}

async fn with_timeout(
    limit: Duration,
    original: &OriginalImageRequest,
    load: impl Future<Output = Result<Bytes, LoadError>>,
) -> Result<Bytes, LoadError> {
    tokio::time::timeout(limit, load)
        .await
        .map_err(|_| LoadError::Timeout {
            source_id: original.to_string(),
            millis: limit.as_millis() as u64,
        })?
}
