//! Pipeline integration tests.
//!
//! Tests verify:
//! - Requests for one cache key share a pool and one result
//! - Cancelling one request leaves the others untouched
//! - Prefetch-only pools stop once the thumbnail is cached
//! - Failures reach every pooled request
//! - Undecodable disk entries are evicted from both caches
//! - Observers are held weakly

use std::sync::Arc;

use bytes::Bytes;
use smoothie::{
    LruMemoryCache, MemoryCache, NoDiskCache, PipelineConfig, ThumbnailCodec, ThumbnailObserver,
    ThumbnailPipeline, ThumbnailRequest,
};

use super::test_utils::{
    is_jpeg, is_png, jpeg_bytes, next_event, png_with_alpha_bytes, recording_observer, request,
    settle, wait_until, within, Event, MockDiskCache, MockImageLoader,
};

fn pipeline_with(
    loader: &Arc<MockImageLoader>,
    disk: &Arc<MockDiskCache>,
) -> (ThumbnailPipeline, Arc<LruMemoryCache>) {
    let memory = Arc::new(LruMemoryCache::new());
    let pipeline = ThumbnailPipeline::new(
        PipelineConfig::default(),
        memory.clone(),
        disk.clone(),
        loader.clone(),
    );
    (pipeline, memory)
}

fn expect_loaded(event: Event) -> smoothie::Thumbnail {
    match event {
        Event::Loaded(_, thumbnail) => thumbnail,
        other => panic!("expected a thumbnail, got {:?}", other),
    }
}

// =============================================================================
// Generation
// =============================================================================

#[tokio::test]
async fn test_landscape_original_scaled_to_fit() {
    let loader = Arc::new(MockImageLoader::new().with_image("big.jpg", jpeg_bytes(2000, 1500)));
    let disk = Arc::new(MockDiskCache::new());
    let (pipeline, memory) = pipeline_with(&loader, &disk);
    let (observer, mut rx) = recording_observer();

    pipeline.load(request("cell-1", "big", "big.jpg"), Some(&observer));

    let thumbnail = expect_loaded(next_event(&mut rx).await);
    assert_eq!((thumbnail.width(), thumbnail.height()), (200, 150));

    // Encoded bytes were written through to both caches
    let cached = memory.get("big").expect("memory cache entry");
    assert!(is_jpeg(&cached));
    wait_until(|| disk.entry("big").is_some()).await;
    assert_eq!(disk.entry("big"), Some(cached));
}

#[tokio::test]
async fn test_alpha_original_cached_as_png() {
    let loader = Arc::new(MockImageLoader::new().with_image("icon.png", png_with_alpha_bytes(400, 400)));
    let disk = Arc::new(MockDiskCache::new());
    let (pipeline, memory) = pipeline_with(&loader, &disk);
    let (observer, mut rx) = recording_observer();

    pipeline.load(request("cell-1", "icon", "icon.png"), Some(&observer));

    let thumbnail = expect_loaded(next_event(&mut rx).await);
    assert_eq!((thumbnail.width(), thumbnail.height()), (200, 200));
    assert!(thumbnail.color().has_alpha());
    assert!(is_png(&memory.get("icon").unwrap()));
}

#[tokio::test]
async fn test_disk_hit_skips_original_load() {
    let encoded = ThumbnailCodec::default()
        .encode(&image::DynamicImage::new_rgb8(64, 48))
        .unwrap();
    let loader = Arc::new(MockImageLoader::new());
    let disk = Arc::new(MockDiskCache::new().with_entry("cached", encoded.clone()));
    let (pipeline, memory) = pipeline_with(&loader, &disk);
    let (observer, mut rx) = recording_observer();

    pipeline.load(request("cell-1", "cached", "missing.jpg"), Some(&observer));

    let thumbnail = expect_loaded(next_event(&mut rx).await);
    assert_eq!((thumbnail.width(), thumbnail.height()), (64, 48));
    assert_eq!(loader.calls(), 0);
    assert_eq!(memory.get("cached"), Some(encoded));

    let stats = pipeline.stats();
    assert_eq!(stats.disk_hits, 1);
    assert_eq!(stats.loads, 0);
    assert_eq!(stats.encodes, 0);
    assert_eq!(disk.writes(), 0);
}

// =============================================================================
// Pooling
// =============================================================================

#[tokio::test]
async fn test_same_key_shares_one_pool() {
    let loader = Arc::new(
        MockImageLoader::new()
            .with_image("a.jpg", jpeg_bytes(800, 600))
            .gated(),
    );
    let disk = Arc::new(MockDiskCache::new());
    let (pipeline, _memory) = pipeline_with(&loader, &disk);
    let (first, mut first_rx) = recording_observer();
    let (second, mut second_rx) = recording_observer();

    // Different locators, same cache key: still one logical thumbnail
    pipeline.load(request("cell-1", "photo", "a.jpg"), Some(&first));
    pipeline.load(request("cell-2", "photo", "b.jpg"), Some(&second));

    assert!(pipeline.contains("photo"));
    assert_eq!(pipeline.in_flight_count(), 1);

    loader.open_gate();

    let a = expect_loaded(next_event(&mut first_rx).await);
    let b = expect_loaded(next_event(&mut second_rx).await);
    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(loader.calls(), 1);

    let stats = pipeline.stats();
    assert_eq!(stats.pools_created, 1);
    assert_eq!(stats.requests_joined, 1);
    assert_eq!(stats.deliveries, 1);
}

#[tokio::test]
async fn test_fan_out_delivers_same_instance() {
    let loader = Arc::new(
        MockImageLoader::new()
            .with_image("a.jpg", jpeg_bytes(300, 300))
            .gated(),
    );
    let disk = Arc::new(MockDiskCache::new());
    let (pipeline, _memory) = pipeline_with(&loader, &disk);

    let mut observers = Vec::new();
    for i in 0..8 {
        let (observer, rx) = recording_observer();
        pipeline.load(request(&format!("cell-{i}"), "shared", "a.jpg"), Some(&observer));
        observers.push((observer, rx));
    }
    loader.open_gate();

    let mut thumbnails = Vec::new();
    for (_observer, rx) in observers.iter_mut() {
        thumbnails.push(expect_loaded(next_event(rx).await));
    }
    assert!(thumbnails.iter().all(|t| Arc::ptr_eq(t, &thumbnails[0])));
    assert_eq!(pipeline.stats().requests_joined, 7);
    assert_eq!(loader.calls(), 1);
}

#[tokio::test]
async fn test_load_after_delivery_creates_fresh_pool() {
    let loader = Arc::new(MockImageLoader::new().with_image("a.jpg", jpeg_bytes(100, 100)));
    let disk = Arc::new(MockDiskCache::new());
    let (pipeline, _memory) = pipeline_with(&loader, &disk);
    let (observer, mut rx) = recording_observer();

    pipeline.load(request("cell-1", "photo", "a.jpg"), Some(&observer));
    expect_loaded(next_event(&mut rx).await);
    assert!(!pipeline.contains("photo"));

    pipeline.load(request("cell-1", "photo", "a.jpg"), Some(&observer));
    expect_loaded(next_event(&mut rx).await);

    let stats = pipeline.stats();
    assert_eq!(stats.pools_created, 2);
    assert_eq!(stats.requests_joined, 0);
    assert_eq!(stats.deliveries, 2);
}

#[tokio::test]
async fn test_distinct_keys_do_not_pool() {
    let loader = Arc::new(
        MockImageLoader::new()
            .with_image("a.jpg", jpeg_bytes(100, 100))
            .with_image("b.jpg", jpeg_bytes(100, 100)),
    );
    let disk = Arc::new(MockDiskCache::new());
    let (pipeline, _memory) = pipeline_with(&loader, &disk);
    let (observer, mut rx) = recording_observer();

    pipeline.load(request("cell-1", "a", "a.jpg"), Some(&observer));
    pipeline.load(request("cell-2", "b", "b.jpg"), Some(&observer));

    let mut ids = vec![
        next_event(&mut rx).await.request_id().to_string(),
        next_event(&mut rx).await.request_id().to_string(),
    ];
    ids.sort();
    assert_eq!(ids, vec!["cell-1", "cell-2"]);
    assert_eq!(pipeline.stats().pools_created, 2);
    assert_eq!(loader.calls(), 2);
}

// =============================================================================
// Cancellation
// =============================================================================

#[tokio::test]
async fn test_cancel_one_request_keeps_others() {
    let loader = Arc::new(
        MockImageLoader::new()
            .with_image("a.jpg", jpeg_bytes(400, 300))
            .gated(),
    );
    let disk = Arc::new(MockDiskCache::new());
    let (pipeline, _memory) = pipeline_with(&loader, &disk);
    let (first, mut first_rx) = recording_observer();
    let (second, mut second_rx) = recording_observer();
    let a = request("cell-1", "photo", "a.jpg");
    let b = request("cell-2", "photo", "a.jpg");

    pipeline.load(a.clone(), Some(&first));
    pipeline.load(b, Some(&second));
    pipeline.cancel(&a);

    assert!(pipeline.contains("photo"));
    loader.open_gate();

    expect_loaded(next_event(&mut second_rx).await);
    assert!(first_rx.try_recv().is_err());
    assert_eq!(pipeline.stats().cancelled_pools, 0);
}

#[tokio::test]
async fn test_cancel_last_request_stops_work() {
    let loader = Arc::new(
        MockImageLoader::new()
            .with_image("a.jpg", jpeg_bytes(400, 300))
            .gated(),
    );
    let disk = Arc::new(MockDiskCache::new());
    let (pipeline, memory) = pipeline_with(&loader, &disk);
    let (observer, mut rx) = recording_observer();
    let a = request("cell-1", "photo", "a.jpg");

    pipeline.load(a.clone(), Some(&observer));
    wait_until(|| loader.calls() == 1).await;

    pipeline.cancel(&a);
    assert!(!pipeline.contains("photo"));

    loader.open_gate();
    settle().await;

    assert!(rx.try_recv().is_err());
    assert!(memory.get("photo").is_none());

    let stats = pipeline.stats();
    assert_eq!(stats.cancelled_pools, 1);
    assert_eq!(stats.downsamples, 0);
    assert_eq!(stats.deliveries, 0);
}

#[tokio::test]
async fn test_cancel_twice_is_noop() {
    let loader = Arc::new(MockImageLoader::new().gated());
    let disk = Arc::new(MockDiskCache::new());
    let (pipeline, _memory) = pipeline_with(&loader, &disk);
    let (observer, _rx) = recording_observer();
    let a = request("cell-1", "photo", "a.jpg");
    let b = request("cell-2", "photo", "a.jpg");

    pipeline.load(a.clone(), Some(&observer));
    pipeline.load(b, Some(&observer));
    pipeline.cancel(&a);
    pipeline.cancel(&a);

    assert!(pipeline.contains("photo"));
    assert_eq!(pipeline.stats().cancelled_pools, 0);
}

// =============================================================================
// Prefetch
// =============================================================================

#[tokio::test]
async fn test_prefetch_dropped_after_disk_hit() {
    let encoded = ThumbnailCodec::default()
        .encode(&image::DynamicImage::new_rgb8(32, 32))
        .unwrap();
    let loader = Arc::new(MockImageLoader::new());
    let disk = Arc::new(MockDiskCache::new().with_entry("photo", encoded).gated());
    let (pipeline, memory) = pipeline_with(&loader, &disk);
    let (observer, mut rx) = recording_observer();
    let visible = request("cell-1", "photo", "a.jpg");
    let prefetch = request("prefetch-1", "photo", "a.jpg").as_prefetch();

    pipeline.load(visible.clone(), Some(&observer));
    pipeline.load(prefetch, None);

    // The visible request scrolls away while the disk read is pending
    pipeline.cancel(&visible);
    assert!(pipeline.contains("photo"));

    disk.open_gate();
    wait_until(|| pipeline.in_flight_count() == 0).await;

    assert!(memory.get("photo").is_some());
    assert!(rx.try_recv().is_err());

    let stats = pipeline.stats();
    assert_eq!(stats.disk_hits, 1);
    assert_eq!(stats.prefetch_early_exits, 1);
    assert_eq!(stats.decompressions, 0);
    assert_eq!(stats.deliveries, 0);
}

#[tokio::test]
async fn test_prefetch_only_miss_fills_caches_without_decoding() {
    let loader = Arc::new(MockImageLoader::new().with_image("a.jpg", jpeg_bytes(640, 480)));
    let disk = Arc::new(MockDiskCache::new());
    let (pipeline, memory) = pipeline_with(&loader, &disk);

    pipeline.load(request("p", "photo", "a.jpg").as_prefetch(), None);

    wait_until(|| pipeline.in_flight_count() == 0).await;
    wait_until(|| disk.writes() == 1).await;

    assert!(memory.get("photo").is_some());
    assert!(disk.entry("photo").is_some());

    let stats = pipeline.stats();
    assert_eq!(stats.encodes, 1);
    assert_eq!(stats.prefetch_early_exits, 1);
    assert_eq!(stats.decompressions, 0);
}

#[tokio::test]
async fn test_visible_request_joining_prefetch_is_delivered() {
    let loader = Arc::new(
        MockImageLoader::new()
            .with_image("a.jpg", jpeg_bytes(640, 480))
            .gated(),
    );
    let disk = Arc::new(MockDiskCache::new());
    let (pipeline, _memory) = pipeline_with(&loader, &disk);
    let (observer, mut rx) = recording_observer();

    pipeline.load(request("p", "photo", "a.jpg").as_prefetch(), None);
    pipeline.load(request("cell-1", "photo", "a.jpg"), Some(&observer));
    loader.open_gate();

    let thumbnail = expect_loaded(next_event(&mut rx).await);
    assert_eq!((thumbnail.width(), thumbnail.height()), (200, 150));

    let stats = pipeline.stats();
    assert_eq!(stats.pools_created, 1);
    assert_eq!(stats.prefetch_early_exits, 0);
    assert_eq!(stats.decompressions, 1);
}

// =============================================================================
// Failures
// =============================================================================

#[tokio::test]
async fn test_failure_reaches_every_request() {
    let loader = Arc::new(MockImageLoader::new().gated());
    let disk = Arc::new(MockDiskCache::new());
    let (pipeline, memory) = pipeline_with(&loader, &disk);
    let (first, mut first_rx) = recording_observer();
    let (second, mut second_rx) = recording_observer();

    pipeline.load(request("cell-1", "gone", "gone.jpg"), Some(&first));
    pipeline.load(request("cell-2", "gone", "gone.jpg"), Some(&second));
    loader.open_gate();

    assert!(matches!(next_event(&mut first_rx).await, Event::Failed(_)));
    assert!(matches!(next_event(&mut second_rx).await, Event::Failed(_)));
    assert!(memory.get("gone").is_none());
    assert!(!pipeline.contains("gone"));

    let stats = pipeline.stats();
    assert_eq!(stats.load_failures, 1);
    assert_eq!(stats.failed_deliveries, 1);
    assert_eq!(disk.writes(), 0);
}

#[tokio::test]
async fn test_disk_write_failure_still_delivers() {
    let loader = Arc::new(MockImageLoader::new().with_image("a.jpg", jpeg_bytes(300, 200)));
    let disk = Arc::new(MockDiskCache::new().failing_writes());
    let (pipeline, _memory) = pipeline_with(&loader, &disk);
    let (observer, mut rx) = recording_observer();

    pipeline.load(request("cell-1", "photo", "a.jpg"), Some(&observer));

    expect_loaded(next_event(&mut rx).await);
    wait_until(|| pipeline.stats().disk_writes == 1).await;
    assert_eq!(pipeline.stats().disk_write_failures, 1);
    assert!(disk.entry("photo").is_none());
}

#[tokio::test]
async fn test_undecodable_disk_entry_fails_then_regenerates() {
    let loader = Arc::new(MockImageLoader::new().with_image("a.jpg", jpeg_bytes(400, 300)));
    let disk = Arc::new(
        MockDiskCache::new()
            .with_entry("photo", Bytes::from_static(b"junk"))
            .gated(),
    );
    let (pipeline, memory) = pipeline_with(&loader, &disk);
    let (first, mut first_rx) = recording_observer();
    let (second, mut second_rx) = recording_observer();

    pipeline.load(request("cell-1", "photo", "a.jpg"), Some(&first));
    pipeline.load(request("cell-2", "photo", "a.jpg"), Some(&second));
    disk.open_gate();

    assert!(matches!(next_event(&mut first_rx).await, Event::Failed(_)));
    assert!(matches!(next_event(&mut second_rx).await, Event::Failed(_)));
    assert!(!pipeline.contains("photo"));

    let stats = pipeline.stats();
    assert_eq!(stats.disk_hits, 1);
    assert_eq!(stats.decompressions, 1);
    assert_eq!(stats.failed_deliveries, 1);
    assert_eq!(stats.evictions, 1);
    assert_eq!(loader.calls(), 0);

    // The bad bytes are gone from both caches
    assert!(memory.get("photo").is_none());
    wait_until(|| pipeline.stats().disk_idle()).await;
    assert!(disk.entry("photo").is_none());

    // So the next load goes back to the original
    pipeline.load(request("cell-1", "photo", "a.jpg"), Some(&first));
    let thumbnail = expect_loaded(next_event(&mut first_rx).await);
    assert_eq!((thumbnail.width(), thumbnail.height()), (200, 150));
    assert_eq!(loader.calls(), 1);
    wait_until(|| disk.entry("photo").is_some()).await;
}

#[tokio::test]
async fn test_repeated_request_id_replaces_observer() {
    let loader = Arc::new(
        MockImageLoader::new()
            .with_image("a.jpg", jpeg_bytes(300, 300))
            .gated(),
    );
    let disk = Arc::new(MockDiskCache::new());
    let (pipeline, _memory) = pipeline_with(&loader, &disk);
    let (first, mut first_rx) = recording_observer();
    let (second, mut second_rx) = recording_observer();

    pipeline.load(request("cell-1", "photo", "a.jpg"), Some(&first));
    pipeline.load(request("cell-1", "photo", "a.jpg"), Some(&second));
    loader.open_gate();

    expect_loaded(next_event(&mut second_rx).await);
    assert!(first_rx.try_recv().is_err());

    let stats = pipeline.stats();
    assert_eq!(stats.pools_created, 1);
    assert_eq!(stats.requests_joined, 0);
}

// =============================================================================
// Observers
// =============================================================================

#[tokio::test]
async fn test_dropped_observer_is_skipped() {
    let loader = Arc::new(
        MockImageLoader::new()
            .with_image("a.jpg", jpeg_bytes(200, 200))
            .gated(),
    );
    let disk = Arc::new(MockDiskCache::new());
    let (pipeline, _memory) = pipeline_with(&loader, &disk);
    let (gone, mut gone_rx) = recording_observer();
    let (live, mut live_rx) = recording_observer();

    pipeline.load(request("cell-1", "photo", "a.jpg"), Some(&gone));
    pipeline.load(request("cell-2", "photo", "a.jpg"), Some(&live));

    // The pipeline holds observers weakly, so this drops the last strong ref
    drop(gone);
    loader.open_gate();

    expect_loaded(next_event(&mut live_rx).await);
    assert!(within(gone_rx.recv()).await.is_none());
}

struct ReentrantObserver {
    pipeline: ThumbnailPipeline,
    tx: tokio::sync::mpsc::UnboundedSender<usize>,
}

impl ThumbnailObserver for ReentrantObserver {
    fn did_success_to_load(&self, _request: &ThumbnailRequest, _thumbnail: smoothie::Thumbnail) {
        let _ = self.tx.send(self.pipeline.in_flight_count());
    }

    fn did_failed_to_load(&self, _request: &ThumbnailRequest) {}
}

#[tokio::test]
async fn test_observer_may_call_back_into_pipeline() {
    let loader = Arc::new(MockImageLoader::new().with_image("a.jpg", jpeg_bytes(200, 200)));
    let pipeline = ThumbnailPipeline::new(
        PipelineConfig::default(),
        Arc::new(LruMemoryCache::new()),
        Arc::new(NoDiskCache),
        loader,
    );
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let observer: Arc<dyn ThumbnailObserver> = Arc::new(ReentrantObserver {
        pipeline: pipeline.clone(),
        tx,
    });

    pipeline.load(request("cell-1", "photo", "a.jpg"), Some(&observer));

    // The pool is already gone when its observers are told
    assert_eq!(within(rx.recv()).await, Some(0));
}
