//! Smoothie - generate and cache thumbnails for local images.
//!
//! This binary runs each input file through the thumbnail pipeline and
//! reports the outcome.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use smoothie::{
    Config, DiskCache, FileDiskCache, FileImageLoader, LruMemoryCache, NoDiskCache,
    OriginalImageRequest, OutputFormat, PipelineStats, RequestId, Size, Thumbnail,
    ThumbnailInfo, ThumbnailLoader, ThumbnailObserver, ThumbnailRequest,
};

/// Interval between idle checks while waiting for background work.
const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(10);

#[tokio::main]
async fn main() -> ExitCode {
    let config = Config::parse();

    init_logging(config.verbose);

    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    info!(
        "Thumbnailing {} image(s) at {}pt x{}",
        config.inputs.len(),
        config.size,
        config.scale
    );
    match config.cache_dir {
        Some(ref dir) => info!("  Disk cache: {}", dir.display()),
        None => info!("  Disk cache: disabled"),
    }

    let disk_cache: Arc<dyn DiskCache> = match config.cache_dir {
        Some(ref dir) => Arc::new(FileDiskCache::new(dir)),
        None => Arc::new(NoDiskCache),
    };
    let loader = ThumbnailLoader::new(
        config.pipeline_config(),
        Arc::new(LruMemoryCache::with_capacity(config.memory_cache)),
        disk_cache,
        Arc::new(FileImageLoader::new()),
    );

    let (tx, rx) = mpsc::unbounded_channel();
    let observer: Arc<dyn ThumbnailObserver> = Arc::new(ReportObserver { tx });

    let requests: Vec<ThumbnailRequest> = config
        .inputs
        .iter()
        .enumerate()
        .map(|(index, path)| build_request(index, path, &config))
        .collect();

    let outcomes = if config.prefetch {
        for request in &requests {
            loader.prefetch(request.clone());
        }
        Vec::new()
    } else {
        for request in &requests {
            loader.load(request.clone(), &observer);
        }
        collect_outcomes(rx, requests.len()).await
    };

    wait_until_idle(&loader).await;

    let report = Report::new(&config.inputs, &outcomes, loader.stats(), config.prefetch);
    report.print(config.format);

    if report.failed > 0 {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

/// Initialize the tracing/logging subsystem.
fn init_logging(verbose: bool) {
    let env_filter = if verbose { "smoothie=debug" } else { "smoothie=info" };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// One request per input; the cache key includes the pixel size so
/// different sizes of one image are cached separately.
fn build_request(index: usize, path: &Path, config: &Config) -> ThumbnailRequest {
    let locator = path.to_string_lossy();
    let size = Size::new(config.size, config.size);
    let key = cache_key(&locator, size, config.scale);

    ThumbnailRequest::new(
        RequestId::new(index.to_string()),
        ThumbnailInfo::new(key, size, config.scale),
        OriginalImageRequest::new(locator.as_ref()),
    )
}

fn cache_key(locator: &str, size: Size, scale: f32) -> String {
    format!("{}#{}", locator, size.max_pixel_size(scale))
}

// =============================================================================
// Observer
// =============================================================================

struct Outcome {
    request_id: RequestId,
    dimensions: Option<(u32, u32)>,
}

struct ReportObserver {
    tx: mpsc::UnboundedSender<Outcome>,
}

impl ThumbnailObserver for ReportObserver {
    fn did_success_to_load(&self, request: &ThumbnailRequest, thumbnail: Thumbnail) {
        let _ = self.tx.send(Outcome {
            request_id: request.request_id.clone(),
            dimensions: Some((thumbnail.width(), thumbnail.height())),
        });
    }

    fn did_failed_to_load(&self, request: &ThumbnailRequest) {
        let _ = self.tx.send(Outcome {
            request_id: request.request_id.clone(),
            dimensions: None,
        });
    }
}

async fn collect_outcomes(mut rx: mpsc::UnboundedReceiver<Outcome>, expected: usize) -> Vec<Outcome> {
    let mut outcomes = Vec::with_capacity(expected);
    while outcomes.len() < expected {
        match rx.recv().await {
            Some(outcome) => outcomes.push(outcome),
            None => break,
        }
    }
    outcomes
}

/// Wait for in-flight pools and their disk cache writes to finish.
async fn wait_until_idle(loader: &ThumbnailLoader) {
    loop {
        let stats = loader.stats();
        if loader.pipeline().in_flight_count() == 0 && stats.disk_idle() {
            return;
        }
        tokio::time::sleep(IDLE_POLL_INTERVAL).await;
    }
}

// =============================================================================
// Report
// =============================================================================

#[derive(Serialize)]
struct ImageReport {
    path: String,
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    height: Option<u32>,
}

#[derive(Serialize)]
struct Report {
    images: Vec<ImageReport>,
    failed: usize,
    stats: PipelineStats,
}

impl Report {
    fn new(inputs: &[PathBuf], outcomes: &[Outcome], stats: PipelineStats, prefetch: bool) -> Self {
        let images: Vec<ImageReport> = if prefetch {
            Vec::new()
        } else {
            inputs
                .iter()
                .enumerate()
                .map(|(index, path)| {
                    let dimensions = outcomes
                        .iter()
                        .find(|o| o.request_id.as_str() == index.to_string())
                        .and_then(|o| o.dimensions);
                    ImageReport {
                        path: path.display().to_string(),
                        ok: dimensions.is_some(),
                        width: dimensions.map(|(w, _)| w),
                        height: dimensions.map(|(_, h)| h),
                    }
                })
                .collect()
        };

        let failed = if prefetch {
            (stats.failed_deliveries + stats.disk_write_failures) as usize
        } else {
            images.iter().filter(|image| !image.ok).count()
        };

        Self {
            images,
            failed,
            stats,
        }
    }

    fn print(&self, format: OutputFormat) {
        match format {
            OutputFormat::Json => match serde_json::to_string_pretty(self) {
                Ok(json) => println!("{}", json),
                Err(e) => error!("Failed to serialize report: {}", e),
            },
            OutputFormat::Text => {
                for image in &self.images {
                    match (image.width, image.height) {
                        (Some(w), Some(h)) => println!("✓ {} ({}x{})", image.path, w, h),
                        _ => println!("✗ {}", image.path),
                    }
                }
                println!();
                println!(
                    "{} pool(s), {} disk hit(s), {} encoded, {} failed",
                    self.stats.pools_created,
                    self.stats.disk_hits,
                    self.stats.encodes,
                    self.failed
                );
            }
        }
    }
}
