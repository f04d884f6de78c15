//! slice-hammer - step a simulated viewer through a lazily generated volume.
//!
//! Every step asks for the next plane of a noise volume whose realization is
//! slowed down by a configurable latency. Stepping faster than planes load
//! supersedes pending slices, so the run exercises submission, cancellation
//! and cross-thread notification together.

use std::process::ExitCode;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use clap::Parser;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use slice_loader::{
    config::{Config, OutputFormat},
    executor::{Executor, Job, TokioExecutor},
    AxisSelection, ImageLoader, LazyArray, LazyExpr, LazySource, SelectorError, Selector,
    SliceData, SliceError, SliceLayer, SliceLoader, SliceRegistry, ThumbnailSource,
};

type Volume = LazyExpr<f32>;

/// Every n-th element along each axis goes into the thumbnail.
const THUMBNAIL_STRIDE: usize = 8;

fn main() -> ExitCode {
    let config = Config::parse();

    init_logging(config.verbose);

    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .max_blocking_threads(config.workers)
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to start runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(&config)) {
        Ok(summary) => {
            report(&config, &summary);
            if summary.final_ready {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Err(e) => {
            error!("slice-hammer failed: {}", e);
            ExitCode::FAILURE
        }
    }
}

/// Initialize the tracing/logging subsystem.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "slice_loader=debug,slice_hammer=debug"
    } else {
        "slice_loader=info,slice_hammer=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

// =============================================================================
// Viewer
// =============================================================================

#[derive(Debug, Error)]
enum HammerError {
    #[error("no tokio runtime: {0}")]
    Runtime(#[from] tokio::runtime::TryCurrentError),

    #[error(transparent)]
    Slice(#[from] SliceError),

    #[error(transparent)]
    Selector(#[from] SelectorError),
}

/// A load notification, marshalled back to the render loop.
struct LoadEvent {
    slice: SliceData<Volume>,
    sync: bool,
}

/// Forwards notifications from worker threads to the render loop.
struct ViewerLayer {
    events: mpsc::UnboundedSender<LoadEvent>,
}

impl SliceLayer<Volume> for ViewerLayer {
    fn on_data_loaded(&self, slice: &SliceData<Volume>, sync: bool) {
        let event = LoadEvent {
            slice: slice.clone(),
            sync,
        };
        if self.events.send(event).is_err() {
            debug!(slice = slice.id(), "viewer gone, dropping notification");
        }
    }
}

/// Counts submissions on their way to the real executor.
struct CountingExecutor<E> {
    inner: E,
    submitted: AtomicUsize,
}

impl<E: Executor> Executor for CountingExecutor<E> {
    fn execute(&self, job: Job) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
        self.inner.execute(job);
    }
}

#[derive(Debug, Default, Serialize)]
struct Summary {
    shape: Vec<usize>,
    steps: usize,
    submitted: usize,
    cache_hits: usize,
    cancelled: usize,
    loaded_async: usize,
    loaded_sync: usize,
    failed: usize,
    final_indices: String,
    final_ready: bool,
    final_mean: Option<f32>,
    elapsed_ms: u64,
}

impl Summary {
    fn record(&mut self, event: &LoadEvent) {
        debug!(
            slice = event.slice.id(),
            indices = %event.slice.indices(),
            sync = event.sync,
            "slice loaded"
        );
        if event.sync {
            self.loaded_sync += 1;
        } else {
            self.loaded_async += 1;
        }
    }
}

async fn run(config: &Config) -> Result<Summary, HammerError> {
    let executor = Arc::new(CountingExecutor {
        inner: TokioExecutor::current()?,
        submitted: AtomicUsize::new(0),
    });
    let volume = LazyExpr::from_fn(config.shape.clone(), noise);
    let root = LazySource::with_config(volume, executor.clone(), config.load_config());

    let (tx, mut rx) = mpsc::unbounded_channel();
    let layer: Arc<dyn SliceLayer<Volume>> = Arc::new(ViewerLayer { events: tx });
    let registry = SliceRegistry::with_capacity(config.cache_slices);
    let loader = ImageLoader::new();

    info!(
        shape = ?config.shape,
        latency_ms = config.latency_ms,
        workers = config.workers,
        steps = config.steps,
        "starting viewer"
    );

    let mut summary = Summary {
        shape: config.shape.clone(),
        steps: config.steps,
        ..Summary::default()
    };
    let started = Instant::now();
    let mut interval = tokio::time::interval(config.frame_interval());
    let mut current = None;

    for step in 0..config.steps {
        interval.tick().await;

        let plane = step % config.shape[0];
        let slice = show_plane(&root, &layer, &registry, plane, config, &mut summary)?;
        poll(&loader, &slice, &mut summary);
        while let Ok(event) = rx.try_recv() {
            summary.record(&event);
        }
        current = Some(slice);
    }

    let Some(slice) = current else {
        return Ok(summary);
    };

    // Wait for the plane the viewer stopped on.
    let deadline = tokio::time::Instant::now() + config.settle_timeout();
    while !poll(&loader, &slice, &mut summary) {
        tokio::select! {
            event = rx.recv() => match event {
                Some(event) => summary.record(&event),
                None => break,
            },
            _ = tokio::time::sleep_until(deadline) => {
                warn!(slice = slice.id(), "gave up waiting for the final slice");
                break;
            }
        }
    }
    while let Ok(event) = rx.try_recv() {
        summary.record(&event);
    }

    summary.submitted = executor.submitted.load(Ordering::Relaxed);
    summary.final_indices = slice.indices().to_string();
    summary.final_ready = slice.image().is_some();
    summary.final_mean = slice.image().and_then(|image| image.mean());
    summary.elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

    registry.clear();
    Ok(summary)
}

/// Fetch or create the slice for `plane` and make it current.
fn show_plane(
    root: &LazySource<Volume>,
    layer: &Arc<dyn SliceLayer<Volume>>,
    registry: &SliceRegistry<Volume>,
    plane: usize,
    config: &Config,
    summary: &mut Summary,
) -> Result<SliceData<Volume>, HammerError> {
    let indices = Selector::new(vec![AxisSelection::Index(plane)]);

    let slice = match registry.get(&indices) {
        Some(slice) => {
            debug!(slice = slice.id(), indices = %indices, "reusing slice");
            summary.cache_hits += 1;
            slice
        }
        None => {
            let image = root.slice(&indices)?;
            let thumbnail = image.lazy().slice(&thumbnail_selector(image.shape()))?;
            let slice = SliceData::new(
                Arc::downgrade(layer),
                indices,
                image,
                Some(ThumbnailSource::Lazy(thumbnail)),
            );
            if config.transpose {
                let order: Vec<usize> = (0..slice.shape().len()).rev().collect();
                slice.transpose(&order)?;
            }
            slice
        }
    };

    let released = registry.supersede(slice.clone());
    summary.cancelled += released.len();
    Ok(slice)
}

/// Run the loader once. Returns whether the slice is done, failed or not.
fn poll(loader: &ImageLoader, slice: &SliceData<Volume>, summary: &mut Summary) -> bool {
    match loader.load(slice) {
        Ok(done) => done,
        Err(e) => {
            warn!(slice = slice.id(), error = %e, "slice failed to load");
            summary.failed += 1;
            true
        }
    }
}

fn thumbnail_selector(shape: &[usize]) -> Selector {
    shape
        .iter()
        .map(|&len| AxisSelection::stepped(0..len, THUMBNAIL_STRIDE))
        .collect()
}

/// Deterministic pseudo-random value in `[0, 1)` for an element index.
fn noise(idx: &[usize]) -> f32 {
    let mut h: u64 = 0x9E37_79B9_7F4A_7C15;
    for &i in idx {
        h ^= i as u64;
        h = h.wrapping_add(0x9E37_79B9_7F4A_7C15);
        h = (h ^ (h >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        h = (h ^ (h >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        h ^= h >> 31;
    }
    (h >> 40) as f32 / (1u64 << 24) as f32
}

// =============================================================================
// Output
// =============================================================================

fn report(config: &Config, summary: &Summary) {
    match config.format {
        OutputFormat::Text => {
            info!("────────────────────────────────────────────────────────────────");
            info!("  Volume: {:?}, {} steps", summary.shape, summary.steps);
            info!(
                "  Submitted: {}, cancelled: {}, cache hits: {}",
                summary.submitted, summary.cancelled, summary.cache_hits
            );
            info!(
                "  Loaded: {} async, {} sync, {} failed",
                summary.loaded_async, summary.loaded_sync, summary.failed
            );
            match summary.final_mean {
                Some(mean) => info!(
                    "  Final slice {}: ready, mean {:.4}",
                    summary.final_indices, mean
                ),
                None => warn!("  Final slice {}: not ready", summary.final_indices),
            }
            info!("  Elapsed: {} ms", summary.elapsed_ms);
            info!("────────────────────────────────────────────────────────────────");
        }
        OutputFormat::Json => match serde_json::to_string_pretty(summary) {
            Ok(json) => println!("{}", json),
            Err(e) => error!("Failed to serialize summary: {}", e),
        },
    }
}
