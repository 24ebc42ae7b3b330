use anyhow::{Context, Result};
use std::fs::OpenOptions;
use std::io::BufWriter;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use watchpost_capture::{spawn_producer, FrameQueue, ImageDirSource, ProducerOptions, ReplayProvider};
use watchpost_core::registry::{JsonRegistryFile, RegistryLoader};
use watchpost_core::sink::{JsonLinesSink, ResultSink, TracingSink};
use watchpost_core::{FramePipeline, IdentityMatcher};

mod config;
mod engine;

use config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("watchpostd starting");

    let config = Config::load().context("failed to load configuration")?;

    let registry = Arc::new(JsonRegistryFile::new(&config.registry_path));
    let matcher = Arc::new(
        IdentityMatcher::new(config.pipeline.tolerance).context("invalid match tolerance")?,
    );
    let entries = registry
        .load_active()
        .context("failed to load identity registry")?;
    matcher.load(entries).context("failed to build registry snapshot")?;
    tracing::info!(
        path = %config.registry_path.display(),
        identities = matcher.snapshot().len(),
        "registry loaded"
    );

    let pipeline = FramePipeline::new(&config.pipeline, Arc::clone(&matcher), config.camera_id)
        .context("invalid pipeline configuration")?;

    let source = ImageDirSource::open(&config.source_dir)
        .context("failed to open frame source")?
        .looping(config.loop_source);
    let mut provider =
        ReplayProvider::open(&config.detections_path).context("failed to load detections")?;
    if config.loop_source {
        provider = provider.with_period(source.len() as u64);
    }

    let mut sinks: Vec<Box<dyn ResultSink>> = vec![Box::new(TracingSink)];
    if let Some(path) = &config.results_path {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open results file {}", path.display()))?;
        sinks.push(Box::new(JsonLinesSink::new(BufWriter::new(file))));
        tracing::info!(path = %path.display(), "writing results");
    }

    let queue = FrameQueue::new(
        config.queue_capacity,
        Duration::from_millis(config.push_timeout_ms),
    );
    let cancelled = Arc::new(AtomicBool::new(false));
    let producer = spawn_producer(
        Box::new(source),
        queue.clone(),
        Arc::clone(&cancelled),
        ProducerOptions {
            skip_dark: config.skip_dark_frames,
            frame_interval: Duration::from_millis(config.frame_interval_ms),
            ..ProducerOptions::default()
        },
    )
    .context("failed to spawn producer thread")?;

    let (engine, engine_thread) = engine::spawn_engine(
        pipeline,
        Box::new(provider),
        queue.clone(),
        sinks,
        Duration::from_millis(config.poll_interval_ms),
    )?;

    if config.reload_interval_secs > 0 {
        tokio::spawn(reload_registry(
            registry,
            Arc::clone(&matcher),
            Duration::from_secs(config.reload_interval_secs),
        ));
    }

    tracing::info!("watchpostd ready");

    // Run until signaled or until the source runs dry and the queue drains.
    let mut poll = tokio::time::interval(Duration::from_millis(250));
    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal?;
                tracing::info!("interrupt received");
                break;
            }
            _ = poll.tick() => {
                if producer.is_finished() && queue.is_empty() {
                    tracing::info!("frame source finished");
                    break;
                }
            }
        }
    }

    tracing::info!("watchpostd shutting down");
    cancelled.store(true, Ordering::Relaxed);
    if let Err(e) = engine.shutdown().await {
        tracing::warn!(error = %e, "engine already stopped");
    }

    let (stats, report) = tokio::task::spawn_blocking(move || {
        let stats = engine_thread.join();
        let report = producer.join();
        (stats, report)
    })
    .await?;

    match report {
        Ok(report) => tracing::info!(
            frames = report.frames_read,
            dark = report.dark_skipped,
            dropped = queue.dropped(),
            "producer joined"
        ),
        Err(_) => tracing::error!("producer thread panicked"),
    }
    let stats = stats.map_err(|_| anyhow::anyhow!("engine thread panicked"))?;
    tracing::info!(
        session = %stats.session_id,
        frames = stats.frames_processed,
        known = stats.known_detected,
        unknown = stats.unknown_detected,
        events = stats.events_created,
        fps = stats.fps,
        "session finished"
    );

    Ok(())
}

/// Periodically reload the registry. A failed reload keeps the previous
/// snapshot in place.
async fn reload_registry(
    registry: Arc<JsonRegistryFile>,
    matcher: Arc<IdentityMatcher>,
    every: Duration,
) {
    let mut interval = tokio::time::interval(every);
    // The first tick fires immediately; the registry was just loaded.
    interval.tick().await;
    loop {
        interval.tick().await;
        let registry = Arc::clone(&registry);
        let entries = match tokio::task::spawn_blocking(move || registry.load_active()).await {
            Ok(Ok(entries)) => entries,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "registry reload failed; keeping previous snapshot");
                continue;
            }
            Err(e) => {
                tracing::warn!(error = %e, "registry reload task failed");
                continue;
            }
        };
        match matcher.load(entries) {
            Ok(()) => tracing::debug!(identities = matcher.snapshot().len(), "registry reloaded"),
            Err(e) => tracing::warn!(error = %e, "rejected reloaded registry; keeping previous snapshot"),
        }
    }
}
