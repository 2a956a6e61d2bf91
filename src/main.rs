// src/main.rs

use anyhow::{Context, Result};
use incident_watch::channels::build_channels;
use incident_watch::config::{self, Config, CONFIG_PATH_ENV};
use incident_watch::detection::DetectionStateMachine;
use incident_watch::dispatcher::AlertDispatcher;
use incident_watch::evidence::EvidenceBuffer;
use incident_watch::inference::load_classifier;
use incident_watch::pipeline::{PipelineDriver, PipelineMetrics, StopReason};
use incident_watch::video_processor::open_source;
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let path = config::resolve_config_path(
        std::env::args().nth(1),
        std::env::var(CONFIG_PATH_ENV).ok(),
    );
    let config = Config::load(&path)?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("🎥 Violence Detection System Starting");
    info!("✓ Configuration loaded from {}", path.display());

    let classifier = load_classifier(&config.model)?;
    info!("✓ Classifier ready ({})", config.model.path);

    let source = open_source(&config.source)?;
    info!("✓ Frame source open ({:?})", config.source.kind);

    let metrics = PipelineMetrics::new();
    let channels = build_channels(&config);
    if channels.is_empty() {
        warn!("No notification channels are active; episodes will only be logged");
    }
    let dispatcher = AlertDispatcher::new(
        Handle::current(),
        channels,
        config
            .dispatch
            .channel_timeout_secs
            .map(Duration::from_secs_f64),
        metrics.clone(),
    );

    let mut driver = PipelineDriver::new(
        source,
        classifier,
        EvidenceBuffer::with_capacity(config.detection.frame_save_count),
        DetectionStateMachine::new(config.detection.state_machine_config()),
        dispatcher,
        metrics,
    )
    .with_max_fps(config.source.max_fps);

    let stop = driver.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received, stopping after the current frame");
            stop.stop();
        }
    });

    // The frame loop blocks on capture and inference, so it gets its own thread
    let summary = tokio::task::spawn_blocking(move || driver.run())
        .await
        .context("detection loop panicked")??;

    match summary.reason {
        StopReason::SourceError => warn!("Frame source failed; detection ended early"),
        StopReason::EndOfStream | StopReason::StopRequested => {}
    }
    info!(
        "✓ Done: {} frame(s), {} episode(s), stop reason {:?}",
        summary.frames, summary.episodes, summary.reason
    );

    Ok(())
}
