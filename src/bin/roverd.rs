//! roverd - rover camera daemon
//!
//! 1. Opens the configured camera (fatal if it cannot be opened)
//! 2. Builds the detector engine
//! 3. Runs the frame pipeline on its own thread
//! 4. Serves the live stream and control endpoints until Ctrl-C

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::{mpsc, Arc};
use std::time::Duration;

use rover_vision::{
    open_source, ApiServer, ControlSurface, DetectorEngine, DetectorKind, FrameProcessor,
    PipelineRunner, PipelineState, RoverConfig, SnapshotStore, StreamHub,
};

const PIPELINE_WATCH_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// JSON config file (falls back to defaults plus ROVER_* overrides).
    #[arg(long, env = "ROVER_CONFIG")]
    config: Option<PathBuf>,
    /// Minimum probability to keep a detection.
    #[arg(short, long)]
    confidence: Option<f32>,
    /// Overlap threshold for non-max suppression.
    #[arg(short, long)]
    threshold: Option<f32>,
    /// Detector backend.
    #[arg(long, value_enum)]
    detector: Option<DetectorKind>,
    /// Start with detection switched on.
    #[arg(long)]
    detect: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut config = RoverConfig::load_from(args.config.as_deref())?;
    if let Some(confidence) = args.confidence {
        config.detector.confidence_threshold = confidence;
    }
    if let Some(threshold) = args.threshold {
        config.detector.overlap_threshold = threshold;
    }
    if let Some(kind) = args.detector {
        config.detector.kind = kind;
    }
    if args.detect {
        config.detector.enabled_at_start = true;
    }
    config.validate()?;

    let mut source = open_source(&config.camera)?;
    source
        .connect()
        .with_context(|| format!("cannot open camera {}", config.camera.device))?;

    let mut engine = DetectorEngine::from_settings(&config.detector)?;
    engine.warm_up();

    let state = Arc::new(PipelineState::with_detection(config.detector.enabled_at_start));
    let hub = Arc::new(StreamHub::new(config.stream_queue_depth));
    let snapshots = Arc::new(SnapshotStore::open(&config.snapshot_dir)?);
    let control = ControlSurface::new(state.clone(), hub.clone(), snapshots);

    let processor = FrameProcessor::new(source, engine, &config.pipeline);
    let pipeline = PipelineRunner::new(processor, state, hub, config.pipeline.soft_deadline)
        .with_target_fps(config.camera.target_fps)
        .spawn()?;

    let api_handle = ApiServer::new(config.api.clone(), control).spawn()?;
    log::info!("control api listening on {}", api_handle.addr);
    log::info!("live stream at http://{}/stream", api_handle.addr);
    if let Some(path) = &api_handle.token_path {
        log::info!("control api capability token written to {}", path.display());
    } else {
        log::warn!(
            "control api capability token (handle securely): {}",
            api_handle.token
        );
    }

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .expect("error setting Ctrl-C handler");

    log::info!("roverd waiting for shutdown signal (Ctrl-C)...");
    loop {
        match rx.recv_timeout(PIPELINE_WATCH_INTERVAL) {
            Err(mpsc::RecvTimeoutError::Timeout) if !pipeline.is_finished() => continue,
            Err(mpsc::RecvTimeoutError::Timeout) => {
                log::error!("pipeline thread exited unexpectedly, shutting down");
                break;
            }
            _ => {
                log::info!("shutdown signal received, stopping...");
                break;
            }
        }
    }
    api_handle.stop()?;
    let stats = pipeline.stats();
    pipeline.stop()?;
    log::info!(
        "roverd stopped: published={} skipped={} overruns={}",
        stats.published,
        stats.skipped,
        stats.overruns
    );
    Ok(())
}
