use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use serde::Serialize;

use crate::pipeline::processor::{FrameProcessor, PassOutcome};
use crate::pipeline::state::PipelineState;
use crate::stream::StreamHub;

const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(5);
const SKIP_BACKOFF: Duration = Duration::from_millis(10);

/// Counters kept by the producer thread.
#[derive(Debug, Default)]
pub struct PipelineStats {
    published: AtomicU64,
    skipped: AtomicU64,
    overruns: AtomicU64,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct PipelineStatsSnapshot {
    pub published: u64,
    pub skipped: u64,
    pub overruns: u64,
}

impl PipelineStats {
    pub fn snapshot(&self) -> PipelineStatsSnapshot {
        PipelineStatsSnapshot {
            published: self.published.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            overruns: self.overruns.load(Ordering::Relaxed),
        }
    }
}

/// Drives a `FrameProcessor` and publishes its output.
pub struct PipelineRunner {
    processor: FrameProcessor,
    state: Arc<PipelineState>,
    hub: Arc<StreamHub>,
    stats: Arc<PipelineStats>,
    frame_interval: Option<Duration>,
    soft_deadline: Duration,
}

impl PipelineRunner {
    pub fn new(
        processor: FrameProcessor,
        state: Arc<PipelineState>,
        hub: Arc<StreamHub>,
        soft_deadline: Duration,
    ) -> Self {
        Self {
            processor,
            state,
            hub,
            stats: Arc::new(PipelineStats::default()),
            frame_interval: None,
            soft_deadline,
        }
    }

    /// Cap the pass rate. Zero leaves it uncapped.
    pub fn with_target_fps(mut self, fps: u32) -> Self {
        self.frame_interval = (fps > 0).then(|| Duration::from_secs_f64(1.0 / f64::from(fps)));
        self
    }

    pub fn stats(&self) -> Arc<PipelineStats> {
        Arc::clone(&self.stats)
    }

    /// One pass: process, then store and fan out the result.
    pub fn run_once(&mut self) -> PassOutcome {
        let started = Instant::now();
        let outcome = self.processor.process_one(&self.state);
        match &outcome {
            PassOutcome::Published(frame) => {
                self.state.publish(Arc::clone(frame));
                self.hub.publish(frame);
                self.stats.published.fetch_add(1, Ordering::Relaxed);
            }
            PassOutcome::Skipped(reason) => {
                self.stats.skipped.fetch_add(1, Ordering::Relaxed);
                if reason.is_transient() {
                    log::debug!("pass skipped: {}", reason);
                } else {
                    log::warn!("pass skipped: {}", reason);
                }
            }
        }
        let elapsed = started.elapsed();
        if elapsed > self.soft_deadline {
            self.stats.overruns.fetch_add(1, Ordering::Relaxed);
            log::warn!(
                "pass took {} ms (soft deadline {} ms)",
                elapsed.as_millis(),
                self.soft_deadline.as_millis()
            );
        }
        outcome
    }

    /// Run until `shutdown` is raised.
    pub fn run(&mut self, shutdown: &AtomicBool) {
        log::info!(
            "pipeline running: detector={} detection_enabled={}",
            self.processor.engine().name(),
            self.state.detection_enabled()
        );
        let mut last_health_log = Instant::now();
        while !shutdown.load(Ordering::SeqCst) {
            let started = Instant::now();
            let outcome = self.run_once();

            if last_health_log.elapsed() >= HEALTH_LOG_INTERVAL {
                let stats = self.stats.snapshot();
                let source = self.processor.source().stats();
                log::info!(
                    "pipeline health: published={} skipped={} overruns={} subscribers={} source_healthy={} captured={} detector_failures={}",
                    stats.published,
                    stats.skipped,
                    stats.overruns,
                    self.hub.subscriber_count(),
                    self.processor.source().is_healthy(),
                    source.frames_captured,
                    self.processor.engine().failures()
                );
                last_health_log = Instant::now();
            }

            let elapsed = started.elapsed();
            if let Some(interval) = self.frame_interval {
                if elapsed < interval {
                    thread::sleep(interval - elapsed);
                }
            } else if matches!(outcome, PassOutcome::Skipped(_)) {
                thread::sleep(SKIP_BACKOFF);
            }
        }
        log::info!("pipeline stopped");
    }

    /// Move the runner onto its own producer thread.
    pub fn spawn(mut self) -> Result<PipelineHandle> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let stats = self.stats();
        let flag = Arc::clone(&shutdown);
        let join = thread::Builder::new()
            .name("rover-pipeline".into())
            .spawn(move || {
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.run(&flag)));
                if let Err(payload) = outcome {
                    log::error!("pipeline thread died; stream is frozen");
                    panic::resume_unwind(payload);
                }
            })
            .context("failed to spawn pipeline thread")?;
        Ok(PipelineHandle {
            shutdown,
            stats,
            join: Some(join),
        })
    }
}

pub struct PipelineHandle {
    shutdown: Arc<AtomicBool>,
    stats: Arc<PipelineStats>,
    join: Option<JoinHandle<()>>,
}

impl PipelineHandle {
    pub fn stats(&self) -> PipelineStatsSnapshot {
        self.stats.snapshot()
    }

    /// True once the producer thread has exited, whether stopped or crashed.
    pub fn is_finished(&self) -> bool {
        self.join.as_ref().map_or(true, JoinHandle::is_finished)
    }

    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("pipeline thread panicked"))?;
        }
        Ok(())
    }
}
