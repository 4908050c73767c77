use std::sync::Arc;
use std::time::Instant;

use image::imageops;
use image::RgbImage;

use crate::config::PipelineSettings;
use crate::detect::{Detection, DetectorEngine};
use crate::error::SkipReason;
use crate::frame::{Frame, ProcessedFrame};
use crate::ingest::FrameSource;
use crate::pipeline::annotate::Annotator;
use crate::pipeline::encode::FrameEncoder;
use crate::pipeline::fps::{fps_label, FpsMeter};
use crate::pipeline::state::PipelineState;

/// Result of one pipeline pass.
#[derive(Debug)]
pub enum PassOutcome {
    Published(Arc<ProcessedFrame>),
    Skipped(SkipReason),
}

/// Runs the capture → resize → detect → overlay → encode pass.
///
/// Owns the source and the detector; lives on the producer thread.
pub struct FrameProcessor {
    source: Box<dyn FrameSource>,
    engine: DetectorEngine,
    annotator: Annotator,
    encoder: FrameEncoder,
    fps: FpsMeter,
    resize_percent: u32,
}

impl FrameProcessor {
    pub fn new(source: Box<dyn FrameSource>, engine: DetectorEngine, settings: &PipelineSettings) -> Self {
        let annotator = Annotator::with_labels(engine.labels());
        Self {
            source,
            engine,
            annotator,
            encoder: FrameEncoder::new(settings.format, settings.jpeg_quality),
            fps: FpsMeter::new(),
            resize_percent: settings.resize_percent,
        }
    }

    pub fn source(&self) -> &dyn FrameSource {
        self.source.as_ref()
    }

    pub fn engine(&self) -> &DetectorEngine {
        &self.engine
    }

    /// Run one pass. On success the result is returned but not yet stored;
    /// the caller publishes it.
    pub fn process_one(&mut self, state: &PipelineState) -> PassOutcome {
        match self.try_process(state) {
            Ok(frame) => PassOutcome::Published(Arc::new(frame)),
            Err(reason) => PassOutcome::Skipped(reason),
        }
    }

    fn try_process(&mut self, state: &PipelineState) -> Result<ProcessedFrame, SkipReason> {
        let frame = self.source.next_frame()?;
        let started = Instant::now();
        let fps = self.fps.tick(started);
        let captured_at = frame.captured_at;

        let mut image = resize_percent(frame, self.resize_percent)?;

        // Read once so a toggle mid-pass cannot half-annotate a frame.
        let detections: Vec<Detection> = if state.detection_enabled() {
            let result = self.engine.detect(&image);
            self.annotator.draw_detections(&mut image, &result.detections);
            result.detections
        } else {
            Vec::new()
        };

        self.annotator.draw_fps(&mut image, &fps_label(fps));

        let bytes = self.encoder.encode(&image)?;
        Ok(ProcessedFrame::new(
            state.frame_counter() + 1,
            image.width(),
            image.height(),
            self.encoder.format(),
            detections,
            captured_at,
            bytes,
        ))
    }
}

/// Scale both dimensions to `percent`% (floored) with area averaging.
pub fn resize_percent(frame: Frame, percent: u32) -> Result<RgbImage, SkipReason> {
    let width = (u64::from(frame.width()) * u64::from(percent) / 100) as u32;
    let height = (u64::from(frame.height()) * u64::from(percent) / 100) as u32;
    if width == 0 || height == 0 {
        return Err(SkipReason::ResizeFailure(format!(
            "{}x{} at {}% has no pixels",
            frame.width(),
            frame.height(),
            percent
        )));
    }
    if width == frame.width() && height == frame.height() {
        return Ok(frame.into_image());
    }
    Ok(imageops::thumbnail(frame.image(), width, height))
}
