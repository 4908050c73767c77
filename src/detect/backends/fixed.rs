use anyhow::Result;
use image::RgbImage;

use crate::detect::backend::DetectorBackend;
use crate::detect::nms::non_max_suppression;
use crate::detect::result::{Detection, DetectionConfig, DetectionResult};

/// Backend that reports the same detections for every frame.
///
/// Used for bench setups and pipeline tests where a real model is not available.
/// The configured detections still go through the confidence filter and NMS.
#[derive(Clone, Debug, Default)]
pub struct FixedBackend {
    detections: Vec<Detection>,
}

impl FixedBackend {
    pub fn new(detections: Vec<Detection>) -> Self {
        Self { detections }
    }
}

impl DetectorBackend for FixedBackend {
    fn name(&self) -> &'static str {
        "fixed"
    }

    fn detect(&mut self, _frame: &RgbImage, config: &DetectionConfig) -> Result<DetectionResult> {
        let candidates = self
            .detections
            .iter()
            .filter(|d| d.confidence >= config.confidence_threshold)
            .cloned()
            .collect();
        Ok(non_max_suppression(candidates, config.overlap_threshold).into())
    }
}
