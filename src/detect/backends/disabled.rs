use anyhow::Result;
use image::RgbImage;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::{DetectionConfig, DetectionResult};

/// Backend that never detects anything. Constant cost.
#[derive(Clone, Copy, Debug, Default)]
pub struct DisabledBackend;

impl DetectorBackend for DisabledBackend {
    fn name(&self) -> &'static str {
        "disabled"
    }

    fn detect(&mut self, _frame: &RgbImage, _config: &DetectionConfig) -> Result<DetectionResult> {
        Ok(DetectionResult::empty())
    }
}
