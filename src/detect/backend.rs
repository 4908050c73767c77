use anyhow::Result;
use image::RgbImage;

use crate::detect::result::{DetectionConfig, DetectionResult};

/// Detector backend trait.
///
/// A backend receives a borrowed RGB frame and returns boxes in that frame's
/// pixel coordinates, already de-duplicated by non-max suppression.
///
/// Backends run on the producer thread, so `detect` may be slow, but it must
/// not retain the frame beyond the call.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on a frame.
    fn detect(&mut self, frame: &RgbImage, config: &DetectionConfig) -> Result<DetectionResult>;

    /// Class names the backend can emit, in class-id order. Empty when the
    /// label set is open-ended.
    fn labels(&self) -> &[String] {
        &[]
    }

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
