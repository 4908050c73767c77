//! Frame types that flow through the pipeline.
//!
//! - `Frame`: one captured RGB image, moved from stage to stage.
//! - `ProcessedFrame`: the published result of a pass (resized, annotated, encoded).
//!
//! `Frame` is deliberately not `Clone`: a pass owns its frame exclusively, and the
//! only thing shared between threads is the immutable `ProcessedFrame` behind an `Arc`.

use anyhow::{anyhow, Result};
use image::RgbImage;
use std::sync::Arc;
use std::time::Instant;

use crate::detect::Detection;
use crate::pipeline::EncodedFormat;

/// One captured camera frame (RGB8).
pub struct Frame {
    image: RgbImage,
    /// Monotonic capture instant.
    pub captured_at: Instant,
}

// Explicitly NOT implementing Clone. Ownership moves between stages.

impl Frame {
    pub fn new(image: RgbImage) -> Self {
        Self {
            image,
            captured_at: Instant::now(),
        }
    }

    /// Build a frame from a packed RGB24 buffer.
    pub fn from_rgb(pixels: Vec<u8>, width: u32, height: u32) -> Result<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(3))
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        if pixels.len() != expected {
            return Err(anyhow!(
                "RGB frame length mismatch: expected {}, got {}",
                expected,
                pixels.len()
            ));
        }
        let image = RgbImage::from_raw(width, height, pixels)
            .ok_or_else(|| anyhow!("RGB buffer does not fit {}x{}", width, height))?;
        Ok(Self::new(image))
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn image_mut(&mut self) -> &mut RgbImage {
        &mut self.image
    }

    /// Replace the pixel grid, keeping the capture instant.
    pub fn with_image(self, image: RgbImage) -> Self {
        Self {
            image,
            captured_at: self.captured_at,
        }
    }

    pub fn into_image(self) -> RgbImage {
        self.image
    }
}

/// A fully processed frame, ready for viewers and snapshots.
///
/// Immutable once built. Encoded bytes are shared, so handing the frame to
/// many subscribers never copies the payload.
#[derive(Debug)]
pub struct ProcessedFrame {
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
    pub format: EncodedFormat,
    pub detections: Vec<Detection>,
    pub captured_at: Instant,
    bytes: Arc<[u8]>,
}

impl ProcessedFrame {
    pub fn new(
        sequence: u64,
        width: u32,
        height: u32,
        format: EncodedFormat,
        detections: Vec<Detection>,
        captured_at: Instant,
        bytes: Vec<u8>,
    ) -> Self {
        Self {
            sequence,
            width,
            height,
            format,
            detections,
            captured_at,
            bytes: bytes.into(),
        }
    }

    /// Encoded image bytes (PNG or JPEG, see `format`).
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn shared_bytes(&self) -> Arc<[u8]> {
        self.bytes.clone()
    }
}
