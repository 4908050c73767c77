use anyhow::Result;
use image::{Rgb, RgbImage};

use crate::config::CameraSettings;
use crate::error::FrameUnavailable;
use crate::frame::Frame;
use crate::ingest::{FrameSource, SourceStats, STUB_SCHEME};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Pattern {
    Solid(Rgb<u8>),
    /// Diagonal ramp that shifts one step per frame.
    Gradient,
}

impl Pattern {
    fn from_name(name: &str) -> Self {
        match name {
            "black" => Pattern::Solid(Rgb([0, 0, 0])),
            "white" => Pattern::Solid(Rgb([255, 255, 255])),
            "gray" | "grey" => Pattern::Solid(Rgb([128, 128, 128])),
            "red" => Pattern::Solid(Rgb([255, 0, 0])),
            "green" => Pattern::Solid(Rgb([0, 255, 0])),
            "blue" => Pattern::Solid(Rgb([0, 0, 255])),
            _ => Pattern::Gradient,
        }
    }
}

/// Deterministic generated frames for `stub://` devices.
///
/// `stub://black`, `stub://white`, ... give solid frames; any other name
/// gives a moving gradient.
pub struct SyntheticSource {
    device: String,
    width: u32,
    height: u32,
    pattern: Pattern,
    fail_every: u64,
    calls: u64,
    frame_count: u64,
    failures: u64,
}

impl SyntheticSource {
    pub fn from_settings(settings: &CameraSettings) -> Self {
        let name = settings
            .device
            .trim()
            .strip_prefix(STUB_SCHEME)
            .unwrap_or_default();
        Self::with_pattern(
            settings.device.clone(),
            settings.width,
            settings.height,
            Pattern::from_name(name),
        )
    }

    pub fn solid(width: u32, height: u32, color: Rgb<u8>) -> Self {
        Self::with_pattern(
            format!("{STUB_SCHEME}solid"),
            width,
            height,
            Pattern::Solid(color),
        )
    }

    fn with_pattern(device: String, width: u32, height: u32, pattern: Pattern) -> Self {
        Self {
            device,
            width,
            height,
            pattern,
            fail_every: 0,
            calls: 0,
            frame_count: 0,
            failures: 0,
        }
    }

    /// Make every `n`th capture report `FrameUnavailable` (`1` fails all).
    pub fn fail_every(mut self, n: u64) -> Self {
        self.fail_every = n;
        self
    }

    fn render(&self) -> RgbImage {
        match self.pattern {
            Pattern::Solid(color) => RgbImage::from_pixel(self.width, self.height, color),
            Pattern::Gradient => {
                let shift = self.frame_count;
                RgbImage::from_fn(self.width, self.height, |x, y| {
                    let v = ((u64::from(x) + u64::from(y) + shift) % 256) as u8;
                    Rgb([v, v.wrapping_add(85), v.wrapping_add(170)])
                })
            }
        }
    }
}

impl FrameSource for SyntheticSource {
    fn connect(&mut self) -> Result<()> {
        log::info!(
            "SyntheticSource: connected to {} ({}x{})",
            self.device,
            self.width,
            self.height
        );
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Frame, FrameUnavailable> {
        self.calls += 1;
        if self.fail_every > 0 && self.calls % self.fail_every == 0 {
            self.failures += 1;
            return Err(FrameUnavailable::new(format!(
                "{}: scripted capture failure",
                self.device
            )));
        }
        let image = self.render();
        self.frame_count += 1;
        Ok(Frame::new(image))
    }

    fn is_healthy(&self) -> bool {
        true
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            failures: self.failures,
            device: self.device.clone(),
        }
    }
}
