//! Frame sources.
//!
//! - `stub://<pattern>`: synthetic frames (tests, demos)
//! - `/dev/videoN`: local UVC camera (feature: ingest-v4l2)
//! - `http(s)://...`: IP-webcam MJPEG stream (feature: ingest-mjpeg)
//!
//! A source may block in `next_frame` until the device delivers. It never
//! retries internally: a missed frame is reported as `FrameUnavailable` and
//! the pipeline moves on to the next cycle.

#[cfg(feature = "ingest-mjpeg")]
pub mod mjpeg;
#[cfg(feature = "ingest-v4l2")]
mod normalize;
pub mod synthetic;
#[cfg(feature = "ingest-v4l2")]
pub mod v4l2;

use std::time::Duration;

use anyhow::Result;

use crate::config::CameraSettings;
use crate::error::FrameUnavailable;
use crate::frame::Frame;

#[cfg(feature = "ingest-mjpeg")]
pub use mjpeg::MjpegSource;
pub use synthetic::SyntheticSource;
#[cfg(feature = "ingest-v4l2")]
pub use v4l2::V4l2Source;

pub const STUB_SCHEME: &str = "stub://";

/// Statistics for a frame source.
#[derive(Clone, Debug, Default)]
pub struct SourceStats {
    pub frames_captured: u64,
    pub failures: u64,
    pub device: String,
}

pub trait FrameSource: Send {
    /// Open the device. Failure here is fatal at startup.
    fn connect(&mut self) -> Result<()>;

    /// Capture the next frame.
    fn next_frame(&mut self) -> Result<Frame, FrameUnavailable>;

    fn is_healthy(&self) -> bool;

    fn stats(&self) -> SourceStats;
}

/// Pick a source implementation from the configured device string.
///
/// The source is returned unconnected.
pub fn open_source(settings: &CameraSettings) -> Result<Box<dyn FrameSource>> {
    let device = settings.device.trim();
    if device.starts_with(STUB_SCHEME) {
        return Ok(Box::new(SyntheticSource::from_settings(settings)));
    }
    if device.starts_with("http://") || device.starts_with("https://") {
        return open_mjpeg(settings);
    }
    open_v4l2(settings)
}

#[cfg(feature = "ingest-mjpeg")]
fn open_mjpeg(settings: &CameraSettings) -> Result<Box<dyn FrameSource>> {
    Ok(Box::new(MjpegSource::new(settings)?))
}

#[cfg(not(feature = "ingest-mjpeg"))]
fn open_mjpeg(settings: &CameraSettings) -> Result<Box<dyn FrameSource>> {
    Err(anyhow::anyhow!(
        "camera {} needs the ingest-mjpeg feature",
        settings.device
    ))
}

#[cfg(feature = "ingest-v4l2")]
fn open_v4l2(settings: &CameraSettings) -> Result<Box<dyn FrameSource>> {
    Ok(Box::new(V4l2Source::new(settings)))
}

#[cfg(not(feature = "ingest-v4l2"))]
fn open_v4l2(settings: &CameraSettings) -> Result<Box<dyn FrameSource>> {
    Err(anyhow::anyhow!(
        "camera {} needs the ingest-v4l2 feature",
        settings.device
    ))
}

/// How long a source may go without a frame before it reports unhealthy.
#[cfg_attr(
    not(any(feature = "ingest-v4l2", feature = "ingest-mjpeg")),
    allow(dead_code)
)]
pub(crate) fn health_grace(target_fps: u32) -> Duration {
    let base_ms = if target_fps == 0 {
        2_000
    } else {
        (1000 / target_fps).saturating_mul(6)
    };
    Duration::from_millis(u64::from(base_ms.max(2_000)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stub_devices_open_synthetic_sources() -> Result<()> {
        let settings = CameraSettings {
            device: "stub://black".to_string(),
            width: 32,
            height: 24,
            ..CameraSettings::default()
        };
        let mut source = open_source(&settings)?;
        source.connect()?;
        let frame = source.next_frame()?;
        assert_eq!((frame.width(), frame.height()), (32, 24));
        assert_eq!(source.stats().frames_captured, 1);
        Ok(())
    }

    #[test]
    fn health_grace_has_a_floor() {
        assert_eq!(health_grace(0), Duration::from_secs(2));
        assert_eq!(health_grace(1), Duration::from_secs(6));
        assert_eq!(health_grace(30), Duration::from_secs(2));
    }
}
