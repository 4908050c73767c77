//! Local UVC camera via V4L2.
//!
//! Negotiates RGB3, then YUYV, then MJPG, and normalizes whatever the
//! driver settles on to packed RGB.

use anyhow::{anyhow, Context, Result};
use ouroboros::self_referencing;
use std::time::Instant;

use super::normalize::{normalize_to_rgb, PixelFormat};
use super::{health_grace, FrameSource, SourceStats};
use crate::config::CameraSettings;
use crate::error::FrameUnavailable;
use crate::frame::Frame;

const CAPTURE_BUFFERS: u32 = 4;

pub struct V4l2Source {
    settings: CameraSettings,
    state: Option<DeviceState>,
    format: PixelFormat,
    active_width: u32,
    active_height: u32,
    frame_count: u64,
    failures: u64,
    last_frame_at: Option<Instant>,
    last_error: Option<String>,
}

#[self_referencing]
struct DeviceState {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

impl V4l2Source {
    pub fn new(settings: &CameraSettings) -> Self {
        Self {
            active_width: settings.width,
            active_height: settings.height,
            settings: settings.clone(),
            state: None,
            format: PixelFormat::Rgb24,
            frame_count: 0,
            failures: 0,
            last_frame_at: None,
            last_error: None,
        }
    }

    fn negotiate(&self, device: &mut v4l::Device) -> Result<(v4l::Format, PixelFormat)> {
        use v4l::video::Capture;

        let mut format = device.format().context("read v4l2 format")?;
        format.width = self.settings.width;
        format.height = self.settings.height;
        for candidate in PixelFormat::PREFERRED {
            format.fourcc = v4l::FourCC::new(&candidate.fourcc());
            match device.set_format(&format) {
                Ok(applied) => {
                    if let Some(accepted) = PixelFormat::from_fourcc(&applied.fourcc.repr) {
                        return Ok((applied, accepted));
                    }
                }
                Err(err) => log::debug!(
                    "V4l2Source: {} rejected {:?}: {}",
                    self.settings.device,
                    candidate,
                    err
                ),
            }
        }
        Err(anyhow!(
            "{} supports none of RGB3, YUYV or MJPG",
            self.settings.device
        ))
    }
}

impl FrameSource for V4l2Source {
    fn connect(&mut self) -> Result<()> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let mut device = v4l::Device::with_path(&self.settings.device)
            .with_context(|| format!("open v4l2 device {}", self.settings.device))?;
        let (format, pixel_format) = self.negotiate(&mut device)?;

        if self.settings.target_fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(self.settings.target_fps);
            if let Err(err) = device.set_params(&params) {
                log::warn!(
                    "V4l2Source: failed to set fps on {}: {}",
                    self.settings.device,
                    err
                );
            }
        }

        let state = DeviceStateBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, CAPTURE_BUFFERS)
                    .map_err(|err| anyhow::Error::new(err).context("create v4l2 buffer stream"))
            },
        }
        .try_build()
        .map_err(|err| {
            self.last_error = Some(err.to_string());
            err
        })?;

        self.state = Some(state);
        self.format = pixel_format;
        self.active_width = format.width;
        self.active_height = format.height;
        self.last_error = None;

        log::info!(
            "V4l2Source: connected to {} ({}x{} {:?})",
            self.settings.device,
            self.active_width,
            self.active_height,
            self.format
        );
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Frame, FrameUnavailable> {
        use v4l::io::traits::CaptureStream;

        let Some(state) = self.state.as_mut() else {
            return Err(FrameUnavailable::new("v4l2 device not connected"));
        };
        let captured = state.with_mut(|fields| {
            fields
                .stream
                .next()
                .map(|(buf, _meta)| buf.to_vec())
        });
        let buf = match captured {
            Ok(buf) => buf,
            Err(err) => {
                self.failures += 1;
                self.last_error = Some(err.to_string());
                return Err(FrameUnavailable::new(format!("capture v4l2 frame: {err}")));
            }
        };

        let (pixels, width, height) =
            normalize_to_rgb(&buf, self.active_width, self.active_height, self.format).map_err(
                |err| {
                    self.failures += 1;
                    FrameUnavailable::from(err)
                },
            )?;
        let frame = Frame::from_rgb(pixels, width, height)?;

        self.frame_count += 1;
        self.last_frame_at = Some(Instant::now());
        self.last_error = None;
        Ok(frame)
    }

    fn is_healthy(&self) -> bool {
        if self.last_error.is_some() {
            return false;
        }
        let Some(last_frame_at) = self.last_frame_at else {
            return true;
        };
        last_frame_at.elapsed() <= health_grace(self.settings.target_fps)
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            failures: self.failures,
            device: self.settings.device.clone(),
        }
    }
}
