//! Network camera over HTTP MJPEG (e.g. an Android "IP Webcam" app).
//!
//! A `multipart/*` response is read as a continuous stream; any other
//! content type is treated as a single-JPEG snapshot endpoint and polled.

use anyhow::{anyhow, Context, Result};
use std::io::Read;
use std::time::{Duration, Instant};

use url::Url;

use super::{health_grace, FrameSource, SourceStats};
use crate::config::CameraSettings;
use crate::error::FrameUnavailable;
use crate::frame::Frame;

const MAX_JPEG_BYTES: usize = 5 * 1024 * 1024;
const READ_CHUNK: usize = 8192;

pub struct MjpegSource {
    url: String,
    target_fps: u32,
    stream: Option<HttpStream>,
    connected_at: Option<Instant>,
    last_frame_at: Option<Instant>,
    frame_count: u64,
    failures: u64,
    last_error: Option<String>,
}

enum HttpStream {
    Multipart(JpegStream),
    Snapshot,
}

impl MjpegSource {
    pub fn new(settings: &CameraSettings) -> Result<Self> {
        let url = Url::parse(settings.device.trim()).context("parse camera url")?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(anyhow!(
                "unsupported camera scheme '{}'; expected http(s)",
                url.scheme()
            ));
        }
        Ok(Self {
            url: url.to_string(),
            target_fps: settings.target_fps,
            stream: None,
            connected_at: None,
            last_frame_at: None,
            frame_count: 0,
            failures: 0,
            last_error: None,
        })
    }

    fn read_jpeg(&mut self) -> Result<Vec<u8>> {
        match self.stream.as_mut() {
            Some(HttpStream::Multipart(stream)) => stream.read_next_jpeg(),
            Some(HttpStream::Snapshot) => fetch_single_jpeg(&self.url),
            None => Err(anyhow!("mjpeg source not connected")),
        }
    }

    fn fail(&mut self, err: anyhow::Error) -> FrameUnavailable {
        self.failures += 1;
        self.last_error = Some(format!("{err:#}"));
        FrameUnavailable::from(err)
    }
}

impl FrameSource for MjpegSource {
    fn connect(&mut self) -> Result<()> {
        let response = ureq::get(&self.url)
            .timeout(Duration::from_secs(10))
            .call()
            .with_context(|| format!("connect to mjpeg stream {}", self.url))?;
        let content_type = response.header("Content-Type").unwrap_or("").to_lowercase();
        self.stream = Some(if content_type.contains("multipart") {
            HttpStream::Multipart(JpegStream::new(response.into_reader()))
        } else {
            HttpStream::Snapshot
        });
        self.connected_at = Some(Instant::now());
        self.last_error = None;
        log::info!("MjpegSource: connected to {} ({})", self.url, content_type);
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Frame, FrameUnavailable> {
        let jpeg = match self.read_jpeg() {
            Ok(jpeg) => jpeg,
            Err(err) => return Err(self.fail(err)),
        };
        let image = match image::load_from_memory(&jpeg).context("decode jpeg") {
            Ok(image) => image.into_rgb8(),
            Err(err) => return Err(self.fail(err)),
        };
        self.frame_count += 1;
        self.last_frame_at = Some(Instant::now());
        self.last_error = None;
        Ok(Frame::new(image))
    }

    fn is_healthy(&self) -> bool {
        if self.last_error.is_some() {
            return false;
        }
        let Some(connected_at) = self.connected_at else {
            return false;
        };
        let Some(last_frame_at) = self.last_frame_at else {
            return connected_at.elapsed() <= Duration::from_secs(5);
        };
        last_frame_at.elapsed() <= health_grace(self.target_fps)
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            failures: self.failures,
            device: self.url.clone(),
        }
    }
}

struct JpegStream {
    reader: Box<dyn Read + Send>,
    buffer: Vec<u8>,
}

impl JpegStream {
    fn new(reader: Box<dyn Read + Send>) -> Self {
        Self {
            reader,
            buffer: Vec::with_capacity(64 * 1024),
        }
    }

    fn read_next_jpeg(&mut self) -> Result<Vec<u8>> {
        let mut chunk = vec![0u8; READ_CHUNK];
        loop {
            if let Some((start, end)) = find_jpeg_bounds(&self.buffer) {
                let frame = self.buffer[start..end].to_vec();
                self.buffer.drain(..end);
                return Ok(frame);
            }

            let read = self.reader.read(&mut chunk).context("read mjpeg chunk")?;
            if read == 0 {
                return Err(anyhow!("mjpeg stream ended"));
            }
            self.buffer.extend_from_slice(&chunk[..read]);

            if self.buffer.len() > MAX_JPEG_BYTES * 2 {
                let drain_len = self.buffer.len() - 2;
                self.buffer.drain(..drain_len);
            }
        }
    }
}

fn fetch_single_jpeg(url: &str) -> Result<Vec<u8>> {
    let response = ureq::get(url)
        .call()
        .with_context(|| format!("fetch jpeg snapshot from {}", url))?;
    let mut bytes = Vec::new();
    response
        .into_reader()
        .take(MAX_JPEG_BYTES as u64)
        .read_to_end(&mut bytes)
        .context("read jpeg snapshot")?;
    if bytes.is_empty() {
        return Err(anyhow!("empty jpeg snapshot"));
    }
    Ok(bytes)
}

/// Locate the first complete SOI..EOI span.
fn find_jpeg_bounds(buffer: &[u8]) -> Option<(usize, usize)> {
    let start = buffer.windows(2).position(|w| w == [0xFF, 0xD8])?;
    let end = buffer[start + 2..]
        .windows(2)
        .position(|w| w == [0xFF, 0xD9])?;
    Some((start, start + 2 + end + 2))
}
