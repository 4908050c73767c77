use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageEncoder, RgbImage};
use serde::{Deserialize, Serialize};

use crate::error::SkipReason;

/// Compressed image format of published frames.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncodedFormat {
    #[default]
    Png,
    Jpeg,
}

impl EncodedFormat {
    pub fn content_type(self) -> &'static str {
        match self {
            EncodedFormat::Png => "image/png",
            EncodedFormat::Jpeg => "image/jpeg",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            EncodedFormat::Png => "png",
            EncodedFormat::Jpeg => "jpg",
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct FrameEncoder {
    format: EncodedFormat,
    jpeg_quality: u8,
}

impl FrameEncoder {
    pub fn new(format: EncodedFormat, jpeg_quality: u8) -> Self {
        Self {
            format,
            jpeg_quality: jpeg_quality.clamp(1, 100),
        }
    }

    pub fn format(&self) -> EncodedFormat {
        self.format
    }

    pub fn encode(&self, image: &RgbImage) -> Result<Vec<u8>, SkipReason> {
        let mut buffer = Vec::with_capacity(image.as_raw().len() / 4);
        let (width, height) = image.dimensions();
        let result = match self.format {
            EncodedFormat::Png => PngEncoder::new(&mut buffer).write_image(
                image.as_raw(),
                width,
                height,
                ExtendedColorType::Rgb8,
            ),
            EncodedFormat::Jpeg => JpegEncoder::new_with_quality(&mut buffer, self.jpeg_quality)
                .write_image(image.as_raw(), width, height, ExtendedColorType::Rgb8),
        };
        result.map_err(|err| {
            SkipReason::EncodeFailure(format!("{}: {err}", self.format.extension()))
        })?;
        Ok(buffer)
    }
}

impl Default for FrameEncoder {
    fn default() -> Self {
        Self::new(EncodedFormat::Png, 85)
    }
}
