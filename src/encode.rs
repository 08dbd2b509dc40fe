//! Raw frame → upload payload.
//!
//! The encoder always emits the configured output resolution, resampling when
//! the device delivers something else, so the detection service sees a fixed
//! raster size regardless of camera.

use anyhow::{anyhow, Result};
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::imageops::FilterType;
use image::{ExtendedColorType, ImageEncoder, RgbImage};
use serde::Deserialize;

use crate::error::PipelineError;
use crate::frame::{EncodedFrame, RawFrame};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    #[default]
    Png,
    Jpeg,
}

impl ImageFormat {
    pub fn mime_type(self) -> &'static str {
        match self {
            ImageFormat::Png => "image/png",
            ImageFormat::Jpeg => "image/jpeg",
        }
    }
}

impl std::str::FromStr for ImageFormat {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "png" => Ok(ImageFormat::Png),
            "jpeg" | "jpg" => Ok(ImageFormat::Jpeg),
            other => Err(anyhow!("unsupported image format '{}'", other)),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EncoderConfig {
    pub width: u32,
    pub height: u32,
    pub format: ImageFormat,
    /// JPEG quality, 1-100. Ignored for PNG.
    pub jpeg_quality: u8,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            format: ImageFormat::Png,
            jpeg_quality: 85,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct FrameEncoder {
    config: EncoderConfig,
}

impl FrameEncoder {
    pub fn new(config: EncoderConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> EncoderConfig {
        self.config
    }

    /// Encode `frame` at the configured resolution.
    ///
    /// Fails with `PipelineError::EncodeError` when the frame buffer is gone
    /// or incomplete; only that frame is lost.
    pub fn encode(&self, frame: &RawFrame) -> Result<EncodedFrame, PipelineError> {
        if !frame.is_available() {
            return Err(PipelineError::EncodeError(
                "source frame is no longer available".to_string(),
            ));
        }
        let source = RgbImage::from_raw(frame.width, frame.height, frame.pixels().to_vec())
            .ok_or_else(|| PipelineError::EncodeError("frame buffer size mismatch".to_string()))?;

        let (width, height) = (self.config.width, self.config.height);
        let raster = if source.dimensions() == (width, height) {
            source
        } else {
            image::imageops::resize(&source, width, height, FilterType::Triangle)
        };

        let mut payload = Vec::new();
        let written = match self.config.format {
            ImageFormat::Png => PngEncoder::new(&mut payload).write_image(
                raster.as_raw(),
                width,
                height,
                ExtendedColorType::Rgb8,
            ),
            ImageFormat::Jpeg => {
                JpegEncoder::new_with_quality(&mut payload, self.config.jpeg_quality.clamp(1, 100))
                    .write_image(raster.as_raw(), width, height, ExtendedColorType::Rgb8)
            }
        };
        written.map_err(|err| PipelineError::EncodeError(err.to_string()))?;

        Ok(EncodedFrame {
            payload,
            mime_type: self.config.format.mime_type(),
            width,
            height,
        })
    }
}
