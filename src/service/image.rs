//! Upload normalisation before the image goes upstream.
//!
//! Every upload is decoded, flattened onto white, fitted within
//! 640x480 and re-encoded as JPEG. If the base64 form is still over the
//! upstream inline limit, the raster is shrunk by `sqrt(limit / size)` and
//! encoded once more.

use anyhow::{Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ExtendedColorType, ImageEncoder, Rgb, RgbImage};

pub const MAX_WIDTH: u32 = 640;
pub const MAX_HEIGHT: u32 = 480;
pub const JPEG_QUALITY: u8 = 85;

pub fn prepare_upload(data: &[u8], max_base64_bytes: usize) -> Result<Vec<u8>> {
    let decoded = image::load_from_memory(data).context("decode uploaded image")?;
    let flat = flatten_onto_white(&decoded);

    let (width, height) = fit_within(flat.dimensions(), (MAX_WIDTH, MAX_HEIGHT));
    let raster = resize_to(flat, width, height);
    let jpeg = encode_jpeg(&raster)?;

    let encoded_len = base64_len(jpeg.len());
    if encoded_len <= max_base64_bytes {
        return Ok(jpeg);
    }

    let scale = (max_base64_bytes as f64 / encoded_len as f64).sqrt();
    let scaled_width = ((width as f64 * scale) as u32).max(1);
    let scaled_height = ((height as f64 * scale) as u32).max(1);
    log::debug!(
        "image: {} base64 bytes over limit {}, scaling {}x{} -> {}x{}",
        encoded_len,
        max_base64_bytes,
        width,
        height,
        scaled_width,
        scaled_height
    );
    encode_jpeg(&resize_to(raster, scaled_width, scaled_height))
}

/// Length of the padded base64 form of `len` bytes.
pub fn base64_len(len: usize) -> usize {
    len.div_ceil(3) * 4
}

/// Largest size within `bounds` that keeps the aspect ratio. Never upscales.
pub fn fit_within((width, height): (u32, u32), (max_width, max_height): (u32, u32)) -> (u32, u32) {
    if width <= max_width && height <= max_height {
        return (width, height);
    }
    let scale = f64::min(
        max_width as f64 / width as f64,
        max_height as f64 / height as f64,
    );
    (
        ((width as f64 * scale).round() as u32).clamp(1, max_width),
        ((height as f64 * scale).round() as u32).clamp(1, max_height),
    )
}

fn flatten_onto_white(image: &DynamicImage) -> RgbImage {
    if !image.color().has_alpha() {
        return image.to_rgb8();
    }
    let rgba = image.to_rgba8();
    RgbImage::from_fn(rgba.width(), rgba.height(), |x, y| {
        let [r, g, b, a] = rgba.get_pixel(x, y).0;
        let blend = |c: u8| ((c as u32 * a as u32 + 255 * (255 - a as u32)) / 255) as u8;
        Rgb([blend(r), blend(g), blend(b)])
    })
}

fn resize_to(raster: RgbImage, width: u32, height: u32) -> RgbImage {
    if raster.dimensions() == (width, height) {
        return raster;
    }
    image::imageops::resize(&raster, width, height, FilterType::Lanczos3)
}

fn encode_jpeg(raster: &RgbImage) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY)
        .write_image(
            raster.as_raw(),
            raster.width(),
            raster.height(),
            ExtendedColorType::Rgb8,
        )
        .context("encode jpeg")?;
    Ok(out)
}
