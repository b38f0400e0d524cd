//! Decoding source photographs and encoding output rasters.
//!
//! This is the only place `f32` rasters are clamped.

use super::{GrayF32Image, Rgb32FImage};
use crate::errors::{AtelierError, UpstreamError};
use image::codecs::gif::{GifEncoder, Repeat};
use image::imageops::FilterType;
use image::{Delay, DynamicImage, Frame, GrayImage, ImageFormat, Luma, Rgb, RgbImage, RgbaImage};
use std::io::Cursor;

/// PNG MIME type.
pub const PNG: &str = "image/png";

/// GIF MIME type.
pub const GIF: &str = "image/gif";

/// Decodes an encoded photograph into an `f32` RGB raster.
pub fn decode_rgb(bytes: &[u8], location: &str) -> Result<Rgb32FImage, UpstreamError> {
    image::load_from_memory(bytes)
        .map(|img| img.to_rgb32f())
        .map_err(|e| UpstreamError::Decode {
            location: location.to_string(),
            message: e.to_string(),
        })
}

/// Reads only the pixel dimensions of an encoded image.
pub fn dimensions(bytes: &[u8], location: &str) -> Result<(u32, u32), UpstreamError> {
    image::ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| UpstreamError::Decode {
            location: location.to_string(),
            message: e.to_string(),
        })?
        .into_dimensions()
        .map_err(|e| UpstreamError::Decode {
            location: location.to_string(),
            message: e.to_string(),
        })
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn quantize(v: f32) -> u8 {
    if v.is_nan() {
        return 0;
    }
    (v.clamp(0.0, 1.0) * 255.0).round() as u8
}

/// Clamps and quantizes an RGB raster.
#[must_use]
pub fn to_rgb8(image: &Rgb32FImage) -> RgbImage {
    RgbImage::from_fn(image.width(), image.height(), |x, y| {
        Rgb(image.get_pixel(x, y).0.map(quantize))
    })
}

/// Clamps and quantizes a grayscale raster.
#[must_use]
pub fn to_gray8(image: &GrayF32Image) -> GrayImage {
    GrayImage::from_fn(image.width(), image.height(), |x, y| {
        Luma([quantize(image.get_pixel(x, y).0[0])])
    })
}

fn encode(image: DynamicImage, format: ImageFormat) -> Result<Vec<u8>, AtelierError> {
    let mut buffer = Cursor::new(Vec::new());
    image.write_to(&mut buffer, format)?;
    Ok(buffer.into_inner())
}

/// Encodes an RGB raster as PNG.
pub fn encode_rgb_png(image: &Rgb32FImage) -> Result<Vec<u8>, AtelierError> {
    encode(DynamicImage::ImageRgb8(to_rgb8(image)), ImageFormat::Png)
}

/// Encodes a grayscale raster as PNG.
pub fn encode_gray_png(image: &GrayF32Image) -> Result<Vec<u8>, AtelierError> {
    encode(DynamicImage::ImageLuma8(to_gray8(image)), ImageFormat::Png)
}

/// Encodes an 8-bit mask as PNG.
pub fn encode_mask_png(mask: &GrayImage) -> Result<Vec<u8>, AtelierError> {
    encode(DynamicImage::ImageLuma8(mask.clone()), ImageFormat::Png)
}

/// Builds a looping GIF from encoded frames, downscaled to `width` (never
/// upscaled) with aspect kept. Frames are written in the given order.
pub fn encode_animation(frames: &[Vec<u8>], width: u32, fps: u32) -> Result<Vec<u8>, AtelierError> {
    let delay = Delay::from_numer_denom_ms(1000, fps.max(1));
    let mut out = Vec::new();
    {
        let mut encoder = GifEncoder::new_with_speed(&mut out, 10);
        encoder.set_repeat(Repeat::Infinite)?;
        for bytes in frames {
            let frame = image::load_from_memory(bytes)?;
            let frame = if frame.width() > width && width > 0 {
                let height = (u64::from(frame.height()) * u64::from(width) / u64::from(frame.width())).max(1);
                let height = u32::try_from(height).map_err(|e| AtelierError::Image(e.to_string()))?;
                frame.resize_exact(width, height, FilterType::Triangle)
            } else {
                frame
            };
            let rgba: RgbaImage = frame.to_rgba8();
            encoder.encode_frame(Frame::from_parts(rgba, 0, 0, delay))?;
        }
    }
    Ok(out)
}
