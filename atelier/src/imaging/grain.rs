//! Wood grain extraction.

use super::{gaussian_blur, luminance, GrayF32Image, Rgb32FImage};
use image::Luma;

/// Grayscale of an RGB raster.
#[must_use]
pub fn grayscale(image: &Rgb32FImage) -> GrayF32Image {
    luminance(image)
}

/// High-pass detail `gray(albedo) − blur(gray(albedo), sigma)`.
#[must_use]
pub fn extract_grain(albedo: &Rgb32FImage, sigma: f32) -> GrayF32Image {
    let gray = grayscale(albedo);
    let low = gaussian_blur(&gray, sigma);
    GrayF32Image::from_fn(gray.width(), gray.height(), |x, y| {
        Luma([gray.get_pixel(x, y).0[0] - low.get_pixel(x, y).0[0]])
    })
}
