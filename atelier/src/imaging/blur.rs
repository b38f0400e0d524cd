//! Gaussian blur on `f32` rasters.

use super::GrayF32Image;

/// Blurs a single-channel raster.
///
/// Non-positive sigma returns the image unchanged.
#[must_use = "returns the blurred image"]
pub fn gaussian_blur(image: &GrayF32Image, sigma: f32) -> GrayF32Image {
    if sigma <= 0.0 {
        return image.clone();
    }
    image::imageops::blur(image, sigma)
}
