//! PBR map synthesis from grain and grayscale.
//!
//! Normal maps follow the glTF tangent-space convention: +X points right,
//! +Y points up (towards row 0), +Z points out of the surface. Components
//! are packed as `n · 0.5 + 0.5`, so a flat surface is `(0.5, 0.5, 1.0)`.

use super::{gaussian_blur, GrayF32Image, Rgb32FImage};
use image::{Luma, Rgb};

/// Tangent-space normals from the central-difference gradient of a
/// height field, scaled by `strength`. Borders use one-sided neighbours.
#[must_use]
pub fn normal_map(height: &GrayF32Image, strength: f32) -> Rgb32FImage {
    let (w, h) = height.dimensions();
    let at = |x: i64, y: i64| {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let (cx, cy) = (x.clamp(0, i64::from(w) - 1) as u32, y.clamp(0, i64::from(h) - 1) as u32);
        height.get_pixel(cx, cy).0[0]
    };
    Rgb32FImage::from_fn(w, h, |x, y| {
        let (x, y) = (i64::from(x), i64::from(y));
        let dx = (at(x + 1, y) - at(x - 1, y)) * 0.5;
        // Rows grow downwards; the +Y axis points up.
        let dy_up = (at(x, y - 1) - at(x, y + 1)) * 0.5;
        let n = [-dx * strength, -dy_up * strength, 1.0];
        let len = (n[0] * n[0] + n[1] * n[1] + n[2] * n[2]).sqrt();
        Rgb(n.map(|c| c / len * 0.5 + 0.5))
    })
}

/// Local standard deviation `sqrt(blur(g²) − blur(g)²)` mapped linearly
/// into `[min, max]`; deviations at or above `reference` saturate at `max`.
#[must_use]
pub fn roughness_map(gray: &GrayF32Image, sigma: f32, min: f32, max: f32, reference: f32) -> GrayF32Image {
    let squared = GrayF32Image::from_fn(gray.width(), gray.height(), |x, y| {
        let v = gray.get_pixel(x, y).0[0];
        Luma([v * v])
    });
    let mean = gaussian_blur(gray, sigma);
    let mean_sq = gaussian_blur(&squared, sigma);
    let reference = reference.max(f32::EPSILON);
    GrayF32Image::from_fn(gray.width(), gray.height(), |x, y| {
        let m = mean.get_pixel(x, y).0[0];
        let variance = (mean_sq.get_pixel(x, y).0[0] - m * m).max(0.0);
        let t = (variance.sqrt() / reference).clamp(0.0, 1.0);
        Luma([min + (max - min) * t])
    })
}

/// Cavity-style occlusion `1 − strength · blur(1 − gray, sigma)`.
#[must_use]
pub fn ambient_occlusion_map(gray: &GrayF32Image, sigma: f32, strength: f32) -> GrayF32Image {
    let cavity = GrayF32Image::from_fn(gray.width(), gray.height(), |x, y| {
        Luma([1.0 - gray.get_pixel(x, y).0[0]])
    });
    let blurred = gaussian_blur(&cavity, sigma);
    GrayF32Image::from_fn(gray.width(), gray.height(), |x, y| {
        Luma([1.0 - strength * blurred.get_pixel(x, y).0[0]])
    })
}
