//! Intrinsic decomposition into shading and albedo.

use super::{gaussian_blur, GrayF32Image, Rgb32FImage, SHADING_EPSILON};
use image::{Luma, Rgb};

/// Shading and reflectance estimated from one photograph.
#[derive(Debug, Clone)]
pub struct Decomposition {
    /// Low-frequency illumination normalized to mean 1.
    pub shading: GrayF32Image,
    /// `image / max(shading, ε)`.
    pub albedo: Rgb32FImage,
}

/// Rec. 709 luma of each pixel.
#[must_use]
pub fn luminance(image: &Rgb32FImage) -> GrayF32Image {
    GrayF32Image::from_fn(image.width(), image.height(), |x, y| {
        let Rgb([r, g, b]) = *image.get_pixel(x, y);
        Luma([0.2126 * r + 0.7152 * g + 0.0722 * b])
    })
}

/// Splits `image` into shading and albedo.
///
/// Illumination is the luminance blurred at `illumination_sigma`; dividing
/// by its mean makes the shading estimate dimensionless. A black image has
/// no usable illumination and gets unit shading.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn decompose(image: &Rgb32FImage, illumination_sigma: f32) -> Decomposition {
    let illumination = gaussian_blur(&luminance(image), illumination_sigma);
    let count = illumination.pixels().len().max(1) as f64;
    let mean = illumination.pixels().map(|p| f64::from(p.0[0])).sum::<f64>() / count;

    #[allow(clippy::cast_possible_truncation)]
    let mean = mean as f32;
    let shading = if mean > SHADING_EPSILON {
        GrayF32Image::from_fn(image.width(), image.height(), |x, y| {
            Luma([illumination.get_pixel(x, y).0[0] / mean])
        })
    } else {
        GrayF32Image::from_pixel(image.width(), image.height(), Luma([1.0]))
    };

    let albedo = Rgb32FImage::from_fn(image.width(), image.height(), |x, y| {
        let s = shading.get_pixel(x, y).0[0].max(SHADING_EPSILON);
        let Rgb(px) = *image.get_pixel(x, y);
        Rgb(px.map(|c| c / s))
    });

    Decomposition { shading, albedo }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniform_image_has_unit_shading() {
        let image = Rgb32FImage::from_pixel(12, 8, Rgb([0.6, 0.4, 0.2]));
        let d = decompose(&image, 4.0);
        assert!(d.shading.pixels().all(|p| (p.0[0] - 1.0).abs() < 1e-3));
        let Rgb(px) = *d.albedo.get_pixel(3, 3);
        assert!((px[0] - 0.6).abs() < 1e-3);
    }

    #[test]
    fn test_gradient_lighting_is_flattened() {
        // Same material, lit brighter on the right.
        let image = Rgb32FImage::from_fn(64, 8, |x, _| {
            let light = 0.5 + x as f32 / 64.0;
            Rgb([0.5 * light, 0.3 * light, 0.2 * light])
        });
        let d = decompose(&image, 8.0);
        let left = d.albedo.get_pixel(16, 4).0[0];
        let right = d.albedo.get_pixel(48, 4).0[0];
        let raw_ratio = image.get_pixel(48, 4).0[0] / image.get_pixel(16, 4).0[0];
        assert!(right / left < raw_ratio);
    }

    #[test]
    fn test_black_image_does_not_divide_by_zero() {
        let image = Rgb32FImage::from_pixel(4, 4, Rgb([0.0, 0.0, 0.0]));
        let d = decompose(&image, 2.0);
        assert!(d.albedo.pixels().all(|p| p.0.iter().all(|c| c.is_finite())));
    }
}
