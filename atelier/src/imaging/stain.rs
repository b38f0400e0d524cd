//! The wood-stain recolor pipeline.

use super::color::Lab;
use super::pbr::{ambient_occlusion_map, normal_map, roughness_map};
use super::{decompose, extract_grain, grayscale, GrayF32Image, Rgb32FImage};
use crate::cancellation::CancellationToken;
use crate::core::StainColor;
use crate::errors::{AtelierError, Result};
use image::Rgb;
use serde::{Deserialize, Serialize};

fn default_illumination_sigma() -> f32 {
    32.0
}

fn default_grain_sigma() -> f32 {
    2.0
}

fn default_normal_strength() -> f32 {
    4.0
}

fn default_roughness_sigma() -> f32 {
    3.0
}

fn default_roughness_min() -> f32 {
    0.35
}

fn default_roughness_max() -> f32 {
    0.85
}

fn default_roughness_reference() -> f32 {
    0.15
}

fn default_ao_sigma() -> f32 {
    8.0
}

fn default_ao_strength() -> f32 {
    0.5
}

/// Tunables of the stain pipeline. Sigmas are in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StainSettings {
    /// Blur applied to luminance to estimate illumination.
    #[serde(default = "default_illumination_sigma")]
    pub illumination_sigma: f32,
    /// Blur separating grain from base color.
    #[serde(default = "default_grain_sigma")]
    pub grain_sigma: f32,
    /// Height scale applied to grain before taking normals.
    #[serde(default = "default_normal_strength")]
    pub normal_strength: f32,
    /// Window of the local deviation behind roughness.
    #[serde(default = "default_roughness_sigma")]
    pub roughness_sigma: f32,
    /// Roughness of featureless regions.
    #[serde(default = "default_roughness_min")]
    pub roughness_min: f32,
    /// Roughness of strongly textured regions.
    #[serde(default = "default_roughness_max")]
    pub roughness_max: f32,
    /// Local deviation that maps to `roughness_max`.
    #[serde(default = "default_roughness_reference")]
    pub roughness_reference: f32,
    /// Blur of the cavity term.
    #[serde(default = "default_ao_sigma")]
    pub ao_sigma: f32,
    /// Depth of the occlusion.
    #[serde(default = "default_ao_strength")]
    pub ao_strength: f32,
}

impl Default for StainSettings {
    fn default() -> Self {
        Self {
            illumination_sigma: default_illumination_sigma(),
            grain_sigma: default_grain_sigma(),
            normal_strength: default_normal_strength(),
            roughness_sigma: default_roughness_sigma(),
            roughness_min: default_roughness_min(),
            roughness_max: default_roughness_max(),
            roughness_reference: default_roughness_reference(),
            ao_sigma: default_ao_sigma(),
            ao_strength: default_ao_strength(),
        }
    }
}

/// One stain request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StainParams {
    /// Target color.
    pub target: StainColor,
    /// Fraction of source chrominance kept, `[0, 1]`.
    pub preserve_grain: f32,
    /// Weight of reapplied grain, `[0, 1]`.
    pub strength: f32,
    /// Pipeline tunables.
    pub settings: StainSettings,
}

/// The rasters of a texture bundle, unclamped.
#[derive(Debug, Clone)]
pub struct StainMaps {
    /// Recolored albedo with grain.
    pub albedo: Rgb32FImage,
    /// Packed tangent-space normals.
    pub normal: Rgb32FImage,
    /// Roughness in `[roughness_min, roughness_max]`.
    pub roughness: GrayF32Image,
    /// Ambient occlusion.
    pub ambient_occlusion: GrayF32Image,
    /// Albedo relit with the source shading.
    pub preview: Rgb32FImage,
}

impl StainMaps {
    /// Shared dimensions of every map.
    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        self.albedo.dimensions()
    }
}

/// Moves each pixel's `a, b` towards the target by `1 − preserve`,
/// keeping `L`. `preserve >= 1` returns the input untouched.
#[must_use]
pub fn recolor(albedo: &Rgb32FImage, target: Lab, preserve: f32) -> Rgb32FImage {
    if preserve >= 1.0 {
        return albedo.clone();
    }
    let pull = 1.0 - preserve;
    Rgb32FImage::from_fn(albedo.width(), albedo.height(), |x, y| {
        let mut lab = Lab::from_srgb(albedo.get_pixel(x, y).0);
        lab.a += (target.a - lab.a) * pull;
        lab.b += (target.b - lab.b) * pull;
        Rgb(lab.to_srgb())
    })
}

fn checkpoint(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(AtelierError::cancelled(
            cancel.reason().unwrap_or_else(|| "stain cancelled".to_string()),
        ));
    }
    Ok(())
}

/// Runs decomposition, recolor, grain reapplication and PBR synthesis.
///
/// `cancel` is polled between steps.
pub fn run_stain(image: &Rgb32FImage, params: &StainParams, cancel: &CancellationToken) -> Result<StainMaps> {
    let settings = &params.settings;
    let (w, h) = image.dimensions();
    if w == 0 || h == 0 {
        return Err(AtelierError::Image("source image has no pixels".to_string()));
    }

    let decomposition = decompose(image, settings.illumination_sigma);
    checkpoint(cancel)?;

    let grain = extract_grain(&decomposition.albedo, settings.grain_sigma);
    checkpoint(cancel)?;

    let target = Lab::from_srgb(params.target.to_unit());
    let recolored = recolor(&decomposition.albedo, target, params.preserve_grain);
    checkpoint(cancel)?;

    let albedo = Rgb32FImage::from_fn(w, h, |x, y| {
        let g = params.strength * grain.get_pixel(x, y).0[0];
        Rgb(recolored.get_pixel(x, y).0.map(|c| c + g))
    });
    checkpoint(cancel)?;

    let source_gray = grayscale(image);
    let normal = normal_map(&grain, settings.normal_strength);
    let roughness = roughness_map(
        &source_gray,
        settings.roughness_sigma,
        settings.roughness_min,
        settings.roughness_max,
        settings.roughness_reference,
    );
    let ambient_occlusion = ambient_occlusion_map(&source_gray, settings.ao_sigma, settings.ao_strength);
    checkpoint(cancel)?;

    let preview = Rgb32FImage::from_fn(w, h, |x, y| {
        let s = decomposition.shading.get_pixel(x, y).0[0];
        Rgb(albedo.get_pixel(x, y).0.map(|c| c * s))
    });

    Ok(StainMaps {
        albedo,
        normal,
        roughness,
        ambient_occlusion,
        preview,
    })
}
