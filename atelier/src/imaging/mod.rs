//! Pure raster algorithms behind the segmentation and stain stages.
//!
//! Everything here is synchronous and allocation-owning; stages run it on
//! the blocking pool. Intermediate buffers are `f32` and are clamped only
//! when encoded.

mod blur;
pub mod codec;
pub mod color;
mod decompose;
mod grain;
mod mask;
pub mod pbr;
mod stain;

pub use blur::gaussian_blur;
pub use decompose::{decompose, luminance, Decomposition};
pub use grain::{extract_grain, grayscale};
pub use mask::rasterize_mask;
pub use stain::{run_stain, StainMaps, StainParams, StainSettings};

use image::{ImageBuffer, Luma};

/// Single-channel `f32` raster.
pub type GrayF32Image = ImageBuffer<Luma<f32>, Vec<f32>>;

/// Three-channel `f32` raster, sRGB-encoded values nominally in `[0, 1]`.
pub use image::Rgb32FImage;

/// Guard against division by vanishing shading.
pub const SHADING_EPSILON: f32 = 1e-3;
