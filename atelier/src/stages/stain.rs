//! Wood-stain recolor with PBR map generation.

use super::{blocking, Stage, StageContext};
use crate::core::{MapKind, StainInput, TextureBundle, TextureMap};
use crate::errors::{AtelierError, Result, ValidationError};
use crate::imaging::{codec, run_stain, StainParams, StainSettings};
use async_trait::async_trait;
use tracing::debug;

/// Recolors the first image of the set towards a stain color and derives
/// albedo, normal, roughness, occlusion and preview maps.
#[derive(Debug, Clone, Default)]
pub struct StainStage {
    settings: StainSettings,
}

impl StainStage {
    /// Creates the stage with the given tunables.
    #[must_use]
    pub fn new(settings: StainSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl Stage for StainStage {
    type Input = StainInput;
    type Output = TextureBundle;

    fn name(&self) -> &'static str {
        "stain"
    }

    async fn execute(&self, ctx: &StageContext, input: &StainInput) -> Result<TextureBundle> {
        let source = input.images.first().ok_or(ValidationError::EmptyImageSet)?;
        let bytes = ctx.download(&source.url).await?;
        let location = source.url.clone();
        let image = blocking(move || Ok(codec::decode_rgb(&bytes, &location)?)).await?;
        let (width, height) = image.dimensions();
        ctx.checkpoint()?;

        let params = StainParams {
            target: input.target_color,
            preserve_grain: input.preserve_grain,
            strength: input.strength,
            settings: self.settings,
        };
        let cancel = ctx.cancel.clone();
        let maps = blocking(move || run_stain(&image, &params, &cancel)).await?;
        ctx.usage.add_pixels(u64::from(width) * u64::from(height));
        ctx.checkpoint()?;

        let encoded = blocking(move || {
            Ok(vec![
                (MapKind::Albedo, codec::encode_rgb_png(&maps.albedo)?),
                (MapKind::Normal, codec::encode_rgb_png(&maps.normal)?),
                (MapKind::Roughness, codec::encode_gray_png(&maps.roughness)?),
                (MapKind::AmbientOcclusion, codec::encode_gray_png(&maps.ambient_occlusion)?),
                (MapKind::Preview, codec::encode_rgb_png(&maps.preview)?),
            ])
        })
        .await?;

        let mut uploaded = Vec::with_capacity(encoded.len());
        for (kind, png) in encoded {
            let artifact = ctx.upload(kind.file_name(), png, codec::PNG).await?;
            uploaded.push(TextureMap {
                kind,
                width,
                height,
                artifact,
            });
        }
        debug!(job_id = %ctx.job_id, width, height, target = %input.target_color, "Texture bundle uploaded");

        TextureBundle::assemble(width, height, uploaded).map_err(AtelierError::Internal)
    }
}
