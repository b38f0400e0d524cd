//! Component segmentation.

use super::{blocking, Stage, StageContext};
use crate::core::{Detection, SegmentInput, SegmentationOutput};
use crate::errors::{Result, UpstreamError};
use crate::imaging::{codec, rasterize_mask};
use crate::vision::DetectionOptions;
use async_trait::async_trait;
use tracing::{debug, warn};

/// Finds furniture components in every image and uploads one binary mask
/// per detection.
#[derive(Debug, Clone, Copy, Default)]
pub struct SegmentStage;

impl SegmentStage {
    /// Creates the stage.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

fn clamp_confidence(c: f32) -> f32 {
    if c.is_nan() {
        0.0
    } else {
        c.clamp(0.0, 1.0)
    }
}

#[async_trait]
impl Stage for SegmentStage {
    type Input = SegmentInput;
    type Output = SegmentationOutput;

    fn name(&self) -> &'static str {
        "segment"
    }

    async fn execute(&self, ctx: &StageContext, input: &SegmentInput) -> Result<SegmentationOutput> {
        let vision = ctx.ports.vision()?;
        let options = DetectionOptions::from(input.detectors);
        let mut detections = Vec::new();

        for (image_index, image) in input.images.iter().enumerate() {
            ctx.checkpoint()?;
            let bytes = ctx.download(&image.url).await?;
            let (width, height) = codec::dimensions(&bytes, &image.url)?;

            ctx.usage.add_external_call();
            let regions = vision.detect_components(&bytes, options).await?;
            debug!(job_id = %ctx.job_id, image_index, regions = regions.len(), "Regions detected");

            for (region_index, region) in regions.into_iter().enumerate() {
                let Some(clip) = region.bbox.clip(width, height) else {
                    warn!(
                        job_id = %ctx.job_id,
                        image_index,
                        label = %region.label,
                        bbox = ?region.bbox,
                        "Skipping region outside the image"
                    );
                    continue;
                };
                let png = blocking(move || codec::encode_mask_png(&rasterize_mask(width, height, clip))).await?;
                ctx.usage.add_pixels(u64::from(width) * u64::from(height));
                let mask = ctx
                    .upload(
                        &format!("mask_{image_index:03}_{region_index:03}.png"),
                        png,
                        codec::PNG,
                    )
                    .await?;

                detections.push(Detection {
                    image_index,
                    label: region.label,
                    confidence: clamp_confidence(region.confidence),
                    material: region.material.filter(|_| options.materials),
                    bbox: region.bbox,
                    mask,
                });
            }
        }

        if detections.is_empty() {
            return Err(UpstreamError::NoComponentsDetected {
                images: input.images.len(),
            }
            .into());
        }
        Ok(SegmentationOutput::new(detections))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{BoundingBox, DetectorFlags, ImageSet, JobId, JobType};
    use crate::errors::AtelierError;
    use crate::stages::StagePorts;
    use crate::store::{ArtifactStore, InMemoryArtifactStore, InMemoryJobStore};
    use crate::testing::{solid_png, ScriptedVisionService};
    use crate::vision::{MockVisionService, RegionDetection};
    use std::sync::Arc;

    fn setup(vision: Arc<dyn crate::vision::VisionService>) -> (StageContext, Arc<InMemoryArtifactStore>) {
        let artifacts = Arc::new(InMemoryArtifactStore::new());
        artifacts.insert("src/a.png", solid_png(40, 30, [200, 170, 120]), codec::PNG);
        artifacts.insert("src/b.png", solid_png(20, 20, [200, 170, 120]), codec::PNG);
        let ports = StagePorts::new(Arc::new(InMemoryJobStore::new()), artifacts.clone()).with_vision(vision);
        (StageContext::new(JobId::new(), JobType::Segment, ports), artifacts)
    }

    fn input(flags: DetectorFlags) -> SegmentInput {
        SegmentInput {
            images: ImageSet::from_urls(["mem://src/a.png", "mem://src/b.png"]),
            detectors: flags,
        }
    }

    #[tokio::test]
    async fn test_masks_match_source_dimensions() {
        let vision = ScriptedVisionService::new()
            .with_regions(vec![
                RegionDetection::new("seat", BoundingBox::new(5.0, 5.0, 10.0, 10.0), 1.4).with_material("oak"),
                RegionDetection::new("leg", BoundingBox::new(100.0, 100.0, 5.0, 5.0), 0.9),
            ])
            .with_regions(vec![RegionDetection::new("leg", BoundingBox::new(0.0, 0.0, 4.0, 12.0), -0.1)]);
        let (ctx, artifacts) = setup(Arc::new(vision));

        let output = SegmentStage::new()
            .execute(&ctx, &input(DetectorFlags::default()))
            .await
            .unwrap();

        assert_eq!(output.detections.len(), 2);
        assert_eq!(output.components, vec!["seat", "leg"]);

        let seat = &output.detections[0];
        assert_eq!(seat.confidence, 1.0);
        assert_eq!(seat.material.as_deref(), Some("oak"));
        let mask = artifacts.get(&seat.mask.url).await.unwrap();
        assert_eq!(codec::dimensions(&mask, "m").unwrap(), (40, 30));

        let leg = &output.detections[1];
        assert_eq!(leg.image_index, 1);
        assert_eq!(leg.confidence, 0.0);
        let mask = artifacts.get(&leg.mask.url).await.unwrap();
        assert_eq!(codec::dimensions(&mask, "m").unwrap(), (20, 20));
        assert!(leg.mask.url.contains(&format!("jobs/{}/segment/", ctx.job_id)));
    }

    #[tokio::test]
    async fn test_materials_dropped_when_detection_off() {
        let vision = ScriptedVisionService::new().with_regions(vec![
            RegionDetection::new("seat", BoundingBox::new(0.0, 0.0, 5.0, 5.0), 0.7).with_material("walnut"),
        ]);
        let (ctx, _) = setup(Arc::new(vision));
        let flags = DetectorFlags {
            components: true,
            materials: false,
        };
        let output = SegmentStage::new().execute(&ctx, &input(flags)).await.unwrap();
        assert!(output.detections.iter().all(|d| d.material.is_none()));
    }

    #[tokio::test]
    async fn test_zero_regions_is_upstream_failure() {
        let mut mock = MockVisionService::new();
        mock.expect_detect_components().times(2).returning(|_, _| Ok(vec![]));
        let (ctx, _) = setup(Arc::new(mock));

        let err = SegmentStage::new()
            .execute(&ctx, &input(DetectorFlags::default()))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AtelierError::Upstream(UpstreamError::NoComponentsDetected { images: 2 })
        ));
    }

    #[tokio::test]
    async fn test_service_failure_propagates() {
        let mut mock = MockVisionService::new();
        mock.expect_detect_components()
            .returning(|_, _| Err(UpstreamError::service("detect_components", "503")));
        let (ctx, _) = setup(Arc::new(mock));

        let err = SegmentStage::new()
            .execute(&ctx, &input(DetectorFlags::default()))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("503"));
    }
}
