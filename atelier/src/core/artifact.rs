//! Artifact records: source image sets and the outputs stages produce.
//!
//! Every output artifact is created once per successful job and never
//! edited afterwards; re-processing always yields a new job and a new
//! artifact.

use super::JobId;
use crate::errors::{UpstreamError, ValidationError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A single source photograph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceImage {
    /// Byte-addressable location of the image.
    pub url: String,
    /// Optional camera-angle label ("front", "left", "45deg"...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub angle: Option<String>,
}

impl SourceImage {
    /// Creates an image reference without an angle label.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            angle: None,
        }
    }

    /// Sets the camera-angle label.
    #[must_use]
    pub fn with_angle(mut self, angle: impl Into<String>) -> Self {
        self.angle = Some(angle.into());
        self
    }
}

/// Ordered images sharing one product context. Read-only to stages.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImageSet {
    images: Vec<SourceImage>,
}

impl ImageSet {
    /// Creates an image set from references.
    #[must_use]
    pub fn new(images: Vec<SourceImage>) -> Self {
        Self { images }
    }

    /// Creates a one-image set.
    #[must_use]
    pub fn single(url: impl Into<String>) -> Self {
        Self::new(vec![SourceImage::new(url)])
    }

    /// Creates a set from plain URLs.
    #[must_use]
    pub fn from_urls<I, S>(urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(urls.into_iter().map(SourceImage::new).collect())
    }

    /// Returns the authoritative first image.
    #[must_use]
    pub fn first(&self) -> Option<&SourceImage> {
        self.images.first()
    }

    /// Returns the number of images.
    #[must_use]
    pub fn len(&self) -> usize {
        self.images.len()
    }

    /// Returns true if the set has no images.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    /// Iterates over the images in order.
    pub fn iter(&self) -> std::slice::Iter<'_, SourceImage> {
        self.images.iter()
    }

    /// Rejects empty sets.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.is_empty() {
            Err(ValidationError::EmptyImageSet)
        } else {
            Ok(())
        }
    }
}

impl<'a> IntoIterator for &'a ImageSet {
    type Item = &'a SourceImage;
    type IntoIter = std::slice::Iter<'a, SourceImage>;

    fn into_iter(self) -> Self::IntoIter {
        self.images.iter()
    }
}

/// A reference to a blob held by the artifact store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    /// Location returned by the store.
    pub url: String,
    /// MIME type of the blob.
    pub content_type: String,
}

impl ArtifactRef {
    /// Creates a new artifact reference.
    #[must_use]
    pub fn new(url: impl Into<String>, content_type: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            content_type: content_type.into(),
        }
    }
}

/// An axis-aligned region in source-image pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    /// Left edge.
    pub x: f32,
    /// Top edge.
    pub y: f32,
    /// Width in pixels.
    pub width: f32,
    /// Height in pixels.
    pub height: f32,
}

impl BoundingBox {
    /// Creates a bounding box.
    #[must_use]
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Clips the box to an image of `width × height` pixels.
    ///
    /// Returns `(left, top, width, height)` in whole pixels, or `None` when
    /// nothing of the box remains inside the image.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
    pub fn clip(&self, width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
        if !(self.x.is_finite() && self.y.is_finite() && self.width > 0.0 && self.height > 0.0) {
            return None;
        }
        let left = self.x.floor().max(0.0);
        let top = self.y.floor().max(0.0);
        let right = (self.x + self.width).ceil().min(width as f32);
        let bottom = (self.y + self.height).ceil().min(height as f32);
        if right <= left || bottom <= top {
            return None;
        }
        Some((
            left as u32,
            top as u32,
            (right - left) as u32,
            (bottom - top) as u32,
        ))
    }
}

/// One detected furniture component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// Index of the source image in the set.
    pub image_index: usize,
    /// Component label ("leg", "seat", "backrest"...).
    pub label: String,
    /// Detector confidence in `[0, 1]`.
    pub confidence: f32,
    /// Material label when material detection ran.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub material: Option<String>,
    /// Region in source pixels.
    pub bbox: BoundingBox,
    /// Binary mask with the source image's dimensions.
    pub mask: ArtifactRef,
}

/// Output of the segmentation stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentationOutput {
    /// All detections, grouped by image in set order.
    pub detections: Vec<Detection>,
    /// Distinct component labels in first-seen order.
    pub components: Vec<String>,
}

impl SegmentationOutput {
    /// Builds the output and its deduplicated label summary.
    #[must_use]
    pub fn new(detections: Vec<Detection>) -> Self {
        let mut components: Vec<String> = Vec::new();
        for detection in &detections {
            if !components.iter().any(|c| c == &detection.label) {
                components.push(detection.label.clone());
            }
        }
        Self {
            detections,
            components,
        }
    }
}

/// The raster maps of a texture bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MapKind {
    /// Recolored base color.
    Albedo,
    /// Tangent-space normal map.
    Normal,
    /// Roughness map.
    Roughness,
    /// Ambient occlusion map.
    AmbientOcclusion,
    /// Lit preview composite.
    Preview,
}

impl MapKind {
    /// Every map kind, in bundle order.
    pub const ALL: [Self; 5] = [
        Self::Albedo,
        Self::Normal,
        Self::Roughness,
        Self::AmbientOcclusion,
        Self::Preview,
    ];

    /// File name used when the map is uploaded.
    #[must_use]
    pub fn file_name(&self) -> &'static str {
        match self {
            Self::Albedo => "albedo.png",
            Self::Normal => "normal.png",
            Self::Roughness => "roughness.png",
            Self::AmbientOcclusion => "ao.png",
            Self::Preview => "preview.png",
        }
    }
}

/// An uploaded map together with its pixel dimensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureMap {
    /// Which map this is.
    pub kind: MapKind,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Where the map was stored.
    pub artifact: ArtifactRef,
}

/// Output of the stain stage: co-registered maps of one size.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextureBundle {
    /// Shared width of every map.
    pub width: u32,
    /// Shared height of every map.
    pub height: u32,
    /// Recolored albedo.
    pub albedo: ArtifactRef,
    /// Normal map.
    pub normal: ArtifactRef,
    /// Roughness map.
    pub roughness: ArtifactRef,
    /// Ambient occlusion map.
    pub ambient_occlusion: ArtifactRef,
    /// Lit preview.
    pub preview: ArtifactRef,
}

impl TextureBundle {
    /// Assembles a bundle, enforcing that all five maps exist and share
    /// the expected dimensions.
    pub fn assemble(width: u32, height: u32, maps: Vec<TextureMap>) -> Result<Self, String> {
        let mut slots: [Option<ArtifactRef>; 5] = Default::default();
        for map in maps {
            if map.width != width || map.height != height {
                return Err(format!(
                    "{:?} map is {}x{}, bundle is {width}x{height}",
                    map.kind, map.width, map.height
                ));
            }
            let index = MapKind::ALL
                .iter()
                .position(|k| *k == map.kind)
                .unwrap_or_default();
            slots[index] = Some(map.artifact);
        }
        let [albedo, normal, roughness, ambient_occlusion, preview] = slots;
        let missing = |kind: MapKind| format!("{kind:?} map missing from bundle");
        Ok(Self {
            width,
            height,
            albedo: albedo.ok_or_else(|| missing(MapKind::Albedo))?,
            normal: normal.ok_or_else(|| missing(MapKind::Normal))?,
            roughness: roughness.ok_or_else(|| missing(MapKind::Roughness))?,
            ambient_occlusion: ambient_occlusion
                .ok_or_else(|| missing(MapKind::AmbientOcclusion))?,
            preview: preview.ok_or_else(|| missing(MapKind::Preview))?,
        })
    }

    /// Returns the map reference of the given kind.
    #[must_use]
    pub fn map(&self, kind: MapKind) -> &ArtifactRef {
        match kind {
            MapKind::Albedo => &self.albedo,
            MapKind::Normal => &self.normal,
            MapKind::Roughness => &self.roughness,
            MapKind::AmbientOcclusion => &self.ambient_occlusion,
            MapKind::Preview => &self.preview,
        }
    }
}

/// Mesh encodings understood by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeshFormat {
    /// Binary glTF scene.
    Glb,
    /// AR Quick Look scene.
    Usdz,
    /// Wavefront OBJ.
    Obj,
    /// Autodesk FBX.
    Fbx,
    /// Polygon file format.
    Ply,
}

impl MeshFormat {
    /// File extension without the dot.
    #[must_use]
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Glb => "glb",
            Self::Usdz => "usdz",
            Self::Obj => "obj",
            Self::Fbx => "fbx",
            Self::Ply => "ply",
        }
    }

    /// MIME type used on upload.
    #[must_use]
    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Glb => "model/gltf-binary",
            Self::Usdz => "model/vnd.usdz+zip",
            Self::Obj => "model/obj",
            Self::Fbx => "application/octet-stream",
            Self::Ply => "application/x-ply",
        }
    }

    /// Guesses the format from a file name or URL.
    #[must_use]
    pub fn from_path(path: &str) -> Option<Self> {
        let ext = path
            .rsplit('/')
            .next()
            .and_then(|name| name.split('?').next())
            .and_then(|name| name.rsplit_once('.'))
            .map(|(_, ext)| ext.to_ascii_lowercase())?;
        match ext.as_str() {
            "glb" => Some(Self::Glb),
            "usdz" => Some(Self::Usdz),
            "obj" => Some(Self::Obj),
            "fbx" => Some(Self::Fbx),
            "ply" => Some(Self::Ply),
            _ => None,
        }
    }
}

impl fmt::Display for MeshFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// One stored encoding of a mesh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeshEncoding {
    /// The encoding format.
    pub format: MeshFormat,
    /// Where it is stored.
    pub url: String,
}

impl MeshEncoding {
    /// Creates a mesh encoding reference.
    #[must_use]
    pub fn new(format: MeshFormat, url: impl Into<String>) -> Self {
        Self {
            format,
            url: url.into(),
        }
    }
}

/// How a mesh was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeshMethod {
    /// Structure-from-motion over the whole image set.
    Photogrammetry,
    /// Generated from one image by the vision service.
    SingleImage,
}

/// Output of the mesh stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeshArtifact {
    /// Generation method.
    pub method: MeshMethod,
    /// Stored encodings, never empty.
    pub encodings: Vec<MeshEncoding>,
}

impl MeshArtifact {
    /// Creates a mesh artifact; at least one encoding is required.
    pub fn new(method: MeshMethod, encodings: Vec<MeshEncoding>) -> Result<Self, UpstreamError> {
        if encodings.is_empty() {
            return Err(UpstreamError::ReconstructionFailed(
                "no mesh encodings were produced".to_string(),
            ));
        }
        Ok(Self { method, encodings })
    }

    /// Returns the encoding of a given format, if present.
    #[must_use]
    pub fn encoding(&self, format: MeshFormat) -> Option<&MeshEncoding> {
        self.encodings.iter().find(|e| e.format == format)
    }

    /// Returns the encoding renderers and converters should read:
    /// GLB when present, then OBJ, then whatever came first.
    #[must_use]
    pub fn primary(&self) -> Option<&MeshEncoding> {
        self.encoding(MeshFormat::Glb)
            .or_else(|| self.encoding(MeshFormat::Obj))
            .or_else(|| self.encodings.first())
    }
}

/// Output of the render stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderArtifact {
    /// Number of frames in both outputs.
    pub frame_count: u32,
    /// Frame width.
    pub width: u32,
    /// Frame height.
    pub height: u32,
    /// Playback rate of the video and animation.
    pub fps: u32,
    /// Assembled video.
    pub video: ArtifactRef,
    /// Looping reduced-size animation.
    pub animation: ArtifactRef,
}

/// Output of the export stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportArtifact {
    /// The mesh job the export was taken from.
    pub mesh_job_id: JobId,
    /// The requested encodings.
    pub encodings: Vec<MeshEncoding>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(kind: MapKind, w: u32, h: u32) -> TextureMap {
        TextureMap {
            kind,
            width: w,
            height: h,
            artifact: ArtifactRef::new(format!("mem://{}", kind.file_name()), "image/png"),
        }
    }

    #[test]
    fn test_image_set_validate() {
        assert_eq!(ImageSet::default().validate(), Err(ValidationError::EmptyImageSet));
        assert!(ImageSet::single("mem://a.jpg").validate().is_ok());
    }

    #[test]
    fn test_image_set_serializes_as_list() {
        let set = ImageSet::new(vec![
            SourceImage::new("mem://a.jpg").with_angle("front"),
            SourceImage::new("mem://b.jpg"),
        ]);
        let json = serde_json::to_value(&set).unwrap();
        assert_eq!(
            json,
            serde_json::json!([{"url": "mem://a.jpg", "angle": "front"}, {"url": "mem://b.jpg"}])
        );
    }

    #[test]
    fn test_bbox_clip() {
        let bbox = BoundingBox::new(-5.0, 2.0, 10.0, 100.0);
        assert_eq!(bbox.clip(20, 20), Some((0, 2, 5, 18)));

        let outside = BoundingBox::new(30.0, 30.0, 5.0, 5.0);
        assert_eq!(outside.clip(20, 20), None);

        let degenerate = BoundingBox::new(1.0, 1.0, 0.0, 4.0);
        assert_eq!(degenerate.clip(20, 20), None);
    }

    #[test]
    fn test_segmentation_components_dedup_case_sensitive() {
        let detection = |label: &str| Detection {
            image_index: 0,
            label: label.to_string(),
            confidence: 0.9,
            material: None,
            bbox: BoundingBox::new(0.0, 0.0, 1.0, 1.0),
            mask: ArtifactRef::new("mem://m.png", "image/png"),
        };
        let output = SegmentationOutput::new(vec![
            detection("leg"),
            detection("seat"),
            detection("leg"),
            detection("Leg"),
        ]);
        assert_eq!(output.components, vec!["leg", "seat", "Leg"]);
        assert_eq!(output.detections.len(), 4);
    }

    #[test]
    fn test_bundle_assemble_requires_matching_dims() {
        let maps: Vec<_> = MapKind::ALL.iter().map(|k| map(*k, 8, 6)).collect();
        let bundle = TextureBundle::assemble(8, 6, maps).unwrap();
        assert_eq!(bundle.map(MapKind::AmbientOcclusion).url, "mem://ao.png");

        let mut maps: Vec<_> = MapKind::ALL.iter().map(|k| map(*k, 8, 6)).collect();
        maps[1] = map(MapKind::Normal, 8, 5);
        assert!(TextureBundle::assemble(8, 6, maps).is_err());
    }

    #[test]
    fn test_bundle_assemble_requires_all_maps() {
        let maps: Vec<_> = MapKind::ALL[..4].iter().map(|k| map(*k, 4, 4)).collect();
        let err = TextureBundle::assemble(4, 4, maps).unwrap_err();
        assert!(err.contains("Preview"));
    }

    #[test]
    fn test_mesh_artifact_requires_encoding() {
        assert!(MeshArtifact::new(MeshMethod::SingleImage, vec![]).is_err());

        let mesh = MeshArtifact::new(
            MeshMethod::Photogrammetry,
            vec![
                MeshEncoding::new(MeshFormat::Usdz, "mem://m.usdz"),
                MeshEncoding::new(MeshFormat::Glb, "mem://m.glb"),
            ],
        )
        .unwrap();
        assert_eq!(mesh.primary().map(|e| e.format), Some(MeshFormat::Glb));
    }

    #[test]
    fn test_mesh_format_from_path() {
        assert_eq!(MeshFormat::from_path("https://cdn/x/model.GLB?sig=1"), Some(MeshFormat::Glb));
        assert_eq!(MeshFormat::from_path("out/mesh.obj"), Some(MeshFormat::Obj));
        assert_eq!(MeshFormat::from_path("out/mesh"), None);
    }
}
