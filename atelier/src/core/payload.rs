//! Typed job inputs and outputs.
//!
//! Inputs arrive as a `(job type, JSON value)` pair at the submission
//! boundary and are parsed into [`JobInput`] before a record exists, so a
//! malformed or out-of-range payload never reaches `processing`.

use super::{
    ExportArtifact, ImageSet, JobId, JobType, MeshArtifact, MeshFormat, RenderArtifact,
    SegmentationOutput, TextureBundle,
};
use crate::errors::ValidationError;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

/// Largest accepted side length for rendered frames.
pub const MAX_RENDER_SIDE: u32 = 4096;

/// Default turntable frame count.
pub const DEFAULT_FRAMES: u32 = 36;

/// Default render resolution (both sides).
pub const DEFAULT_RENDER_SIDE: u32 = 1024;

static HEX_COLOR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^#?([0-9a-fA-F]{2})([0-9a-fA-F]{2})([0-9a-fA-F]{2})$")
        .unwrap_or_else(|_| unreachable!("static pattern"))
});

/// An 8-bit sRGB stain color.
///
/// Deserializes from `[r, g, b]`, `{"r":..,"g":..,"b":..}` or `"#RRGGBB"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "ColorRepr")]
pub struct StainColor {
    /// Red channel.
    pub r: u8,
    /// Green channel.
    pub g: u8,
    /// Blue channel.
    pub b: u8,
}

impl StainColor {
    /// Creates a color from channels.
    #[must_use]
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Returns the channels normalized to `[0, 1]`.
    #[must_use]
    pub fn to_unit(self) -> [f32; 3] {
        [
            f32::from(self.r) / 255.0,
            f32::from(self.g) / 255.0,
            f32::from(self.b) / 255.0,
        ]
    }
}

impl FromStr for StainColor {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let caps = HEX_COLOR
            .captures(s.trim())
            .ok_or_else(|| ValidationError::InvalidColor(s.to_string()))?;
        let channel = |i: usize| {
            u8::from_str_radix(&caps[i], 16).map_err(|_| ValidationError::InvalidColor(s.to_string()))
        };
        Ok(Self::rgb(channel(1)?, channel(2)?, channel(3)?))
    }
}

impl fmt::Display for StainColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02X}{:02X}{:02X}", self.r, self.g, self.b)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ColorRepr {
    Triple([u8; 3]),
    Channels { r: u8, g: u8, b: u8 },
    Hex(String),
}

impl TryFrom<ColorRepr> for StainColor {
    type Error = ValidationError;

    fn try_from(repr: ColorRepr) -> Result<Self, Self::Error> {
        match repr {
            ColorRepr::Triple([r, g, b]) | ColorRepr::Channels { r, g, b } => Ok(Self::rgb(r, g, b)),
            ColorRepr::Hex(s) => s.parse(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_ratio() -> f32 {
    0.9
}

fn default_frames() -> u32 {
    DEFAULT_FRAMES
}

fn default_side() -> u32 {
    DEFAULT_RENDER_SIDE
}

/// Which detectors the segmentation stage runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectorFlags {
    /// Detect furniture components.
    #[serde(default = "default_true")]
    pub components: bool,
    /// Attach material labels.
    #[serde(default = "default_true")]
    pub materials: bool,
}

impl Default for DetectorFlags {
    fn default() -> Self {
        Self {
            components: true,
            materials: true,
        }
    }
}

/// Input of the segmentation stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentInput {
    /// Images to segment.
    pub images: ImageSet,
    /// Enabled detectors.
    #[serde(default)]
    pub detectors: DetectorFlags,
}

impl SegmentInput {
    fn validate(&self) -> Result<(), ValidationError> {
        self.images.validate()?;
        if !self.detectors.components && !self.detectors.materials {
            return Err(ValidationError::NoDetectorsSelected);
        }
        Ok(())
    }
}

/// Input of the stain stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StainInput {
    /// Images of the piece; the first one is recolored.
    pub images: ImageSet,
    /// Target stain color.
    pub target_color: StainColor,
    /// How much of the source chrominance survives, in `[0, 1]`.
    #[serde(default = "default_ratio")]
    pub preserve_grain: f32,
    /// Weight of the reapplied grain detail, in `[0, 1]`.
    #[serde(default = "default_ratio")]
    pub strength: f32,
}

impl StainInput {
    fn validate(&self) -> Result<(), ValidationError> {
        self.images.validate()?;
        ValidationError::check_range("preserve_grain", f64::from(self.preserve_grain), 0.0, 1.0)?;
        ValidationError::check_range("strength", f64::from(self.strength), 0.0, 1.0)
    }
}

/// How the mesh stage builds geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeshMode {
    /// Ask the vision service to lift the first image to 3D.
    #[default]
    SingleImage,
    /// Run the reconstruction tool over the whole set.
    Photogrammetry,
}

impl MeshMode {
    /// Minimum number of images the mode needs.
    #[must_use]
    pub fn min_images(&self) -> usize {
        match self {
            Self::SingleImage => 1,
            Self::Photogrammetry => 2,
        }
    }
}

impl fmt::Display for MeshMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SingleImage => write!(f, "single_image"),
            Self::Photogrammetry => write!(f, "photogrammetry"),
        }
    }
}

/// Input of the mesh stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeshInput {
    /// Source images.
    pub images: ImageSet,
    /// Generation mode.
    #[serde(default)]
    pub mode: MeshMode,
}

impl MeshInput {
    fn validate(&self) -> Result<(), ValidationError> {
        self.images.validate()?;
        let required = self.mode.min_images();
        if self.images.len() < required {
            return Err(ValidationError::NotEnoughImages {
                mode: self.mode.to_string(),
                required,
                provided: self.images.len(),
            });
        }
        Ok(())
    }
}

/// Input of the turntable render stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderInput {
    /// The completed mesh job to render.
    pub mesh_job_id: JobId,
    /// Number of evenly spaced camera poses.
    #[serde(default = "default_frames")]
    pub frames: u32,
    /// Frame width.
    #[serde(default = "default_side")]
    pub width: u32,
    /// Frame height.
    #[serde(default = "default_side")]
    pub height: u32,
}

impl RenderInput {
    /// Creates a render request with default frame count and size.
    #[must_use]
    pub fn new(mesh_job_id: JobId) -> Self {
        Self {
            mesh_job_id,
            frames: DEFAULT_FRAMES,
            width: DEFAULT_RENDER_SIDE,
            height: DEFAULT_RENDER_SIDE,
        }
    }

    /// Checks frame count and resolution.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.frames < 2 {
            return Err(ValidationError::InvalidFrameCount {
                frames: self.frames,
            });
        }
        let side_ok = |side: u32| (1..=MAX_RENDER_SIDE).contains(&side);
        if !side_ok(self.width) || !side_ok(self.height) {
            return Err(ValidationError::InvalidResolution {
                width: self.width,
                height: self.height,
                max: MAX_RENDER_SIDE,
            });
        }
        Ok(())
    }
}

/// Input of the export stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportInput {
    /// The completed mesh job to export.
    pub mesh_job_id: JobId,
    /// Target formats.
    pub formats: Vec<MeshFormat>,
}

impl ExportInput {
    fn validate(&self) -> Result<(), ValidationError> {
        if self.formats.is_empty() {
            return Err(ValidationError::NoExportFormats);
        }
        Ok(())
    }
}

/// A job's typed input, one variant per stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobInput {
    /// Segmentation request.
    Segment(SegmentInput),
    /// Stain recolor request.
    Stain(StainInput),
    /// Mesh generation request.
    Mesh(MeshInput),
    /// Turntable render request.
    Render(RenderInput),
    /// Mesh export request.
    Export(ExportInput),
}

fn parse<T: DeserializeOwned>(job_type: JobType, value: serde_json::Value) -> Result<T, ValidationError> {
    serde_json::from_value(value).map_err(|e| ValidationError::MalformedInput {
        job_type: job_type.to_string(),
        message: e.to_string(),
    })
}

impl JobInput {
    /// Parses and validates a raw payload for the given stage.
    pub fn from_parts(job_type: JobType, value: serde_json::Value) -> Result<Self, ValidationError> {
        let input = match job_type {
            JobType::Segment => Self::Segment(parse(job_type, value)?),
            JobType::Stain => Self::Stain(parse(job_type, value)?),
            JobType::Mesh => Self::Mesh(parse(job_type, value)?),
            JobType::Render => Self::Render(parse(job_type, value)?),
            JobType::Export => Self::Export(parse(job_type, value)?),
        };
        input.validate()?;
        Ok(input)
    }

    /// Returns the stage this input belongs to.
    #[must_use]
    pub fn job_type(&self) -> JobType {
        match self {
            Self::Segment(_) => JobType::Segment,
            Self::Stain(_) => JobType::Stain,
            Self::Mesh(_) => JobType::Mesh,
            Self::Render(_) => JobType::Render,
            Self::Export(_) => JobType::Export,
        }
    }

    /// Checks shape and range constraints.
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            Self::Segment(input) => input.validate(),
            Self::Stain(input) => input.validate(),
            Self::Mesh(input) => input.validate(),
            Self::Render(input) => input.validate(),
            Self::Export(input) => input.validate(),
        }
    }

    /// Returns the mesh job this input depends on, if any.
    #[must_use]
    pub fn upstream_job(&self) -> Option<JobId> {
        match self {
            Self::Render(input) => Some(input.mesh_job_id),
            Self::Export(input) => Some(input.mesh_job_id),
            Self::Segment(_) | Self::Stain(_) | Self::Mesh(_) => None,
        }
    }
}

/// A completed job's output, one variant per stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobOutput {
    /// Masks and labels.
    Segment(SegmentationOutput),
    /// Recolored texture bundle.
    Stain(TextureBundle),
    /// Generated mesh.
    Mesh(MeshArtifact),
    /// Turntable video and animation.
    Render(RenderArtifact),
    /// Converted mesh encodings.
    Export(ExportArtifact),
}

impl JobOutput {
    /// Returns the stage that produced this output.
    #[must_use]
    pub fn job_type(&self) -> JobType {
        match self {
            Self::Segment(_) => JobType::Segment,
            Self::Stain(_) => JobType::Stain,
            Self::Mesh(_) => JobType::Mesh,
            Self::Render(_) => JobType::Render,
            Self::Export(_) => JobType::Export,
        }
    }

    /// Returns the mesh artifact when this is a mesh output.
    #[must_use]
    pub fn as_mesh(&self) -> Option<&MeshArtifact> {
        match self {
            Self::Mesh(mesh) => Some(mesh),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_color_accepts_three_shapes() {
        let expected = StainColor::rgb(90, 60, 46);
        for value in [json!([90, 60, 46]), json!({"r": 90, "g": 60, "b": 46}), json!("#5A3C2E")] {
            let color: StainColor = serde_json::from_value(value).unwrap();
            assert_eq!(color, expected);
        }
        assert_eq!(expected.to_string(), "#5A3C2E");
    }

    #[test]
    fn test_color_rejects_garbage() {
        assert!(serde_json::from_value::<StainColor>(json!("#5A3C")).is_err());
        assert!(serde_json::from_value::<StainColor>(json!([300, 0, 0])).is_err());
        assert_eq!(
            "brown".parse::<StainColor>(),
            Err(ValidationError::InvalidColor("brown".into()))
        );
    }

    #[test]
    fn test_stain_defaults_and_ranges() {
        let input = JobInput::from_parts(
            JobType::Stain,
            json!({"images": [{"url": "mem://a.jpg"}], "target_color": [90, 60, 46]}),
        )
        .unwrap();
        let JobInput::Stain(stain) = input else {
            panic!("expected stain input");
        };
        assert!((stain.preserve_grain - 0.9).abs() < f32::EPSILON);
        assert!((stain.strength - 0.9).abs() < f32::EPSILON);

        let err = JobInput::from_parts(
            JobType::Stain,
            json!({"images": [{"url": "mem://a.jpg"}], "target_color": [1, 2, 3], "strength": 1.5}),
        )
        .unwrap_err();
        assert!(matches!(err, ValidationError::OutOfRange { ref field, .. } if field == "strength"));
    }

    #[test]
    fn test_segment_requires_a_detector() {
        let err = JobInput::from_parts(
            JobType::Segment,
            json!({"images": [{"url": "mem://a.jpg"}], "detectors": {"components": false, "materials": false}}),
        )
        .unwrap_err();
        assert_eq!(err, ValidationError::NoDetectorsSelected);
    }

    #[test]
    fn test_empty_image_set_rejected() {
        let err = JobInput::from_parts(JobType::Mesh, json!({"images": []})).unwrap_err();
        assert_eq!(err, ValidationError::EmptyImageSet);
    }

    #[test]
    fn test_photogrammetry_needs_two_images() {
        let err = JobInput::from_parts(
            JobType::Mesh,
            json!({"images": [{"url": "mem://a.jpg"}], "mode": "photogrammetry"}),
        )
        .unwrap_err();
        assert!(matches!(err, ValidationError::NotEnoughImages { required: 2, provided: 1, .. }));
    }

    #[test]
    fn test_render_frame_count() {
        let id = JobId::new();
        let err = JobInput::from_parts(JobType::Render, json!({"mesh_job_id": id, "frames": 1}))
            .unwrap_err();
        assert_eq!(err, ValidationError::InvalidFrameCount { frames: 1 });

        let ok = JobInput::from_parts(JobType::Render, json!({"mesh_job_id": id})).unwrap();
        assert_eq!(ok, JobInput::Render(RenderInput::new(id)));
        assert_eq!(ok.upstream_job(), Some(id));
    }

    #[test]
    fn test_malformed_payload_names_the_type() {
        let err = JobInput::from_parts(JobType::Export, json!({"formats": ["glb"]})).unwrap_err();
        match err {
            ValidationError::MalformedInput { job_type, message } => {
                assert_eq!(job_type, "export");
                assert!(message.contains("mesh_job_id"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_input_is_tagged() {
        let input = JobInput::Export(ExportInput {
            mesh_job_id: JobId::new(),
            formats: vec![MeshFormat::Obj],
        });
        let json = serde_json::to_value(&input).unwrap();
        assert_eq!(json["kind"], "export");
        assert_eq!(json["formats"], json!(["obj"]));
        assert_eq!(input.job_type(), JobType::Export);
    }
}
