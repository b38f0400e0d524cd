//! 3D mesh generation, from one image through the vision service or from
//! a whole image set through photogrammetry.

use super::{url_extension, Stage, StageContext};
use crate::core::{MeshArtifact, MeshEncoding, MeshFormat, MeshInput, MeshMethod, MeshMode};
use crate::errors::{Result, UpstreamError, ValidationError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

fn default_required_formats() -> Vec<MeshFormat> {
    vec![MeshFormat::Glb, MeshFormat::Usdz]
}

fn default_reconstruction_output() -> String {
    "reconstruction.obj".to_string()
}

/// Mesh stage configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeshSettings {
    /// Encodings a photogrammetry mesh is published in.
    #[serde(default = "default_required_formats")]
    pub required_formats: Vec<MeshFormat>,
    /// File name the reconstruction tool writes inside its output directory.
    #[serde(default = "default_reconstruction_output")]
    pub reconstruction_output: String,
}

impl Default for MeshSettings {
    fn default() -> Self {
        Self {
            required_formats: default_required_formats(),
            reconstruction_output: default_reconstruction_output(),
        }
    }
}

/// Rejects reconstruction output that cannot be a usable mesh.
///
/// Every mesh must be non-empty. OBJ needs at least three vertices and
/// one face, PLY and GLB must carry their magic header.
pub fn check_geometry(bytes: &[u8], format: Option<MeshFormat>) -> Result<(), UpstreamError> {
    if bytes.is_empty() {
        return Err(UpstreamError::ReconstructionFailed("mesh file is empty".to_string()));
    }
    match format {
        Some(MeshFormat::Obj) => {
            let text = String::from_utf8_lossy(bytes);
            let (mut vertices, mut faces) = (0usize, 0usize);
            for line in text.lines().map(str::trim_start) {
                if line.starts_with("v ") {
                    vertices += 1;
                } else if line.starts_with("f ") {
                    faces += 1;
                }
            }
            if vertices < 3 || faces == 0 {
                return Err(UpstreamError::ReconstructionFailed(format!(
                    "mesh has {vertices} vertices and {faces} faces"
                )));
            }
        }
        Some(MeshFormat::Ply) if !bytes.starts_with(b"ply") => {
            return Err(UpstreamError::ReconstructionFailed("missing PLY header".to_string()));
        }
        Some(MeshFormat::Glb) if !bytes.starts_with(b"glTF") => {
            return Err(UpstreamError::ReconstructionFailed("missing glTF header".to_string()));
        }
        _ => {}
    }
    Ok(())
}

/// Produces a mesh and publishes it in the configured encodings.
#[derive(Debug, Clone, Default)]
pub struct MeshStage {
    settings: MeshSettings,
}

impl MeshStage {
    /// Creates the stage.
    #[must_use]
    pub fn new(settings: MeshSettings) -> Self {
        Self { settings }
    }

    async fn single_image(&self, ctx: &StageContext, input: &MeshInput) -> Result<MeshArtifact> {
        let vision = ctx.ports.vision()?;
        let source = input.images.first().ok_or(ValidationError::EmptyImageSet)?;
        ctx.usage.add_external_call();
        let encodings = vision.image_to_mesh(&source.url).await?;
        debug!(job_id = %ctx.job_id, encodings = encodings.len(), "Generated mesh from a single image");
        Ok(MeshArtifact::new(MeshMethod::SingleImage, encodings)?)
    }

    async fn photogrammetry(&self, ctx: &StageContext, input: &MeshInput) -> Result<MeshArtifact> {
        let reconstruction = ctx.ports.reconstruction()?;
        let scratch = tempfile::tempdir()?;
        let image_dir = scratch.path().join("images");
        let output_dir = scratch.path().join("reconstruction");
        tokio::fs::create_dir_all(&image_dir).await?;
        tokio::fs::create_dir_all(&output_dir).await?;

        for (index, image) in input.images.iter().enumerate() {
            ctx.checkpoint()?;
            let bytes = ctx.download(&image.url).await?;
            let ext = url_extension(&image.url).unwrap_or_else(|| "jpg".to_string());
            tokio::fs::write(image_dir.join(format!("img_{index:03}.{ext}")), bytes).await?;
        }

        ctx.usage.add_external_call();
        let mesh_path = reconstruction.reconstruct(&image_dir, &output_dir).await?;
        let raw = tokio::fs::read(&mesh_path).await.map_err(|e| {
            UpstreamError::ReconstructionFailed(format!("no mesh at {}: {e}", mesh_path.display()))
        })?;
        let source_format = MeshFormat::from_path(&mesh_path.to_string_lossy());
        check_geometry(&raw, source_format)?;
        info!(
            job_id = %ctx.job_id,
            images = input.images.len(),
            bytes = raw.len(),
            "Reconstruction finished"
        );

        let mut encodings = Vec::with_capacity(self.settings.required_formats.len());
        for format in &self.settings.required_formats {
            if encodings.iter().any(|e: &MeshEncoding| e.format == *format) {
                continue;
            }
            ctx.checkpoint()?;
            let bytes = if Some(*format) == source_format {
                raw.clone()
            } else {
                self.convert(ctx, &mesh_path, *format, scratch.path()).await?
            };
            let name = format!("model.{}", format.extension());
            let artifact = ctx.upload(&name, bytes, format.content_type()).await?;
            encodings.push(MeshEncoding::new(*format, artifact.url));
        }

        Ok(MeshArtifact::new(MeshMethod::Photogrammetry, encodings)?)
    }

    async fn convert(&self, ctx: &StageContext, mesh: &Path, format: MeshFormat, dir: &Path) -> Result<Vec<u8>> {
        let converter = ctx.ports.converter()?;
        let target = dir.join(format!("converted.{}", format.extension()));
        ctx.usage.add_external_call();
        converter.convert(mesh, format, &target).await?;
        let bytes = tokio::fs::read(&target)
            .await
            .map_err(|e| UpstreamError::tool("conversion", format!("{}: {e}", target.display())))?;
        Ok(bytes)
    }
}

#[async_trait]
impl Stage for MeshStage {
    type Input = MeshInput;
    type Output = MeshArtifact;

    fn name(&self) -> &'static str {
        "mesh"
    }

    async fn execute(&self, ctx: &StageContext, input: &MeshInput) -> Result<MeshArtifact> {
        ctx.checkpoint()?;
        match input.mode {
            MeshMode::SingleImage => self.single_image(ctx, input).await,
            MeshMode::Photogrammetry => self.photogrammetry(ctx, input).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ImageSet, JobId, JobType};
    use crate::errors::AtelierError;
    use crate::stages::{StagePorts, ToolPorts};
    use crate::store::{ArtifactStore, InMemoryArtifactStore, InMemoryJobStore};
    use crate::testing::{FakeMeshConverter, FakeReconstructionTool, ScriptedVisionService, CUBE_OBJ};
    use crate::tools::MockReconstructionTool;
    use std::sync::Arc;

    fn artifacts() -> Arc<InMemoryArtifactStore> {
        let store = Arc::new(InMemoryArtifactStore::new());
        store.insert("src/front.jpg", b"front".to_vec(), "image/jpeg");
        store.insert("src/side.jpg", b"side".to_vec(), "image/jpeg");
        store
    }

    fn ctx(ports: StagePorts) -> StageContext {
        StageContext::new(JobId::new(), JobType::Mesh, ports)
    }

    fn photogrammetry() -> MeshInput {
        MeshInput {
            images: ImageSet::from_urls(["mem://src/front.jpg", "mem://src/side.jpg"]),
            mode: MeshMode::Photogrammetry,
        }
    }

    #[test]
    fn test_check_geometry() {
        assert!(check_geometry(b"", None).is_err());
        assert!(check_geometry(CUBE_OBJ.as_bytes(), Some(MeshFormat::Obj)).is_ok());
        assert!(check_geometry(b"v 0 0 0\nv 1 0 0\n", Some(MeshFormat::Obj)).is_err());
        assert!(check_geometry(b"glTF\x02\x00", Some(MeshFormat::Glb)).is_ok());
        assert!(check_geometry(b"nope", Some(MeshFormat::Ply)).is_err());
        assert!(check_geometry(b"anything", Some(MeshFormat::Fbx)).is_ok());
    }

    #[tokio::test]
    async fn test_single_image_uses_vision_service() {
        let vision = ScriptedVisionService::new().with_mesh(vec![MeshEncoding::new(MeshFormat::Glb, "mem://gen/m.glb")]);
        let ports = StagePorts::new(Arc::new(InMemoryJobStore::new()), artifacts()).with_vision(Arc::new(vision));
        let input = MeshInput {
            images: ImageSet::single("mem://src/front.jpg"),
            mode: MeshMode::SingleImage,
        };
        let ctx = ctx(ports);

        let mesh = MeshStage::default().execute(&ctx, &input).await.unwrap();
        assert_eq!(mesh.method, MeshMethod::SingleImage);
        assert_eq!(mesh.primary().map(|e| e.url.as_str()), Some("mem://gen/m.glb"));
        assert_eq!(ctx.usage.snapshot().external_calls, 1);
    }

    #[tokio::test]
    async fn test_photogrammetry_publishes_required_formats() {
        let store = artifacts();
        let tools = ToolPorts::new()
            .with_reconstruction(Arc::new(FakeReconstructionTool::new()))
            .with_converter(Arc::new(FakeMeshConverter));
        let ports = StagePorts::new(Arc::new(InMemoryJobStore::new()), store.clone()).with_tools(tools);
        let ctx = ctx(ports);
        let stage = MeshStage::new(MeshSettings {
            required_formats: vec![MeshFormat::Glb, MeshFormat::Obj, MeshFormat::Glb],
            ..MeshSettings::default()
        });

        let mesh = stage.execute(&ctx, &photogrammetry()).await.unwrap();
        let formats: Vec<_> = mesh.encodings.iter().map(|e| e.format).collect();
        assert_eq!(formats, vec![MeshFormat::Glb, MeshFormat::Obj]);

        let obj = store.get(&mesh.encoding(MeshFormat::Obj).unwrap().url).await.unwrap();
        assert_eq!(obj, CUBE_OBJ.as_bytes());
        let glb = store.get(&mesh.encoding(MeshFormat::Glb).unwrap().url).await.unwrap();
        assert!(glb.starts_with(b"glTF"));
        assert!(mesh.encodings[0].url.ends_with("mesh/model.glb"));
        assert_eq!(store.content_type(&mesh.encodings[0].url).as_deref(), Some("model/gltf-binary"));
    }

    #[tokio::test]
    async fn test_degenerate_reconstruction_fails_upstream() {
        let tools = ToolPorts::new()
            .with_reconstruction(Arc::new(FakeReconstructionTool::with_contents("v 0 0 0\n")))
            .with_converter(Arc::new(FakeMeshConverter));
        let ports = StagePorts::new(Arc::new(InMemoryJobStore::new()), artifacts()).with_tools(tools);

        let err = MeshStage::default().execute(&ctx(ports), &photogrammetry()).await.unwrap_err();
        assert!(matches!(
            err,
            AtelierError::Upstream(UpstreamError::ReconstructionFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_reconstruction_tool_failure_propagates() {
        let mut tool = MockReconstructionTool::new();
        tool.expect_reconstruct()
            .times(1)
            .returning(|_, _| Err(UpstreamError::tool("reconstruction", "exit status 1")));
        let tools = ToolPorts::new().with_reconstruction(Arc::new(tool));
        let ports = StagePorts::new(Arc::new(InMemoryJobStore::new()), artifacts()).with_tools(tools);

        let err = MeshStage::default().execute(&ctx(ports), &photogrammetry()).await.unwrap_err();
        assert!(err.to_string().contains("exit status 1"));
    }

    #[tokio::test]
    async fn test_missing_tool_is_internal() {
        let ports = StagePorts::new(Arc::new(InMemoryJobStore::new()), artifacts());
        let err = MeshStage::default().execute(&ctx(ports), &photogrammetry()).await.unwrap_err();
        assert_eq!(err.class(), crate::core::ErrorClass::Internal);
    }
}
