//! In-process stand-ins for the vision service and the external tools.

use super::fixtures::solid_png;
use crate::core::{MeshEncoding, MeshFormat};
use crate::errors::UpstreamError;
use crate::tools::{
    FrameRenderer, FrameRequest, MeshConverter, ReconstructionTool, VideoEncoder,
};
use crate::vision::{DetectionOptions, RegionDetection, VisionService};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// A vision service that replays scripted answers.
///
/// Detection calls consume the scripted responses in order; once they run
/// out, the default regions are returned.
#[derive(Debug, Default)]
pub struct ScriptedVisionService {
    responses: Mutex<VecDeque<Vec<RegionDetection>>>,
    default_regions: Vec<RegionDetection>,
    mesh: Option<Vec<MeshEncoding>>,
    delay: Option<Duration>,
    detect_calls: AtomicUsize,
    mesh_calls: AtomicUsize,
}

impl ScriptedVisionService {
    /// Creates a service that detects nothing and has no mesh.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues the answer for the next detection call.
    #[must_use]
    pub fn with_regions(self, regions: Vec<RegionDetection>) -> Self {
        self.responses.lock().push_back(regions);
        self
    }

    /// Sets the answer used after the queued ones.
    #[must_use]
    pub fn with_default_regions(mut self, regions: Vec<RegionDetection>) -> Self {
        self.default_regions = regions;
        self
    }

    /// Sets the encodings returned by `image_to_mesh`.
    #[must_use]
    pub fn with_mesh(mut self, encodings: Vec<MeshEncoding>) -> Self {
        self.mesh = Some(encodings);
        self
    }

    /// Delays every call, for timeout and cancellation tests.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of detection calls served.
    #[must_use]
    pub fn detect_calls(&self) -> usize {
        self.detect_calls.load(Ordering::SeqCst)
    }

    /// Number of mesh generation calls served.
    #[must_use]
    pub fn mesh_calls(&self) -> usize {
        self.mesh_calls.load(Ordering::SeqCst)
    }

    async fn pause(&self) {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl VisionService for ScriptedVisionService {
    async fn detect_components(
        &self,
        _image: &[u8],
        _options: DetectionOptions,
    ) -> Result<Vec<RegionDetection>, UpstreamError> {
        self.detect_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        let scripted = self.responses.lock().pop_front();
        Ok(scripted.unwrap_or_else(|| self.default_regions.clone()))
    }

    async fn image_to_mesh(&self, _image_url: &str) -> Result<Vec<MeshEncoding>, UpstreamError> {
        self.mesh_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        self.mesh
            .clone()
            .ok_or_else(|| UpstreamError::service("image_to_mesh", "no mesh scripted"))
    }
}

fn io_failure(tool: &str, path: &Path, err: &std::io::Error) -> UpstreamError {
    UpstreamError::tool(tool, format!("{}: {err}", path.display()))
}

/// Writes a fixed mesh for any non-empty image directory.
#[derive(Debug, Clone)]
pub struct FakeReconstructionTool {
    contents: String,
    output_name: String,
}

impl FakeReconstructionTool {
    /// Reconstructs a unit cube.
    #[must_use]
    pub fn new() -> Self {
        Self::with_contents(super::CUBE_OBJ)
    }

    /// Reconstructs the given OBJ text.
    #[must_use]
    pub fn with_contents(contents: impl Into<String>) -> Self {
        Self {
            contents: contents.into(),
            output_name: "reconstruction.obj".to_string(),
        }
    }
}

impl Default for FakeReconstructionTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ReconstructionTool for FakeReconstructionTool {
    async fn reconstruct(&self, image_dir: &Path, output_dir: &Path) -> Result<PathBuf, UpstreamError> {
        let mut entries = tokio::fs::read_dir(image_dir)
            .await
            .map_err(|e| io_failure("reconstruction", image_dir, &e))?;
        if entries
            .next_entry()
            .await
            .map_err(|e| io_failure("reconstruction", image_dir, &e))?
            .is_none()
        {
            return Err(UpstreamError::tool("reconstruction", "no input images"));
        }
        let output = output_dir.join(&self.output_name);
        tokio::fs::write(&output, &self.contents)
            .await
            .map_err(|e| io_failure("reconstruction", &output, &e))?;
        Ok(output)
    }
}

/// Re-encodes by prefixing the target format's magic bytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct FakeMeshConverter;

#[async_trait]
impl MeshConverter for FakeMeshConverter {
    async fn convert(&self, input: &Path, format: MeshFormat, output: &Path) -> Result<(), UpstreamError> {
        let source = tokio::fs::read(input)
            .await
            .map_err(|e| io_failure("conversion", input, &e))?;
        let magic: &[u8] = match format {
            MeshFormat::Glb => b"glTF",
            MeshFormat::Usdz => b"PK\x03\x04",
            MeshFormat::Ply => b"ply\n",
            MeshFormat::Obj | MeshFormat::Fbx => b"",
        };
        let mut bytes = magic.to_vec();
        bytes.extend_from_slice(&source);
        tokio::fs::write(output, bytes)
            .await
            .map_err(|e| io_failure("conversion", output, &e))
    }
}

/// Writes one flat-colored PNG per frame; the color encodes the index.
#[derive(Debug, Clone, Copy, Default)]
pub struct FakeFrameRenderer;

#[async_trait]
impl FrameRenderer for FakeFrameRenderer {
    async fn render_frame(&self, request: &FrameRequest) -> Result<(), UpstreamError> {
        if tokio::fs::metadata(&request.mesh).await.is_err() {
            return Err(UpstreamError::tool("renderer", "mesh file missing"));
        }
        let shade = u8::try_from(request.pose.index % 256).unwrap_or_default();
        let png = solid_png(request.width, request.height, [shade, 96, 160]);
        tokio::fs::write(&request.output, png)
            .await
            .map_err(|e| io_failure("renderer", &request.output, &e))
    }
}

/// Writes `frames=<n> fps=<fps>` where `n` counts the frame files.
#[derive(Debug, Clone, Copy, Default)]
pub struct FakeVideoEncoder;

#[async_trait]
impl VideoEncoder for FakeVideoEncoder {
    async fn encode(&self, frame_dir: &Path, fps: u32, output: &Path) -> Result<(), UpstreamError> {
        let mut entries = tokio::fs::read_dir(frame_dir)
            .await
            .map_err(|e| io_failure("video_encoder", frame_dir, &e))?;
        let mut frames = 0usize;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| io_failure("video_encoder", frame_dir, &e))?
        {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with("frame_") && name.ends_with(".png") {
                frames += 1;
            }
        }
        if frames == 0 {
            return Err(UpstreamError::tool("video_encoder", "no frames"));
        }
        tokio::fs::write(output, format!("frames={frames} fps={fps}"))
            .await
            .map_err(|e| io_failure("video_encoder", output, &e))
    }
}
