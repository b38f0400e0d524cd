//! Capabilities injected into stages.
//!
//! Stages receive only the ports they need. The job and artifact stores
//! are mandatory; the vision service and external tools are optional,
//! and a stage that needs a missing one fails with an internal error.

use crate::errors::{AtelierError, Result};
use crate::store::{ArtifactStore, JobStore};
use crate::tools::{FrameRenderer, MeshConverter, ReconstructionTool, VideoEncoder};
use crate::vision::VisionService;
use std::sync::Arc;

/// External tools, each optional.
#[derive(Clone, Default)]
pub struct ToolPorts {
    /// Photogrammetry CLI.
    pub reconstruction: Option<Arc<dyn ReconstructionTool>>,
    /// Mesh format converter.
    pub converter: Option<Arc<dyn MeshConverter>>,
    /// Offline frame renderer.
    pub renderer: Option<Arc<dyn FrameRenderer>>,
    /// Video encoder.
    pub video: Option<Arc<dyn VideoEncoder>>,
}

impl std::fmt::Debug for ToolPorts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolPorts")
            .field("has_reconstruction", &self.reconstruction.is_some())
            .field("has_converter", &self.converter.is_some())
            .field("has_renderer", &self.renderer.is_some())
            .field("has_video", &self.video.is_some())
            .finish()
    }
}

impl ToolPorts {
    /// Creates empty tool ports.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the reconstruction tool.
    #[must_use]
    pub fn with_reconstruction(mut self, tool: Arc<dyn ReconstructionTool>) -> Self {
        self.reconstruction = Some(tool);
        self
    }

    /// Sets the mesh converter.
    #[must_use]
    pub fn with_converter(mut self, tool: Arc<dyn MeshConverter>) -> Self {
        self.converter = Some(tool);
        self
    }

    /// Sets the frame renderer.
    #[must_use]
    pub fn with_renderer(mut self, tool: Arc<dyn FrameRenderer>) -> Self {
        self.renderer = Some(tool);
        self
    }

    /// Sets the video encoder.
    #[must_use]
    pub fn with_video(mut self, tool: Arc<dyn VideoEncoder>) -> Self {
        self.video = Some(tool);
        self
    }
}

fn missing(port: &str) -> AtelierError {
    AtelierError::Internal(format!("no {port} configured"))
}

/// Everything a stage may call out to.
#[derive(Clone)]
pub struct StagePorts {
    /// Job records; read by stages that reference prior jobs.
    pub jobs: Arc<dyn JobStore>,
    /// Blob storage.
    pub artifacts: Arc<dyn ArtifactStore>,
    /// Vision-and-generation service.
    pub vision: Option<Arc<dyn VisionService>>,
    /// External tools.
    pub tools: ToolPorts,
}

impl std::fmt::Debug for StagePorts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StagePorts")
            .field("has_vision", &self.vision.is_some())
            .field("tools", &self.tools)
            .finish_non_exhaustive()
    }
}

impl StagePorts {
    /// Creates ports with the two mandatory stores.
    #[must_use]
    pub fn new(jobs: Arc<dyn JobStore>, artifacts: Arc<dyn ArtifactStore>) -> Self {
        Self {
            jobs,
            artifacts,
            vision: None,
            tools: ToolPorts::default(),
        }
    }

    /// Sets the vision service.
    #[must_use]
    pub fn with_vision(mut self, vision: Arc<dyn VisionService>) -> Self {
        self.vision = Some(vision);
        self
    }

    /// Sets the external tools.
    #[must_use]
    pub fn with_tools(mut self, tools: ToolPorts) -> Self {
        self.tools = tools;
        self
    }

    /// Returns the vision service or an internal error.
    pub fn vision(&self) -> Result<&Arc<dyn VisionService>> {
        self.vision.as_ref().ok_or_else(|| missing("vision service"))
    }

    /// Returns the reconstruction tool or an internal error.
    pub fn reconstruction(&self) -> Result<&Arc<dyn ReconstructionTool>> {
        self.tools.reconstruction.as_ref().ok_or_else(|| missing("reconstruction tool"))
    }

    /// Returns the mesh converter or an internal error.
    pub fn converter(&self) -> Result<&Arc<dyn MeshConverter>> {
        self.tools.converter.as_ref().ok_or_else(|| missing("mesh converter"))
    }

    /// Returns the frame renderer or an internal error.
    pub fn renderer(&self) -> Result<&Arc<dyn FrameRenderer>> {
        self.tools.renderer.as_ref().ok_or_else(|| missing("frame renderer"))
    }

    /// Returns the video encoder or an internal error.
    pub fn video(&self) -> Result<&Arc<dyn VideoEncoder>> {
        self.tools.video.as_ref().ok_or_else(|| missing("video encoder"))
    }
}
