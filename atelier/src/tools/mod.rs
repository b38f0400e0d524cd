//! External tool ports: reconstruction, mesh conversion, frame rendering
//! and video encoding.
//!
//! Each port is a trait so stages can run against in-process fakes; the
//! `Command*` implementations drive child processes.

mod command;
mod pose;

pub use command::{
    CommandFrameRenderer, CommandMeshConverter, CommandReconstructionTool, CommandVideoEncoder,
    ToolCommand,
};
pub use pose::{CameraPose, Light, LightingRig};

use crate::core::MeshFormat;
use crate::errors::UpstreamError;
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// File name of the `index`-th rendered frame.
#[must_use]
pub fn frame_file_name(index: u32) -> String {
    format!("frame_{index:04}.png")
}

/// The printf-style pattern matching [`frame_file_name`].
pub const FRAME_PATTERN: &str = "frame_%04d.png";

/// Turns a directory of photographs into a mesh file.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ReconstructionTool: Send + Sync {
    /// Reconstructs `image_dir` and returns the path of the produced mesh,
    /// which lies inside `output_dir`.
    async fn reconstruct(&self, image_dir: &Path, output_dir: &Path) -> Result<PathBuf, UpstreamError>;
}

/// Converts a mesh file into another encoding.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MeshConverter: Send + Sync {
    /// Writes `input` re-encoded as `format` to `output`.
    async fn convert(&self, input: &Path, format: MeshFormat, output: &Path) -> Result<(), UpstreamError>;
}

/// Everything needed to render one turntable frame.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameRequest {
    /// Local mesh file.
    pub mesh: PathBuf,
    /// Camera placement.
    pub pose: CameraPose,
    /// Light placement.
    pub lighting: LightingRig,
    /// Frame width.
    pub width: u32,
    /// Frame height.
    pub height: u32,
    /// Where to write the PNG.
    pub output: PathBuf,
}

/// Renders a mesh from one camera pose. Stateless per frame.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FrameRenderer: Send + Sync {
    /// Renders `request.mesh` to a PNG at `request.output`.
    async fn render_frame(&self, request: &FrameRequest) -> Result<(), UpstreamError>;
}

/// Assembles numbered frames into a video.
#[async_trait]
pub trait VideoEncoder: Send + Sync {
    /// Encodes `frame_dir/frame_%04d.png` at `fps` into `output`.
    async fn encode(&self, frame_dir: &Path, fps: u32, output: &Path) -> Result<(), UpstreamError>;

    /// Container extension and MIME type of the produced video.
    fn container(&self) -> (&'static str, &'static str) {
        ("mp4", "video/mp4")
    }
}
