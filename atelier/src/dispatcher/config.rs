//! Dispatcher configuration.

use crate::core::JobType;
use crate::errors::{AtelierError, Result, ValidationError};
use crate::imaging::StainSettings;
use crate::observability::LogFormat;
use crate::stages::{MeshSettings, RenderSettings, ToolPorts};
use crate::tools::{
    CommandFrameRenderer, CommandMeshConverter, CommandReconstructionTool, CommandVideoEncoder,
    ToolCommand,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Worker pool of one job type.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Jobs of this type processed at once.
    pub concurrency: usize,
    /// Wall-clock budget per job, in seconds.
    pub timeout_seconds: f64,
}

impl PoolConfig {
    /// Creates a pool configuration.
    #[must_use]
    pub fn new(concurrency: usize, timeout_seconds: f64) -> Self {
        Self {
            concurrency,
            timeout_seconds,
        }
    }

    /// Gets the budget as a Duration.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs_f64(self.timeout_seconds)
    }

    fn validate(&self, job_type: JobType) -> Result<(), ValidationError> {
        if self.concurrency == 0 {
            return Err(ValidationError::out_of_range(
                format!("pools.{job_type}.concurrency"),
                0.0,
                1.0,
                f64::from(u32::MAX),
            ));
        }
        if !(self.timeout_seconds.is_finite() && self.timeout_seconds > 0.0) {
            return Err(ValidationError::out_of_range(
                format!("pools.{job_type}.timeout_seconds"),
                self.timeout_seconds,
                f64::MIN_POSITIVE,
                f64::MAX,
            ));
        }
        Ok(())
    }
}

fn default_segment_pool() -> PoolConfig {
    PoolConfig::new(4, 120.0)
}

fn default_stain_pool() -> PoolConfig {
    PoolConfig::new(4, 300.0)
}

fn default_mesh_pool() -> PoolConfig {
    PoolConfig::new(1, 1800.0)
}

fn default_render_pool() -> PoolConfig {
    PoolConfig::new(1, 1800.0)
}

fn default_export_pool() -> PoolConfig {
    PoolConfig::new(2, 300.0)
}

/// One pool per job type.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PoolsConfig {
    /// Segmentation pool.
    #[serde(default = "default_segment_pool")]
    pub segment: PoolConfig,
    /// Stain pool.
    #[serde(default = "default_stain_pool")]
    pub stain: PoolConfig,
    /// Mesh pool.
    #[serde(default = "default_mesh_pool")]
    pub mesh: PoolConfig,
    /// Render pool.
    #[serde(default = "default_render_pool")]
    pub render: PoolConfig,
    /// Export pool.
    #[serde(default = "default_export_pool")]
    pub export: PoolConfig,
}

impl Default for PoolsConfig {
    fn default() -> Self {
        Self {
            segment: default_segment_pool(),
            stain: default_stain_pool(),
            mesh: default_mesh_pool(),
            render: default_render_pool(),
            export: default_export_pool(),
        }
    }
}

impl PoolsConfig {
    /// Returns the pool of a job type.
    #[must_use]
    pub fn get(&self, job_type: JobType) -> PoolConfig {
        match job_type {
            JobType::Segment => self.segment,
            JobType::Stain => self.stain,
            JobType::Mesh => self.mesh,
            JobType::Render => self.render,
            JobType::Export => self.export,
        }
    }

    fn get_mut(&mut self, job_type: JobType) -> &mut PoolConfig {
        match job_type {
            JobType::Segment => &mut self.segment,
            JobType::Stain => &mut self.stain,
            JobType::Mesh => &mut self.mesh,
            JobType::Render => &mut self.render,
            JobType::Export => &mut self.export,
        }
    }
}

fn default_reconstruction_command() -> ToolCommand {
    ToolCommand::new("meshroom_batch", ["--input", "{input}", "--output", "{output_dir}"])
}

fn default_converter_command() -> ToolCommand {
    ToolCommand::new("assimp", ["export", "{input}", "{output}"])
}

fn default_renderer_command() -> ToolCommand {
    ToolCommand::new(
        "blender",
        [
            "--background",
            "--python",
            "render_frame.py",
            "--",
            "--mesh",
            "{mesh}",
            "--output",
            "{output}",
            "--width",
            "{width}",
            "--height",
            "{height}",
            "--eye",
            "{eye_x},{eye_y},{eye_z}",
            "--lights",
            "{lights}",
        ],
    )
}

fn default_video_command() -> ToolCommand {
    ToolCommand::new(
        "ffmpeg",
        [
            "-y",
            "-framerate",
            "{fps}",
            "-i",
            "{input}",
            "-c:v",
            "libx264",
            "-pix_fmt",
            "yuv420p",
            "{output}",
        ],
    )
}

/// Command lines of the external tools.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Photogrammetry.
    #[serde(default = "default_reconstruction_command")]
    pub reconstruction: ToolCommand,
    /// Mesh conversion.
    #[serde(default = "default_converter_command")]
    pub converter: ToolCommand,
    /// Per-frame renderer.
    #[serde(default = "default_renderer_command")]
    pub renderer: ToolCommand,
    /// Video encoder.
    #[serde(default = "default_video_command")]
    pub video: ToolCommand,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            reconstruction: default_reconstruction_command(),
            converter: default_converter_command(),
            renderer: default_renderer_command(),
            video: default_video_command(),
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AtelierConfig {
    /// Worker pools.
    #[serde(default)]
    pub pools: PoolsConfig,
    /// Stain pipeline tunables.
    #[serde(default)]
    pub stain: StainSettings,
    /// Mesh stage settings.
    #[serde(default)]
    pub mesh: MeshSettings,
    /// Render stage settings.
    #[serde(default)]
    pub render: RenderSettings,
    /// External tool command lines.
    #[serde(default)]
    pub tools: ToolsConfig,
    /// Log output format.
    #[serde(default)]
    pub log_format: LogFormat,
}

impl AtelierConfig {
    /// Creates a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a JSON document. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads a JSON file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Sets the pool of one job type.
    #[must_use]
    pub fn with_pool(mut self, job_type: JobType, pool: PoolConfig) -> Self {
        *self.pools.get_mut(job_type) = pool;
        self
    }

    /// Sets the per-job budget of one job type.
    #[must_use]
    pub fn with_timeout(mut self, job_type: JobType, seconds: f64) -> Self {
        self.pools.get_mut(job_type).timeout_seconds = seconds;
        self
    }

    /// Sets the concurrency of one job type.
    #[must_use]
    pub fn with_concurrency(mut self, job_type: JobType, concurrency: usize) -> Self {
        self.pools.get_mut(job_type).concurrency = concurrency;
        self
    }

    /// Sets the stain tunables.
    #[must_use]
    pub fn with_stain(mut self, stain: StainSettings) -> Self {
        self.stain = stain;
        self
    }

    /// Sets the mesh settings.
    #[must_use]
    pub fn with_mesh(mut self, mesh: MeshSettings) -> Self {
        self.mesh = mesh;
        self
    }

    /// Sets the render settings.
    #[must_use]
    pub fn with_render(mut self, render: RenderSettings) -> Self {
        self.render = render;
        self
    }

    /// Sets the tool command lines.
    #[must_use]
    pub fn with_tools(mut self, tools: ToolsConfig) -> Self {
        self.tools = tools;
        self
    }

    /// Checks pool bounds and render settings.
    pub fn validate(&self) -> Result<()> {
        for job_type in JobType::ALL {
            self.pools.get(job_type).validate(job_type)?;
        }
        if self.render.fps == 0 {
            return Err(ValidationError::out_of_range("render.fps", 0.0, 1.0, 240.0).into());
        }
        if self.mesh.required_formats.is_empty() {
            return Err(AtelierError::Validation(ValidationError::NoExportFormats));
        }
        Ok(())
    }

    /// Builds child-process implementations of every tool port.
    #[must_use]
    pub fn tool_ports(&self) -> ToolPorts {
        ToolPorts::new()
            .with_reconstruction(Arc::new(CommandReconstructionTool::new(
                self.tools.reconstruction.clone(),
                self.mesh.reconstruction_output.clone(),
            )))
            .with_converter(Arc::new(CommandMeshConverter::new(self.tools.converter.clone())))
            .with_renderer(Arc::new(CommandFrameRenderer::new(self.tools.renderer.clone())))
            .with_video(Arc::new(CommandVideoEncoder::new(self.tools.video.clone())))
    }
}
