//! Turntable rendering of a completed mesh job.

use super::{blocking, resolve_mesh, Stage, StageContext};
use crate::core::{RenderArtifact, RenderInput};
use crate::errors::{Result, UpstreamError};
use crate::imaging::codec;
use crate::tools::{frame_file_name, CameraPose, FrameRequest, LightingRig};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

fn default_fps() -> u32 {
    24
}

fn default_gif_width() -> u32 {
    320
}

fn default_camera_distance() -> f32 {
    2.5
}

fn default_camera_height() -> f32 {
    1.0
}

/// Render stage configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RenderSettings {
    /// Playback rate of the video and the animation.
    #[serde(default = "default_fps")]
    pub fps: u32,
    /// Maximum width of the looping animation.
    #[serde(default = "default_gif_width")]
    pub gif_width: u32,
    /// Camera distance from the turntable axis.
    #[serde(default = "default_camera_distance")]
    pub camera_distance: f32,
    /// Camera height above the ground plane.
    #[serde(default = "default_camera_height")]
    pub camera_height: f32,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            fps: default_fps(),
            gif_width: default_gif_width(),
            camera_distance: default_camera_distance(),
            camera_height: default_camera_height(),
        }
    }
}

/// Renders N evenly spaced frames around a mesh, then assembles a video
/// and a looping animation from them in frame order.
#[derive(Debug, Clone, Default)]
pub struct RenderStage {
    settings: RenderSettings,
}

impl RenderStage {
    /// Creates the stage.
    #[must_use]
    pub fn new(settings: RenderSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl Stage for RenderStage {
    type Input = RenderInput;
    type Output = RenderArtifact;

    fn name(&self) -> &'static str {
        "render"
    }

    async fn execute(&self, ctx: &StageContext, input: &RenderInput) -> Result<RenderArtifact> {
        input.validate()?;
        let mesh = resolve_mesh(ctx, input.mesh_job_id).await?;
        let primary = mesh
            .primary()
            .cloned()
            .ok_or_else(|| UpstreamError::mesh_not_found(input.mesh_job_id, "has no encodings"))?;
        let renderer = ctx.ports.renderer()?;
        let video = ctx.ports.video()?;

        let scratch = tempfile::tempdir()?;
        let mesh_path = scratch.path().join(format!("model.{}", primary.format.extension()));
        tokio::fs::write(&mesh_path, ctx.download(&primary.url).await?).await?;
        let frame_dir = scratch.path().join("frames");
        tokio::fs::create_dir_all(&frame_dir).await?;

        let lighting = LightingRig::three_point();
        let poses = CameraPose::turntable(input.frames, self.settings.camera_distance, self.settings.camera_height);
        let mut frame_paths = Vec::with_capacity(poses.len());
        for pose in poses {
            ctx.checkpoint()?;
            let request = FrameRequest {
                mesh: mesh_path.clone(),
                pose,
                lighting,
                width: input.width,
                height: input.height,
                output: frame_dir.join(frame_file_name(pose.index)),
            };
            ctx.usage.add_external_call();
            renderer.render_frame(&request).await?;
            debug!(job_id = %ctx.job_id, frame = pose.index, angle_deg = pose.degrees(), "Frame rendered");
            frame_paths.push(request.output);
        }
        ctx.usage
            .add_pixels(u64::from(input.width) * u64::from(input.height) * u64::from(input.frames));
        ctx.checkpoint()?;

        let (ext, content_type) = video.container();
        let video_path = scratch.path().join(format!("turntable.{ext}"));
        ctx.usage.add_external_call();
        video.encode(&frame_dir, self.settings.fps, &video_path).await?;
        let video_bytes = tokio::fs::read(&video_path)
            .await
            .map_err(|e| UpstreamError::tool("video_encoder", format!("{}: {e}", video_path.display())))?;
        let video_ref = ctx.upload(&format!("turntable.{ext}"), video_bytes, content_type).await?;

        let mut frames = Vec::with_capacity(frame_paths.len());
        for path in &frame_paths {
            let bytes = tokio::fs::read(path)
                .await
                .map_err(|e| UpstreamError::tool("renderer", format!("{}: {e}", path.display())))?;
            frames.push(bytes);
        }
        ctx.checkpoint()?;
        let (gif_width, fps) = (self.settings.gif_width, self.settings.fps);
        let gif = blocking(move || codec::encode_animation(&frames, gif_width, fps)).await?;
        let animation = ctx.upload("turntable.gif", gif, codec::GIF).await?;

        info!(job_id = %ctx.job_id, frames = input.frames, width = input.width, height = input.height, "Turntable assembled");
        Ok(RenderArtifact {
            frame_count: input.frames,
            width: input.width,
            height: input.height,
            fps,
            video: video_ref,
            animation,
        })
    }
}
