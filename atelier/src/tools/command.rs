//! Child-process implementations of the tool ports.

use super::{FrameRenderer, FrameRequest, MeshConverter, ReconstructionTool, VideoEncoder, FRAME_PATTERN};
use crate::core::MeshFormat;
use crate::errors::UpstreamError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tracing::{debug, warn};

const STDERR_TAIL: usize = 512;

/// A program plus argument template.
///
/// Arguments may contain `{name}` placeholders, substituted per call.
/// Unknown placeholders are left untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCommand {
    /// Executable name or path.
    pub program: String,
    /// Argument templates.
    #[serde(default)]
    pub args: Vec<String>,
}

impl ToolCommand {
    /// Creates a command.
    #[must_use]
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Substitutes placeholders into the argument templates.
    #[must_use]
    pub fn render_args(&self, vars: &[(&str, String)]) -> Vec<String> {
        self.args
            .iter()
            .map(|arg| {
                vars.iter().fold(arg.clone(), |acc, (name, value)| {
                    acc.replace(&format!("{{{name}}}"), value)
                })
            })
            .collect()
    }

    /// Runs the command to completion. A non-zero exit is a tool failure
    /// carrying the tail of stderr. The child is killed if the returned
    /// future is dropped.
    pub async fn run(&self, tool: &str, vars: &[(&str, String)]) -> Result<(), UpstreamError> {
        let args = self.render_args(vars);
        debug!(tool, program = %self.program, ?args, "Running external tool");

        let output = tokio::process::Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| UpstreamError::tool(tool, format!("failed to start '{}': {e}", self.program)))?;

        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        let tail: String = stderr
            .chars()
            .rev()
            .take(STDERR_TAIL)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        warn!(tool, code = ?output.status.code(), "External tool failed");
        Err(UpstreamError::tool(
            tool,
            format!("exit code {:?}: {}", output.status.code(), tail.trim()),
        ))
    }
}

fn path_var(path: &Path) -> String {
    path.display().to_string()
}

/// Fails unless `path` exists and is non-empty.
pub(crate) async fn ensure_output(tool: &str, path: &Path) -> Result<u64, UpstreamError> {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.len() > 0 => Ok(meta.len()),
        Ok(_) => Err(UpstreamError::tool(tool, format!("{} is empty", path.display()))),
        Err(_) => Err(UpstreamError::tool(
            tool,
            format!("no output at {}", path.display()),
        )),
    }
}

/// Runs a photogrammetry CLI. Placeholders: `{input}` (image directory),
/// `{output}` (mesh file to produce), `{output_dir}`.
#[derive(Debug, Clone)]
pub struct CommandReconstructionTool {
    command: ToolCommand,
    output_name: String,
}

impl CommandReconstructionTool {
    /// Creates the tool; the mesh is expected at `output_dir/output_name`.
    #[must_use]
    pub fn new(command: ToolCommand, output_name: impl Into<String>) -> Self {
        Self {
            command,
            output_name: output_name.into(),
        }
    }
}

#[async_trait]
impl ReconstructionTool for CommandReconstructionTool {
    async fn reconstruct(&self, image_dir: &Path, output_dir: &Path) -> Result<PathBuf, UpstreamError> {
        let output = output_dir.join(&self.output_name);
        self.command
            .run(
                "reconstruction",
                &[
                    ("input", path_var(image_dir)),
                    ("output", path_var(&output)),
                    ("output_dir", path_var(output_dir)),
                ],
            )
            .await?;
        Ok(output)
    }
}

/// Runs a mesh conversion CLI. Placeholders: `{input}`, `{output}`,
/// `{format}`.
#[derive(Debug, Clone)]
pub struct CommandMeshConverter {
    command: ToolCommand,
}

impl CommandMeshConverter {
    /// Creates the converter.
    #[must_use]
    pub fn new(command: ToolCommand) -> Self {
        Self { command }
    }
}

#[async_trait]
impl MeshConverter for CommandMeshConverter {
    async fn convert(&self, input: &Path, format: MeshFormat, output: &Path) -> Result<(), UpstreamError> {
        self.command
            .run(
                "conversion",
                &[
                    ("input", path_var(input)),
                    ("output", path_var(output)),
                    ("format", format.extension().to_string()),
                ],
            )
            .await?;
        ensure_output("conversion", output).await.map(|_| ())
    }
}

/// Runs an offline renderer once per frame. Placeholders: `{mesh}`,
/// `{output}`, `{width}`, `{height}`, `{frame}`, `{angle}` (radians),
/// `{angle_deg}`, `{distance}`, `{camera_height}`, `{eye_x}`, `{eye_y}`,
/// `{eye_z}`, `{lights}` (JSON).
#[derive(Debug, Clone)]
pub struct CommandFrameRenderer {
    command: ToolCommand,
}

impl CommandFrameRenderer {
    /// Creates the renderer.
    #[must_use]
    pub fn new(command: ToolCommand) -> Self {
        Self { command }
    }
}

#[async_trait]
impl FrameRenderer for CommandFrameRenderer {
    async fn render_frame(&self, request: &FrameRequest) -> Result<(), UpstreamError> {
        let [eye_x, eye_y, eye_z] = request.pose.eye();
        let lights = serde_json::to_string(&request.lighting)
            .map_err(|e| UpstreamError::tool("renderer", e.to_string()))?;
        self.command
            .run(
                "renderer",
                &[
                    ("mesh", path_var(&request.mesh)),
                    ("output", path_var(&request.output)),
                    ("width", request.width.to_string()),
                    ("height", request.height.to_string()),
                    ("frame", request.pose.index.to_string()),
                    ("angle", format!("{:.6}", request.pose.angle)),
                    ("angle_deg", format!("{:.3}", request.pose.degrees())),
                    ("distance", request.pose.distance.to_string()),
                    ("camera_height", request.pose.height.to_string()),
                    ("eye_x", eye_x.to_string()),
                    ("eye_y", eye_y.to_string()),
                    ("eye_z", eye_z.to_string()),
                    ("lights", lights),
                ],
            )
            .await?;
        ensure_output("renderer", &request.output).await.map(|_| ())
    }
}

/// Runs a video encoder such as ffmpeg. Placeholders: `{input}` (frame
/// pattern), `{fps}`, `{output}`.
#[derive(Debug, Clone)]
pub struct CommandVideoEncoder {
    command: ToolCommand,
}

impl CommandVideoEncoder {
    /// Creates the encoder.
    #[must_use]
    pub fn new(command: ToolCommand) -> Self {
        Self { command }
    }
}

#[async_trait]
impl VideoEncoder for CommandVideoEncoder {
    async fn encode(&self, frame_dir: &Path, fps: u32, output: &Path) -> Result<(), UpstreamError> {
        self.command
            .run(
                "video_encoder",
                &[
                    ("input", path_var(&frame_dir.join(FRAME_PATTERN))),
                    ("fps", fps.to_string()),
                    ("output", path_var(output)),
                ],
            )
            .await?;
        ensure_output("video_encoder", output).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_args_substitutes_known_placeholders() {
        let command = ToolCommand::new("ffmpeg", ["-r", "{fps}", "-i", "{input}", "{output}", "{unknown}"]);
        let args = command.render_args(&[
            ("fps", "24".to_string()),
            ("input", "/tmp/f/frame_%04d.png".to_string()),
            ("output", "/tmp/out.mp4".to_string()),
        ]);
        assert_eq!(
            args,
            vec!["-r", "24", "-i", "/tmp/f/frame_%04d.png", "/tmp/out.mp4", "{unknown}"]
        );
    }

    #[test]
    fn test_tool_command_deserializes_without_args() {
        let command: ToolCommand = serde_json::from_str(r#"{"program": "true"}"#).unwrap();
        assert!(command.args.is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_success_and_failure() {
        assert!(ToolCommand::new("true", Vec::<String>::new()).run("t", &[]).await.is_ok());

        let failing = ToolCommand::new("sh", ["-c", "echo boom >&2; exit 3"]);
        let err = failing.run("t", &[]).await.unwrap_err();
        let message = err.to_string();
        assert!(message.contains("exit code Some(3)"));
        assert!(message.contains("boom"));
    }

    #[tokio::test]
    async fn test_missing_program_is_tool_error() {
        let err = ToolCommand::new("definitely-not-a-real-binary-4242", Vec::<String>::new())
            .run("t", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, UpstreamError::Tool { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_converter_requires_non_empty_output() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("out.glb");

        let touch = CommandMeshConverter::new(ToolCommand::new("touch", ["{output}"]));
        let err = touch
            .convert(Path::new("in.obj"), MeshFormat::Glb, &output)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("is empty"));

        let write = CommandMeshConverter::new(ToolCommand::new("sh", ["-c", "printf {format} > {output}"]));
        write
            .convert(Path::new("in.obj"), MeshFormat::Glb, &output)
            .await
            .unwrap();
        assert_eq!(std::fs::read_to_string(&output).unwrap(), "glb");
    }
}
