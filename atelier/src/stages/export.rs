//! Re-encoding of a completed mesh into requested formats.

use super::{resolve_mesh, Stage, StageContext};
use crate::core::{ExportArtifact, ExportInput, JobId, MeshArtifact, MeshEncoding, MeshFormat};
use crate::errors::{Result, UpstreamError};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::debug;

async fn fetch_primary(ctx: &StageContext, mesh: &MeshArtifact, mesh_job_id: JobId, dir: &Path) -> Result<PathBuf> {
    let primary = mesh
        .primary()
        .ok_or_else(|| UpstreamError::mesh_not_found(mesh_job_id, "has no encodings"))?;
    let path = dir.join(format!("source.{}", primary.format.extension()));
    tokio::fs::write(&path, ctx.download(&primary.url).await?).await?;
    Ok(path)
}

/// Publishes a mesh job's geometry in each requested format. Encodings
/// the mesh job already stored are reused; the rest are converted from
/// the primary encoding.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExportStage;

impl ExportStage {
    /// Creates the stage.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Stage for ExportStage {
    type Input = ExportInput;
    type Output = ExportArtifact;

    fn name(&self) -> &'static str {
        "export"
    }

    async fn execute(&self, ctx: &StageContext, input: &ExportInput) -> Result<ExportArtifact> {
        let mesh = resolve_mesh(ctx, input.mesh_job_id).await?;
        let mut wanted: Vec<MeshFormat> = Vec::with_capacity(input.formats.len());
        for format in &input.formats {
            if !wanted.contains(format) {
                wanted.push(*format);
            }
        }

        let scratch = tempfile::tempdir()?;
        let mut source: Option<PathBuf> = None;
        let mut encodings = Vec::with_capacity(wanted.len());
        for format in wanted {
            ctx.checkpoint()?;
            if let Some(existing) = mesh.encoding(format) {
                debug!(job_id = %ctx.job_id, %format, "Reusing stored encoding");
                encodings.push(existing.clone());
                continue;
            }

            let source_path = match source.clone() {
                Some(path) => path,
                None => {
                    let path = fetch_primary(ctx, &mesh, input.mesh_job_id, scratch.path()).await?;
                    source = Some(path.clone());
                    path
                }
            };
            let converter = ctx.ports.converter()?;
            let target = scratch.path().join(format!("export.{}", format.extension()));
            ctx.usage.add_external_call();
            converter.convert(&source_path, format, &target).await?;
            let bytes = tokio::fs::read(&target)
                .await
                .map_err(|e| UpstreamError::tool("conversion", format!("{}: {e}", target.display())))?;
            let artifact = ctx
                .upload(&format!("model.{}", format.extension()), bytes, format.content_type())
                .await?;
            encodings.push(MeshEncoding::new(format, artifact.url));
        }

        Ok(ExportArtifact {
            mesh_job_id: input.mesh_job_id,
            encodings,
        })
    }
}
