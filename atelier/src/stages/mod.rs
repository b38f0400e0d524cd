//! Stage trait and the five stage implementations.
//!
//! A stage is a function from its typed input to its typed output. Stages
//! never call each other; a stage that builds on earlier work (render,
//! export) looks the earlier job up by id and fails fast if it is not a
//! completed mesh job.

mod context;
mod export;
mod mesh;
mod ports;
mod render;
mod segment;
mod stain;

pub use context::StageContext;
pub use export::ExportStage;
pub use mesh::{check_geometry, MeshSettings, MeshStage};
pub use ports::{StagePorts, ToolPorts};
pub use render::{RenderSettings, RenderStage};
pub use segment::SegmentStage;
pub use stain::StainStage;

use crate::core::{JobId, JobOutput, JobStatus, JobType, MeshArtifact};
use crate::errors::{AtelierError, Result, UpstreamError};
use async_trait::async_trait;
use std::fmt::Debug;

/// A processing stage.
#[async_trait]
pub trait Stage: Send + Sync + Debug {
    /// Typed input.
    type Input: Send + Sync;
    /// Typed output.
    type Output: Send;

    /// Returns the stage name.
    fn name(&self) -> &'static str;

    /// Runs the stage for one job.
    async fn execute(&self, ctx: &StageContext, input: &Self::Input) -> Result<Self::Output>;
}

/// Runs CPU-bound work on the blocking pool.
pub(crate) async fn blocking<T, F>(work: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| AtelierError::Internal(format!("blocking task failed: {e}")))?
}

/// Looks up a completed mesh job and returns its artifact.
pub(crate) async fn resolve_mesh(ctx: &StageContext, id: JobId) -> Result<MeshArtifact> {
    let job = ctx
        .ports
        .jobs
        .get(id)
        .await
        .ok_or_else(|| UpstreamError::mesh_not_found(id, "does not exist"))?;
    if job.job_type != JobType::Mesh {
        return Err(UpstreamError::mesh_not_found(id, format!("is a {} job, not a mesh job", job.job_type)).into());
    }
    match (job.status, job.output.as_ref().and_then(JobOutput::as_mesh)) {
        (JobStatus::Completed, Some(mesh)) => Ok(mesh.clone()),
        (status, _) => Err(UpstreamError::mesh_not_found(id, format!("is {status}, not completed")).into()),
    }
}

/// Lower-case file extension of a URL's last path segment.
pub(crate) fn url_extension(url: &str) -> Option<String> {
    url.rsplit('/')
        .next()
        .and_then(|name| name.split(['?', '#']).next())
        .and_then(|name| name.rsplit_once('.'))
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .filter(|ext| !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()))
}
