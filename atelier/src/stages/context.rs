//! Per-job execution context handed to a stage.

use super::StagePorts;
use crate::cancellation::CancellationToken;
use crate::core::{ArtifactRef, JobId, JobType};
use crate::errors::Result;
use crate::observability::ResourceUsage;
use crate::store::artifact_path;
use std::sync::Arc;

/// What a stage knows about the job it is running.
#[derive(Debug, Clone)]
pub struct StageContext {
    /// The job being processed.
    pub job_id: JobId,
    /// Its stage.
    pub job_type: JobType,
    /// Advisory cancellation flag.
    pub cancel: Arc<CancellationToken>,
    /// Injected capabilities.
    pub ports: StagePorts,
    /// Resource counters.
    pub usage: Arc<ResourceUsage>,
}

impl StageContext {
    /// Creates a context with a fresh token and zeroed counters.
    #[must_use]
    pub fn new(job_id: JobId, job_type: JobType, ports: StagePorts) -> Self {
        Self {
            job_id,
            job_type,
            cancel: Arc::new(CancellationToken::new()),
            ports,
            usage: Arc::new(ResourceUsage::new()),
        }
    }

    /// Uses an existing cancellation token.
    #[must_use]
    pub fn with_cancel(mut self, cancel: Arc<CancellationToken>) -> Self {
        self.cancel = cancel;
        self
    }

    /// Fails with `Cancelled` if cancellation was requested.
    pub fn checkpoint(&self) -> Result<()> {
        self.cancel.check()
    }

    /// Downloads a blob, counting its bytes.
    pub async fn download(&self, url: &str) -> Result<Vec<u8>> {
        let bytes = self.ports.artifacts.get(url).await?;
        self.usage.add_download(bytes.len());
        Ok(bytes)
    }

    /// Uploads a blob under this job's deterministic path.
    pub async fn upload(&self, name: &str, bytes: Vec<u8>, content_type: &str) -> Result<ArtifactRef> {
        let path = artifact_path(self.job_id, self.job_type.as_str(), name);
        let len = bytes.len();
        let url = self.ports.artifacts.put(&path, bytes, content_type).await?;
        self.usage.add_upload(len);
        Ok(ArtifactRef::new(url, content_type))
    }
}
