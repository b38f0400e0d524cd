//! Persistence ports: the job store and the artifact store.

mod artifacts;
mod jobs;

#[cfg(test)]
pub use artifacts::MockArtifactStore;
pub use artifacts::{artifact_path, ArtifactStore, FsArtifactStore, InMemoryArtifactStore};
#[cfg(feature = "http")]
pub use artifacts::HttpArtifactStore;
pub use jobs::{InMemoryJobStore, JobStore};
