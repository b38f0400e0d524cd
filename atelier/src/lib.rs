//! # Atelier
//!
//! An asynchronous job pipeline that turns furniture photographs into
//! production assets: component masks, stained PBR texture sets, 3D meshes,
//! turntable renders and re-encoded mesh exports.
//!
//! Callers submit a job type plus a JSON payload. The [`dispatcher`]
//! validates it, records a pending job, and runs the matching stage on a
//! per-type worker pool under a timeout. Each job ends `completed` with a
//! typed output or `failed` with a classified error; every transition is
//! logged in the job store and emitted to an event sink.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use atelier::prelude::*;
//!
//! let dispatcher = Dispatcher::start(AtelierConfig::default(), ports, Arc::new(NoOpEventSink))?;
//! let id = dispatcher
//!     .enqueue("stain", json!({"images": [{"url": url}], "target_color": "#5A3C2E"}))
//!     .await?;
//! let job = dispatcher.wait_for(id).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]

pub mod cancellation;
pub mod core;
pub mod dispatcher;
pub mod errors;
pub mod imaging;
pub mod observability;
pub mod stages;
pub mod store;
pub mod testing;
pub mod tools;
pub mod utils;
pub mod vision;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancellation::CancellationToken;
    pub use crate::core::{
        ArtifactRef, ErrorClass, ExportArtifact, ImageSet, Job, JobError, JobId, JobInput, JobOutput,
        JobStatus, JobType, MeshArtifact, MeshFormat, RenderArtifact, SegmentationOutput,
        StainColor, TextureBundle,
    };
    pub use crate::dispatcher::{AtelierConfig, Dispatcher};
    pub use crate::errors::{AtelierError, Result, UpstreamError, ValidationError};
    pub use crate::observability::{init_tracing, EventSink, LogFormat, LoggingEventSink, NoOpEventSink};
    pub use crate::stages::{Stage, StageContext, StagePorts, ToolPorts};
    pub use crate::store::{ArtifactStore, FsArtifactStore, InMemoryArtifactStore, InMemoryJobStore, JobStore};
    pub use crate::vision::VisionService;
}

#[cfg(test)]
mod tests {
    use crate::prelude::*;

    #[test]
    fn test_job_types_round_trip_through_names() {
        for job_type in JobType::ALL {
            assert_eq!(job_type.as_str().parse::<JobType>().unwrap(), job_type);
        }
    }
}
