//! Core domain model types for atelier.
//!
//! This module contains the fundamental types the pipeline moves around:
//! - Job type, status and error class enums
//! - The job record and its state machine
//! - Typed stage inputs and outputs
//! - Artifact records and transition events

mod artifact;
mod event;
mod job;
mod payload;
mod status;

pub use artifact::{
    ArtifactRef, BoundingBox, Detection, ExportArtifact, ImageSet, MapKind, MeshArtifact,
    MeshEncoding, MeshFormat, MeshMethod, RenderArtifact, SegmentationOutput, SourceImage,
    TextureBundle, TextureMap,
};
pub use event::JobEvent;
pub use job::{Job, JobError, JobId};
pub use payload::{
    DetectorFlags, ExportInput, JobInput, JobOutput, MeshInput, MeshMode, RenderInput,
    SegmentInput, StainColor, StainInput, DEFAULT_FRAMES, DEFAULT_RENDER_SIDE, MAX_RENDER_SIDE,
};
pub use status::{ErrorClass, JobStatus, JobType};
