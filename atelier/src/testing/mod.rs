//! Testing utilities for atelier pipelines.
//!
//! This module provides:
//! - Synthetic source images and mesh fixtures
//! - A scripted vision service and in-process fakes of the external tools
//! - Assertions over job records and their event log

mod assertions;
mod fixtures;
mod mocks;

pub use assertions::{
    assert_event_sequence, assert_job_completed, assert_job_failed, assert_job_status,
};
pub use fixtures::{solid_png, synthetic_wood, synthetic_wood_png, TestFixture, CUBE_OBJ};
pub use mocks::{
    FakeFrameRenderer, FakeMeshConverter, FakeReconstructionTool, FakeVideoEncoder,
    ScriptedVisionService,
};
