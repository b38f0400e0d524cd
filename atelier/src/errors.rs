//! Error types for the atelier job pipeline.
//!
//! The taxonomy mirrors how a failure is treated by the dispatcher:
//! validation errors are rejected at submission, upstream errors and
//! timeouts land the job in `failed`, and state-machine violations are
//! reported back to the caller that attempted them.

use crate::core::{ErrorClass, JobId, JobStatus};
use serde_json::json;
use std::collections::HashMap;
use thiserror::Error;

/// The main error type for atelier operations.
#[derive(Debug, Error)]
pub enum AtelierError {
    /// The job input was rejected before any side effect.
    #[error("{0}")]
    Validation(#[from] ValidationError),

    /// An external collaborator (store, vision service, tool) failed.
    #[error("{0}")]
    Upstream(#[from] UpstreamError),

    /// A job status transition violated the state machine.
    #[error("{0}")]
    InvalidTransition(#[from] InvalidTransitionError),

    /// The stage exceeded its wall-clock budget.
    #[error("Timeout: stage exceeded its budget of {seconds:.1}s")]
    Timeout {
        /// The allotted budget in seconds.
        seconds: f64,
    },

    /// Cooperative cancellation was honored.
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// The submitted job type is not one of the known stages.
    #[error("Unknown job type: '{0}'")]
    UnknownJobType(String),

    /// No job exists with the given id.
    #[error("Job not found: {0}")]
    JobNotFound(JobId),

    /// The dispatcher no longer accepts work.
    #[error("Dispatcher is shut down")]
    ShutDown,

    /// Image encoding or buffer handling failed.
    #[error("Image error: {0}")]
    Image(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AtelierError {
    /// Returns the persisted error class for this error.
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Validation(_) | Self::UnknownJobType(_) => ErrorClass::Validation,
            Self::Upstream(_) => ErrorClass::Upstream,
            Self::InvalidTransition(_) => ErrorClass::InvalidTransition,
            Self::Timeout { .. } => ErrorClass::Timeout,
            Self::Cancelled(_) => ErrorClass::Cancelled,
            Self::JobNotFound(_)
            | Self::ShutDown
            | Self::Image(_)
            | Self::Serialization(_)
            | Self::Io(_)
            | Self::Internal(_) => ErrorClass::Internal,
        }
    }

    /// Creates a cancellation error.
    #[must_use]
    pub fn cancelled(reason: impl Into<String>) -> Self {
        Self::Cancelled(reason.into())
    }

    /// Converts to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        map.insert("class".to_string(), json!(self.class()));
        map.insert("message".to_string(), json!(self.to_string()));
        if let Self::InvalidTransition(err) = self {
            map.insert("job_id".to_string(), json!(err.job_id.to_string()));
            map.insert("from".to_string(), json!(err.from));
            map.insert("to".to_string(), json!(err.to));
        }
        map
    }
}

impl From<serde_json::Error> for AtelierError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<image::ImageError> for AtelierError {
    fn from(err: image::ImageError) -> Self {
        Self::Image(err.to_string())
    }
}

/// Input rejected before the job reaches `processing`.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ValidationError {
    /// A turntable needs at least two frames.
    #[error("InvalidFrameCount: {frames} frames requested, at least 2 are required")]
    InvalidFrameCount {
        /// The requested frame count.
        frames: u32,
    },

    /// The image set has no images.
    #[error("EmptyImageSet: at least one source image is required")]
    EmptyImageSet,

    /// A scalar parameter is outside its allowed range.
    #[error("OutOfRange: {field} must be within [{min}, {max}], got {value}")]
    OutOfRange {
        /// The parameter name.
        field: String,
        /// The supplied value.
        value: f64,
        /// Inclusive lower bound.
        min: f64,
        /// Inclusive upper bound.
        max: f64,
    },

    /// A color string could not be parsed.
    #[error("InvalidColor: '{0}' is not a #RRGGBB color")]
    InvalidColor(String),

    /// Segmentation was requested with every detector switched off.
    #[error("NoDetectorsSelected: enable component or material detection")]
    NoDetectorsSelected,

    /// Photogrammetry needs several views.
    #[error("NotEnoughImages: {mode} needs at least {required} images, got {provided}")]
    NotEnoughImages {
        /// The mesh mode.
        mode: String,
        /// Minimum image count.
        required: usize,
        /// Supplied image count.
        provided: usize,
    },

    /// Output resolution is zero or too large.
    #[error("InvalidResolution: {width}x{height} is outside 1..={max} per side")]
    InvalidResolution {
        /// Requested width.
        width: u32,
        /// Requested height.
        height: u32,
        /// Maximum side length.
        max: u32,
    },

    /// An export was requested without any target format.
    #[error("NoExportFormats: at least one target format is required")]
    NoExportFormats,

    /// The payload does not match the stage's input shape.
    #[error("MalformedInput: invalid {job_type} input: {message}")]
    MalformedInput {
        /// The job type the payload was submitted for.
        job_type: String,
        /// Parser message.
        message: String,
    },
}

impl ValidationError {
    /// Creates an out-of-range error.
    #[must_use]
    pub fn out_of_range(field: impl Into<String>, value: f64, min: f64, max: f64) -> Self {
        Self::OutOfRange {
            field: field.into(),
            value,
            min,
            max,
        }
    }

    /// Checks that `value` lies in `[min, max]` (NaN is rejected).
    pub fn check_range(field: &str, value: f64, min: f64, max: f64) -> Result<(), Self> {
        if (min..=max).contains(&value) {
            Ok(())
        } else {
            Err(Self::out_of_range(field, value, min, max))
        }
    }
}

/// Failures of external collaborators, surfaced as job failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UpstreamError {
    /// The vision service found nothing in any image of the set.
    #[error("NoComponentsDetected: no components found in {images} image(s)")]
    NoComponentsDetected {
        /// Number of images inspected.
        images: usize,
    },

    /// Reconstruction produced no usable mesh.
    #[error("ReconstructionFailed: {0}")]
    ReconstructionFailed(String),

    /// A referenced mesh artifact does not exist.
    #[error("MeshNotFound: job {job_id} {reason}")]
    MeshNotFound {
        /// The referenced job id.
        job_id: String,
        /// Why the reference could not be resolved.
        reason: String,
    },

    /// The artifact store failed.
    #[error("Store error for '{location}': {message}")]
    Store {
        /// URL or path involved.
        location: String,
        /// Underlying message.
        message: String,
    },

    /// The vision-and-generation service failed.
    #[error("Vision service error in {operation}: {message}")]
    Service {
        /// The service operation.
        operation: String,
        /// Underlying message.
        message: String,
    },

    /// An external tool failed.
    #[error("Tool '{tool}' failed: {message}")]
    Tool {
        /// The tool name.
        tool: String,
        /// Exit status and stderr.
        message: String,
    },

    /// A downloaded source image could not be decoded.
    #[error("Undecodable image at '{location}': {message}")]
    Decode {
        /// URL of the source image.
        location: String,
        /// Decoder message.
        message: String,
    },
}

impl UpstreamError {
    /// Creates a store error.
    #[must_use]
    pub fn store(location: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Store {
            location: location.into(),
            message: message.into(),
        }
    }

    /// Creates a vision service error.
    #[must_use]
    pub fn service(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Service {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Creates a tool error.
    #[must_use]
    pub fn tool(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Tool {
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// Creates a mesh-not-found error.
    #[must_use]
    pub fn mesh_not_found(job_id: impl ToString, reason: impl Into<String>) -> Self {
        Self::MeshNotFound {
            job_id: job_id.to_string(),
            reason: reason.into(),
        }
    }
}

/// Raised when a status transition is not allowed from the current state.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("InvalidTransition: job {job_id} cannot move from {from} to {to}")]
pub struct InvalidTransitionError {
    /// The job whose transition was rejected.
    pub job_id: JobId,
    /// The status the job was in.
    pub from: JobStatus,
    /// The requested status.
    pub to: JobStatus,
}

impl InvalidTransitionError {
    /// Creates a new invalid transition error.
    #[must_use]
    pub fn new(job_id: JobId, from: JobStatus, to: JobStatus) -> Self {
        Self { job_id, from, to }
    }
}

/// Result alias used across the crate.
pub type Result<T, E = AtelierError> = std::result::Result<T, E>;
