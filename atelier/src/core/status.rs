//! Job status, job type and error class enums.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The kind of stage a job runs.
///
/// This is a closed set: adding a stage is an enum change that the
/// dispatcher's exhaustive matches pick up at compile time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    /// Component segmentation masks.
    Segment,
    /// Wood-stain recolor with PBR maps.
    Stain,
    /// 3D mesh generation.
    Mesh,
    /// 360° turntable render.
    Render,
    /// Mesh format export.
    Export,
}

impl JobType {
    /// Every job type, in declaration order.
    pub const ALL: [Self; 5] = [
        Self::Segment,
        Self::Stain,
        Self::Mesh,
        Self::Render,
        Self::Export,
    ];

    /// Returns the wire name of the type.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Segment => "segment",
            Self::Stain => "stain",
            Self::Mesh => "mesh",
            Self::Render => "render",
            Self::Export => "export",
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| s.to_string())
    }
}

/// The status of a job in its state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Queued, not yet claimed by a worker.
    Pending,
    /// Claimed by exactly one worker.
    Processing,
    /// Finished with an output.
    Completed,
    /// Finished with an error.
    Failed,
}

impl Default for JobStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Processing => write!(f, "processing"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl JobStatus {
    /// Returns true if no transition leaves this status.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Returns true if the status indicates success.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

/// Classification of a failure, persisted alongside the error text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Bad input shape or range.
    Validation,
    /// External capability or tool failure.
    Upstream,
    /// State machine contract violated.
    InvalidTransition,
    /// Wall-clock budget exceeded.
    Timeout,
    /// Cooperative abort honored.
    Cancelled,
    /// Fault inside the pipeline itself.
    Internal,
}

impl ErrorClass {
    /// Fallback text used when a failure carries no description.
    #[must_use]
    pub fn default_message(&self) -> &'static str {
        match self {
            Self::Validation => "invalid input",
            Self::Upstream => "upstream failure",
            Self::InvalidTransition => "invalid status transition",
            Self::Timeout => "stage timed out",
            Self::Cancelled => "job cancelled",
            Self::Internal => "internal error",
        }
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Validation => "validation",
            Self::Upstream => "upstream",
            Self::InvalidTransition => "invalid_transition",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
            Self::Internal => "internal",
        };
        f.write_str(s)
    }
}
