//! The job record and its status state machine.
//!
//! ```text
//! pending ──start──▶ processing ──complete──▶ completed
//!    │                   │
//!    └──────fail─────────┴──────fail────────▶ failed
//! ```
//!
//! `completed` and `failed` are terminal. `started_at` is written only by
//! [`Job::start`]; `completed_at` only by [`Job::complete`] and
//! [`Job::fail`], so each is set exactly once.

use super::{ErrorClass, JobInput, JobOutput, JobStatus, JobType};
use crate::errors::{AtelierError, InvalidTransitionError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Opaque, time-ordered job identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    /// Generates a fresh id (UUID v7).
    #[must_use]
    pub fn new() -> Self {
        Self(crate::utils::generate_job_uuid())
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

impl From<Uuid> for JobId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

/// The persisted failure of a job: a class plus human-readable text.
///
/// The message is never empty; an empty description is replaced by the
/// class's default text at construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobError {
    /// Failure class.
    pub class: ErrorClass,
    /// Error text, preserved verbatim for operators.
    pub message: String,
}

impl JobError {
    /// Creates a job error.
    #[must_use]
    pub fn new(class: ErrorClass, message: impl Into<String>) -> Self {
        let message = message.into();
        let message = if message.trim().is_empty() {
            class.default_message().to_string()
        } else {
            message
        };
        Self { class, message }
    }
}

impl From<&AtelierError> for JobError {
    fn from(err: &AtelierError) -> Self {
        Self::new(err.class(), err.to_string())
    }
}

impl fmt::Display for JobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// One request to run a stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Job identity.
    pub id: JobId,
    /// The stage this job runs.
    #[serde(rename = "type")]
    pub job_type: JobType,
    /// Current status.
    pub status: JobStatus,
    /// Typed input payload.
    pub input: JobInput,
    /// Present only when completed.
    #[serde(default)]
    pub output: Option<JobOutput>,
    /// Present only when failed.
    #[serde(default)]
    pub error: Option<JobError>,
    /// SHA-256 of the canonical input, for duplicate detection.
    pub fingerprint: String,
    /// When the job was enqueued.
    pub created_at: DateTime<Utc>,
    /// When a worker claimed it.
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    /// When it reached a terminal status.
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Creates a pending job for the input.
    #[must_use]
    pub fn new(input: JobInput) -> Self {
        Self::with_id(JobId::new(), input, Utc::now())
    }

    /// Creates a pending job with an explicit id and creation time.
    #[must_use]
    pub fn with_id(id: JobId, input: JobInput, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            job_type: input.job_type(),
            status: JobStatus::Pending,
            fingerprint: crate::utils::fingerprint(&input),
            input,
            output: None,
            error: None,
            created_at,
            started_at: None,
            completed_at: None,
        }
    }

    fn reject(&self, to: JobStatus) -> InvalidTransitionError {
        InvalidTransitionError::new(self.id, self.status, to)
    }

    /// `pending → processing`. Rejects every other origin, which is what
    /// prevents a job from being dispatched twice.
    pub fn start(&mut self, at: DateTime<Utc>) -> Result<(), InvalidTransitionError> {
        if self.status != JobStatus::Pending {
            return Err(self.reject(JobStatus::Processing));
        }
        self.status = JobStatus::Processing;
        self.started_at = Some(at);
        Ok(())
    }

    /// `processing → completed` with the stage output.
    pub fn complete(
        &mut self,
        output: JobOutput,
        at: DateTime<Utc>,
    ) -> Result<(), InvalidTransitionError> {
        if self.status != JobStatus::Processing {
            return Err(self.reject(JobStatus::Completed));
        }
        self.status = JobStatus::Completed;
        self.output = Some(output);
        self.completed_at = Some(at);
        Ok(())
    }

    /// `pending | processing → failed` with an error description.
    pub fn fail(&mut self, error: JobError, at: DateTime<Utc>) -> Result<(), InvalidTransitionError> {
        if self.status.is_terminal() {
            return Err(self.reject(JobStatus::Failed));
        }
        self.status = JobStatus::Failed;
        self.error = Some(error);
        self.completed_at = Some(at);
        Ok(())
    }

    /// Wall-clock processing time, once both timestamps exist.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn duration_ms(&self) -> Option<f64> {
        match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) => {
                Some((end - start).num_microseconds().unwrap_or(i64::MAX) as f64 / 1000.0)
            }
            _ => None,
        }
    }

    /// Time spent waiting in the queue before a worker claimed the job.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn queue_wait_ms(&self) -> Option<f64> {
        self.started_at.map(|start| {
            (start - self.created_at).num_microseconds().unwrap_or(i64::MAX) as f64 / 1000.0
        })
    }

    /// Checks the output/error exclusivity invariant for the current status.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        match self.status {
            JobStatus::Pending | JobStatus::Processing => {
                self.output.is_none() && self.error.is_none() && self.completed_at.is_none()
            }
            JobStatus::Completed => {
                self.output.is_some() && self.error.is_none() && self.completed_at.is_some()
            }
            JobStatus::Failed => {
                self.output.is_none()
                    && self.error.as_ref().is_some_and(|e| !e.message.is_empty())
                    && self.completed_at.is_some()
            }
        }
    }
}
