//! Per-job resource counters and timing.

use crate::core::{ErrorClass, JobId, JobStatus, JobType};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Measures wall-clock time of a span of work.
#[derive(Debug)]
pub struct SpanTimer {
    start: Instant,
    name: String,
}

impl SpanTimer {
    /// Starts a new timer.
    #[must_use]
    pub fn start(name: impl Into<String>) -> Self {
        Self {
            start: Instant::now(),
            name: name.into(),
        }
    }

    /// Returns the elapsed time in milliseconds.
    #[must_use]
    pub fn elapsed_ms(&self) -> f64 {
        crate::utils::elapsed_ms(self.start)
    }

    /// Returns the span name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Counters a stage bumps while it runs. Shared between the worker and
/// the stage through an `Arc`.
#[derive(Debug, Default)]
pub struct ResourceUsage {
    bytes_downloaded: AtomicU64,
    bytes_uploaded: AtomicU64,
    external_calls: AtomicU64,
    pixels_processed: AtomicU64,
}

impl ResourceUsage {
    /// Creates zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a download.
    pub fn add_download(&self, bytes: usize) {
        self.bytes_downloaded.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Records an upload.
    pub fn add_upload(&self, bytes: usize) {
        self.bytes_uploaded.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Records one call to the vision service or an external tool.
    pub fn add_external_call(&self) {
        self.external_calls.fetch_add(1, Ordering::Relaxed);
    }

    /// Records raster work.
    pub fn add_pixels(&self, pixels: u64) {
        self.pixels_processed.fetch_add(pixels, Ordering::Relaxed);
    }

    /// Copies the current counter values.
    #[must_use]
    pub fn snapshot(&self) -> UsageSnapshot {
        UsageSnapshot {
            bytes_downloaded: self.bytes_downloaded.load(Ordering::Relaxed),
            bytes_uploaded: self.bytes_uploaded.load(Ordering::Relaxed),
            external_calls: self.external_calls.load(Ordering::Relaxed),
            pixels_processed: self.pixels_processed.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`ResourceUsage`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageSnapshot {
    /// Bytes fetched from the artifact store.
    pub bytes_downloaded: u64,
    /// Bytes written to the artifact store.
    pub bytes_uploaded: u64,
    /// Vision service and tool invocations.
    pub external_calls: u64,
    /// Pixels run through raster algorithms.
    pub pixels_processed: u64,
}

/// What the reporter records when a job reaches a terminal status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobMetrics {
    /// The job.
    pub job_id: JobId,
    /// Its stage.
    pub job_type: JobType,
    /// Terminal status.
    pub status: JobStatus,
    /// Failure class when failed.
    pub error_class: Option<ErrorClass>,
    /// Processing time; absent for jobs that never started.
    pub duration_ms: Option<f64>,
    /// Time between enqueue and claim.
    pub queue_wait_ms: Option<f64>,
    /// Resource counters.
    pub usage: UsageSnapshot,
}

impl JobMetrics {
    /// Converts to a JSON payload for event sinks.
    #[must_use]
    pub fn to_payload(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}
