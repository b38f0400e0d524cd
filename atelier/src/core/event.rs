//! Job lifecycle event records.

use super::{JobId, JobStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One entry of the append-only transition log.
///
/// `seq` is assigned by the job store and increases monotonically across
/// every job the store holds, so the log can be replayed in order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobEvent {
    /// Store-wide sequence number.
    pub seq: u64,
    /// The job that transitioned.
    pub job_id: JobId,
    /// The status entered.
    pub status: JobStatus,
    /// When the transition happened.
    pub at: DateTime<Utc>,
    /// Error text for transitions into `failed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl JobEvent {
    /// Creates a new event record.
    #[must_use]
    pub fn new(seq: u64, job_id: JobId, status: JobStatus, at: DateTime<Utc>) -> Self {
        Self {
            seq,
            job_id,
            status,
            at,
            detail: None,
        }
    }

    /// Attaches a detail message.
    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// Returns the dotted event name used by event sinks.
    #[must_use]
    pub fn event_type(&self) -> String {
        format!("job.{}", self.status)
    }

    /// Converts the event to a JSON payload for event sinks.
    #[must_use]
    pub fn to_payload(&self) -> serde_json::Value {
        let mut payload = serde_json::json!({
            "seq": self.seq,
            "job_id": self.job_id.to_string(),
            "status": self.status,
            "at": self.at.to_rfc3339(),
        });
        if let Some(ref detail) = self.detail {
            payload["detail"] = serde_json::json!(detail);
        }
        payload
    }
}
