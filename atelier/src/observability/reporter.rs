//! Outcome reporting: per-job metrics and aggregate per-type statistics.

use super::{EventSink, JobMetrics, UsageSnapshot};
use crate::core::{ErrorClass, Job, JobId, JobStatus, JobType};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use tracing::{info, warn};

/// Aggregate outcome statistics for one job type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TypeStats {
    /// Jobs accepted at enqueue.
    pub submitted: u64,
    /// Jobs that completed.
    pub completed: u64,
    /// Jobs that failed, all classes included.
    pub failed: u64,
    /// Failures of class `timeout`.
    pub timed_out: u64,
    /// Failures of class `cancelled`.
    pub cancelled: u64,
    /// Sum of processing time over jobs that started.
    pub total_duration_ms: f64,
    /// Shortest processing time.
    pub min_duration_ms: Option<f64>,
    /// Longest processing time.
    pub max_duration_ms: Option<f64>,
    /// Number of durations summed.
    pub timed_jobs: u64,
    /// Summed resource usage.
    pub usage: UsageSnapshot,
}

impl TypeStats {
    /// Mean processing time over jobs that started.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn mean_duration_ms(&self) -> Option<f64> {
        (self.timed_jobs > 0).then(|| self.total_duration_ms / self.timed_jobs as f64)
    }

    /// Jobs that reached a terminal status.
    #[must_use]
    pub fn finished(&self) -> u64 {
        self.completed + self.failed
    }

    fn absorb(&mut self, metrics: &JobMetrics) {
        match metrics.status {
            JobStatus::Completed => self.completed += 1,
            JobStatus::Failed => {
                self.failed += 1;
                match metrics.error_class {
                    Some(ErrorClass::Timeout) => self.timed_out += 1,
                    Some(ErrorClass::Cancelled) => self.cancelled += 1,
                    _ => {}
                }
            }
            JobStatus::Pending | JobStatus::Processing => return,
        }
        if let Some(d) = metrics.duration_ms {
            self.timed_jobs += 1;
            self.total_duration_ms += d;
            self.min_duration_ms = Some(self.min_duration_ms.map_or(d, |m| m.min(d)));
            self.max_duration_ms = Some(self.max_duration_ms.map_or(d, |m| m.max(d)));
        }
        self.usage.bytes_downloaded += metrics.usage.bytes_downloaded;
        self.usage.bytes_uploaded += metrics.usage.bytes_uploaded;
        self.usage.external_calls += metrics.usage.external_calls;
        self.usage.pixels_processed += metrics.usage.pixels_processed;
    }
}

/// Per-job metrics kept by a reporter unless configured otherwise.
pub const DEFAULT_METRICS_RETENTION: usize = 10_000;

/// Per-job metrics, oldest evicted first once `capacity` is reached.
#[derive(Debug, Default)]
struct MetricsLog {
    by_id: HashMap<JobId, JobMetrics>,
    order: VecDeque<JobId>,
    capacity: usize,
}

impl MetricsLog {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            ..Self::default()
        }
    }

    fn insert(&mut self, metrics: JobMetrics) {
        if self.capacity == 0 {
            return;
        }
        let id = metrics.job_id;
        if self.by_id.insert(id, metrics).is_none() {
            self.order.push_back(id);
        }
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.by_id.remove(&oldest);
            }
        }
    }

    fn remove(&mut self, id: JobId) -> Option<JobMetrics> {
        let metrics = self.by_id.remove(&id)?;
        self.order.retain(|queued| *queued != id);
        Some(metrics)
    }
}

/// Records outcomes and forwards lifecycle events to a sink.
///
/// Aggregate statistics are unbounded; per-job metrics keep only the most
/// recent [`DEFAULT_METRICS_RETENTION`] jobs (see [`Reporter::with_retention`]).
pub struct Reporter {
    sink: Arc<dyn EventSink>,
    stats: RwLock<BTreeMap<JobType, TypeStats>>,
    metrics: RwLock<MetricsLog>,
}

impl std::fmt::Debug for Reporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reporter")
            .field("stats", &*self.stats.read())
            .field("jobs_recorded", &self.metrics.read().by_id.len())
            .finish_non_exhaustive()
    }
}

impl Reporter {
    /// Creates a reporter emitting to `sink`.
    #[must_use]
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self {
            sink,
            stats: RwLock::new(BTreeMap::new()),
            metrics: RwLock::new(MetricsLog::with_capacity(DEFAULT_METRICS_RETENTION)),
        }
    }

    /// Keeps per-job metrics for at most `capacity` jobs. Zero disables
    /// per-job retention; aggregates are unaffected.
    #[must_use]
    pub fn with_retention(self, capacity: usize) -> Self {
        *self.metrics.write() = MetricsLog::with_capacity(capacity);
        self
    }

    /// Emits the `job.<status>` event for a transition.
    pub fn transition(&self, job: &Job) {
        let mut payload = serde_json::json!({
            "job_id": job.id.to_string(),
            "job_type": job.job_type,
            "status": job.status,
        });
        if let Some(ref error) = job.error {
            payload["error"] = serde_json::json!(error);
        }
        if job.status == JobStatus::Pending {
            self.stats.write().entry(job.job_type).or_default().submitted += 1;
        }
        self.sink.try_emit(&format!("job.{}", job.status), payload);
    }

    /// Records a terminal job and returns its metrics.
    pub fn record(&self, job: &Job, usage: UsageSnapshot) -> JobMetrics {
        let metrics = JobMetrics {
            job_id: job.id,
            job_type: job.job_type,
            status: job.status,
            error_class: job.error.as_ref().map(|e| e.class),
            duration_ms: job.duration_ms(),
            queue_wait_ms: job.queue_wait_ms(),
            usage,
        };
        if !job.status.is_terminal() {
            warn!(job_id = %job.id, status = %job.status, "Recording metrics for a non-terminal job");
        }

        self.stats.write().entry(job.job_type).or_default().absorb(&metrics);
        self.metrics.write().insert(metrics.clone());

        info!(
            job_id = %job.id,
            job_type = %job.job_type,
            status = %job.status,
            duration_ms = metrics.duration_ms.unwrap_or_default(),
            bytes_uploaded = usage.bytes_uploaded,
            "Job finished"
        );
        self.sink.try_emit("job.metrics", metrics.to_payload());
        metrics
    }

    /// Returns the metrics recorded for a job.
    #[must_use]
    pub fn metrics(&self, id: JobId) -> Option<JobMetrics> {
        self.metrics.read().by_id.get(&id).cloned()
    }

    /// Removes and returns the metrics recorded for a job.
    pub fn take_metrics(&self, id: JobId) -> Option<JobMetrics> {
        self.metrics.write().remove(id)
    }

    /// Returns aggregate statistics keyed by job type.
    #[must_use]
    pub fn stats(&self) -> BTreeMap<JobType, TypeStats> {
        self.stats.read().clone()
    }

    /// Returns aggregate statistics for one job type.
    #[must_use]
    pub fn stats_for(&self, job_type: JobType) -> TypeStats {
        self.stats.read().get(&job_type).cloned().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ExportArtifact, ExportInput, JobError, JobInput, JobOutput, MeshFormat};
    use crate::observability::CollectingEventSink;
    use chrono::{Duration, Utc};

    fn export_job() -> Job {
        Job::new(JobInput::Export(ExportInput {
            mesh_job_id: JobId::new(),
            formats: vec![MeshFormat::Obj],
        }))
    }

    fn finished(ms: i64, error: Option<ErrorClass>) -> Job {
        let mut job = export_job();
        let start = Utc::now();
        job.start(start).unwrap();
        let end = start + Duration::milliseconds(ms);
        match error {
            Some(class) => job.fail(JobError::new(class, "boom"), end).unwrap(),
            None => {
                let output = JobOutput::Export(ExportArtifact {
                    mesh_job_id: job.id,
                    encodings: vec![],
                });
                job.complete(output, end).unwrap();
            }
        }
        job
    }

    #[test]
    fn test_aggregates_durations_and_classes() {
        let reporter = Reporter::new(Arc::new(CollectingEventSink::new()));
        reporter.record(&finished(100, None), UsageSnapshot::default());
        reporter.record(&finished(300, None), UsageSnapshot::default());
        reporter.record(&finished(50, Some(ErrorClass::Timeout)), UsageSnapshot::default());

        let stats = reporter.stats_for(JobType::Export);
        assert_eq!(stats.completed, 2);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.timed_out, 1);
        assert_eq!(stats.min_duration_ms, Some(50.0));
        assert_eq!(stats.max_duration_ms, Some(300.0));
        assert_eq!(stats.mean_duration_ms(), Some(150.0));
        assert_eq!(stats.finished(), 3);
    }

    #[test]
    fn test_never_started_job_has_no_duration() {
        let reporter = Reporter::new(Arc::new(CollectingEventSink::new()));
        let mut job = export_job();
        job.fail(JobError::new(ErrorClass::Cancelled, "Cancelled: user"), Utc::now())
            .unwrap();
        let metrics = reporter.record(&job, UsageSnapshot::default());
        assert_eq!(metrics.duration_ms, None);

        let stats = reporter.stats_for(JobType::Export);
        assert_eq!(stats.cancelled, 1);
        assert_eq!(stats.mean_duration_ms(), None);
    }

    #[test]
    fn test_per_job_metrics_are_bounded() {
        let reporter = Reporter::new(Arc::new(CollectingEventSink::new())).with_retention(2);
        let jobs: Vec<Job> = (0..3).map(|i| finished(10 * (i + 1), None)).collect();
        for job in &jobs {
            reporter.record(job, UsageSnapshot::default());
        }

        assert!(reporter.metrics(jobs[0].id).is_none());
        assert!(reporter.metrics(jobs[1].id).is_some());
        assert!(reporter.metrics(jobs[2].id).is_some());
        assert_eq!(reporter.stats_for(JobType::Export).completed, 3);

        let taken = reporter.take_metrics(jobs[1].id).unwrap();
        assert_eq!(taken.job_id, jobs[1].id);
        assert!(reporter.metrics(jobs[1].id).is_none());
        assert!(reporter.take_metrics(jobs[1].id).is_none());
    }

    #[test]
    fn test_events_reach_the_sink() {
        let sink = Arc::new(CollectingEventSink::new());
        let reporter = Reporter::new(sink.clone());
        let job = export_job();
        reporter.transition(&job);
        let usage = UsageSnapshot {
            bytes_uploaded: 10,
            ..UsageSnapshot::default()
        };
        let done = finished(10, None);
        reporter.record(&done, usage);

        assert_eq!(sink.events_of_type("job.pending").len(), 1);
        let metrics = sink.events_of_type("job.metrics");
        assert_eq!(metrics[0].1["usage"]["bytes_uploaded"], 10);
        assert_eq!(reporter.stats_for(JobType::Export).submitted, 1);
        assert!(reporter.metrics(done.id).is_some());
    }
}
