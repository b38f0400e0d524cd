//! Assertions over job records and the transition log.

use crate::core::{ErrorClass, Job, JobEvent, JobStatus};

/// Asserts that the job has the expected status.
pub fn assert_job_status(job: &Job, expected: JobStatus) {
    assert_eq!(
        job.status, expected,
        "Expected job {} to be {expected}, got {} (error: {:?})",
        job.id, job.status, job.error
    );
}

/// Asserts that the job completed with an output and no error.
pub fn assert_job_completed(job: &Job) {
    assert_job_status(job, JobStatus::Completed);
    assert!(job.output.is_some(), "Completed job {} has no output", job.id);
    assert!(job.error.is_none(), "Completed job {} carries an error", job.id);
    assert!(job.completed_at.is_some(), "Completed job {} has no completed_at", job.id);
}

/// Asserts that the job failed with the expected error class.
pub fn assert_job_failed(job: &Job, class: ErrorClass) {
    assert_job_status(job, JobStatus::Failed);
    assert!(job.output.is_none(), "Failed job {} carries an output", job.id);
    let error = job
        .error
        .as_ref()
        .unwrap_or_else(|| panic!("Failed job {} has no error", job.id));
    assert_eq!(error.class, class, "Unexpected error class: {}", error.message);
    assert!(!error.message.trim().is_empty(), "Failed job {} has a blank error", job.id);
}

/// Asserts the statuses of a job's events and that `seq` strictly increases.
pub fn assert_event_sequence(events: &[JobEvent], expected: &[JobStatus]) {
    let statuses: Vec<JobStatus> = events.iter().map(|e| e.status).collect();
    assert_eq!(statuses, expected, "Unexpected transition sequence");
    assert!(
        events.windows(2).all(|w| w[0].seq < w[1].seq),
        "Event seq is not strictly increasing: {:?}",
        events.iter().map(|e| e.seq).collect::<Vec<_>>()
    );
}
