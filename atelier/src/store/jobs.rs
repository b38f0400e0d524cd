//! Job persistence and the append-only transition log.

use crate::core::{Job, JobError, JobEvent, JobId, JobOutput, JobStatus, JobType};
use crate::errors::{AtelierError, InvalidTransitionError, Result};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::debug;

/// Persistence for job records.
///
/// Every status change goes through [`JobStore::claim`],
/// [`JobStore::complete`], [`JobStore::fail`] or [`JobStore::cancel_pending`];
/// implementations apply the transition and append its event atomically,
/// so two racing claims see exactly one winner.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Persists a new pending job and logs its creation.
    async fn insert(&self, job: Job) -> Result<()>;

    /// Returns a snapshot of a job.
    async fn get(&self, id: JobId) -> Option<Job>;

    /// `pending → processing`. The loser of a race gets `InvalidTransition`.
    async fn claim(&self, id: JobId) -> Result<Job>;

    /// `processing → completed`.
    async fn complete(&self, id: JobId, output: JobOutput) -> Result<Job>;

    /// `pending | processing → failed`.
    async fn fail(&self, id: JobId, error: JobError) -> Result<Job>;

    /// `pending → failed`, checked and applied in one step. A job that has
    /// already been claimed gets `InvalidTransition` and is left untouched.
    async fn cancel_pending(&self, id: JobId, error: JobError) -> Result<Job>;

    /// Returns the transition log, optionally filtered to one job, in
    /// sequence order.
    async fn events(&self, id: Option<JobId>) -> Vec<JobEvent>;

    /// Returns all jobs of a type in a given status.
    async fn list(&self, job_type: Option<JobType>, status: Option<JobStatus>) -> Vec<Job>;
}

#[derive(Debug, Default)]
struct StoreState {
    jobs: HashMap<JobId, Job>,
    log: Vec<JobEvent>,
    next_seq: u64,
}

impl StoreState {
    fn record(&mut self, job: &Job) {
        self.next_seq += 1;
        let at = match job.status {
            JobStatus::Pending => job.created_at,
            JobStatus::Processing => job.started_at.unwrap_or_else(Utc::now),
            JobStatus::Completed | JobStatus::Failed => job.completed_at.unwrap_or_else(Utc::now),
        };
        let mut event = JobEvent::new(self.next_seq, job.id, job.status, at);
        if let Some(ref error) = job.error {
            event = event.with_detail(error.message.clone());
        }
        self.log.push(event);
    }

    fn transition<F>(&mut self, id: JobId, apply: F) -> Result<Job>
    where
        F: FnOnce(&mut Job) -> std::result::Result<(), InvalidTransitionError>,
    {
        let job = self.jobs.get_mut(&id).ok_or(AtelierError::JobNotFound(id))?;
        apply(job)?;
        let snapshot = job.clone();
        self.record(&snapshot);
        debug!(job_id = %id, status = %snapshot.status, seq = self.next_seq, "Job transitioned");
        Ok(snapshot)
    }
}

/// An in-process job store guarded by a single lock.
///
/// The lock covers both the record map and the event log, so log order is
/// sequence order.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    state: Mutex<StoreState>,
}

impl InMemoryJobStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored jobs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().jobs.len()
    }

    /// Returns true if no job has been stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn insert(&self, job: Job) -> Result<()> {
        let mut state = self.state.lock();
        if state.jobs.contains_key(&job.id) {
            return Err(AtelierError::Internal(format!("job {} already exists", job.id)));
        }
        state.record(&job);
        state.jobs.insert(job.id, job);
        Ok(())
    }

    async fn get(&self, id: JobId) -> Option<Job> {
        self.state.lock().jobs.get(&id).cloned()
    }

    async fn claim(&self, id: JobId) -> Result<Job> {
        self.state.lock().transition(id, |job| job.start(Utc::now()))
    }

    async fn complete(&self, id: JobId, output: JobOutput) -> Result<Job> {
        self.state
            .lock()
            .transition(id, |job| job.complete(output, Utc::now()))
    }

    async fn fail(&self, id: JobId, error: JobError) -> Result<Job> {
        self.state
            .lock()
            .transition(id, |job| job.fail(error, Utc::now()))
    }

    async fn cancel_pending(&self, id: JobId, error: JobError) -> Result<Job> {
        self.state.lock().transition(id, |job| {
            if job.status != JobStatus::Pending {
                return Err(InvalidTransitionError::new(job.id, job.status, JobStatus::Failed));
            }
            job.fail(error, Utc::now())
        })
    }

    async fn events(&self, id: Option<JobId>) -> Vec<JobEvent> {
        let state = self.state.lock();
        state
            .log
            .iter()
            .filter(|e| id.map_or(true, |id| e.job_id == id))
            .cloned()
            .collect()
    }

    async fn list(&self, job_type: Option<JobType>, status: Option<JobStatus>) -> Vec<Job> {
        let state = self.state.lock();
        let mut jobs: Vec<Job> = state
            .jobs
            .values()
            .filter(|j| job_type.map_or(true, |t| j.job_type == t))
            .filter(|j| status.map_or(true, |s| j.status == s))
            .cloned()
            .collect();
        jobs.sort_by_key(|j| j.id);
        jobs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ErrorClass, ExportArtifact, ImageSet, JobInput, MeshInput, MeshMode};
    use std::sync::Arc;

    fn pending_job() -> Job {
        Job::new(JobInput::Mesh(MeshInput {
            images: ImageSet::single("mem://a.jpg"),
            mode: MeshMode::SingleImage,
        }))
    }

    fn output(id: JobId) -> JobOutput {
        JobOutput::Export(ExportArtifact {
            mesh_job_id: id,
            encodings: vec![],
        })
    }

    #[tokio::test]
    async fn test_lifecycle_logs_every_transition() {
        let store = InMemoryJobStore::new();
        let job = pending_job();
        let id = job.id;
        store.insert(job).await.unwrap();

        store.claim(id).await.unwrap();
        let done = store.complete(id, output(id)).await.unwrap();
        assert_eq!(done.status, JobStatus::Completed);

        let statuses: Vec<_> = store.events(Some(id)).await.iter().map(|e| e.status).collect();
        assert_eq!(
            statuses,
            vec![JobStatus::Pending, JobStatus::Processing, JobStatus::Completed]
        );
    }

    #[tokio::test]
    async fn test_seq_is_store_wide_and_increasing() {
        let store = InMemoryJobStore::new();
        let a = pending_job();
        let b = pending_job();
        let (a_id, b_id) = (a.id, b.id);
        store.insert(a).await.unwrap();
        store.insert(b).await.unwrap();
        store.claim(b_id).await.unwrap();
        store.claim(a_id).await.unwrap();

        let seqs: Vec<u64> = store.events(None).await.iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![1, 2, 3, 4]);
        assert_eq!(store.events(Some(a_id)).await.len(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_claims_have_one_winner() {
        let store = Arc::new(InMemoryJobStore::new());
        let job = pending_job();
        let id = job.id;
        store.insert(job).await.unwrap();

        let first = tokio::spawn({
            let store = store.clone();
            async move { store.claim(id).await }
        });
        let second = tokio::spawn({
            let store = store.clone();
            async move { store.claim(id).await }
        });
        let results = [first.await.unwrap(), second.await.unwrap()];

        let wins = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(wins, 1);
        let loser = results.iter().find_map(|r| r.as_ref().err()).unwrap();
        assert!(matches!(loser, AtelierError::InvalidTransition(_)));
        assert_eq!(loser.class(), ErrorClass::InvalidTransition);
    }

    #[tokio::test]
    async fn test_failed_event_carries_detail() {
        let store = InMemoryJobStore::new();
        let job = pending_job();
        let id = job.id;
        store.insert(job).await.unwrap();
        store
            .fail(id, JobError::new(ErrorClass::Cancelled, "Cancelled: user"))
            .await
            .unwrap();

        let events = store.events(Some(id)).await;
        assert_eq!(events.last().unwrap().detail.as_deref(), Some("Cancelled: user"));

        let err = store.claim(id).await.unwrap_err();
        assert!(matches!(err, AtelierError::InvalidTransition(_)));
    }

    #[tokio::test]
    async fn test_cancel_pending_leaves_claimed_job_alone() {
        let store = InMemoryJobStore::new();
        let queued = pending_job();
        let claimed = pending_job();
        let (queued_id, claimed_id) = (queued.id, claimed.id);
        store.insert(queued).await.unwrap();
        store.insert(claimed).await.unwrap();
        store.claim(claimed_id).await.unwrap();

        let cancelled = store
            .cancel_pending(queued_id, JobError::new(ErrorClass::Cancelled, "Cancelled: user"))
            .await
            .unwrap();
        assert_eq!(cancelled.status, JobStatus::Failed);
        assert!(cancelled.started_at.is_none());

        let err = store
            .cancel_pending(claimed_id, JobError::new(ErrorClass::Cancelled, "Cancelled: user"))
            .await
            .unwrap_err();
        assert!(matches!(err, AtelierError::InvalidTransition(_)));
        assert_eq!(store.get(claimed_id).await.unwrap().status, JobStatus::Processing);
        let statuses: Vec<_> = store.events(Some(claimed_id)).await.iter().map(|e| e.status).collect();
        assert_eq!(statuses, vec![JobStatus::Pending, JobStatus::Processing]);
    }

    #[tokio::test]
    async fn test_unknown_job() {
        let store = InMemoryJobStore::new();
        let err = store.claim(JobId::new()).await.unwrap_err();
        assert!(matches!(err, AtelierError::JobNotFound(_)));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_insert_rejected() {
        let store = InMemoryJobStore::new();
        let job = pending_job();
        store.insert(job.clone()).await.unwrap();
        assert!(store.insert(job).await.is_err());
        assert_eq!(store.len(), 1);
        assert_eq!(store.list(Some(JobType::Mesh), Some(JobStatus::Pending)).await.len(), 1);
        assert!(store.list(Some(JobType::Stain), None).await.is_empty());
    }
}
