//! The queue runtime: per-type queues, bounded worker pools, timeouts and
//! cooperative cancellation.

use super::AtelierConfig;
use crate::cancellation::CancellationToken;
use crate::core::{ErrorClass, Job, JobError, JobId, JobInput, JobOutput, JobStatus, JobType};
use crate::errors::{AtelierError, InvalidTransitionError, Result};
use crate::observability::{EventSink, JobMetrics, Reporter, SpanTimer, TypeStats, UsageSnapshot};
use crate::stages::{
    ExportStage, MeshStage, RenderStage, SegmentStage, Stage, StageContext, StagePorts, StainStage,
};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

#[derive(Debug)]
struct Stages {
    segment: SegmentStage,
    stain: StainStage,
    mesh: MeshStage,
    render: RenderStage,
    export: ExportStage,
}

impl Stages {
    fn from_config(config: &AtelierConfig) -> Self {
        Self {
            segment: SegmentStage::new(),
            stain: StainStage::new(config.stain),
            mesh: MeshStage::new(config.mesh.clone()),
            render: RenderStage::new(config.render),
            export: ExportStage::new(),
        }
    }

    async fn run(&self, ctx: &StageContext, input: &JobInput) -> Result<JobOutput> {
        match input {
            JobInput::Segment(input) => self.segment.execute(ctx, input).await.map(JobOutput::Segment),
            JobInput::Stain(input) => self.stain.execute(ctx, input).await.map(JobOutput::Stain),
            JobInput::Mesh(input) => self.mesh.execute(ctx, input).await.map(JobOutput::Mesh),
            JobInput::Render(input) => self.render.execute(ctx, input).await.map(JobOutput::Render),
            JobInput::Export(input) => self.export.execute(ctx, input).await.map(JobOutput::Export),
        }
    }
}

struct Inner {
    config: AtelierConfig,
    ports: StagePorts,
    stages: Stages,
    reporter: Reporter,
    queues: Mutex<Option<HashMap<JobType, mpsc::UnboundedSender<JobId>>>>,
    tokens: DashMap<JobId, Arc<CancellationToken>>,
    watchers: DashMap<JobId, watch::Sender<JobStatus>>,
    accepting: AtomicBool,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

/// Routes jobs to their stage on a per-type, concurrency-bounded pool.
///
/// Cloning is cheap; clones share the same queues and pools.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("accepting", &self.inner.accepting.load(Ordering::SeqCst))
            .field("in_flight", &self.inner.tokens.len())
            .field("ports", &self.inner.ports)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    /// Starts one queue loop per job type. Must be called inside a Tokio
    /// runtime.
    pub fn start(config: AtelierConfig, ports: StagePorts, sink: Arc<dyn EventSink>) -> Result<Self> {
        config.validate()?;
        let mut senders = HashMap::new();
        let mut receivers = Vec::new();
        for job_type in JobType::ALL {
            let (tx, rx) = mpsc::unbounded_channel();
            senders.insert(job_type, tx);
            receivers.push((job_type, rx));
        }

        let inner = Arc::new(Inner {
            stages: Stages::from_config(&config),
            config,
            ports,
            reporter: Reporter::new(sink),
            queues: Mutex::new(Some(senders)),
            tokens: DashMap::new(),
            watchers: DashMap::new(),
            accepting: AtomicBool::new(true),
            workers: Mutex::new(Vec::new()),
        });

        let handles = receivers
            .into_iter()
            .map(|(job_type, rx)| tokio::spawn(run_queue(inner.clone(), job_type, rx)))
            .collect();
        *inner.workers.lock() = handles;
        info!(pools = ?inner.config.pools, "Dispatcher started");
        Ok(Self { inner })
    }

    /// Validates and queues a job submitted as a type name plus a JSON
    /// payload. Nothing is persisted when the type or input is rejected.
    pub async fn enqueue(&self, job_type: &str, input: serde_json::Value) -> Result<JobId> {
        let parsed: JobType = job_type
            .parse()
            .map_err(|_| AtelierError::UnknownJobType(job_type.to_string()))?;
        let input = JobInput::from_parts(parsed, input)?;
        self.submit(input).await
    }

    /// Validates and queues a typed job input.
    pub async fn submit(&self, input: JobInput) -> Result<JobId> {
        if !self.inner.accepting.load(Ordering::SeqCst) {
            return Err(AtelierError::ShutDown);
        }
        input.validate()?;

        let job = Job::new(input);
        let (id, job_type) = (job.id, job.job_type);
        self.inner.ports.jobs.insert(job.clone()).await?;
        self.inner.tokens.insert(id, Arc::new(CancellationToken::new()));
        let (tx, _) = watch::channel(JobStatus::Pending);
        self.inner.watchers.insert(id, tx);
        self.inner.reporter.transition(&job);

        let queued = self
            .inner
            .queues
            .lock()
            .as_ref()
            .and_then(|queues| queues.get(&job_type))
            .is_some_and(|tx| tx.send(id).is_ok());
        if !queued {
            self.inner
                .finalize_error(id, &AtelierError::ShutDown, UsageSnapshot::default())
                .await;
            return Err(AtelierError::ShutDown);
        }
        debug!(job_id = %id, %job_type, fingerprint = %job.fingerprint, "Job queued");
        Ok(id)
    }

    /// Returns a snapshot of a job.
    pub async fn get_status(&self, id: JobId) -> Result<Job> {
        self.inner.ports.jobs.get(id).await.ok_or(AtelierError::JobNotFound(id))
    }

    /// Cancels a job.
    ///
    /// A pending job fails immediately with class `cancelled`. A running
    /// job is flagged; the stage honors the flag at its next checkpoint.
    /// A terminal job cannot be cancelled.
    pub async fn cancel(&self, id: JobId, reason: &str) -> Result<Job> {
        let mut job = self.get_status(id).await?;
        if job.status == JobStatus::Pending {
            let error = JobError::new(ErrorClass::Cancelled, format!("Cancelled: {reason}"));
            match self.inner.ports.jobs.cancel_pending(id, error).await {
                Ok(failed) => {
                    if let Some(token) = self.inner.tokens.get(&id) {
                        token.cancel(reason);
                    }
                    self.inner.finish(&failed, UsageSnapshot::default());
                    return Ok(failed);
                }
                Err(AtelierError::InvalidTransition(e)) => {
                    debug!(job_id = %id, error = %e, "Job was claimed before it could be cancelled");
                    job = self.get_status(id).await?;
                }
                Err(e) => return Err(e),
            }
        }
        match job.status {
            JobStatus::Pending | JobStatus::Processing => {
                if let Some(token) = self.inner.tokens.get(&id) {
                    if token.cancel(reason) {
                        info!(job_id = %id, reason, "Cancellation requested");
                    }
                }
                Ok(job)
            }
            JobStatus::Completed | JobStatus::Failed => {
                Err(InvalidTransitionError::new(id, job.status, JobStatus::Failed).into())
            }
        }
    }

    /// Waits until the job is terminal and returns it.
    pub async fn wait_for(&self, id: JobId) -> Result<Job> {
        let receiver = self.inner.watchers.get(&id).map(|tx| tx.subscribe());
        if let Some(mut rx) = receiver {
            while !rx.borrow_and_update().is_terminal() {
                if rx.changed().await.is_err() {
                    break;
                }
            }
        }
        self.get_status(id).await
    }

    /// Aggregate statistics per job type.
    #[must_use]
    pub fn stats(&self) -> BTreeMap<JobType, TypeStats> {
        self.inner.reporter.stats()
    }

    /// Metrics recorded for a finished job.
    #[must_use]
    pub fn metrics(&self, id: JobId) -> Option<JobMetrics> {
        self.inner.reporter.metrics(id)
    }

    /// Removes and returns the metrics recorded for a finished job.
    pub fn take_metrics(&self, id: JobId) -> Option<JobMetrics> {
        self.inner.reporter.take_metrics(id)
    }

    /// Returns true until [`Dispatcher::shutdown`] is called.
    #[must_use]
    pub fn is_accepting(&self) -> bool {
        self.inner.accepting.load(Ordering::SeqCst)
    }

    /// Stops accepting jobs and waits for queued and running jobs to
    /// finish.
    pub async fn shutdown(&self) {
        if !self.inner.accepting.swap(false, Ordering::SeqCst) {
            return;
        }
        drop(self.inner.queues.lock().take());
        let workers: Vec<_> = std::mem::take(&mut *self.inner.workers.lock());
        for result in futures::future::join_all(workers).await {
            if let Err(e) = result {
                error!(error = %e, "Queue loop panicked");
            }
        }
        info!("Dispatcher shut down");
    }
}

async fn run_queue(inner: Arc<Inner>, job_type: JobType, mut rx: mpsc::UnboundedReceiver<JobId>) {
    let pool = inner.config.pools.get(job_type);
    let semaphore = Arc::new(Semaphore::new(pool.concurrency));
    let mut running: Vec<JoinHandle<()>> = Vec::new();

    while let Some(id) = rx.recv().await {
        let Ok(permit) = semaphore.clone().acquire_owned().await else {
            break;
        };
        let inner = inner.clone();
        running.retain(|handle| !handle.is_finished());
        running.push(tokio::spawn(async move {
            inner.process(id, job_type).await;
            drop(permit);
        }));
    }

    futures::future::join_all(running).await;
    debug!(%job_type, "Queue drained");
}

impl Inner {
    async fn process(&self, id: JobId, job_type: JobType) {
        let job = match self.ports.jobs.claim(id).await {
            Ok(job) => job,
            Err(e) => {
                debug!(job_id = %id, error = %e, "Skipping job that could not be claimed");
                self.tokens.remove(&id);
                return;
            }
        };
        self.reporter.transition(&job);
        self.notify(&job);

        let token = self
            .tokens
            .get(&id)
            .map(|t| Arc::clone(t.value()))
            .unwrap_or_else(|| Arc::new(CancellationToken::new()));
        let ctx = StageContext::new(id, job_type, self.ports.clone()).with_cancel(token.clone());
        let pool = self.config.pools.get(job_type);
        let timer = SpanTimer::start(job_type.as_str());
        info!(job_id = %id, %job_type, "Stage started");

        let outcome = match tokio::time::timeout(pool.timeout(), self.stages.run(&ctx, &job.input)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                token.cancel("timeout");
                Err(AtelierError::Timeout {
                    seconds: pool.timeout_seconds,
                })
            }
        };

        let finished = match outcome {
            Ok(output) => self.ports.jobs.complete(id, output).await,
            Err(err) => {
                warn!(
                    job_id = %id,
                    %job_type,
                    class = %err.class(),
                    error = %err,
                    duration_ms = timer.elapsed_ms(),
                    "Stage failed"
                );
                self.ports.jobs.fail(id, JobError::from(&err)).await
            }
        };
        match finished {
            Ok(job) => self.finish(&job, ctx.usage.snapshot()),
            Err(AtelierError::InvalidTransition(e)) => {
                debug!(job_id = %id, error = %e, "Job was finalized elsewhere");
                self.tokens.remove(&id);
            }
            Err(e) => {
                error!(job_id = %id, error = %e, "Could not persist job outcome");
                self.tokens.remove(&id);
            }
        }
    }

    async fn finalize_error(&self, id: JobId, err: &AtelierError, usage: UsageSnapshot) {
        match self.ports.jobs.fail(id, JobError::from(err)).await {
            Ok(job) => self.finish(&job, usage),
            Err(e) => error!(job_id = %id, error = %e, "Could not persist job failure"),
        }
    }

    fn finish(&self, job: &Job, usage: UsageSnapshot) {
        self.reporter.transition(job);
        self.reporter.record(job, usage);
        self.tokens.remove(&job.id);
        self.notify(job);
    }

    fn notify(&self, job: &Job) {
        if let Some(tx) = self.watchers.get(&job.id) {
            tx.send_replace(job.status);
        }
        if job.status.is_terminal() {
            self.watchers.remove(&job.id);
        }
    }
}
