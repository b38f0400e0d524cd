//! End-to-end tests of the dispatcher over in-memory ports and fake tools.

#[cfg(test)]
mod tests {
    use crate::core::{
        BoundingBox, ErrorClass, JobId, JobOutput, JobStatus, JobType, MapKind, MeshEncoding, MeshFormat,
    };
    use crate::dispatcher::{AtelierConfig, Dispatcher};
    use crate::errors::{AtelierError, ValidationError};
    use crate::imaging::codec;
    use crate::imaging::color::Lab;
    use crate::observability::CollectingEventSink;
    use crate::core::{Job, JobError, JobEvent};
    use crate::errors::Result;
    use crate::observability::NoOpEventSink;
    use crate::store::{ArtifactStore, InMemoryJobStore, JobStore};
    use async_trait::async_trait;
    use crate::testing::{
        assert_event_sequence, assert_job_completed, assert_job_failed, ScriptedVisionService, TestFixture,
    };
    use crate::vision::RegionDetection;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio_test::{assert_err, assert_ok};

    fn start(fixture: &TestFixture, config: AtelierConfig) -> (Dispatcher, Arc<CollectingEventSink>) {
        let sink = Arc::new(CollectingEventSink::new());
        let dispatcher = Dispatcher::start(config, fixture.ports(), sink.clone()).unwrap();
        (dispatcher, sink)
    }

    fn stain_payload() -> serde_json::Value {
        json!({
            "images": [{"url": TestFixture::WOOD_URL}],
            "target_color": [90, 60, 46],
            "preserve_grain": 0.9,
            "strength": 0.9
        })
    }

    fn mean_lab(bytes: &[u8]) -> Lab {
        let image = codec::decode_rgb(bytes, "test").unwrap();
        let n = image.pixels().len() as f32;
        let (mut l, mut a, mut b) = (0.0, 0.0, 0.0);
        for p in image.pixels() {
            let lab = Lab::from_srgb(p.0);
            l += lab.l;
            a += lab.a;
            b += lab.b;
        }
        Lab { l: l / n, a: a / n, b: b / n }
    }

    /// A job store whose reads return late, like a remote database.
    struct SlowReadJobStore {
        inner: Arc<InMemoryJobStore>,
        read_delay: Duration,
    }

    #[async_trait]
    impl JobStore for SlowReadJobStore {
        async fn insert(&self, job: Job) -> Result<()> {
            self.inner.insert(job).await
        }

        async fn get(&self, id: JobId) -> Option<Job> {
            let job = self.inner.get(id).await;
            tokio::time::sleep(self.read_delay).await;
            job
        }

        async fn claim(&self, id: JobId) -> Result<Job> {
            self.inner.claim(id).await
        }

        async fn complete(&self, id: JobId, output: JobOutput) -> Result<Job> {
            self.inner.complete(id, output).await
        }

        async fn fail(&self, id: JobId, error: JobError) -> Result<Job> {
            self.inner.fail(id, error).await
        }

        async fn cancel_pending(&self, id: JobId, error: JobError) -> Result<Job> {
            self.inner.cancel_pending(id, error).await
        }

        async fn events(&self, id: Option<JobId>) -> Vec<JobEvent> {
            self.inner.events(id).await
        }

        async fn list(&self, job_type: Option<JobType>, status: Option<JobStatus>) -> Vec<Job> {
            self.inner.list(job_type, status).await
        }
    }

    async fn wait_until_processing(dispatcher: &Dispatcher, id: JobId) {
        for _ in 0..500 {
            if dispatcher.get_status(id).await.unwrap().status == JobStatus::Processing {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("job {id} never started");
    }

    #[tokio::test]
    async fn test_stain_job_shifts_albedo_towards_brown() {
        let fixture = TestFixture::new();
        let (dispatcher, sink) = start(&fixture, AtelierConfig::default());

        let id = assert_ok!(dispatcher.enqueue("stain", stain_payload()).await);
        let job = dispatcher.wait_for(id).await.unwrap();
        assert_job_completed(&job);

        let Some(JobOutput::Stain(bundle)) = job.output else {
            panic!("expected a texture bundle, got {:?}", job.output);
        };
        assert_eq!((bundle.width, bundle.height), (64, 48));
        let target = Lab::from_srgb([90.0 / 255.0, 60.0 / 255.0, 46.0 / 255.0]);
        let source = mean_lab(&fixture.artifacts.get(TestFixture::WOOD_URL).await.unwrap());
        let albedo = mean_lab(&fixture.artifacts.get(&bundle.map(MapKind::Albedo).url).await.unwrap());
        assert!(albedo.chroma_distance(&target) < source.chroma_distance(&target));

        let events = fixture.jobs.events(Some(id)).await;
        assert_event_sequence(&events, &[JobStatus::Pending, JobStatus::Processing, JobStatus::Completed]);
        assert_eq!(
            sink.types_for_job(&id.to_string()),
            vec!["job.pending", "job.processing", "job.completed", "job.metrics"]
        );
        let metrics = dispatcher.metrics(id).unwrap();
        assert_eq!(metrics.usage.pixels_processed, 64 * 48);
        assert!(metrics.duration_ms.is_some());
        assert_eq!(dispatcher.take_metrics(id), Some(metrics));
        assert!(dispatcher.metrics(id).is_none());
    }

    #[tokio::test]
    async fn test_render_of_missing_mesh_fails_upstream() {
        let fixture = TestFixture::new();
        let (dispatcher, _) = start(&fixture, AtelierConfig::default());

        let missing = JobId::new();
        let id = dispatcher
            .enqueue("render", json!({"mesh_job_id": missing, "frames": 4, "width": 32, "height": 32}))
            .await
            .unwrap();
        let job = dispatcher.wait_for(id).await.unwrap();
        assert_job_failed(&job, ErrorClass::Upstream);
        let message = &job.error.as_ref().unwrap().message;
        assert!(message.contains("MeshNotFound"), "{message}");
        assert!(message.contains(&missing.to_string()));
    }

    #[tokio::test]
    async fn test_rejected_submissions_create_no_record() {
        let fixture = TestFixture::new();
        let (dispatcher, _) = start(&fixture, AtelierConfig::default());

        let err = assert_err!(dispatcher.enqueue("upholster", json!({})).await);
        assert!(matches!(err, AtelierError::UnknownJobType(ref t) if t == "upholster"));

        let err = assert_err!(
            dispatcher
                .enqueue("render", json!({"mesh_job_id": JobId::new(), "frames": 1}))
                .await
        );
        assert!(matches!(
            err,
            AtelierError::Validation(ValidationError::InvalidFrameCount { frames: 1 })
        ));

        let err = assert_err!(
            dispatcher
                .enqueue("mesh", json!({"images": [{"url": "mem://a.jpg"}], "mode": "photogrammetry"}))
                .await
        );
        assert_eq!(err.class(), ErrorClass::Validation);

        let err = assert_err!(dispatcher.enqueue("stain", json!({"images": []})).await);
        assert_eq!(err.class(), ErrorClass::Validation);

        assert!(fixture.jobs.is_empty());
        assert!(fixture.jobs.events(None).await.is_empty());
    }

    #[tokio::test]
    async fn test_timeout_fails_job_and_cancels_work() {
        let fixture = TestFixture::new().with_vision(
            ScriptedVisionService::new()
                .with_default_regions(vec![RegionDetection::new("seat", BoundingBox::new(0.0, 0.0, 8.0, 8.0), 0.9)])
                .with_delay(Duration::from_secs(5)),
        );
        let config = AtelierConfig::default().with_timeout(JobType::Segment, 0.2);
        let (dispatcher, _) = start(&fixture, config);

        let id = dispatcher
            .enqueue("segment", json!({"images": [{"url": TestFixture::WOOD_URL}]}))
            .await
            .unwrap();
        let job = tokio::time::timeout(Duration::from_secs(3), dispatcher.wait_for(id))
            .await
            .expect("timeout policy did not fire")
            .unwrap();
        assert_job_failed(&job, ErrorClass::Timeout);

        let stats = dispatcher.stats();
        assert_eq!(stats[&JobType::Segment].timed_out, 1);
        assert_eq!(stats[&JobType::Segment].failed, 1);
    }

    #[tokio::test]
    async fn test_cancel_pending_job_fails_immediately() {
        let fixture = TestFixture::new().with_vision(
            ScriptedVisionService::new()
                .with_mesh(vec![MeshEncoding::new(MeshFormat::Glb, "mem://gen/a.glb")])
                .with_delay(Duration::from_millis(300)),
        );
        let (dispatcher, _) = start(&fixture, AtelierConfig::default());
        let payload = json!({"images": [{"url": TestFixture::WOOD_URL}], "mode": "single_image"});

        let first = dispatcher.enqueue("mesh", payload.clone()).await.unwrap();
        let second = dispatcher.enqueue("mesh", payload).await.unwrap();
        wait_until_processing(&dispatcher, first).await;

        let cancelled = dispatcher.cancel(second, "customer withdrew").await.unwrap();
        assert_job_failed(&cancelled, ErrorClass::Cancelled);
        assert!(cancelled.started_at.is_none());
        assert!(cancelled.error.as_ref().unwrap().message.contains("customer withdrew"));

        assert_job_completed(&dispatcher.wait_for(first).await.unwrap());
        assert_eq!(dispatcher.wait_for(second).await.unwrap().status, JobStatus::Failed);
        assert_eq!(fixture.vision.mesh_calls(), 1);
        assert_eq!(dispatcher.stats()[&JobType::Mesh].cancelled, 1);
    }

    #[tokio::test]
    async fn test_cancel_of_job_claimed_mid_call_stays_advisory() {
        let fixture = TestFixture::new().with_vision(
            ScriptedVisionService::new()
                .with_mesh(vec![MeshEncoding::new(MeshFormat::Glb, "mem://gen/a.glb")])
                .with_delay(Duration::from_millis(300)),
        );
        let jobs = Arc::new(SlowReadJobStore {
            inner: fixture.jobs.clone(),
            read_delay: Duration::from_millis(100),
        });
        let dispatcher = Dispatcher::start(
            AtelierConfig::default(),
            fixture.ports_with_jobs(jobs),
            Arc::new(NoOpEventSink),
        )
        .unwrap();

        let id = dispatcher
            .enqueue("mesh", json!({"images": [{"url": TestFixture::WOOD_URL}], "mode": "single_image"}))
            .await
            .unwrap();
        // The worker claims the job while the status read is in flight.
        let returned = dispatcher.cancel(id, "user").await.unwrap();
        assert_eq!(returned.status, JobStatus::Processing);
        assert!(returned.started_at.is_some());
        assert!(returned.error.is_none());

        let job = dispatcher.wait_for(id).await.unwrap();
        assert!(job.status.is_terminal());
        if job.status == JobStatus::Failed {
            assert_job_failed(&job, ErrorClass::Cancelled);
        }
        assert_eq!(fixture.vision.mesh_calls(), 1);

        let events = fixture.jobs.events(Some(id)).await;
        assert_eq!(events.len(), 3);
        assert_eq!(events[1].status, JobStatus::Processing);
        assert_eq!(events[2].status, job.status);
    }

    #[tokio::test]
    async fn test_cancel_running_job_is_honored_at_checkpoint() {
        let fixture = TestFixture::new().with_vision(
            ScriptedVisionService::new()
                .with_default_regions(vec![RegionDetection::new("leg", BoundingBox::new(0.0, 0.0, 4.0, 4.0), 0.8)])
                .with_delay(Duration::from_millis(200)),
        );
        let (dispatcher, _) = start(&fixture, AtelierConfig::default());
        let id = dispatcher
            .enqueue(
                "segment",
                json!({"images": [{"url": TestFixture::WOOD_URL}, {"url": TestFixture::WOOD_URL}]}),
            )
            .await
            .unwrap();
        wait_until_processing(&dispatcher, id).await;

        let running = dispatcher.cancel(id, "operator").await.unwrap();
        assert_eq!(running.status, JobStatus::Processing);

        let job = dispatcher.wait_for(id).await.unwrap();
        assert_job_failed(&job, ErrorClass::Cancelled);
        assert!(fixture.vision.detect_calls() <= 1);

        let err = assert_err!(dispatcher.cancel(id, "again").await);
        assert!(matches!(err, AtelierError::InvalidTransition(_)));
    }

    #[tokio::test]
    async fn test_mesh_render_export_chain() {
        let fixture = TestFixture::new();
        let (dispatcher, _) = start(&fixture, AtelierConfig::default());

        let mesh_id = dispatcher
            .enqueue("mesh", json!({"images": [{"url": TestFixture::WOOD_URL}]}))
            .await
            .unwrap();
        assert_job_completed(&dispatcher.wait_for(mesh_id).await.unwrap());

        let render_id = dispatcher
            .enqueue("render", json!({"mesh_job_id": mesh_id, "frames": 4, "width": 32, "height": 24}))
            .await
            .unwrap();
        let export_id = dispatcher
            .enqueue("export", json!({"mesh_job_id": mesh_id, "formats": ["glb", "obj"]}))
            .await
            .unwrap();

        let render = dispatcher.wait_for(render_id).await.unwrap();
        assert_job_completed(&render);
        let Some(JobOutput::Render(turntable)) = render.output else {
            panic!("expected a render artifact");
        };
        assert_eq!(turntable.frame_count, 4);
        let video = fixture.artifacts.get(&turntable.video.url).await.unwrap();
        assert_eq!(String::from_utf8(video).unwrap(), "frames=4 fps=24");
        assert_eq!(
            fixture.artifacts.content_type(&turntable.animation.url).as_deref(),
            Some(codec::GIF)
        );

        let export = dispatcher.wait_for(export_id).await.unwrap();
        assert_job_completed(&export);
        let Some(JobOutput::Export(exported)) = export.output else {
            panic!("expected an export artifact");
        };
        let formats: Vec<_> = exported.encodings.iter().map(|e| e.format).collect();
        assert_eq!(formats, vec![MeshFormat::Glb, MeshFormat::Obj]);
        assert_eq!(exported.encodings[1].url, "mem://fixtures/cube.obj");

        let stats = dispatcher.stats();
        for job_type in [JobType::Mesh, JobType::Render, JobType::Export] {
            assert_eq!(stats[&job_type].completed, 1, "{job_type}");
            assert_eq!(stats[&job_type].submitted, 1, "{job_type}");
        }
    }

    #[tokio::test]
    async fn test_segment_job_records_usage() {
        let fixture = TestFixture::new();
        let (dispatcher, _) = start(&fixture, AtelierConfig::default());
        let id = dispatcher
            .enqueue("segment", json!({"images": [{"url": TestFixture::WOOD_URL}]}))
            .await
            .unwrap();
        let job = dispatcher.wait_for(id).await.unwrap();
        assert_job_completed(&job);

        let Some(JobOutput::Segment(output)) = job.output else {
            panic!("expected segmentation output");
        };
        assert_eq!(output.components, vec!["seat"]);
        let usage = dispatcher.metrics(id).unwrap().usage;
        assert_eq!(usage.external_calls, 1);
        assert!(usage.bytes_downloaded > 0);
        assert!(usage.bytes_uploaded > 0);
    }

    #[tokio::test]
    async fn test_segment_without_detections_fails() {
        let fixture = TestFixture::new().with_vision(ScriptedVisionService::new());
        let (dispatcher, _) = start(&fixture, AtelierConfig::default());
        let id = dispatcher
            .enqueue("segment", json!({"images": [{"url": TestFixture::WOOD_URL}]}))
            .await
            .unwrap();
        let job = dispatcher.wait_for(id).await.unwrap();
        assert_job_failed(&job, ErrorClass::Upstream);
        assert!(job.error.unwrap().message.contains("NoComponentsDetected"));
    }

    #[tokio::test]
    async fn test_shutdown_drains_queue_and_rejects_new_work() {
        let fixture = TestFixture::new();
        let config = AtelierConfig::default().with_concurrency(JobType::Stain, 1);
        let (dispatcher, _) = start(&fixture, config);

        let mut ids = Vec::new();
        for _ in 0..3 {
            ids.push(dispatcher.enqueue("stain", stain_payload()).await.unwrap());
        }
        dispatcher.shutdown().await;
        assert!(!dispatcher.is_accepting());

        for id in ids {
            assert_job_completed(&dispatcher.get_status(id).await.unwrap());
        }
        let err = assert_err!(dispatcher.enqueue("stain", stain_payload()).await);
        assert!(matches!(err, AtelierError::ShutDown));
    }

    #[tokio::test]
    async fn test_upstream_store_failure_is_recorded() {
        let fixture = TestFixture::new();
        let (dispatcher, _) = start(&fixture, AtelierConfig::default());
        let id = dispatcher
            .enqueue(
                "stain",
                json!({"images": [{"url": "mem://src/missing.png"}], "target_color": "#5A3C2E"}),
            )
            .await
            .unwrap();
        let job = dispatcher.wait_for(id).await.unwrap();
        assert_job_failed(&job, ErrorClass::Upstream);
        assert!(job.error.unwrap().message.contains("mem://src/missing.png"));
    }
}
