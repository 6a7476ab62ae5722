//! End-to-end flow over the public API: classify a poll, batch the
//! changes, fan out to both pipelines, and check the counters and the
//! package-UUID coupling between the clear and encrypted copies.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;

use archive::{ProgressFn, UploadError};
use model::{AircraftObservation, FeedSnapshot, ObservationValue as V};

use tracker::batcher::{Batcher, UuidCoupling};
use tracker::classifier::classify;
use tracker::pipeline::{
    BatchUploader, PipelineEvents, PreparedUpload, QueuedBatch, UploadPipeline,
};
use tracker::state_cache::StateCache;
use tracker::stats::PipelineCounters;

struct NoopEvents;
impl PipelineEvents for NoopEvents {
    fn upload_succeeded(&self) {}
    fn settled(&self) {}
}

/// Uploader that records the package UUID of every upload. When built with
/// the coupling map it resolves UUIDs the way the encrypted pipeline does.
struct RecordingUploader {
    coupling: Option<Arc<UuidCoupling>>,
    seen_uuids: Mutex<Vec<(String, String)>>,
}

impl RecordingUploader {
    fn new(coupling: Option<Arc<UuidCoupling>>) -> Arc<Self> {
        Arc::new(Self {
            coupling,
            seen_uuids: Mutex::new(Vec::new()),
        })
    }

    fn uploads(&self) -> Vec<(String, String)> {
        self.seen_uuids.lock().clone()
    }
}

#[async_trait]
impl BatchUploader for RecordingUploader {
    fn pipeline_name(&self) -> &'static str {
        "recording"
    }

    async fn prepare(&self, job: &QueuedBatch) -> Result<PreparedUpload, UploadError> {
        let package_uuid = job
            .package_uuid
            .clone()
            .or_else(|| {
                self.coupling
                    .as_ref()
                    .and_then(|c| c.resolve(&job.batch.batch_id))
            })
            .expect("no package uuid available");
        Ok(PreparedUpload {
            batch: job.batch.clone(),
            package_uuid,
            key_uuid: "enckey-0-test".into(),
            payload: vec![0u8; 8],
            tags: vec![],
            file_size_kb: 1,
            data_hash: None,
        })
    }

    async fn upload(
        &self,
        prepared: &PreparedUpload,
        _progress: ProgressFn,
    ) -> Result<String, UploadError> {
        self.seen_uuids.lock().push((
            prepared.batch.batch_id.clone(),
            prepared.package_uuid.clone(),
        ));
        Ok(format!("tx-{}", prepared.batch.batch_id))
    }

    async fn after_success(&self, _prepared: &PreparedUpload, _tx_id: &str) {}
}

fn observation(hex: &str, alt: f64) -> AircraftObservation {
    AircraftObservation {
        hex: Some(hex.to_string()),
        flight: Some(V::Text("KLM855".into())),
        lat: Some(V::Number(40.9258)),
        lon: Some(V::Number(47.0615)),
        alt_baro: Some(V::Number(alt)),
        gs: Some(V::Number(575.3)),
        track: Some(V::Number(77.65)),
        squawk: Some(V::Text("6025".into())),
        emergency: Some(V::Text("none".into())),
        ..Default::default()
    }
}

fn feed(aircraft: Vec<AircraftObservation>) -> FeedSnapshot {
    FeedSnapshot {
        now: 1_751_069_515.0,
        messages: 1,
        aircraft,
    }
}

struct Harness {
    coupling: Arc<UuidCoupling>,
    batcher: Batcher,
    cache: StateCache,
    clear_uploader: Arc<RecordingUploader>,
    encrypted_uploader: Arc<RecordingUploader>,
    clear: Arc<UploadPipeline<RecordingUploader>>,
    encrypted: Arc<UploadPipeline<RecordingUploader>>,
}

impl Harness {
    fn new() -> Self {
        let coupling = UuidCoupling::new();
        let clear_uploader = RecordingUploader::new(None);
        let encrypted_uploader = RecordingUploader::new(Some(coupling.clone()));
        let clear = UploadPipeline::new(
            "clear",
            clear_uploader.clone(),
            Arc::new(PipelineCounters::default()),
            Arc::new(NoopEvents),
        );
        let encrypted = UploadPipeline::new(
            "encrypted",
            encrypted_uploader.clone(),
            Arc::new(PipelineCounters::default()),
            Arc::new(NoopEvents),
        );
        Self {
            batcher: Batcher::new(coupling.clone()),
            cache: StateCache::new(),
            coupling,
            clear_uploader,
            encrypted_uploader,
            clear,
            encrypted,
        }
    }

    /// One orchestrator tick worth of work.
    async fn tick(&mut self, response: &FeedSnapshot, now_ms: i64) -> usize {
        let changes = classify(response, &mut self.cache, now_ms);
        self.batcher.push(changes.events);
        let pending = self.batcher.flush();
        let batches = pending.len();

        let clear_jobs: Vec<QueuedBatch> = pending
            .iter()
            .map(|p| QueuedBatch {
                batch: p.batch.clone(),
                package_uuid: Some(p.package_uuid.clone()),
            })
            .collect();
        let encrypted_jobs: Vec<QueuedBatch> = pending
            .iter()
            .map(|p| QueuedBatch {
                batch: p.batch.clone(),
                package_uuid: None,
            })
            .collect();
        Arc::clone(&self.clear).enqueue(clear_jobs);
        Arc::clone(&self.encrypted).enqueue(encrypted_jobs);

        self.clear.wait_idle().await;
        self.encrypted.wait_idle().await;
        batches
    }
}

#[tokio::test]
async fn cold_start_uploads_one_coupled_batch_pair() {
    let mut harness = Harness::new();

    let batches = harness
        .tick(&feed(vec![observation("48436b", 37000.0)]), 1_000)
        .await;
    assert_eq!(batches, 1);

    let clear = harness.clear_uploader.uploads();
    let encrypted = harness.encrypted_uploader.uploads();
    assert_eq!(clear.len(), 1);
    assert_eq!(encrypted.len(), 1);
    // Same batch id, same package UUID on both copies.
    assert_eq!(clear[0], encrypted[0]);

    assert_eq!(harness.clear.counters.succeeded.load(std::sync::atomic::Ordering::SeqCst), 1);
    assert_eq!(
        harness
            .encrypted
            .counters
            .succeeded
            .load(std::sync::atomic::Ordering::SeqCst),
        1
    );
}

#[tokio::test]
async fn identical_repoll_produces_no_uploads() {
    let mut harness = Harness::new();
    let response = feed(vec![observation("48436b", 37000.0)]);

    harness.tick(&response, 1_000).await;
    let batches = harness.tick(&response, 1_100).await;

    assert_eq!(batches, 0);
    assert_eq!(harness.clear_uploader.uploads().len(), 1);
    assert_eq!(harness.encrypted_uploader.uploads().len(), 1);
}

#[tokio::test]
async fn a_field_change_rides_a_new_package_uuid() {
    let mut harness = Harness::new();

    harness
        .tick(&feed(vec![observation("48436b", 37000.0)]), 1_000)
        .await;
    harness
        .tick(&feed(vec![observation("48436b", 37200.0)]), 2_000)
        .await;

    let clear = harness.clear_uploader.uploads();
    assert_eq!(clear.len(), 2);
    assert_ne!(clear[0].1, clear[1].1);

    // Each batch pair still agrees across pipelines.
    let encrypted = harness.encrypted_uploader.uploads();
    assert_eq!(clear, encrypted);
}

#[tokio::test]
async fn forty_five_changes_make_two_batches_per_pipeline() {
    let mut harness = Harness::new();
    let many: Vec<_> = (0..45)
        .map(|i| observation(&format!("{:06x}", i), 30000.0))
        .collect();

    let batches = harness.tick(&feed(many), 1_000).await;
    assert_eq!(batches, 2);

    for pipeline in [&harness.clear, &harness.encrypted] {
        let succeeded = pipeline
            .counters
            .succeeded
            .load(std::sync::atomic::Ordering::SeqCst);
        let failed = pipeline
            .counters
            .failed
            .load(std::sync::atomic::Ordering::SeqCst);
        assert_eq!(succeeded + failed, 2);
    }
    assert_eq!(harness.coupling.len(), 2);
}
