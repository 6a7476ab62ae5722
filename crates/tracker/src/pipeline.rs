use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};

use archive::{ProgressFn, Tag, UploadError};
use model::AircraftBatch;

use crate::stats::{PipelineCounters, StatsRegister};

pub const MAX_CONCURRENT: usize = 5;
pub const MAX_RETRIES: u32 = 5;
const BACKOFF_BASE_MS: u64 = 1_000;
const BACKOFF_CAP_MS: u64 = 16_000;

/// Capped exponential backoff after `attempt` failed attempts: 1 s, 2 s,
/// 4 s, 8 s, 16 s.
pub fn backoff_delay(attempt: u32) -> Duration {
    let exp = BACKOFF_BASE_MS.saturating_mul(1u64 << (attempt.saturating_sub(1)).min(10));
    Duration::from_millis(exp.min(BACKOFF_CAP_MS))
}

/// A batch waiting in a pipeline queue. The clear queue carries the package
/// UUID; the encrypted queue resolves it from the coupling map at prepare
/// time.
#[derive(Debug, Clone)]
pub struct QueuedBatch {
    pub batch: AircraftBatch,
    pub package_uuid: Option<String>,
}

/// The payload of one upload, built exactly once per batch. Retries resend
/// these bytes verbatim; an encrypted payload is never re-encrypted.
pub struct PreparedUpload {
    pub batch: AircraftBatch,
    pub package_uuid: String,
    pub key_uuid: String,
    pub payload: Vec<u8>,
    pub tags: Vec<Tag>,
    pub file_size_kb: u64,
    /// SHA-256 of the plaintext; encrypted pipeline only.
    pub data_hash: Option<String>,
}

#[async_trait]
pub trait BatchUploader: Send + Sync + 'static {
    fn pipeline_name(&self) -> &'static str;

    /// Encode (and for the encrypted pipeline encrypt) the batch. Runs once;
    /// failures here are validation failures and consume the attempt.
    async fn prepare(&self, job: &QueuedBatch) -> Result<PreparedUpload, UploadError>;

    /// One upload attempt against the gateway.
    async fn upload(
        &self,
        prepared: &PreparedUpload,
        progress: ProgressFn,
    ) -> Result<String, UploadError>;

    /// Record-keeping after a counted success; everything in here is
    /// best-effort.
    async fn after_success(&self, prepared: &PreparedUpload, tx_id: &str);
}

/// Counter/persistence hooks the pipeline fires into the stats register.
pub trait PipelineEvents: Send + Sync + 'static {
    fn upload_succeeded(&self);
    fn settled(&self);
}

impl PipelineEvents for StatsRegister {
    fn upload_succeeded(&self) {
        self.record_upload_success(crate::stats::wall_clock_ms());
    }

    fn settled(&self) {
        self.schedule_persist();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotStatus {
    Uploading,
    Retrying,
    Completed,
    Failed,
}

#[derive(Debug, Clone)]
pub struct SlotProgress {
    pub started: Instant,
    pub progress: u8,
    pub status: SlotStatus,
}

/// Bounded-concurrency slotted upload queue with retry/backoff.
///
/// Two instances run side by side, one per pipeline. Batches dispatch in
/// enqueue order into five slots and complete out of order; a non-reentrant
/// dispatch flag keeps the drain loop single.
pub struct UploadPipeline<U: BatchUploader> {
    name: &'static str,
    uploader: Arc<U>,
    events: Arc<dyn PipelineEvents>,
    queue: Mutex<VecDeque<QueuedBatch>>,
    free_slots: Mutex<Vec<usize>>,
    progress: Arc<Mutex<HashMap<usize, SlotProgress>>>,
    pub counters: Arc<PipelineCounters>,
    dispatching: AtomicBool,
    stopped: AtomicBool,
}

impl<U: BatchUploader> UploadPipeline<U> {
    pub fn new(
        name: &'static str,
        uploader: Arc<U>,
        counters: Arc<PipelineCounters>,
        events: Arc<dyn PipelineEvents>,
    ) -> Arc<Self> {
        Arc::new(Self {
            name,
            uploader,
            events,
            queue: Mutex::new(VecDeque::new()),
            free_slots: Mutex::new((1..=MAX_CONCURRENT).rev().collect()),
            progress: Arc::new(Mutex::new(HashMap::new())),
            counters,
            dispatching: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        })
    }

    pub fn enqueue(self: Arc<Self>, jobs: Vec<QueuedBatch>) {
        if jobs.is_empty() || self.stopped.load(Ordering::SeqCst) {
            return;
        }
        {
            let mut queue = self.queue.lock();
            queue.extend(jobs);
            self.counters
                .queued
                .store(queue.len() as u64, Ordering::Relaxed);
        }
        self.dispatch();
    }

    /// Drain the queue into free slots. Not reentrant: a completion callback
    /// arriving mid-drain returns immediately and the outer loop re-checks.
    pub fn dispatch(self: Arc<Self>) {
        loop {
            if self.dispatching.swap(true, Ordering::SeqCst) {
                return;
            }
            while let Some((job, slot)) = self.claim() {
                let this = Arc::clone(&self);
                tokio::spawn(async move {
                    this.run_slot(job, slot).await;
                });
            }
            self.dispatching.store(false, Ordering::SeqCst);

            let more_work = {
                !self.stopped.load(Ordering::SeqCst)
                    && !self.queue.lock().is_empty()
                    && !self.free_slots.lock().is_empty()
            };
            if !more_work {
                return;
            }
        }
    }

    fn claim(&self) -> Option<(QueuedBatch, usize)> {
        if self.stopped.load(Ordering::SeqCst) {
            return None;
        }
        let mut queue = self.queue.lock();
        let mut slots = self.free_slots.lock();
        if queue.is_empty() || slots.is_empty() {
            return None;
        }
        let job = queue.pop_front()?;
        self.counters
            .queued
            .store(queue.len() as u64, Ordering::Relaxed);
        let slot = slots.pop()?;
        // active covers claimed-but-unstarted uploads too.
        self.counters.active.fetch_add(1, Ordering::Relaxed);
        Some((job, slot))
    }

    async fn run_slot(self: Arc<Self>, job: QueuedBatch, slot: usize) {
        self.progress.lock().insert(
            slot,
            SlotProgress {
                started: Instant::now(),
                progress: 0,
                status: SlotStatus::Uploading,
            },
        );

        let final_status = self.execute_with_retry(job, slot).await;

        if let Some(entry) = self.progress.lock().get_mut(&slot) {
            entry.status = final_status;
        }
        self.free_slots.lock().push(slot);
        self.counters.active.fetch_sub(1, Ordering::Relaxed);
        self.events.settled();
        Arc::clone(&self).dispatch();
    }

    async fn execute_with_retry(&self, job: QueuedBatch, slot: usize) -> SlotStatus {
        let batch_id = job.batch.batch_id.clone();

        let prepared = match self.uploader.prepare(&job).await {
            Ok(prepared) => prepared,
            Err(e) => {
                // A batch that cannot be prepared consumes its one attempt.
                self.counters.attempted.fetch_add(1, Ordering::Relaxed);
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                error!("{}: batch {} unpreparable: {}", self.name, batch_id, e);
                return SlotStatus::Failed;
            }
        };

        let progress_cb: ProgressFn = {
            let progress = Arc::clone(&self.progress);
            Arc::new(move |percent: u8| {
                if let Some(entry) = progress.lock().get_mut(&slot) {
                    entry.progress = percent;
                }
            })
        };

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            if attempt == 1 {
                self.counters.attempted.fetch_add(1, Ordering::Relaxed);
            }
            self.set_status(slot, SlotStatus::Uploading);

            match self.uploader.upload(&prepared, progress_cb.clone()).await {
                Ok(tx_id) => {
                    self.counters.succeeded.fetch_add(1, Ordering::Relaxed);
                    self.events.upload_succeeded();
                    debug!(
                        "{}: batch {} uploaded as {} (attempt {})",
                        self.name, batch_id, tx_id, attempt
                    );
                    self.uploader.after_success(&prepared, &tx_id).await;
                    return SlotStatus::Completed;
                }
                Err(e) if e.is_retryable() && attempt < MAX_RETRIES => {
                    self.counters.retries.fetch_add(1, Ordering::Relaxed);
                    self.set_status(slot, SlotStatus::Retrying);
                    let delay = backoff_delay(attempt);
                    warn!(
                        "{}: batch {} attempt {}/{} failed: {}. Retrying in {:?}",
                        self.name, batch_id, attempt, MAX_RETRIES, e, delay
                    );
                    sleep(delay).await;
                }
                Err(e) => {
                    self.counters.failed.fetch_add(1, Ordering::Relaxed);
                    error!(
                        "{}: batch {} dropped after {} attempts: {}",
                        self.name, batch_id, attempt, e
                    );
                    return SlotStatus::Failed;
                }
            }
        }
    }

    fn set_status(&self, slot: usize, status: SlotStatus) {
        if let Some(entry) = self.progress.lock().get_mut(&slot) {
            entry.status = status;
        }
    }

    /// Stop accepting and dispatching work. Queued items are dropped;
    /// in-flight uploads run to completion.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        let dropped = {
            let mut queue = self.queue.lock();
            let dropped = queue.len();
            queue.clear();
            dropped
        };
        self.counters.queued.store(0, Ordering::Relaxed);
        if dropped > 0 {
            info!("{}: dropped {} queued batches on stop", self.name, dropped);
        }
    }

    pub fn queue_len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn active_uploads(&self) -> u64 {
        self.counters.active.load(Ordering::Relaxed)
    }

    pub fn slot_progress(&self) -> Vec<(usize, SlotProgress)> {
        self.progress
            .lock()
            .iter()
            .map(|(slot, p)| (*slot, p.clone()))
            .collect()
    }

    /// Wait until the queue is drained and every slot is free.
    pub async fn wait_idle(&self) {
        loop {
            if self.queue.lock().is_empty() && self.active_uploads() == 0 {
                return;
            }
            sleep(Duration::from_millis(20)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64;

    struct NoopEvents;
    impl PipelineEvents for NoopEvents {
        fn upload_succeeded(&self) {}
        fn settled(&self) {}
    }

    /// Uploader whose first `fail_times` attempts per pipeline fail.
    struct MockUploader {
        fail_times: u64,
        fatal: bool,
        upload_delay: Duration,
        attempts: AtomicU64,
        concurrent: AtomicU64,
        max_concurrent: AtomicU64,
    }

    impl MockUploader {
        fn new(fail_times: u64) -> Self {
            Self {
                fail_times,
                fatal: false,
                upload_delay: Duration::ZERO,
                attempts: AtomicU64::new(0),
                concurrent: AtomicU64::new(0),
                max_concurrent: AtomicU64::new(0),
            }
        }
    }

    fn job(id: u32) -> QueuedBatch {
        QueuedBatch {
            batch: AircraftBatch {
                events: vec![],
                batch_id: format!("1751069515-48436b-{}", id),
                snapshot_seconds: 1_751_069_515,
            },
            package_uuid: Some(format!("uuid-{}", id)),
        }
    }

    #[async_trait]
    impl BatchUploader for MockUploader {
        fn pipeline_name(&self) -> &'static str {
            "mock"
        }

        async fn prepare(&self, job: &QueuedBatch) -> Result<PreparedUpload, UploadError> {
            Ok(PreparedUpload {
                batch: job.batch.clone(),
                package_uuid: job.package_uuid.clone().unwrap_or_default(),
                key_uuid: "enckey-0-test".into(),
                payload: vec![1, 2, 3],
                tags: vec![],
                file_size_kb: 1,
                data_hash: None,
            })
        }

        async fn upload(
            &self,
            _prepared: &PreparedUpload,
            progress: ProgressFn,
        ) -> Result<String, UploadError> {
            let running = self.concurrent.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_concurrent.fetch_max(running, Ordering::SeqCst);
            if !self.upload_delay.is_zero() {
                sleep(self.upload_delay).await;
            }
            self.concurrent.fetch_sub(1, Ordering::SeqCst);

            let n = self.attempts.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_times {
                if self.fatal {
                    return Err(UploadError::Fatal("bad tag".into()));
                }
                return Err(UploadError::Retryable("gateway 503".into()));
            }
            progress(100);
            Ok(format!("tx-{}", n))
        }

        async fn after_success(&self, _prepared: &PreparedUpload, _tx_id: &str) {}
    }

    fn pipeline(uploader: MockUploader) -> Arc<UploadPipeline<MockUploader>> {
        UploadPipeline::new(
            "test-pipeline",
            Arc::new(uploader),
            Arc::new(PipelineCounters::default()),
            Arc::new(NoopEvents),
        )
    }

    #[test]
    fn backoff_is_capped_exponential() {
        assert_eq!(backoff_delay(1), Duration::from_secs(1));
        assert_eq!(backoff_delay(2), Duration::from_secs(2));
        assert_eq!(backoff_delay(3), Duration::from_secs(4));
        assert_eq!(backoff_delay(4), Duration::from_secs(8));
        assert_eq!(backoff_delay(5), Duration::from_secs(16));
        assert_eq!(backoff_delay(6), Duration::from_secs(16));
    }

    #[tokio::test(start_paused = true)]
    async fn three_failures_then_success_counts_one_attempt(
    ) {
        let p = pipeline(MockUploader::new(3));
        let start = Instant::now();
        p.clone().enqueue(vec![job(0)]);
        p.wait_idle().await;

        assert_eq!(p.counters.attempted.load(Ordering::SeqCst), 1);
        assert_eq!(p.counters.succeeded.load(Ordering::SeqCst), 1);
        assert_eq!(p.counters.failed.load(Ordering::SeqCst), 0);
        assert_eq!(p.counters.retries.load(Ordering::SeqCst), 3);
        // Backoff sequence 1 s + 2 s + 4 s.
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(7), "elapsed {:?}", elapsed);
        assert!(elapsed < Duration::from_secs(8), "elapsed {:?}", elapsed);
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_counts_as_failed() {
        let p = pipeline(MockUploader::new(u64::MAX));
        p.clone().enqueue(vec![job(0)]);
        p.wait_idle().await;

        assert_eq!(p.counters.attempted.load(Ordering::SeqCst), 1);
        assert_eq!(p.counters.succeeded.load(Ordering::SeqCst), 0);
        assert_eq!(p.counters.failed.load(Ordering::SeqCst), 1);
        assert_eq!(
            p.counters.retries.load(Ordering::SeqCst),
            (MAX_RETRIES - 1) as u64
        );
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_errors_never_retry() {
        let mut uploader = MockUploader::new(u64::MAX);
        uploader.fatal = true;
        let p = pipeline(uploader);
        p.clone().enqueue(vec![job(0)]);
        p.wait_idle().await;

        assert_eq!(p.counters.attempted.load(Ordering::SeqCst), 1);
        assert_eq!(p.counters.failed.load(Ordering::SeqCst), 1);
        assert_eq!(p.counters.retries.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrency_never_exceeds_the_slot_count() {
        let mut uploader = MockUploader::new(0);
        uploader.upload_delay = Duration::from_millis(100);
        let p = pipeline(uploader);
        p.clone().enqueue((0..12).map(job).collect());
        p.wait_idle().await;

        assert_eq!(p.counters.succeeded.load(Ordering::SeqCst), 12);
        assert!(p.uploader.max_concurrent.load(Ordering::SeqCst) <= MAX_CONCURRENT as u64);
        assert!(p.uploader.max_concurrent.load(Ordering::SeqCst) >= 2);
        // Invariant: attempted == succeeded + failed at quiescence.
        assert!(p.counters.is_consistent());
    }

    #[tokio::test(start_paused = true)]
    async fn mixed_outcomes_keep_the_counter_invariant() {
        // First 7 attempts fail with retryable errors spread across jobs,
        // everything else succeeds.
        let p = pipeline(MockUploader::new(7));
        p.clone().enqueue((0..6).map(job).collect());
        p.wait_idle().await;

        let attempted = p.counters.attempted.load(Ordering::SeqCst);
        let succeeded = p.counters.succeeded.load(Ordering::SeqCst);
        let failed = p.counters.failed.load(Ordering::SeqCst);
        assert_eq!(attempted, 6);
        assert_eq!(attempted, succeeded + failed);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_drops_queued_work_but_not_running_work() {
        let mut uploader = MockUploader::new(0);
        uploader.upload_delay = Duration::from_millis(200);
        let p = pipeline(uploader);
        p.clone().enqueue((0..8).map(job).collect());
        // Let the first five claim their slots.
        tokio::task::yield_now().await;
        p.stop();
        p.wait_idle().await;

        // The five in-flight uploads finished; the queued three are gone.
        assert_eq!(p.counters.succeeded.load(Ordering::SeqCst), 5);
        assert_eq!(p.queue_len(), 0);
    }
}
