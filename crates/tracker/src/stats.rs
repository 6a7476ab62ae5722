use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::{watch, Notify};
use tracing::{debug, error, info};

use db::{CounterSet, StatsStore};

use crate::tpm::TpmWindow;

/// Debounce window for counter persistence.
const PERSIST_DEBOUNCE: Duration = Duration::from_secs(5);
/// Spacing between TPM history samples.
const HISTORY_SAMPLE_MS: i64 = 3_000;
/// Rolling history length.
const HISTORY_POINTS: usize = 30;

/// Which upload pipeline a counter event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineKind {
    Clear,
    Encrypted,
}

/// Live counters for one pipeline.
#[derive(Debug, Default)]
pub struct PipelineCounters {
    pub attempted: AtomicU64,
    pub succeeded: AtomicU64,
    pub failed: AtomicU64,
    pub retries: AtomicU64,
    pub active: AtomicU64,
    pub queued: AtomicU64,
}

impl PipelineCounters {
    /// Holds at every quiescent moment.
    pub fn is_consistent(&self) -> bool {
        self.attempted.load(Ordering::Relaxed)
            == self.succeeded.load(Ordering::Relaxed) + self.failed.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TpmSample {
    pub at_ms: i64,
    pub tpm: u64,
}

/// Snapshot view pushed to broadcast subscribers.
#[derive(Debug, Clone, Serialize)]
pub struct StatsView {
    pub counters: CounterSet,
    pub current_tpm: u64,
    pub peak_tpm: u64,
    pub tracked_aircraft: u64,
    pub feed_cache_hits: u64,
    pub share_errors: u64,
    pub clear_queued: u64,
    pub clear_active: u64,
    pub encrypted_queued: u64,
    pub encrypted_active: u64,
    pub uptime_ms: i64,
    pub history: Vec<TpmSample>,
}

/// The single owner of all live counters.
///
/// Pipelines and the orchestrator bump atomics; a background task writes
/// the whole set to the singleton row, debounced to one UPDATE per burst.
pub struct StatsRegister {
    pub total_polls: AtomicU64,
    pub feed_cache_hits: AtomicU64,
    pub clear: Arc<PipelineCounters>,
    pub encrypted: Arc<PipelineCounters>,
    pub total_new: AtomicU64,
    pub total_updates: AtomicU64,
    pub total_reappeared: AtomicU64,
    pub nildb_keys_saved: AtomicU64,
    pub share_errors: AtomicU64,
    pub tracked_aircraft: AtomicU64,
    peak_tpm: AtomicU64,
    system_start_ms: i64,
    tpm: Mutex<TpmWindow>,
    history: Mutex<VecDeque<TpmSample>>,
    persist_requested: Notify,
}

impl StatsRegister {
    pub fn new(system_start_ms: i64) -> Arc<Self> {
        Arc::new(Self {
            total_polls: AtomicU64::new(0),
            feed_cache_hits: AtomicU64::new(0),
            clear: Arc::new(PipelineCounters::default()),
            encrypted: Arc::new(PipelineCounters::default()),
            total_new: AtomicU64::new(0),
            total_updates: AtomicU64::new(0),
            total_reappeared: AtomicU64::new(0),
            nildb_keys_saved: AtomicU64::new(0),
            share_errors: AtomicU64::new(0),
            tracked_aircraft: AtomicU64::new(0),
            peak_tpm: AtomicU64::new(0),
            system_start_ms,
            tpm: Mutex::new(TpmWindow::new()),
            history: Mutex::new(VecDeque::with_capacity(HISTORY_POINTS)),
            persist_requested: Notify::new(),
        })
    }

    /// Seed the counters from the persisted row (after restore).
    pub fn load_counters(&self, counters: &CounterSet) {
        self.total_polls
            .store(counters.total_polls as u64, Ordering::Relaxed);
        self.clear
            .attempted
            .store(counters.clear_attempted as u64, Ordering::Relaxed);
        self.clear
            .succeeded
            .store(counters.clear_succeeded as u64, Ordering::Relaxed);
        self.clear
            .failed
            .store(counters.clear_failed as u64, Ordering::Relaxed);
        self.clear
            .retries
            .store(counters.clear_retries as u64, Ordering::Relaxed);
        self.encrypted
            .attempted
            .store(counters.enc_attempted as u64, Ordering::Relaxed);
        self.encrypted
            .succeeded
            .store(counters.enc_succeeded as u64, Ordering::Relaxed);
        self.encrypted
            .failed
            .store(counters.enc_failed as u64, Ordering::Relaxed);
        self.encrypted
            .retries
            .store(counters.enc_retries as u64, Ordering::Relaxed);
        self.total_new
            .store(counters.total_new as u64, Ordering::Relaxed);
        self.total_updates
            .store(counters.total_updates as u64, Ordering::Relaxed);
        self.total_reappeared
            .store(counters.total_reappeared as u64, Ordering::Relaxed);
        self.peak_tpm
            .store(counters.peak_tpm as u64, Ordering::Relaxed);
        self.nildb_keys_saved
            .store(counters.nildb_keys_saved as u64, Ordering::Relaxed);
    }

    pub fn counters(&self, pipeline: PipelineKind) -> Arc<PipelineCounters> {
        match pipeline {
            PipelineKind::Clear => self.clear.clone(),
            PipelineKind::Encrypted => self.encrypted.clone(),
        }
    }

    /// Called on every successful upload: rotates the TPM window, samples
    /// history, and tracks the peak.
    pub fn record_upload_success(&self, now_ms: i64) {
        let current = {
            let mut tpm = self.tpm.lock();
            tpm.record(now_ms);
            tpm.current(now_ms)
        };
        self.peak_tpm.fetch_max(current, Ordering::Relaxed);

        let mut history = self.history.lock();
        let due = history
            .back()
            .map_or(true, |last| now_ms - last.at_ms >= HISTORY_SAMPLE_MS);
        if due {
            if history.len() >= HISTORY_POINTS {
                history.pop_front();
            }
            history.push_back(TpmSample {
                at_ms: now_ms,
                tpm: current,
            });
        }
    }

    pub fn current_tpm(&self, now_ms: i64) -> u64 {
        self.tpm.lock().current(now_ms)
    }

    pub fn peak_tpm(&self) -> u64 {
        self.peak_tpm.load(Ordering::Relaxed)
    }

    /// Ask the persistence task to write soon; bursts coalesce into one
    /// UPDATE.
    pub fn schedule_persist(&self) {
        self.persist_requested.notify_one();
    }

    pub fn snapshot(&self) -> CounterSet {
        CounterSet {
            total_polls: self.total_polls.load(Ordering::Relaxed) as i64,
            clear_attempted: self.clear.attempted.load(Ordering::Relaxed) as i64,
            clear_succeeded: self.clear.succeeded.load(Ordering::Relaxed) as i64,
            clear_failed: self.clear.failed.load(Ordering::Relaxed) as i64,
            clear_retries: self.clear.retries.load(Ordering::Relaxed) as i64,
            enc_attempted: self.encrypted.attempted.load(Ordering::Relaxed) as i64,
            enc_succeeded: self.encrypted.succeeded.load(Ordering::Relaxed) as i64,
            enc_failed: self.encrypted.failed.load(Ordering::Relaxed) as i64,
            enc_retries: self.encrypted.retries.load(Ordering::Relaxed) as i64,
            total_new: self.total_new.load(Ordering::Relaxed) as i64,
            total_updates: self.total_updates.load(Ordering::Relaxed) as i64,
            total_reappeared: self.total_reappeared.load(Ordering::Relaxed) as i64,
            peak_tpm: self.peak_tpm.load(Ordering::Relaxed) as i64,
            nildb_keys_saved: self.nildb_keys_saved.load(Ordering::Relaxed) as i64,
        }
    }

    pub fn view(&self, now_ms: i64) -> StatsView {
        StatsView {
            counters: self.snapshot(),
            current_tpm: self.current_tpm(now_ms),
            peak_tpm: self.peak_tpm(),
            tracked_aircraft: self.tracked_aircraft.load(Ordering::Relaxed),
            feed_cache_hits: self.feed_cache_hits.load(Ordering::Relaxed),
            share_errors: self.share_errors.load(Ordering::Relaxed),
            clear_queued: self.clear.queued.load(Ordering::Relaxed),
            clear_active: self.clear.active.load(Ordering::Relaxed),
            encrypted_queued: self.encrypted.queued.load(Ordering::Relaxed),
            encrypted_active: self.encrypted.active.load(Ordering::Relaxed),
            uptime_ms: now_ms - self.system_start_ms,
            history: self.history.lock().iter().cloned().collect(),
        }
    }

    /// Debounced persistence loop. One write per burst; a final write on
    /// shutdown.
    pub async fn run_persistence(
        self: Arc<Self>,
        store: Arc<StatsStore>,
        mut stop: watch::Receiver<bool>,
    ) {
        info!("Stats persistence task started");
        loop {
            tokio::select! {
                _ = self.persist_requested.notified() => {
                    tokio::time::sleep(PERSIST_DEBOUNCE).await;
                    self.persist_now(&store).await;
                }
                _ = stop.changed() => {
                    self.persist_now(&store).await;
                    info!("Stats persistence task stopped");
                    return;
                }
            }
        }
    }

    async fn persist_now(&self, store: &StatsStore) {
        let counters = self.snapshot();
        match store.persist(&counters, wall_clock_ms()).await {
            Ok(()) => debug!("Persisted stats counters"),
            Err(e) => error!("Failed to persist stats counters: {}", e),
        }
    }
}

pub fn wall_clock_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_millis() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peak_tpm_tracks_the_window_maximum() {
        let stats = StatsRegister::new(0);
        for i in 0..5 {
            stats.record_upload_success(i * 1_000);
        }
        assert_eq!(stats.current_tpm(5_000), 5);
        assert_eq!(stats.peak_tpm(), 5);

        // A quiet period does not lower the recorded peak.
        assert_eq!(stats.current_tpm(120_000), 0);
        assert_eq!(stats.peak_tpm(), 5);
    }

    #[test]
    fn history_samples_are_spaced_and_bounded() {
        let stats = StatsRegister::new(0);
        // Bursts inside the 3 s spacing collapse into one sample.
        stats.record_upload_success(0);
        stats.record_upload_success(500);
        stats.record_upload_success(1_000);
        assert_eq!(stats.history.lock().len(), 1);

        for i in 1..100 {
            stats.record_upload_success(i * HISTORY_SAMPLE_MS);
        }
        assert_eq!(stats.history.lock().len(), HISTORY_POINTS);
    }

    #[test]
    fn snapshot_round_trips_through_load() {
        let stats = StatsRegister::new(0);
        stats.total_polls.store(9, Ordering::Relaxed);
        stats.clear.attempted.store(4, Ordering::Relaxed);
        stats.clear.succeeded.store(3, Ordering::Relaxed);
        stats.clear.failed.store(1, Ordering::Relaxed);

        let snapshot = stats.snapshot();
        let other = StatsRegister::new(0);
        other.load_counters(&snapshot);
        assert_eq!(other.snapshot(), snapshot);
        assert!(other.clear.is_consistent());
    }
}
