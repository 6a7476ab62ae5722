use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{sleep, Instant};
use tracing::{error, info, warn};

use db::TrackStore;
use model::FeedSnapshot;

use crate::batcher::Batcher;
use crate::classifier::classify;
use crate::feed::FeedClient;
use crate::pipeline::{QueuedBatch, UploadPipeline};
use crate::state_cache::StateCache;
use crate::stats::{wall_clock_ms, StatsRegister};
use crate::uploader::{ClearUploader, EncryptedUploader};

/// Poll cadence; a cycle running longer than this gets flagged.
const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// The single loop that owns the state cache: poll, classify, batch, fan
/// out to both pipelines.
pub struct Orchestrator {
    feeds: Vec<Arc<FeedClient>>,
    cache: StateCache,
    batcher: Batcher,
    clear: Arc<UploadPipeline<ClearUploader>>,
    encrypted: Arc<UploadPipeline<EncryptedUploader>>,
    stats: Arc<StatsRegister>,
    track_store: Arc<TrackStore>,
}

impl Orchestrator {
    pub fn new(
        feeds: Vec<Arc<FeedClient>>,
        batcher: Batcher,
        clear: Arc<UploadPipeline<ClearUploader>>,
        encrypted: Arc<UploadPipeline<EncryptedUploader>>,
        stats: Arc<StatsRegister>,
        track_store: Arc<TrackStore>,
    ) -> Self {
        Self {
            feeds,
            cache: StateCache::new(),
            batcher,
            clear,
            encrypted,
            stats,
            track_store,
        }
    }

    pub async fn run(mut self, mut stop: watch::Receiver<bool>) {
        info!(
            "Orchestrator started: {} antennas, {:?} poll interval",
            self.feeds.len(),
            POLL_INTERVAL
        );
        loop {
            tokio::select! {
                _ = sleep(POLL_INTERVAL) => {}
                _ = stop.changed() => break,
            }

            let cycle_start = Instant::now();
            self.tick().await;
            let elapsed = cycle_start.elapsed();
            if elapsed > POLL_INTERVAL {
                warn!("Poll cycle took {:?}, exceeding the interval", elapsed);
            }
        }

        // In-flight uploads finish; queued batches are dropped.
        self.clear.stop();
        self.encrypted.stop();
        info!("Orchestrator stopped");
    }

    async fn tick(&mut self) {
        let mut merged: Option<FeedSnapshot> = None;
        for feed in &self.feeds {
            match Arc::clone(feed).fetch().await {
                Ok(snapshot) => merge_feeds(&mut merged, &snapshot),
                Err(e) => warn!("Poll failed: {:#}", e),
            }
        }
        let cache_hits: u64 = self.feeds.iter().map(|f| f.cache_hits()).sum();
        self.stats.feed_cache_hits.store(cache_hits, Ordering::Relaxed);

        // A tick with no reachable antenna is simply skipped.
        let Some(feed) = merged else { return };
        self.stats.total_polls.fetch_add(1, Ordering::Relaxed);

        let now_ms = wall_clock_ms();
        let changes = classify(&feed, &mut self.cache, now_ms);
        self.stats
            .total_new
            .fetch_add(changes.new_count, Ordering::Relaxed);
        self.stats
            .total_updates
            .fetch_add(changes.updated_count, Ordering::Relaxed);
        self.stats
            .total_reappeared
            .fetch_add(changes.reappeared_count, Ordering::Relaxed);
        self.stats
            .tracked_aircraft
            .store(self.cache.len() as u64, Ordering::Relaxed);

        if !changes.out_of_range.is_empty() {
            let track_store = Arc::clone(&self.track_store);
            let hexes = changes.out_of_range.clone();
            tokio::spawn(async move {
                match track_store.mark_out_of_range(&hexes, wall_clock_ms()).await {
                    Ok(n) => info!("Marked {} tracks out of range", n),
                    Err(e) => error!("Out-of-range update failed: {:#}", e),
                }
            });
        }

        self.batcher.push(changes.events);
        let pending = self.batcher.flush();
        if pending.is_empty() {
            return;
        }

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
                // Resolved from the coupling map at prepare time.
                package_uuid: None,
            })
            .collect();

        Arc::clone(&self.clear).enqueue(clear_jobs);
        Arc::clone(&self.encrypted).enqueue(encrypted_jobs);
        self.stats.schedule_persist();
    }
}

/// Merge the per-antenna snapshots of one tick. Observation order is
/// preserved, so a hex seen by two antennas keeps its first sighting and
/// the classifier drops the duplicate.
fn merge_feeds(merged: &mut Option<FeedSnapshot>, next: &FeedSnapshot) {
    match merged {
        None => *merged = Some(next.clone()),
        Some(base) => {
            base.now = base.now.max(next.now);
            base.messages += next.messages;
            base.aircraft.extend(next.aircraft.iter().cloned());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use model::AircraftObservation;

    fn snapshot(now: f64, messages: i64, hexes: &[&str]) -> FeedSnapshot {
        FeedSnapshot {
            now,
            messages,
            aircraft: hexes
                .iter()
                .map(|h| AircraftObservation {
                    hex: Some(h.to_string()),
                    ..Default::default()
                })
                .collect(),
        }
    }

    #[test]
    fn merging_keeps_order_and_sums_messages() {
        let mut merged = None;
        merge_feeds(&mut merged, &snapshot(100.0, 10, &["aaaaaa"]));
        merge_feeds(&mut merged, &snapshot(101.0, 5, &["bbbbbb", "aaaaaa"]));

        let merged = merged.unwrap();
        assert_eq!(merged.snapshot_seconds(), 101);
        assert_eq!(merged.messages, 15);
        let hexes: Vec<_> = merged
            .aircraft
            .iter()
            .filter_map(|a| a.normalized_hex())
            .collect();
        assert_eq!(hexes, vec!["aaaaaa", "bbbbbb", "aaaaaa"]);
    }
}
