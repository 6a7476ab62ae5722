use std::collections::HashSet;
use tracing::warn;

use model::{ChangeEvent, ChangeKind, FeedSnapshot};

use crate::fingerprint::fingerprint;
use crate::state_cache::{StateCache, StateEntry, REAPPEAR_THRESHOLD_MS};

/// Everything one poll produced.
#[derive(Debug, Default)]
pub struct TickChanges {
    pub events: Vec<ChangeEvent>,
    /// Hexes that crossed the absence threshold this tick, bound for one
    /// bulk out-of-range UPDATE.
    pub out_of_range: Vec<String>,
    pub new_count: u64,
    pub updated_count: u64,
    pub reappeared_count: u64,
    pub dropped_observations: u64,
}

/// Classify every observation of a poll against the state cache.
pub fn classify(feed: &FeedSnapshot, cache: &mut StateCache, now_ms: i64) -> TickChanges {
    let mut changes = TickChanges::default();
    let mut seen_this_tick: HashSet<String> = HashSet::with_capacity(feed.aircraft.len());
    let snapshot_seconds = feed.snapshot_seconds();

    for observation in &feed.aircraft {
        let hex = match observation.normalized_hex() {
            Some(hex) => hex,
            None => {
                warn!("Dropping observation without a hex address");
                changes.dropped_observations += 1;
                continue;
            }
        };
        if !seen_this_tick.insert(hex.clone()) {
            warn!("Duplicate hex {} in one feed response, dropping", hex);
            changes.dropped_observations += 1;
            continue;
        }

        let hash = fingerprint(observation);
        let kind = match cache.get(&hex) {
            None => Some(ChangeKind::New),
            Some(entry) if now_ms - entry.last_seen_ms > REAPPEAR_THRESHOLD_MS => {
                Some(ChangeKind::Reappeared)
            }
            Some(entry) if entry.last_hash != hash => Some(ChangeKind::Updated),
            Some(_) => None,
        };

        match kind {
            Some(kind) => {
                match kind {
                    ChangeKind::New => changes.new_count += 1,
                    ChangeKind::Updated => changes.updated_count += 1,
                    ChangeKind::Reappeared => changes.reappeared_count += 1,
                }
                cache.insert(StateEntry {
                    hex: hex.clone(),
                    last_hash: hash,
                    last_seen_ms: now_ms,
                    last_uploaded_ms: 0,
                    last_observation: observation.clone(),
                    out_of_range: false,
                });
                changes.events.push(ChangeEvent {
                    kind,
                    hex,
                    observation: observation.clone(),
                    snapshot_seconds,
                    snapshot_total_messages: feed.messages,
                });
            }
            None => {
                // Unchanged: only the sighting time advances.
                if let Some(entry) = cache.get_mut(&hex) {
                    entry.last_seen_ms = now_ms;
                }
            }
        }
    }

    changes.out_of_range = cache.sweep_absent(&seen_this_tick, now_ms);
    changes
}
