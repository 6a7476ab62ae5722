use std::collections::{HashMap, HashSet};

use model::AircraftObservation;

/// Dwell time after which a returning hex counts as reappeared rather than
/// updated, and after which an absent hex is flagged out of range.
pub const REAPPEAR_THRESHOLD_MS: i64 = 5 * 60 * 1000;

/// How long a flagged entry is retained after its last sighting. A hex
/// returning inside this window still has its entry, so it classifies as
/// reappeared; past it the entry is gone and the hex starts over as new.
pub const CACHE_RETENTION_MS: i64 = 30 * 60 * 1000;

/// Last-observed state for one aircraft.
#[derive(Debug, Clone)]
pub struct StateEntry {
    pub hex: String,
    pub last_hash: u64,
    pub last_seen_ms: i64,
    pub last_uploaded_ms: i64,
    pub last_observation: AircraftObservation,
    /// Set once the hex has been absent past the reappear threshold.
    pub out_of_range: bool,
}

/// In-memory map of last-observed state per aircraft.
///
/// Owned by the orchestrator task; every lookup and mutation happens there,
/// so no lock is needed. Size stays bounded by the active aircraft plus the
/// retention window.
#[derive(Default)]
pub struct StateCache {
    entries: HashMap<String, StateEntry>,
}

impl StateCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, hex: &str) -> Option<&StateEntry> {
        self.entries.get(hex)
    }

    pub fn get_mut(&mut self, hex: &str) -> Option<&mut StateEntry> {
        self.entries.get_mut(hex)
    }

    pub fn insert(&mut self, entry: StateEntry) {
        self.entries.insert(entry.hex.clone(), entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sweep entries absent from the current poll. A hex crossing the
    /// reappear threshold is flagged out of range exactly once and returned
    /// for the bulk status update; its entry survives so a later return
    /// still classifies as reappeared. Entries absent past the retention
    /// window are removed.
    pub fn sweep_absent(&mut self, seen_this_tick: &HashSet<String>, now_ms: i64) -> Vec<String> {
        let mut flagged = Vec::new();
        self.entries.retain(|hex, entry| {
            if seen_this_tick.contains(hex) {
                return true;
            }
            let elapsed = now_ms - entry.last_seen_ms;
            if elapsed > CACHE_RETENTION_MS {
                return false;
            }
            if elapsed > REAPPEAR_THRESHOLD_MS && !entry.out_of_range {
                entry.out_of_range = true;
                flagged.push(hex.clone());
            }
            true
        });
        flagged
    }
}
