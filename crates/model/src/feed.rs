use serde::{Deserialize, Serialize};

use crate::observation::AircraftObservation;

/// One poll of the receiver feed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeedSnapshot {
    /// Feed wall clock, unix seconds. Some receivers emit fractional
    /// seconds; the integer part is the snapshot timestamp.
    #[serde(default)]
    pub now: f64,
    /// Total messages decoded by the receiver since start.
    #[serde(default)]
    pub messages: i64,
    #[serde(default)]
    pub aircraft: Vec<AircraftObservation>,
}

impl FeedSnapshot {
    pub fn snapshot_seconds(&self) -> i64 {
        self.now as i64
    }
}
