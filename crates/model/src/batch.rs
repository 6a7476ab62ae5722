use crate::observation::AircraftObservation;

/// Upper bound on observations per archive batch.
pub const MAX_AIRCRAFT_PER_BATCH: usize = 30;

/// How an observation differed from the cached state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    New,
    Updated,
    Reappeared,
}

/// A single change detected in one poll.
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub hex: String,
    pub observation: AircraftObservation,
    /// Feed snapshot timestamp, unix seconds.
    pub snapshot_seconds: i64,
    /// Receiver message total at the snapshot.
    pub snapshot_total_messages: i64,
}

/// An ordered group of change events bound for both archive pipelines.
#[derive(Debug, Clone)]
pub struct AircraftBatch {
    pub events: Vec<ChangeEvent>,
    pub batch_id: String,
    pub snapshot_seconds: i64,
}

impl AircraftBatch {
    /// Deterministic batch identity: snapshot second, first hex, ordinal
    /// within the flush.
    pub fn make_batch_id(snapshot_seconds: i64, first_hex: &str, ordinal: usize) -> String {
        format!("{}-{}-{}", snapshot_seconds, first_hex, ordinal)
    }

    pub fn aircraft_count(&self) -> usize {
        self.events.len()
    }

    pub fn icao_addresses(&self) -> Vec<String> {
        self.events.iter().map(|e| e.hex.clone()).collect()
    }

    pub fn callsigns(&self) -> Vec<String> {
        self.events
            .iter()
            .filter_map(|e| e.observation.callsign())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_id_is_deterministic() {
        assert_eq!(
            AircraftBatch::make_batch_id(1_751_069_515, "48436b", 0),
            "1751069515-48436b-0"
        );
    }
}
