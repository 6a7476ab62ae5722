use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;
use uuid::Uuid;

use model::{AircraftBatch, ChangeEvent, MAX_AIRCRAFT_PER_BATCH};

/// How long a batch-id to package-UUID mapping survives.
const COUPLING_TTL: Duration = Duration::from_secs(5 * 60);

/// Bounded map coupling the clear and encrypted copy of a batch to one
/// package UUID. The clear pipeline registers at flush time; the encrypted
/// pipeline resolves at prepare time and falls back to a fresh UUID when
/// the entry has expired.
pub struct UuidCoupling {
    map: Mutex<HashMap<String, (String, Instant)>>,
    ttl: Duration,
}

impl UuidCoupling {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            map: Mutex::new(HashMap::new()),
            ttl: COUPLING_TTL,
        })
    }

    #[cfg(test)]
    fn with_ttl(ttl: Duration) -> Arc<Self> {
        Arc::new(Self {
            map: Mutex::new(HashMap::new()),
            ttl,
        })
    }

    pub fn register(&self, batch_id: &str, package_uuid: &str) {
        let mut map = self.map.lock();
        let ttl = self.ttl;
        map.retain(|_, (_, at)| at.elapsed() < ttl);
        map.insert(
            batch_id.to_string(),
            (package_uuid.to_string(), Instant::now()),
        );
    }

    pub fn resolve(&self, batch_id: &str) -> Option<String> {
        let map = self.map.lock();
        map.get(batch_id)
            .filter(|(_, at)| at.elapsed() < self.ttl)
            .map(|(uuid, _)| uuid.clone())
    }

    pub fn len(&self) -> usize {
        self.map.lock().len()
    }
}

/// A batch paired with the package UUID the clear pipeline will carry.
#[derive(Debug, Clone)]
pub struct PendingBatch {
    pub batch: AircraftBatch,
    pub package_uuid: String,
}

/// Append-only change-event buffer, flushed once per tick into size-capped
/// batches.
pub struct Batcher {
    buffer: Vec<ChangeEvent>,
    coupling: Arc<UuidCoupling>,
}

impl Batcher {
    pub fn new(coupling: Arc<UuidCoupling>) -> Self {
        Self {
            buffer: Vec::new(),
            coupling,
        }
    }

    pub fn push(&mut self, events: Vec<ChangeEvent>) {
        self.buffer.extend(events);
    }

    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Split the buffer into ordered chunks of at most 30 events, each with
    /// a fresh package UUID registered in the coupling map.
    pub fn flush(&mut self) -> Vec<PendingBatch> {
        if self.buffer.is_empty() {
            return Vec::new();
        }
        let events = std::mem::take(&mut self.buffer);
        let mut batches = Vec::new();

        for (ordinal, chunk) in events.chunks(MAX_AIRCRAFT_PER_BATCH).enumerate() {
            let snapshot_seconds = chunk[0].snapshot_seconds;
            let batch_id =
                AircraftBatch::make_batch_id(snapshot_seconds, &chunk[0].hex, ordinal);
            let package_uuid = Uuid::new_v4().to_string();
            self.coupling.register(&batch_id, &package_uuid);

            batches.push(PendingBatch {
                batch: AircraftBatch {
                    events: chunk.to_vec(),
                    batch_id,
                    snapshot_seconds,
                },
                package_uuid,
            });
        }

        debug!(
            "Flushed {} events into {} batches",
            events.len(),
            batches.len()
        );
        batches
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use model::{AircraftObservation, ChangeKind};

    fn event(hex: &str) -> ChangeEvent {
        ChangeEvent {
            kind: ChangeKind::New,
            hex: hex.to_string(),
            observation: AircraftObservation {
                hex: Some(hex.to_string()),
                ..Default::default()
            },
            snapshot_seconds: 1_751_069_515,
            snapshot_total_messages: 1,
        }
    }

    #[test]
    fn forty_five_events_split_into_thirty_and_fifteen() {
        let mut batcher = Batcher::new(UuidCoupling::new());
        batcher.push((0..45).map(|i| event(&format!("{:06x}", i))).collect());

        let batches = batcher.flush();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].batch.events.len(), 30);
        assert_eq!(batches[1].batch.events.len(), 15);
        // Order is preserved across the split.
        assert_eq!(batches[0].batch.events[0].hex, "000000");
        assert_eq!(batches[1].batch.events[0].hex, format!("{:06x}", 30));
        assert_eq!(
            batches[0].batch.batch_id,
            "1751069515-000000-0"
        );
        assert_eq!(
            batches[1].batch.batch_id,
            format!("1751069515-{:06x}-1", 30)
        );
        assert_ne!(batches[0].package_uuid, batches[1].package_uuid);
        assert_eq!(batcher.pending(), 0);
    }

    #[test]
    fn coupling_resolves_the_registered_uuid() {
        let coupling = UuidCoupling::new();
        let mut batcher = Batcher::new(coupling.clone());
        batcher.push(vec![event("48436b")]);

        let batches = batcher.flush();
        let resolved = coupling.resolve(&batches[0].batch.batch_id);
        assert_eq!(resolved.as_deref(), Some(batches[0].package_uuid.as_str()));
        assert_eq!(coupling.resolve("1751069515-ffffff-9"), None);
    }

    #[test]
    fn expired_couplings_are_gone() {
        let coupling = UuidCoupling::with_ttl(Duration::from_millis(5));
        coupling.register("b-1", "uuid-1");
        std::thread::sleep(Duration::from_millis(10));
        assert_eq!(coupling.resolve("b-1"), None);
        // A later registration prunes the dead entry.
        coupling.register("b-2", "uuid-2");
        assert_eq!(coupling.len(), 1);
    }
}
