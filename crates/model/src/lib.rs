//! Shared domain types for the aircraft tracker: the dynamic observation
//! record, feed snapshots and change-event batches.

mod batch;
mod feed;
mod observation;

pub use batch::{AircraftBatch, ChangeEvent, ChangeKind, MAX_AIRCRAFT_PER_BATCH};
pub use feed::FeedSnapshot;
pub use observation::{AircraftObservation, ObservationValue};
