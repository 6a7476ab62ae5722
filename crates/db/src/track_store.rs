use anyhow::Result;
use parking_lot::Mutex;
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{
    ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter, Set,
};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::entity::aircraft_tracks::{ActiveModel, Column, Entity, Model};

pub const STATUS_ACTIVE: &str = "active";
pub const STATUS_OUT_OF_RANGE: &str = "out_of_range";

/// How long the cached track count stays fresh.
const COUNT_CACHE_TTL: Duration = Duration::from_secs(5);

/// Per-aircraft data carried into a bulk upsert after a successful upload.
#[derive(Debug, Clone)]
pub struct TrackUpsert {
    pub hex: String,
    pub callsign: Option<String>,
    pub registration: Option<String>,
    pub aircraft_type: Option<String>,
    pub last_lat: Option<f64>,
    pub last_lon: Option<f64>,
    pub last_alt_baro_ft: Option<i32>,
    pub tx_id: String,
}

/// Persistent per-hex rollups. The bulk upsert is the single linearisation
/// point for track rows; overlapping upserts from both pipelines resolve
/// through `ON CONFLICT` semantics.
pub struct TrackStore {
    conn: DatabaseConnection,
    cached_count: Mutex<Option<(Instant, u64)>>,
}

impl TrackStore {
    pub fn new(conn: DatabaseConnection) -> Self {
        Self {
            conn,
            cached_count: Mutex::new(None),
        }
    }

    /// Upsert every hex of a successfully uploaded batch: one SELECT, a
    /// partition into updates and inserts, one upserting insert_many.
    pub async fn bulk_upsert(&self, upserts: &[TrackUpsert], now_ms: i64) -> Result<()> {
        if upserts.is_empty() {
            return Ok(());
        }

        let hexes: Vec<String> = upserts.iter().map(|u| u.hex.clone()).collect();
        let existing: HashMap<String, Model> = Entity::find()
            .filter(Column::Hex.is_in(hexes))
            .all(&self.conn)
            .await?
            .into_iter()
            .map(|m| (m.hex.clone(), m))
            .collect();

        let mut models = Vec::with_capacity(upserts.len());
        for upsert in upserts {
            let model = match existing.get(&upsert.hex) {
                Some(row) => ActiveModel {
                    hex: Set(upsert.hex.clone()),
                    callsign: Set(upsert.callsign.clone().or_else(|| row.callsign.clone())),
                    registration: Set(upsert
                        .registration
                        .clone()
                        .or_else(|| row.registration.clone())),
                    aircraft_type: Set(upsert
                        .aircraft_type
                        .clone()
                        .or_else(|| row.aircraft_type.clone())),
                    first_seen_ms: Set(row.first_seen_ms),
                    last_seen_ms: Set(now_ms),
                    last_uploaded_ms: Set(now_ms),
                    last_tx_id: Set(Some(upsert.tx_id.clone())),
                    upload_count: Set(row.upload_count + 1),
                    total_updates: Set(row.total_updates + 1),
                    status: Set(STATUS_ACTIVE.to_string()),
                    last_lat: Set(upsert.last_lat.or(row.last_lat)),
                    last_lon: Set(upsert.last_lon.or(row.last_lon)),
                    last_alt_baro_ft: Set(upsert.last_alt_baro_ft.or(row.last_alt_baro_ft)),
                },
                None => ActiveModel {
                    hex: Set(upsert.hex.clone()),
                    callsign: Set(upsert.callsign.clone()),
                    registration: Set(upsert.registration.clone()),
                    aircraft_type: Set(upsert.aircraft_type.clone()),
                    first_seen_ms: Set(now_ms),
                    last_seen_ms: Set(now_ms),
                    last_uploaded_ms: Set(now_ms),
                    last_tx_id: Set(Some(upsert.tx_id.clone())),
                    upload_count: Set(1),
                    total_updates: Set(0),
                    status: Set(STATUS_ACTIVE.to_string()),
                    last_lat: Set(upsert.last_lat),
                    last_lon: Set(upsert.last_lon),
                    last_alt_baro_ft: Set(upsert.last_alt_baro_ft),
                },
            };
            models.push(model);
        }

        // Upsert semantics survive the race where the same hex rides two
        // in-flight batches: the loser's insert turns into an update.
        Entity::insert_many(models)
            .on_conflict(
                OnConflict::column(Column::Hex)
                    .update_columns([
                        Column::Callsign,
                        Column::Registration,
                        Column::AircraftType,
                        Column::LastSeenMs,
                        Column::LastUploadedMs,
                        Column::LastTxId,
                        Column::UploadCount,
                        Column::TotalUpdates,
                        Column::Status,
                        Column::LastLat,
                        Column::LastLon,
                        Column::LastAltBaroFt,
                    ])
                    .to_owned(),
            )
            .exec(&self.conn)
            .await?;

        debug!("Upserted {} track rows", upserts.len());
        Ok(())
    }

    /// Flip absent hexes to out-of-range in one bulk UPDATE.
    pub async fn mark_out_of_range(&self, hexes: &[String], now_ms: i64) -> Result<u64> {
        if hexes.is_empty() {
            return Ok(0);
        }
        let result = Entity::update_many()
            .col_expr(Column::Status, Expr::value(STATUS_OUT_OF_RANGE))
            .col_expr(Column::LastSeenMs, Expr::value(now_ms))
            .filter(Column::Hex.is_in(hexes.to_vec()))
            .exec(&self.conn)
            .await?;
        Ok(result.rows_affected)
    }

    /// Total track rows, refreshed by a real COUNT(*) at most every 5 s.
    pub async fn total_tracks(&self) -> Result<u64> {
        if let Some((at, count)) = *self.cached_count.lock() {
            if at.elapsed() < COUNT_CACHE_TTL {
                return Ok(count);
            }
        }
        let count = Entity::find().count(&self.conn).await?;
        *self.cached_count.lock() = Some((Instant::now(), count));
        Ok(count)
    }

    pub async fn find_by_hex(&self, hex: &str) -> Result<Option<Model>> {
        Ok(Entity::find_by_id(hex.to_string()).one(&self.conn).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Database;

    fn upsert(hex: &str, tx: &str) -> TrackUpsert {
        TrackUpsert {
            hex: hex.to_string(),
            callsign: Some("KLM855".into()),
            registration: Some("PH-BHA".into()),
            aircraft_type: Some("B789".into()),
            last_lat: Some(40.9258),
            last_lon: Some(47.0615),
            last_alt_baro_ft: Some(37000),
            tx_id: tx.to_string(),
        }
    }

    #[tokio::test]
    async fn first_upload_inserts_with_count_one() {
        let db = Database::open_in_memory().await.unwrap();
        let store = TrackStore::new(db.connection().clone());

        store.bulk_upsert(&[upsert("48436b", "tx-1")], 1_000).await.unwrap();

        let row = store.find_by_hex("48436b").await.unwrap().unwrap();
        assert_eq!(row.upload_count, 1);
        assert_eq!(row.total_updates, 0);
        assert_eq!(row.status, STATUS_ACTIVE);
        assert_eq!(row.first_seen_ms, 1_000);
        assert!(row.first_seen_ms <= row.last_seen_ms);
        assert!(row.last_seen_ms <= row.last_uploaded_ms);
    }

    #[tokio::test]
    async fn second_upload_bumps_counters_and_keeps_first_seen() {
        let db = Database::open_in_memory().await.unwrap();
        let store = TrackStore::new(db.connection().clone());

        store.bulk_upsert(&[upsert("48436b", "tx-1")], 1_000).await.unwrap();
        store.bulk_upsert(&[upsert("48436b", "tx-2")], 2_000).await.unwrap();

        let row = store.find_by_hex("48436b").await.unwrap().unwrap();
        assert_eq!(row.upload_count, 2);
        assert_eq!(row.total_updates, 1);
        assert_eq!(row.first_seen_ms, 1_000);
        assert_eq!(row.last_uploaded_ms, 2_000);
        assert_eq!(row.last_tx_id.as_deref(), Some("tx-2"));
    }

    #[tokio::test]
    async fn out_of_range_flip_is_bulk_and_reversible() {
        let db = Database::open_in_memory().await.unwrap();
        let store = TrackStore::new(db.connection().clone());

        store
            .bulk_upsert(&[upsert("48436b", "tx-1"), upsert("4b1a2c", "tx-1")], 1_000)
            .await
            .unwrap();
        let flipped = store
            .mark_out_of_range(&["48436b".into(), "4b1a2c".into()], 2_000)
            .await
            .unwrap();
        assert_eq!(flipped, 2);

        let row = store.find_by_hex("48436b").await.unwrap().unwrap();
        assert_eq!(row.status, STATUS_OUT_OF_RANGE);

        // A reappearance upload flips it back to active.
        store.bulk_upsert(&[upsert("48436b", "tx-2")], 3_000).await.unwrap();
        let row = store.find_by_hex("48436b").await.unwrap().unwrap();
        assert_eq!(row.status, STATUS_ACTIVE);
    }

    #[tokio::test]
    async fn track_count_is_cached() {
        let db = Database::open_in_memory().await.unwrap();
        let store = TrackStore::new(db.connection().clone());

        store.bulk_upsert(&[upsert("48436b", "tx-1")], 1_000).await.unwrap();
        assert_eq!(store.total_tracks().await.unwrap(), 1);

        // Inside the TTL the cached value is served even after new rows.
        store.bulk_upsert(&[upsert("4b1a2c", "tx-1")], 1_100).await.unwrap();
        assert_eq!(store.total_tracks().await.unwrap(), 1);
    }
}
