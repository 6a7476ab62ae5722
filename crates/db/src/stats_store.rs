use anyhow::{anyhow, Result};
use sea_orm::{ActiveModelTrait, DatabaseConnection, EntityTrait, Set};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::entity::system_stats::{ActiveModel, Entity, Model};

/// The full counter set persisted to the singleton row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterSet {
    pub total_polls: i64,
    pub clear_attempted: i64,
    pub clear_succeeded: i64,
    pub clear_failed: i64,
    pub clear_retries: i64,
    pub enc_attempted: i64,
    pub enc_succeeded: i64,
    pub enc_failed: i64,
    pub enc_retries: i64,
    pub total_new: i64,
    pub total_updates: i64,
    pub total_reappeared: i64,
    pub peak_tpm: i64,
    #[serde(default)]
    pub nildb_keys_saved: i64,
}

impl CounterSet {
    pub fn from_row(row: &Model) -> Self {
        Self {
            total_polls: row.total_polls,
            clear_attempted: row.clear_attempted,
            clear_succeeded: row.clear_succeeded,
            clear_failed: row.clear_failed,
            clear_retries: row.clear_retries,
            enc_attempted: row.enc_attempted,
            enc_succeeded: row.enc_succeeded,
            enc_failed: row.enc_failed,
            enc_retries: row.enc_retries,
            total_new: row.total_new,
            total_updates: row.total_updates,
            total_reappeared: row.total_reappeared,
            peak_tpm: row.peak_tpm,
            nildb_keys_saved: row.nildb_keys_saved,
        }
    }
}

/// Accessor for the singleton `system_stats` row. The row id is captured
/// once at boot; every write is one UPDATE against it.
pub struct StatsStore {
    conn: DatabaseConnection,
    row_id: i32,
}

impl StatsStore {
    /// Load the singleton row, creating it on first boot. The system start
    /// time is always reset to `boot_ms`.
    pub async fn load_or_init(conn: DatabaseConnection, boot_ms: i64) -> Result<Self> {
        let existing = Entity::find().one(&conn).await?;

        let row_id = match existing {
            Some(row) => {
                let id = row.id;
                let mut active: ActiveModel = row.into();
                active.system_start_time = Set(boot_ms);
                active.update(&conn).await?;
                id
            }
            None => {
                let inserted = ActiveModel {
                    system_start_time: Set(boot_ms),
                    updated_at: Set(boot_ms),
                    ..Default::default()
                }
                .insert(&conn)
                .await?;
                info!("Created system stats row id {}", inserted.id);
                inserted.id
            }
        };

        Ok(Self { conn, row_id })
    }

    pub fn row_id(&self) -> i32 {
        self.row_id
    }

    pub async fn fetch(&self) -> Result<Model> {
        Entity::find_by_id(self.row_id)
            .one(&self.conn)
            .await?
            .ok_or_else(|| anyhow!("system stats row {} disappeared", self.row_id))
    }

    /// Write the whole counter set in one UPDATE.
    pub async fn persist(&self, counters: &CounterSet, updated_at_ms: i64) -> Result<()> {
        let active = ActiveModel {
            id: Set(self.row_id),
            total_polls: Set(counters.total_polls),
            clear_attempted: Set(counters.clear_attempted),
            clear_succeeded: Set(counters.clear_succeeded),
            clear_failed: Set(counters.clear_failed),
            clear_retries: Set(counters.clear_retries),
            enc_attempted: Set(counters.enc_attempted),
            enc_succeeded: Set(counters.enc_succeeded),
            enc_failed: Set(counters.enc_failed),
            enc_retries: Set(counters.enc_retries),
            total_new: Set(counters.total_new),
            total_updates: Set(counters.total_updates),
            total_reappeared: Set(counters.total_reappeared),
            peak_tpm: Set(counters.peak_tpm),
            nildb_keys_saved: Set(counters.nildb_keys_saved),
            updated_at: Set(updated_at_ms),
            ..Default::default()
        };
        active.update(&self.conn).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Database;

    #[tokio::test]
    async fn boot_creates_the_row_once_and_resets_start_time() {
        let db = Database::open_in_memory().await.unwrap();

        let store = StatsStore::load_or_init(db.connection().clone(), 1_000)
            .await
            .unwrap();
        let row = store.fetch().await.unwrap();
        assert_eq!(row.system_start_time, 1_000);
        assert_eq!(row.total_polls, 0);

        // Second boot reuses the same row but resets the start time.
        let store2 = StatsStore::load_or_init(db.connection().clone(), 9_000)
            .await
            .unwrap();
        assert_eq!(store2.row_id(), store.row_id());
        assert_eq!(store2.fetch().await.unwrap().system_start_time, 9_000);
    }

    #[tokio::test]
    async fn persist_writes_every_counter() {
        let db = Database::open_in_memory().await.unwrap();
        let store = StatsStore::load_or_init(db.connection().clone(), 1_000)
            .await
            .unwrap();

        let counters = CounterSet {
            total_polls: 42,
            clear_attempted: 7,
            clear_succeeded: 6,
            clear_failed: 1,
            clear_retries: 3,
            enc_attempted: 7,
            enc_succeeded: 7,
            enc_failed: 0,
            enc_retries: 1,
            total_new: 11,
            total_updates: 29,
            total_reappeared: 2,
            peak_tpm: 14,
            nildb_keys_saved: 7,
        };
        store.persist(&counters, 5_000).await.unwrap();

        let row = store.fetch().await.unwrap();
        assert_eq!(CounterSet::from_row(&row), counters);
        assert_eq!(row.updated_at, 5_000);
        // The start time is untouched by counter persistence.
        assert_eq!(row.system_start_time, 1_000);
    }
}
