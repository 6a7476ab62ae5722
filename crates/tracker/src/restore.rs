use anyhow::{anyhow, Context, Result};
use sea_orm::{ActiveModelTrait, DatabaseConnection, EntityTrait, Set};
use std::sync::Arc;
use tracing::{info, warn};

use archive::{GatewayClient, TagFilter, APP_NAME};
use cipher::PackageCipher;
use db::entity::system_stats;

use crate::snapshot::{SnapshotDoc, BACKUP_KEY_ID};
use crate::stats::wall_clock_ms;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreOutcome {
    /// The network has never seen a snapshot from this wallet.
    NoBackup,
    /// Local counters are at least as new as the snapshot.
    KeptLocal,
    /// No local row existed; the snapshot seeded one.
    Inserted,
    /// Local counters were older and got overwritten.
    Overwritten,
}

/// True when the snapshot should replace the local counters.
pub fn should_overwrite(local_updated_at_ms: i64, backup_timestamp_ms: i64) -> bool {
    local_updated_at_ms < backup_timestamp_ms
}

/// Boot-time reconciliation: query the archive network for this node's most
/// recent snapshot and fold it into the local counter row. Runs before the
/// stats register initialises.
pub async fn restore_on_start(
    conn: &DatabaseConnection,
    gateway: &GatewayClient,
    cipher: &Arc<PackageCipher>,
) -> Result<RestoreOutcome> {
    let filters = [
        TagFilter {
            name: "App-Name".into(),
            values: vec![APP_NAME.into()],
        },
        TagFilter {
            name: "Type".into(),
            values: vec!["stats-backup".into()],
        },
    ];

    let tx_id = match gateway.latest_owned_tx(&filters).await? {
        Some(tx_id) => tx_id,
        None => {
            info!("No stats snapshot found on the archive network");
            return Ok(RestoreOutcome::NoBackup);
        }
    };

    let sealed = gateway
        .download(&tx_id)
        .await
        .map_err(|e| anyhow!("snapshot download failed: {}", e))?;
    let plaintext = cipher.decrypt_with_key_id(BACKUP_KEY_ID, &sealed)?;
    let doc: SnapshotDoc =
        serde_json::from_slice(&plaintext).context("parsing snapshot document")?;

    info!(
        "Found snapshot {} from {} (tx {})",
        doc.backup_id, doc.timestamp, tx_id
    );
    apply_snapshot(conn, &doc).await
}

/// Fold a snapshot document into the counter table.
pub async fn apply_snapshot(
    conn: &DatabaseConnection,
    doc: &SnapshotDoc,
) -> Result<RestoreOutcome> {
    let existing = system_stats::Entity::find().one(conn).await?;
    let stats = &doc.stats;

    match existing {
        None => {
            system_stats::ActiveModel {
                total_polls: Set(stats.total_polls),
                clear_attempted: Set(stats.clear_attempted),
                clear_succeeded: Set(stats.clear_succeeded),
                clear_failed: Set(stats.clear_failed),
                clear_retries: Set(stats.clear_retries),
                enc_attempted: Set(stats.enc_attempted),
                enc_succeeded: Set(stats.enc_succeeded),
                enc_failed: Set(stats.enc_failed),
                enc_retries: Set(stats.enc_retries),
                total_new: Set(stats.total_new),
                total_updates: Set(stats.total_updates),
                total_reappeared: Set(stats.total_reappeared),
                peak_tpm: Set(stats.peak_tpm),
                // The start time is reset at boot regardless.
                system_start_time: Set(wall_clock_ms()),
                updated_at: Set(doc.timestamp),
                ..Default::default()
            }
            .insert(conn)
            .await?;
            info!("Seeded counters from snapshot {}", doc.backup_id);
            Ok(RestoreOutcome::Inserted)
        }
        Some(row) if !should_overwrite(row.updated_at, doc.timestamp) => {
            info!(
                "Local counters ({}) newer than snapshot ({}), keeping local",
                row.updated_at, doc.timestamp
            );
            Ok(RestoreOutcome::KeptLocal)
        }
        Some(row) => {
            warn!(
                "Local counters ({}) older than snapshot ({}), overwriting",
                row.updated_at, doc.timestamp
            );
            let mut active: system_stats::ActiveModel = row.into();
            active.total_polls = Set(stats.total_polls);
            active.clear_attempted = Set(stats.clear_attempted);
            active.clear_succeeded = Set(stats.clear_succeeded);
            active.clear_failed = Set(stats.clear_failed);
            active.clear_retries = Set(stats.clear_retries);
            active.enc_attempted = Set(stats.enc_attempted);
            active.enc_succeeded = Set(stats.enc_succeeded);
            active.enc_failed = Set(stats.enc_failed);
            active.enc_retries = Set(stats.enc_retries);
            active.total_new = Set(stats.total_new);
            active.total_updates = Set(stats.total_updates);
            active.total_reappeared = Set(stats.total_reappeared);
            active.peak_tpm = Set(stats.peak_tpm);
            active.updated_at = Set(doc.timestamp);
            // system_start_time and nildb_keys_saved stay local.
            active.update(conn).await?;
            Ok(RestoreOutcome::Overwritten)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::SnapshotCounters;
    use db::{CounterSet, Database, StatsStore};

    fn doc(timestamp: i64, total_polls: i64) -> SnapshotDoc {
        SnapshotDoc {
            timestamp,
            stats: SnapshotCounters::from(&CounterSet {
                total_polls,
                peak_tpm: 9,
                ..Default::default()
            }),
            backup_id: "aabbccdd".into(),
        }
    }

    #[test]
    fn overwrite_decision_compares_timestamps() {
        assert!(should_overwrite(1_000, 2_000));
        assert!(!should_overwrite(2_000, 2_000));
        assert!(!should_overwrite(3_000, 2_000));
    }

    #[tokio::test]
    async fn a_snapshot_seeds_an_empty_table() {
        let db = Database::open_in_memory().await.unwrap();
        let outcome = apply_snapshot(db.connection(), &doc(5_000, 42))
            .await
            .unwrap();
        assert_eq!(outcome, RestoreOutcome::Inserted);

        let store = StatsStore::load_or_init(db.connection().clone(), 9_000)
            .await
            .unwrap();
        let row = store.fetch().await.unwrap();
        assert_eq!(row.total_polls, 42);
        assert_eq!(row.peak_tpm, 9);
        // Boot reset the start time even though the snapshot seeded it.
        assert_eq!(row.system_start_time, 9_000);
    }

    #[tokio::test]
    async fn newer_local_counters_win() {
        let db = Database::open_in_memory().await.unwrap();
        let store = StatsStore::load_or_init(db.connection().clone(), 1_000)
            .await
            .unwrap();
        store
            .persist(
                &CounterSet {
                    total_polls: 100,
                    ..Default::default()
                },
                8_000,
            )
            .await
            .unwrap();

        let outcome = apply_snapshot(db.connection(), &doc(5_000, 42))
            .await
            .unwrap();
        assert_eq!(outcome, RestoreOutcome::KeptLocal);
        assert_eq!(store.fetch().await.unwrap().total_polls, 100);
    }

    #[tokio::test]
    async fn older_local_counters_are_overwritten_except_start_time() {
        let db = Database::open_in_memory().await.unwrap();
        let store = StatsStore::load_or_init(db.connection().clone(), 1_000)
            .await
            .unwrap();
        store
            .persist(
                &CounterSet {
                    total_polls: 5,
                    nildb_keys_saved: 77,
                    ..Default::default()
                },
                2_000,
            )
            .await
            .unwrap();

        let outcome = apply_snapshot(db.connection(), &doc(9_000, 42))
            .await
            .unwrap();
        assert_eq!(outcome, RestoreOutcome::Overwritten);

        let row = store.fetch().await.unwrap();
        assert_eq!(row.total_polls, 42);
        assert_eq!(row.updated_at, 9_000);
        // Not part of the snapshot set: stays local.
        assert_eq!(row.system_start_time, 1_000);
        assert_eq!(row.nildb_keys_saved, 77);
    }
}
