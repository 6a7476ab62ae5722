use anyhow::{anyhow, Context, Result};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{error, info};

use archive::{GatewayClient, Tag, APP_NAME};
use cipher::PackageCipher;
use db::{CounterSet, StatsStore};

use crate::stats::wall_clock_ms;

/// Fixed derivation id for snapshot encryption. Any node holding the master
/// key can re-derive this key at restore time; that is the documented
/// behaviour of the scheme.
pub const BACKUP_KEY_ID: &str = "system-stats-backup";

const FIRST_BACKUP_DELAY: Duration = Duration::from_secs(60);
const BACKUP_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// The 13 counters as they travel inside a snapshot document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotCounters {
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
}

impl From<&CounterSet> for SnapshotCounters {
    fn from(c: &CounterSet) -> Self {
        Self {
            total_polls: c.total_polls,
            clear_attempted: c.clear_attempted,
            clear_succeeded: c.clear_succeeded,
            clear_failed: c.clear_failed,
            clear_retries: c.clear_retries,
            enc_attempted: c.enc_attempted,
            enc_succeeded: c.enc_succeeded,
            enc_failed: c.enc_failed,
            enc_retries: c.enc_retries,
            total_new: c.total_new,
            total_updates: c.total_updates,
            total_reappeared: c.total_reappeared,
            peak_tpm: c.peak_tpm,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotDoc {
    pub timestamp: i64,
    pub stats: SnapshotCounters,
    #[serde(rename = "backupId")]
    pub backup_id: String,
}

/// Periodic encrypted backup of the counter row to the archive network,
/// tagged so the node can find its own latest snapshot at boot.
pub struct SnapshotBackup {
    stats_store: Arc<StatsStore>,
    cipher: Arc<PackageCipher>,
    gateway: Arc<GatewayClient>,
}

impl SnapshotBackup {
    pub fn new(
        stats_store: Arc<StatsStore>,
        cipher: Arc<PackageCipher>,
        gateway: Arc<GatewayClient>,
    ) -> Self {
        Self {
            stats_store,
            cipher,
            gateway,
        }
    }

    /// First run after 60 s, then every 5 minutes. Failures are logged and
    /// retried on the next tick.
    pub async fn run(self, mut stop: watch::Receiver<bool>) {
        tokio::select! {
            _ = sleep(FIRST_BACKUP_DELAY) => {}
            _ = stop.changed() => return,
        }
        loop {
            match self.backup_once().await {
                Ok(tx_id) => info!("Stats snapshot uploaded as {}", tx_id),
                Err(e) => error!("Stats snapshot failed: {:#}", e),
            }
            tokio::select! {
                _ = sleep(BACKUP_INTERVAL) => {}
                _ = stop.changed() => return,
            }
        }
    }

    pub async fn backup_once(&self) -> Result<String> {
        let row = self.stats_store.fetch().await?;
        let counters = CounterSet::from_row(&row);

        let mut id_bytes = [0u8; 8];
        rand::thread_rng().fill_bytes(&mut id_bytes);
        let now_ms = wall_clock_ms();
        let doc = SnapshotDoc {
            timestamp: now_ms,
            stats: SnapshotCounters::from(&counters),
            backup_id: hex::encode(id_bytes),
        };

        let plaintext = serde_json::to_vec(&doc).context("serialising snapshot")?;
        let sealed = self.cipher.encrypt_with_key_id(BACKUP_KEY_ID, &plaintext)?;

        let tags = backup_tags(now_ms, &doc.backup_id);
        self.gateway
            .upload(&sealed, &tags, None)
            .await
            .map_err(|e| anyhow!("snapshot upload failed: {}", e))
    }
}

fn backup_tags(timestamp_ms: i64, backup_id: &str) -> Vec<Tag> {
    vec![
        Tag::new("Type", "stats-backup"),
        Tag::new("Backup-Type", "system-stats"),
        Tag::new("Timestamp", timestamp_ms.to_string()),
        Tag::new("Backup-ID", backup_id),
        Tag::new("Encrypted", "true"),
        Tag::new("Encryption-Algorithm", "AES-256-GCM"),
        Tag::new("App-Name", APP_NAME),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use cipher::MasterKey;

    #[test]
    fn snapshot_doc_uses_camel_case_keys() {
        let doc = SnapshotDoc {
            timestamp: 1_751_069_515_000,
            stats: SnapshotCounters::from(&CounterSet {
                total_polls: 7,
                peak_tpm: 3,
                ..Default::default()
            }),
            backup_id: "0011223344556677".into(),
        };
        let json = serde_json::to_value(&doc).unwrap();
        assert_eq!(json["stats"]["totalPolls"], 7);
        assert_eq!(json["stats"]["peakTpm"], 3);
        assert_eq!(json["backupId"], "0011223344556677");

        let back: SnapshotDoc = serde_json::from_value(json).unwrap();
        assert_eq!(back.stats, doc.stats);
    }

    #[test]
    fn backup_tags_mark_the_snapshot_discoverable() {
        let tags = backup_tags(1_751_069_515_000, "aabbccdd");
        let get = |name: &str| {
            tags.iter()
                .find(|t| t.name == name)
                .map(|t| t.value.as_str())
        };
        assert_eq!(get("Type"), Some("stats-backup"));
        assert_eq!(get("Backup-Type"), Some("system-stats"));
        assert_eq!(get("App-Name"), Some("DeradNetworkBackup"));
        assert_eq!(get("Encrypted"), Some("true"));
        assert_eq!(get("Timestamp"), Some("1751069515000"));
    }

    #[test]
    fn a_snapshot_round_trips_under_the_fixed_key_id() {
        let cipher = PackageCipher::new(MasterKey::from_hex(&"cd".repeat(32)).unwrap());
        let doc = SnapshotDoc {
            timestamp: 42,
            stats: SnapshotCounters::from(&CounterSet::default()),
            backup_id: "ff00ff00".into(),
        };
        let plaintext = serde_json::to_vec(&doc).unwrap();
        let sealed = cipher.encrypt_with_key_id(BACKUP_KEY_ID, &plaintext).unwrap();
        let opened = cipher.decrypt_with_key_id(BACKUP_KEY_ID, &sealed).unwrap();
        let parsed: SnapshotDoc = serde_json::from_slice(&opened).unwrap();
        assert_eq!(parsed.timestamp, 42);
        assert_eq!(parsed.backup_id, "ff00ff00");
    }
}
