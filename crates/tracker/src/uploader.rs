use async_trait::async_trait;
use sea_orm::DatabaseConnection;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{error, warn};
use uuid::Uuid;

use archive::{GatewayClient, ProgressFn, Tag, UploadError, APP_NAME};
use cipher::PackageCipher;
use db::{insert_archive_record, insert_encrypted_record, NewArchiveRecord, TrackStore, TrackUpsert};
use encoder::{encode_batch, safe_i32, safe_number, safe_string, SCHEMA_TYPE, SCHEMA_VERSION};
use keyshare_client::KeyShareClient;
use model::AircraftBatch;

use crate::batcher::UuidCoupling;
use crate::pipeline::{BatchUploader, PreparedUpload, QueuedBatch};
use crate::stats::{wall_clock_ms, StatsRegister};

const ENCRYPTION_ALGORITHM: &str = "AES-256-GCM";
const DATA_FORMAT: &str = "aviation-realtime-batch";

/// Everything an uploadFn needs, shared by both pipelines.
pub struct UploadContext {
    pub gateway: Arc<GatewayClient>,
    pub cipher: Arc<PackageCipher>,
    pub keyshare: Arc<KeyShareClient>,
    pub conn: DatabaseConnection,
    pub track_store: Arc<TrackStore>,
    pub stats: Arc<StatsRegister>,
    pub coupling: Arc<UuidCoupling>,
    /// Recorded as the `source` column; the receiver deployment name.
    pub source: String,
}

enum TagMode {
    Clear,
    Encrypted { data_hash: String },
}

fn build_tags(
    batch: &AircraftBatch,
    package_uuid: &str,
    key_uuid: &str,
    file_size_kb: u64,
    mode: &TagMode,
) -> Vec<Tag> {
    let content_type = match mode {
        TagMode::Clear => "application/parquet",
        TagMode::Encrypted { .. } => "application/octet-stream",
    };
    let encrypted = matches!(mode, TagMode::Encrypted { .. });

    let mut tags = vec![
        Tag::new("Content-Type", content_type),
        Tag::new("App-Name", APP_NAME),
        Tag::new(
            "Timestamp",
            chrono::Utc::now().format("%Y%m%d%H%M").to_string(),
        ),
        Tag::new("Format", "Parquet"),
        Tag::new("Schema-Version", SCHEMA_VERSION),
        Tag::new("Schema-Type", SCHEMA_TYPE),
        Tag::new("Aircraft-Count", batch.aircraft_count().to_string()),
        Tag::new("File-Size-KB", file_size_kb.to_string()),
        Tag::new("Data-Format", DATA_FORMAT),
        Tag::new("Batch-Timestamp", batch.snapshot_seconds.to_string()),
        Tag::new("Package-UUID", package_uuid),
        Tag::new("Encryption-Key-UUID", key_uuid),
        Tag::new("Encrypted", if encrypted { "true" } else { "false" }),
    ];
    if let TagMode::Encrypted { data_hash } = mode {
        tags.push(Tag::new("Encryption-Algorithm", ENCRYPTION_ALGORITHM));
        tags.push(Tag::new("Data-Hash", data_hash));
    }
    for hex in batch.icao_addresses() {
        tags.push(Tag::new("ICAO", hex));
    }
    for callsign in batch.callsigns() {
        tags.push(Tag::new("Callsign", callsign));
    }
    tags
}

fn track_upserts(batch: &AircraftBatch, tx_id: &str) -> Vec<TrackUpsert> {
    batch
        .events
        .iter()
        .map(|event| {
            let obs = &event.observation;
            TrackUpsert {
                hex: event.hex.clone(),
                callsign: obs.callsign(),
                registration: safe_string(obs.r.as_ref()),
                aircraft_type: safe_string(obs.t.as_ref()),
                last_lat: safe_number(obs.lat.as_ref()),
                last_lon: safe_number(obs.lon.as_ref()),
                last_alt_baro_ft: safe_i32(obs.alt_baro.as_ref()),
                tx_id: tx_id.to_string(),
            }
        })
        .collect()
}

fn record_for(
    ctx: &UploadContext,
    prepared: &PreparedUpload,
    tx_id: &str,
    format: &str,
) -> NewArchiveRecord {
    NewArchiveRecord {
        tx_id: tx_id.to_string(),
        source: ctx.source.clone(),
        timestamp: prepared.batch.snapshot_seconds * 1000,
        aircraft_count: prepared.batch.aircraft_count() as i32,
        file_size_kb: prepared.file_size_kb as i64,
        format: format.to_string(),
        icao_addresses: prepared.batch.icao_addresses(),
        package_uuid: prepared.package_uuid.clone(),
        created_at: wall_clock_ms(),
    }
}

/// Clear pipeline: encode, upload, then record-keep.
pub struct ClearUploader {
    ctx: Arc<UploadContext>,
}

impl ClearUploader {
    pub fn new(ctx: Arc<UploadContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl BatchUploader for ClearUploader {
    fn pipeline_name(&self) -> &'static str {
        "clear"
    }

    async fn prepare(&self, job: &QueuedBatch) -> Result<PreparedUpload, UploadError> {
        let package_uuid = job
            .package_uuid
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let encoded = encode_batch(&job.batch)
            .map_err(|e| UploadError::Fatal(format!("batch encoding failed: {:#}", e)))?;
        let key_uuid = self.ctx.cipher.current_key_uuid();
        let tags = build_tags(
            &job.batch,
            &package_uuid,
            &key_uuid,
            encoded.file_size_kb,
            &TagMode::Clear,
        );
        Ok(PreparedUpload {
            batch: job.batch.clone(),
            package_uuid,
            key_uuid,
            payload: encoded.bytes,
            tags,
            file_size_kb: encoded.file_size_kb,
            data_hash: None,
        })
    }

    async fn upload(
        &self,
        prepared: &PreparedUpload,
        progress: ProgressFn,
    ) -> Result<String, UploadError> {
        self.ctx
            .gateway
            .upload(&prepared.payload, &prepared.tags, Some(progress))
            .await
    }

    async fn after_success(&self, prepared: &PreparedUpload, tx_id: &str) {
        // The upload already counted; everything below is best-effort.
        let ctx = Arc::clone(&self.ctx);
        let record = record_for(&ctx, prepared, tx_id, "Parquet");
        let upserts = track_upserts(&prepared.batch, tx_id);
        tokio::spawn(async move {
            if let Err(e) = insert_archive_record(&ctx.conn, record).await {
                error!("Archive record write failed: {:#}", e);
            }
            if let Err(e) = ctx.track_store.bulk_upsert(&upserts, wall_clock_ms()).await {
                error!("Track upsert failed: {:#}", e);
            }
        });
    }
}

/// Encrypted pipeline: encode, encrypt once, ship the minute key
/// (fire-and-forget), upload, record-keep.
pub struct EncryptedUploader {
    ctx: Arc<UploadContext>,
}

impl EncryptedUploader {
    pub fn new(ctx: Arc<UploadContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl BatchUploader for EncryptedUploader {
    fn pipeline_name(&self) -> &'static str {
        "encrypted"
    }

    async fn prepare(&self, job: &QueuedBatch) -> Result<PreparedUpload, UploadError> {
        let package_uuid = job
            .package_uuid
            .clone()
            .or_else(|| self.ctx.coupling.resolve(&job.batch.batch_id))
            .unwrap_or_else(|| {
                warn!(
                    "No package UUID coupling for batch {}, generating a fresh one",
                    job.batch.batch_id
                );
                Uuid::new_v4().to_string()
            });

        let encoded = encode_batch(&job.batch)
            .map_err(|e| UploadError::Fatal(format!("batch encoding failed: {:#}", e)))?;

        // Encrypt exactly once; retries must resubmit these bytes so the
        // IV, minute key and data hash stay coherent.
        let package = self
            .ctx
            .cipher
            .encrypt_package(&encoded.bytes, &package_uuid)
            .map_err(|e| UploadError::Fatal(format!("encryption failed: {}", e)))?;

        let keyshare = Arc::clone(&self.ctx.keyshare);
        let stats = Arc::clone(&self.ctx.stats);
        let key_uuid = package.key_uuid.clone();
        let raw_key = package.raw_key;
        tokio::spawn(async move {
            keyshare_client::ship_key_best_effort(&keyshare, &key_uuid, &raw_key).await;
            stats
                .share_errors
                .store(keyshare.share_errors(), Ordering::Relaxed);
        });

        let file_size_kb = ((package.bytes.len() as u64) + 1023) / 1024;
        let tags = build_tags(
            &job.batch,
            &package_uuid,
            &package.key_uuid,
            file_size_kb,
            &TagMode::Encrypted {
                data_hash: package.data_hash.clone(),
            },
        );
        Ok(PreparedUpload {
            batch: job.batch.clone(),
            package_uuid,
            key_uuid: package.key_uuid,
            payload: package.bytes,
            tags,
            file_size_kb,
            data_hash: Some(package.data_hash),
        })
    }

    async fn upload(
        &self,
        prepared: &PreparedUpload,
        progress: ProgressFn,
    ) -> Result<String, UploadError> {
        self.ctx
            .gateway
            .upload(&prepared.payload, &prepared.tags, Some(progress))
            .await
    }

    async fn after_success(&self, prepared: &PreparedUpload, tx_id: &str) {
        // Optimistic: counted as saved on upload success, not on confirmed
        // share-service success.
        self.ctx.stats.nildb_keys_saved.fetch_add(1, Ordering::Relaxed);

        let ctx = Arc::clone(&self.ctx);
        let record = record_for(&ctx, prepared, tx_id, "Parquet");
        let data_hash = prepared.data_hash.clone().unwrap_or_default();
        tokio::spawn(async move {
            if let Err(e) = insert_encrypted_record(
                &ctx.conn,
                record,
                data_hash,
                ENCRYPTION_ALGORITHM.to_string(),
            )
            .await
            {
                error!("Encrypted record write failed: {:#}", e);
            }
        });
    }
}
