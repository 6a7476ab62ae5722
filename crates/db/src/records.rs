use anyhow::Result;
use sea_orm::{ActiveModelTrait, DatabaseConnection, Set};

use crate::entity::{archive_records, encrypted_archive_records};

/// Fields shared by both record tables; the encrypted table adds the
/// plaintext hash and algorithm.
#[derive(Debug, Clone)]
pub struct NewArchiveRecord {
    pub tx_id: String,
    pub source: String,
    /// Snapshot timestamp, unix millis.
    pub timestamp: i64,
    pub aircraft_count: i32,
    pub file_size_kb: i64,
    pub format: String,
    pub icao_addresses: Vec<String>,
    pub package_uuid: String,
    pub created_at: i64,
}

impl NewArchiveRecord {
    fn icao_json(&self) -> String {
        serde_json::to_string(&self.icao_addresses).unwrap_or_else(|_| "[]".to_string())
    }
}

pub async fn insert_archive_record(
    conn: &DatabaseConnection,
    record: NewArchiveRecord,
) -> Result<()> {
    let model = archive_records::ActiveModel {
        tx_id: Set(record.tx_id.clone()),
        source: Set(record.source.clone()),
        timestamp: Set(record.timestamp),
        aircraft_count: Set(record.aircraft_count),
        file_size_kb: Set(record.file_size_kb),
        format: Set(record.format.clone()),
        icao_addresses: Set(record.icao_json()),
        package_uuid: Set(record.package_uuid.clone()),
        created_at: Set(record.created_at),
        ..Default::default()
    };
    model.insert(conn).await?;
    Ok(())
}

pub async fn insert_encrypted_record(
    conn: &DatabaseConnection,
    record: NewArchiveRecord,
    data_hash: String,
    encryption_algorithm: String,
) -> Result<()> {
    let model = encrypted_archive_records::ActiveModel {
        tx_id: Set(record.tx_id.clone()),
        source: Set(record.source.clone()),
        timestamp: Set(record.timestamp),
        aircraft_count: Set(record.aircraft_count),
        file_size_kb: Set(record.file_size_kb),
        format: Set(record.format.clone()),
        icao_addresses: Set(record.icao_json()),
        package_uuid: Set(record.package_uuid.clone()),
        data_hash: Set(data_hash),
        encryption_algorithm: Set(encryption_algorithm),
        created_at: Set(record.created_at),
        ..Default::default()
    };
    model.insert(conn).await?;
    Ok(())
}
