use anyhow::Result;
use sea_orm::{ConnectionTrait, DatabaseConnection};

/// Idempotent DDL applied at boot.
const DDL: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS archive_records (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        tx_id TEXT NOT NULL,
        source TEXT NOT NULL,
        timestamp INTEGER NOT NULL,
        aircraft_count INTEGER NOT NULL,
        file_size_kb INTEGER NOT NULL,
        format TEXT NOT NULL,
        icao_addresses TEXT NOT NULL,
        package_uuid TEXT NOT NULL,
        created_at INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_archive_created_at
        ON archive_records (created_at)",
    "CREATE INDEX IF NOT EXISTS idx_archive_package_uuid
        ON archive_records (package_uuid)",
    "CREATE INDEX IF NOT EXISTS idx_archive_pagination
        ON archive_records (id DESC, created_at DESC)",
    "CREATE TABLE IF NOT EXISTS encrypted_archive_records (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        tx_id TEXT NOT NULL,
        source TEXT NOT NULL,
        timestamp INTEGER NOT NULL,
        aircraft_count INTEGER NOT NULL,
        file_size_kb INTEGER NOT NULL,
        format TEXT NOT NULL,
        icao_addresses TEXT NOT NULL,
        package_uuid TEXT NOT NULL,
        data_hash TEXT NOT NULL,
        encryption_algorithm TEXT NOT NULL,
        created_at INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_encrypted_created_at
        ON encrypted_archive_records (created_at)",
    "CREATE INDEX IF NOT EXISTS idx_encrypted_package_uuid
        ON encrypted_archive_records (package_uuid)",
    "CREATE INDEX IF NOT EXISTS idx_encrypted_pagination
        ON encrypted_archive_records (id DESC, created_at DESC)",
    "CREATE TABLE IF NOT EXISTS aircraft_tracks (
        hex TEXT PRIMARY KEY,
        callsign TEXT,
        registration TEXT,
        aircraft_type TEXT,
        first_seen_ms INTEGER NOT NULL,
        last_seen_ms INTEGER NOT NULL,
        last_uploaded_ms INTEGER NOT NULL,
        last_tx_id TEXT,
        upload_count INTEGER NOT NULL DEFAULT 0,
        total_updates INTEGER NOT NULL DEFAULT 0,
        status TEXT NOT NULL DEFAULT 'active',
        last_lat REAL,
        last_lon REAL,
        last_alt_baro_ft INTEGER
    )",
    "CREATE TABLE IF NOT EXISTS system_stats (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        total_polls INTEGER NOT NULL DEFAULT 0,
        clear_attempted INTEGER NOT NULL DEFAULT 0,
        clear_succeeded INTEGER NOT NULL DEFAULT 0,
        clear_failed INTEGER NOT NULL DEFAULT 0,
        clear_retries INTEGER NOT NULL DEFAULT 0,
        enc_attempted INTEGER NOT NULL DEFAULT 0,
        enc_succeeded INTEGER NOT NULL DEFAULT 0,
        enc_failed INTEGER NOT NULL DEFAULT 0,
        enc_retries INTEGER NOT NULL DEFAULT 0,
        total_new INTEGER NOT NULL DEFAULT 0,
        total_updates INTEGER NOT NULL DEFAULT 0,
        total_reappeared INTEGER NOT NULL DEFAULT 0,
        peak_tpm INTEGER NOT NULL DEFAULT 0,
        nildb_keys_saved INTEGER NOT NULL DEFAULT 0,
        system_start_time INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    )",
];

pub async fn apply(conn: &DatabaseConnection) -> Result<()> {
    for statement in DDL {
        conn.execute_unprepared(statement).await?;
    }
    Ok(())
}
