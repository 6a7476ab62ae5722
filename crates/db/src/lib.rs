//! Local persistence: archive records, per-aircraft tracks and the
//! singleton counter row, over SQLite.

pub mod entity;
mod records;
mod schema;
mod stats_store;
mod track_store;

pub use records::{insert_archive_record, insert_encrypted_record, NewArchiveRecord};
pub use stats_store::{CounterSet, StatsStore};
pub use track_store::{TrackStore, TrackUpsert, STATUS_ACTIVE, STATUS_OUT_OF_RANGE};

use anyhow::{Context, Result};
use sea_orm::{ConnectOptions, Database as SeaOrmDatabase, DatabaseConnection};
use std::time::Duration;
use tracing::info;

/// Database connection wrapper.
pub struct Database {
    connection: DatabaseConnection,
}

impl Database {
    /// Open (creating if needed) the SQLite database at `path` and apply
    /// the schema.
    pub async fn open(path: &str) -> Result<Self> {
        let url = format!("sqlite://{}?mode=rwc", path);

        let mut opt = ConnectOptions::new(url);
        opt.max_connections(16)
            .min_connections(1)
            .connect_timeout(Duration::from_secs(10))
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(300))
            .sqlx_logging(false);

        let connection = SeaOrmDatabase::connect(opt)
            .await
            .with_context(|| format!("opening database at {}", path))?;

        schema::apply(&connection).await?;
        info!("Database ready at {}", path);
        Ok(Self { connection })
    }

    /// In-memory database for tests.
    pub async fn open_in_memory() -> Result<Self> {
        let connection = SeaOrmDatabase::connect("sqlite::memory:")
            .await
            .context("opening in-memory database")?;
        schema::apply(&connection).await?;
        Ok(Self { connection })
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.connection
    }
}
