//! One row per successful clear-pipeline upload.

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq)]
#[sea_orm(table_name = "archive_records")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub tx_id: String,
    pub source: String,
    /// Snapshot timestamp, unix millis.
    pub timestamp: i64,
    pub aircraft_count: i32,
    pub file_size_kb: i64,
    pub format: String,
    /// JSON array of ICAO addresses.
    pub icao_addresses: String,
    pub package_uuid: String,
    pub created_at: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
