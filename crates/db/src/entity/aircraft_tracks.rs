//! Per-aircraft rollup, one row per ICAO address.

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "aircraft_tracks")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub hex: String,
    pub callsign: Option<String>,
    pub registration: Option<String>,
    pub aircraft_type: Option<String>,
    pub first_seen_ms: i64,
    pub last_seen_ms: i64,
    pub last_uploaded_ms: i64,
    pub last_tx_id: Option<String>,
    pub upload_count: i64,
    pub total_updates: i64,
    /// `active` or `out_of_range`.
    pub status: String,
    pub last_lat: Option<f64>,
    pub last_lon: Option<f64>,
    pub last_alt_baro_ft: Option<i32>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
