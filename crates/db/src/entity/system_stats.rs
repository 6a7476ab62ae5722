//! Singleton counter row. Exactly one row exists; its id is captured at
//! boot.

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq)]
#[sea_orm(table_name = "system_stats")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
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
    pub nildb_keys_saved: i64,
    pub system_start_time: i64,
    pub updated_at: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
