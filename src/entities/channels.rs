//! `channels` entity (provider lineup)
//!
//! `(source_id, stream_id)` is unique: the provider stream id is the
//! stable external key, and re-syncs upsert against it.

use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "channels")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub source_id: Uuid,
    /// Stable external key
    pub stream_id: String,
    pub name: String,
    #[sea_orm(column_type = "Text")]
    pub stream_url: String,
    pub category_id: Option<String>,
    #[sea_orm(column_type = "Text", nullable)]
    pub logo_url: Option<String>,
    pub epg_channel_id: Option<String>,
    /// Source-owned, written by the mapping reconciliation job
    pub auto_epg_channel_id: Option<String>,
    /// User-owned, never written by sync
    pub custom_epg_channel_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
