//! `epg_channels` entity (EPG lineup)
//!
//! `(source_id, channel_id)` is unique: the XMLTV channel id is the
//! stable external key.

use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "epg_channels")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub source_id: Uuid,
    /// Stable external key
    pub channel_id: String,
    pub display_name: String,
    #[sea_orm(column_type = "Text", nullable)]
    pub logo_url: Option<String>,
    /// User-owned, never written by sync
    pub custom_display_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
