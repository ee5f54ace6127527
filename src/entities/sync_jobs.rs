//! `sync_jobs` entity
//!
//! One row per ingestion job. The row is the only shared state between
//! chunk invocations: checkpoints, the cached parse artifact, and the
//! worker lease all live here.

use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "sync_jobs")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub owner_id: Uuid,
    pub target_id: Uuid,
    /// JobKind as text
    pub kind: String,
    pub source_url: String,
    /// JobStatus as text
    pub status: String,
    pub progress: i32,
    pub total_items: i64,
    pub processed_items: i64,
    #[sea_orm(column_type = "Text", nullable)]
    pub message: Option<String>,
    #[sea_orm(column_type = "Text", nullable)]
    pub error: Option<String>,
    /// Serialized parsed records, when small enough to live in-row
    #[sea_orm(column_type = "Text", nullable)]
    pub artifact: Option<String>,
    /// Spool file path for artifacts too large for the row
    #[sea_orm(column_type = "Text", nullable)]
    pub artifact_path: Option<String>,
    /// Worker lease: another worker must not touch the job before this
    pub claimed_until: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
