//! Store traits consumed by the ingestion core
//!
//! Every operation is an atomic call against the store: the chunked job
//! runner never holds state across invocations, so these traits are the
//! full persistence contract. Errors surface as
//! [`IngestError::Persistence`] so the runner can retry the chunk from
//! its checkpoint.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::errors::IngestResult;
use crate::jobs::{JobUpdate, SyncJob};
use crate::models::{StoredChannel, StoredEpgChannel};

/// Persistence for sync job rows
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn create(&self, job: &SyncJob) -> IngestResult<()>;

    async fn load(&self, id: Uuid) -> IngestResult<Option<SyncJob>>;

    /// The non-terminal job for an (owner, target) pair, if one exists.
    /// At most one can exist; creation enforces it.
    async fn find_active(&self, owner_id: Uuid, target_id: Uuid)
    -> IngestResult<Option<SyncJob>>;

    /// Apply a partial update; each call is atomic
    async fn update(&self, id: Uuid, update: JobUpdate) -> IngestResult<()>;

    /// Non-terminal jobs whose last status write is older than the cutoff
    async fn list_idle_since(&self, cutoff: DateTime<Utc>) -> IngestResult<Vec<SyncJob>>;

    /// Drop terminal jobs last touched before the cutoff; returns rows
    /// removed
    async fn delete_terminal_before(&self, cutoff: DateTime<Utc>) -> IngestResult<u64>;
}

/// Persistence for the provider channel lineup
#[async_trait]
pub trait ChannelStore: Send + Sync {
    async fn find_by_source(&self, source_id: Uuid) -> IngestResult<Vec<StoredChannel>>;

    /// Conditional write against the (source_id, stream_id) unique key:
    /// inserts new rows, overwrites existing ones. One self-contained
    /// batch, no cross-batch transaction.
    async fn upsert_batch(&self, rows: &[StoredChannel]) -> IngestResult<()>;

    async fn delete_by_keys(&self, source_id: Uuid, stream_ids: &[String]) -> IngestResult<u64>;

    /// Write recomputed auto EPG mappings; user mappings are not touched
    async fn set_auto_epg_batch(
        &self,
        updates: &[(Uuid, Option<String>)],
    ) -> IngestResult<()>;
}

/// Persistence for the EPG lineup
#[async_trait]
pub trait EpgChannelStore: Send + Sync {
    async fn find_by_source(&self, source_id: Uuid) -> IngestResult<Vec<StoredEpgChannel>>;

    /// Conditional write against the (source_id, channel_id) unique key
    async fn upsert_batch(&self, rows: &[StoredEpgChannel]) -> IngestResult<()>;

    async fn delete_by_keys(&self, source_id: Uuid, channel_ids: &[String]) -> IngestResult<u64>;
}
