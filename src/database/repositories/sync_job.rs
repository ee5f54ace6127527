//! SeaORM-based sync job repository

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveValue::{Set, Unchanged},
    ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter,
};
use uuid::Uuid;

use crate::entities::{prelude::SyncJobs, sync_jobs};
use crate::errors::{IngestError, IngestResult};
use crate::jobs::{JobStatus, JobUpdate, SyncJob};

use super::traits::JobStore;

const TERMINAL_STATUSES: [&str; 2] = ["completed", "failed"];

#[derive(Clone)]
pub struct SyncJobSeaOrmRepository {
    connection: Arc<DatabaseConnection>,
}

impl SyncJobSeaOrmRepository {
    pub fn new(connection: Arc<DatabaseConnection>) -> Self {
        Self { connection }
    }

    fn model_to_domain(model: sync_jobs::Model) -> IngestResult<SyncJob> {
        let status: JobStatus = model
            .status
            .parse()
            .map_err(|_| IngestError::internal(format!("unknown job status '{}'", model.status)))?;
        let kind = model
            .kind
            .parse()
            .map_err(|_| IngestError::internal(format!("unknown job kind '{}'", model.kind)))?;

        Ok(SyncJob {
            id: model.id,
            owner_id: model.owner_id,
            target_id: model.target_id,
            kind,
            source_url: model.source_url,
            status,
            progress: model.progress.clamp(0, 100) as u8,
            total_items: model.total_items.max(0) as u64,
            processed_items: model.processed_items.max(0) as u64,
            message: model.message,
            error: model.error,
            artifact: model.artifact,
            artifact_path: model.artifact_path,
            claimed_until: model.claimed_until,
            created_at: model.created_at,
            updated_at: model.updated_at,
        })
    }

    fn domain_to_active(job: &SyncJob) -> sync_jobs::ActiveModel {
        sync_jobs::ActiveModel {
            id: Set(job.id),
            owner_id: Set(job.owner_id),
            target_id: Set(job.target_id),
            kind: Set(job.kind.to_string()),
            source_url: Set(job.source_url.clone()),
            status: Set(job.status.to_string()),
            progress: Set(job.progress as i32),
            total_items: Set(job.total_items as i64),
            processed_items: Set(job.processed_items as i64),
            message: Set(job.message.clone()),
            error: Set(job.error.clone()),
            artifact: Set(job.artifact.clone()),
            artifact_path: Set(job.artifact_path.clone()),
            claimed_until: Set(job.claimed_until),
            created_at: Set(job.created_at),
            updated_at: Set(job.updated_at),
        }
    }
}

#[async_trait]
impl JobStore for SyncJobSeaOrmRepository {
    async fn create(&self, job: &SyncJob) -> IngestResult<()> {
        SyncJobs::insert(Self::domain_to_active(job))
            .exec(&*self.connection)
            .await?;
        Ok(())
    }

    async fn load(&self, id: Uuid) -> IngestResult<Option<SyncJob>> {
        let model = SyncJobs::find_by_id(id).one(&*self.connection).await?;
        model.map(Self::model_to_domain).transpose()
    }

    async fn find_active(
        &self,
        owner_id: Uuid,
        target_id: Uuid,
    ) -> IngestResult<Option<SyncJob>> {
        let model = SyncJobs::find()
            .filter(sync_jobs::Column::OwnerId.eq(owner_id))
            .filter(sync_jobs::Column::TargetId.eq(target_id))
            .filter(sync_jobs::Column::Status.is_not_in(TERMINAL_STATUSES))
            .one(&*self.connection)
            .await?;
        model.map(Self::model_to_domain).transpose()
    }

    async fn update(&self, id: Uuid, update: JobUpdate) -> IngestResult<()> {
        let mut active = sync_jobs::ActiveModel {
            id: Unchanged(id),
            ..Default::default()
        };

        if let Some(status) = update.status {
            active.status = Set(status.to_string());
        }
        if let Some(progress) = update.progress {
            active.progress = Set(progress as i32);
        }
        if let Some(total) = update.total_items {
            active.total_items = Set(total as i64);
        }
        if let Some(processed) = update.processed_items {
            active.processed_items = Set(processed as i64);
        }
        if let Some(message) = update.message {
            active.message = Set(message);
        }
        if let Some(error) = update.error {
            active.error = Set(error);
        }
        if let Some(artifact) = update.artifact {
            active.artifact = Set(artifact);
        }
        if let Some(artifact_path) = update.artifact_path {
            active.artifact_path = Set(artifact_path);
        }
        if let Some(claimed_until) = update.claimed_until {
            active.claimed_until = Set(claimed_until);
        }
        active.updated_at = Set(Utc::now());

        SyncJobs::update(active).exec(&*self.connection).await?;
        Ok(())
    }

    async fn list_idle_since(&self, cutoff: DateTime<Utc>) -> IngestResult<Vec<SyncJob>> {
        let models = SyncJobs::find()
            .filter(sync_jobs::Column::Status.is_not_in(TERMINAL_STATUSES))
            .filter(sync_jobs::Column::UpdatedAt.lt(cutoff))
            .all(&*self.connection)
            .await?;
        models.into_iter().map(Self::model_to_domain).collect()
    }

    async fn delete_terminal_before(&self, cutoff: DateTime<Utc>) -> IngestResult<u64> {
        let result = SyncJobs::delete_many()
            .filter(sync_jobs::Column::Status.is_in(TERMINAL_STATUSES))
            .filter(sync_jobs::Column::UpdatedAt.lt(cutoff))
            .exec(&*self.connection)
            .await?;
        Ok(result.rows_affected)
    }
}
