//! Job lifecycle operations exposed to callers
//!
//! Creation enforces the one-active-job-per-(owner, target) rule, status
//! reads return a plain snapshot, and the sweep reaps jobs that stopped
//! making progress along with their spooled artifacts.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::JobConfig;
use crate::database::repositories::JobStore;
use crate::errors::{IngestError, IngestResult};
use crate::models::JobStatusSnapshot;

use super::runner::ChunkedJobRunner;
use super::types::{JobKind, JobStatus, JobUpdate, SyncJob};

pub struct JobService {
    jobs: Arc<dyn JobStore>,
    stale_after: Duration,
    retention: Duration,
}

impl JobService {
    pub fn new(jobs: Arc<dyn JobStore>, config: &JobConfig) -> IngestResult<Self> {
        let stale_after = config
            .stale_after()
            .map_err(|e| IngestError::internal(e.to_string()))?;
        let retention = config
            .retention()
            .map_err(|e| IngestError::internal(e.to_string()))?;
        Ok(Self {
            jobs,
            stale_after,
            retention,
        })
    }

    /// Create a job, rejecting a second non-terminal job for the same
    /// (owner, target) pair
    pub async fn create_job(
        &self,
        owner_id: Uuid,
        target_id: Uuid,
        kind: JobKind,
        source_url: String,
    ) -> IngestResult<Uuid> {
        if let Some(active) = self.jobs.find_active(owner_id, target_id).await? {
            warn!(
                owner_id = %owner_id,
                target_id = %target_id,
                active_job = %active.id,
                status = %active.status,
                "rejecting job creation, one is already active"
            );
            return Err(IngestError::Conflict {
                owner_id,
                target_id,
            });
        }

        let job = SyncJob::new(owner_id, target_id, kind, source_url);
        self.jobs.create(&job).await?;
        info!(job_id = %job.id, kind = %kind, owner_id = %owner_id, target_id = %target_id, "job created");
        Ok(job.id)
    }

    pub async fn get_job_status(&self, job_id: Uuid) -> IngestResult<JobStatusSnapshot> {
        let job = self
            .jobs
            .load(job_id)
            .await?
            .ok_or_else(|| IngestError::not_found("sync job", job_id.to_string()))?;
        Ok(JobStatusSnapshot {
            id: job.id,
            status: job.status,
            progress: job.progress,
            message: job.message,
            error: job.error,
            total_items: job.total_items,
            processed_items: job.processed_items,
        })
    }

    /// Reap abandoned and expired jobs.
    ///
    /// A non-terminal job whose last status write is older than the
    /// staleness window is marked failed and its spooled artifact
    /// removed; terminal jobs past the retention window are deleted.
    /// Returns (jobs failed as abandoned, terminal rows deleted).
    pub async fn sweep_stale_jobs(&self, runner: &ChunkedJobRunner) -> IngestResult<(usize, u64)> {
        let now = Utc::now();
        let idle_cutoff = now
            - chrono::Duration::from_std(self.stale_after)
                .unwrap_or_else(|_| chrono::Duration::minutes(5));

        let stale = self.jobs.list_idle_since(idle_cutoff).await?;
        let mut abandoned = 0usize;
        for job in stale {
            warn!(
                job_id = %job.id,
                status = %job.status,
                updated_at = %job.updated_at,
                "sweeping abandoned job"
            );
            runner.cleanup_spool(&job).await;
            self.jobs
                .update(
                    job.id,
                    JobUpdate {
                        status: Some(JobStatus::Failed),
                        error: Some(Some(format!(
                            "abandoned: no progress since {}",
                            job.updated_at.to_rfc3339()
                        ))),
                        message: Some(Some("abandoned".to_string())),
                        artifact: Some(None),
                        artifact_path: Some(None),
                        claimed_until: Some(None),
                        ..JobUpdate::default()
                    },
                )
                .await?;
            abandoned += 1;
        }

        let retention_cutoff = now
            - chrono::Duration::from_std(self.retention)
                .unwrap_or_else(|_| chrono::Duration::hours(24));
        let deleted = self.jobs.delete_terminal_before(retention_cutoff).await?;
        if abandoned > 0 || deleted > 0 {
            info!(abandoned, deleted, "sweep finished");
        }
        Ok((abandoned, deleted))
    }
}
