//! Chunked job execution
//!
//! `process_chunk` is the only entry point: the caller polls it with a
//! time budget until it reports the job terminal. Every invocation
//! reloads the persisted job row, resumes at whatever phase the row
//! says, and checkpoints before returning, so no state survives in
//! process memory between calls and any worker can pick the job up.
//!
//! Exclusivity across workers is a persisted lease (`claimed_until`):
//! a chunk first claims the row until slightly past its own budget, and
//! other workers seeing an unexpired lease back off. A crashed worker's
//! lease simply expires.
//!
//! The expensive fetch+parse runs once per job; its output is cached on
//! the row (small artifacts inline as JSON, large ones spooled to disk)
//! so later chunks go straight to importing.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::JobConfig;
use crate::database::repositories::{ChannelStore, EpgChannelStore, JobStore};
use crate::errors::{IngestError, IngestResult};
use crate::ingestor::StreamIngestor;
use crate::models::{EpgChannelRecord, ProviderChannelRecord};
use crate::reconcile::{
    ChannelReconciler, EpgReconciler, ReconcileMode, reconcile,
};
use crate::sources::SourceFactory;

use super::mapping;
use super::progress::ProgressReporter;
use super::types::{ChunkBudget, JobKind, JobStatus, JobUpdate, SyncJob};

/// Extra lease time past the chunk's own budget, covering clock skew
/// and the final checkpoint write
const LEASE_GRACE_SECS: i64 = 30;

/// Cached output of the fetch+parse phase
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobArtifact {
    EpgChannels { records: Vec<EpgChannelRecord> },
    ProviderChannels { records: Vec<ProviderChannelRecord> },
}

impl JobArtifact {
    pub fn len(&self) -> usize {
        match self {
            JobArtifact::EpgChannels { records } => records.len(),
            JobArtifact::ProviderChannels { records } => records.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop repeated stable keys, first occurrence winning, so the
    /// cached record list is already canonical
    fn dedup(self) -> Self {
        fn first_wins<T, F: Fn(&T) -> &str>(records: Vec<T>, key: F) -> Vec<T> {
            let mut seen = std::collections::HashSet::new();
            records
                .into_iter()
                .filter(|r| seen.insert(key(r).to_string()))
                .collect()
        }
        match self {
            JobArtifact::EpgChannels { records } => JobArtifact::EpgChannels {
                records: first_wins(records, |r| r.stable_key()),
            },
            JobArtifact::ProviderChannels { records } => JobArtifact::ProviderChannels {
                records: first_wins(records, |r| &r.stream_id),
            },
        }
    }
}

/// Seam between the runner and the actual network work, so job
/// orchestration is testable without a wire
#[async_trait]
pub trait ArtifactFetcher: Send + Sync {
    async fn fetch(&self, kind: JobKind, source_url: &str) -> IngestResult<JobArtifact>;
}

/// Production fetcher backed by the streaming ingestor and the
/// provider clients
pub struct NetworkFetcher {
    ingestor: StreamIngestor,
    sources: SourceFactory,
}

impl NetworkFetcher {
    pub fn new(ingestor: StreamIngestor, sources: SourceFactory) -> Self {
        Self { ingestor, sources }
    }
}

#[async_trait]
impl ArtifactFetcher for NetworkFetcher {
    async fn fetch(&self, kind: JobKind, source_url: &str) -> IngestResult<JobArtifact> {
        match kind {
            JobKind::EpgSync => {
                let (records, outcome) = self.ingestor.fetch_epg_channels(source_url).await?;
                debug!(
                    bytes_read = outcome.bytes_read,
                    compressed = outcome.compressed,
                    channels = records.len(),
                    "EPG fetch complete"
                );
                Ok(JobArtifact::EpgChannels { records })
            }
            JobKind::XtreamSync | JobKind::M3uSync => {
                let source = self
                    .sources
                    .for_kind(kind)
                    .ok_or_else(|| IngestError::internal("no source client for job kind"))?;
                let records = source.fetch_channels(source_url).await?;
                Ok(JobArtifact::ProviderChannels { records })
            }
            JobKind::MappingReconcile => Err(IngestError::internal(
                "mapping jobs have no source to fetch",
            )),
        }
    }
}

pub struct ChunkedJobRunner {
    jobs: Arc<dyn JobStore>,
    channels: Arc<dyn ChannelStore>,
    epg_channels: Arc<dyn EpgChannelStore>,
    fetcher: Arc<dyn ArtifactFetcher>,
    batch_size: usize,
    artifact_spill_bytes: usize,
    spool_dir: PathBuf,
}

impl ChunkedJobRunner {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        channels: Arc<dyn ChannelStore>,
        epg_channels: Arc<dyn EpgChannelStore>,
        fetcher: Arc<dyn ArtifactFetcher>,
        config: &JobConfig,
        spool_dir: PathBuf,
    ) -> Self {
        Self {
            jobs,
            channels,
            epg_channels,
            fetcher,
            batch_size: config.batch_size.max(1),
            artifact_spill_bytes: config.artifact_spill_bytes,
            spool_dir,
        }
    }

    /// Drive one job forward within the given budget.
    ///
    /// Returns `Ok(true)` when the job is terminal (including an already
    /// terminal job, which is a no-op), `Ok(false)` when more polling is
    /// needed. A store failure leaves the job non-terminal so the next
    /// poll retries from the checkpoint; any other failure marks it
    /// failed. Errors never propagate out of a chunk.
    pub async fn process_chunk(&self, job_id: Uuid, budget: ChunkBudget) -> IngestResult<bool> {
        let Some(mut job) = self.jobs.load(job_id).await? else {
            return Err(IngestError::not_found("sync job", job_id.to_string()));
        };

        if job.status.is_terminal() {
            return Ok(true);
        }

        let now = Utc::now();
        if job.lease_held(now) {
            debug!(job_id = %job_id, "lease held by another worker, backing off");
            return Ok(false);
        }

        // Claim the row for this chunk
        let lease = now
            + chrono::Duration::from_std(budget.remaining())
                .unwrap_or_else(|_| chrono::Duration::seconds(300))
            + chrono::Duration::seconds(LEASE_GRACE_SECS);
        let claim = JobUpdate {
            claimed_until: Some(Some(lease)),
            ..JobUpdate::default()
        };
        if let Err(e) = self.apply(&mut job, claim).await {
            if e.is_chunk_retryable() {
                warn!(job_id = %job_id, error = %e, "could not claim job, will retry next poll");
                return Ok(false);
            }
            return Err(e);
        }

        match self.drive(&mut job, &budget).await {
            Ok(done) => {
                if !done {
                    // Release the lease so the next poll can claim. If the
                    // store is down the lease just expires on its own.
                    if let Err(e) = self.apply(&mut job, JobUpdate::default().clear_lease()).await {
                        if !e.is_chunk_retryable() {
                            return Err(e);
                        }
                        warn!(job_id = %job_id, error = %e, "could not release lease, it will expire");
                    }
                }
                Ok(done)
            }
            Err(e) if e.is_chunk_retryable() => {
                warn!(job_id = %job_id, error = %e, "chunk hit a store error, will retry from checkpoint");
                // Best effort; if the store is down this fails too and
                // the lease just expires
                let _ = self
                    .jobs
                    .update(job_id, JobUpdate::default().clear_lease())
                    .await;
                Ok(false)
            }
            Err(e) => {
                warn!(job_id = %job_id, error = %e, "job failed");
                self.cleanup_spool(&job).await;
                let mark_failed = JobUpdate {
                    status: Some(JobStatus::Failed),
                    error: Some(Some(e.to_string())),
                    message: Some(Some("failed".to_string())),
                    artifact: Some(None),
                    artifact_path: Some(None),
                    claimed_until: Some(None),
                    ..JobUpdate::default()
                };
                if let Err(e) = self.apply(&mut job, mark_failed).await {
                    if !e.is_chunk_retryable() {
                        return Err(e);
                    }
                    warn!(job_id = %job_id, error = %e, "could not record failure, will retry next poll");
                    return Ok(false);
                }
                Ok(true)
            }
        }
    }

    async fn drive(&self, job: &mut SyncJob, budget: &ChunkBudget) -> IngestResult<bool> {
        if job.kind.is_mapping() {
            return self.drive_mapping(job, budget).await;
        }

        if !job.has_artifact() {
            self.transition(job, JobStatus::Downloading).await?;
            let artifact = self.fetcher.fetch(job.kind, &job.source_url).await?.dedup();
            self.transition(job, JobStatus::Parsing).await?;
            self.store_artifact(job, &artifact).await?;
        }

        if !budget.allows_batch(0) {
            return Ok(false);
        }

        self.transition(job, JobStatus::Importing).await?;
        match self.load_artifact(job).await? {
            JobArtifact::EpgChannels { records } => self.import_epg(job, &records, budget).await,
            JobArtifact::ProviderChannels { records } => {
                self.import_channels(job, &records, budget).await
            }
        }
    }

    async fn import_epg(
        &self,
        job: &mut SyncJob,
        records: &[EpgChannelRecord],
        budget: &ChunkBudget,
    ) -> IngestResult<bool> {
        let adapter = EpgReconciler {
            source_id: job.target_id,
        };
        let previous = self.epg_channels.find_by_source(job.target_id).await?;
        let total = records.len();
        let mut done_this_call = 0usize;

        while (job.processed_items as usize) < total {
            if !budget.allows_batch(done_this_call) {
                return Ok(false);
            }
            let start = job.processed_items as usize;
            let end = (start + self.batch_size).min(total);
            let plan = reconcile(
                &adapter,
                &previous,
                &records[start..end],
                ReconcileMode::Filtered,
            );
            let (writes, _) = plan.into_writes();
            if !writes.is_empty() {
                self.epg_channels.upsert_batch(&writes).await?;
            }
            done_this_call += end - start;
            self.checkpoint(job, end as u64, total as u64).await?;
        }

        // Full replace: keys the feed no longer carries are removed
        let fresh_keys: std::collections::HashSet<&str> =
            records.iter().map(|r| r.stable_key()).collect();
        let stale: Vec<String> = previous
            .iter()
            .map(|row| row.channel_id.clone())
            .filter(|key| !fresh_keys.contains(key.as_str()))
            .collect();
        for batch in stale.chunks(self.batch_size) {
            if !budget.allows_batch(done_this_call) {
                return Ok(false);
            }
            let removed = self
                .epg_channels
                .delete_by_keys(job.target_id, batch)
                .await?;
            debug!(job_id = %job.id, removed, "removed stale EPG channels");
            done_this_call += batch.len();
        }

        self.complete(job, total as u64).await?;
        Ok(true)
    }

    async fn import_channels(
        &self,
        job: &mut SyncJob,
        records: &[ProviderChannelRecord],
        budget: &ChunkBudget,
    ) -> IngestResult<bool> {
        let adapter = ChannelReconciler {
            source_id: job.target_id,
        };
        let previous = self.channels.find_by_source(job.target_id).await?;
        let total = records.len();
        let mut done_this_call = 0usize;

        while (job.processed_items as usize) < total {
            if !budget.allows_batch(done_this_call) {
                return Ok(false);
            }
            let start = job.processed_items as usize;
            let end = (start + self.batch_size).min(total);
            let plan = reconcile(
                &adapter,
                &previous,
                &records[start..end],
                ReconcileMode::Filtered,
            );
            let (writes, _) = plan.into_writes();
            if !writes.is_empty() {
                self.channels.upsert_batch(&writes).await?;
            }
            done_this_call += end - start;
            self.checkpoint(job, end as u64, total as u64).await?;
        }

        let fresh_keys: std::collections::HashSet<&str> =
            records.iter().map(|r| r.stream_id.as_str()).collect();
        let stale: Vec<String> = previous
            .iter()
            .map(|row| row.stream_id.clone())
            .filter(|key| !fresh_keys.contains(key.as_str()))
            .collect();
        for batch in stale.chunks(self.batch_size) {
            if !budget.allows_batch(done_this_call) {
                return Ok(false);
            }
            let removed = self.channels.delete_by_keys(job.target_id, batch).await?;
            debug!(job_id = %job.id, removed, "removed stale channels");
            done_this_call += batch.len();
        }

        self.complete(job, total as u64).await?;
        Ok(true)
    }

    /// Mapping jobs recompute auto EPG assignments for one provider
    /// lineup against one EPG lineup; no network phase
    async fn drive_mapping(&self, job: &mut SyncJob, budget: &ChunkBudget) -> IngestResult<bool> {
        self.transition(job, JobStatus::Processing).await?;

        let channels = self.channels.find_by_source(job.target_id).await?;
        let epg = self.epg_channels.find_by_source(job.owner_id).await?;
        let index = mapping::EpgIndex::build(&epg);
        let total = channels.len();
        let mut done_this_call = 0usize;

        while (job.processed_items as usize) < total {
            if !budget.allows_batch(done_this_call) {
                return Ok(false);
            }
            let start = job.processed_items as usize;
            let end = (start + self.batch_size).min(total);

            let updates: Vec<(Uuid, Option<String>)> = channels[start..end]
                .iter()
                .filter_map(|channel| {
                    let auto = index.resolve(channel);
                    (auto != channel.auto_epg_channel_id).then(|| (channel.id, auto))
                })
                .collect();
            if !updates.is_empty() {
                self.channels.set_auto_epg_batch(&updates).await?;
            }
            done_this_call += end - start;
            self.checkpoint(job, end as u64, total as u64).await?;
        }

        self.complete(job, total as u64).await?;
        Ok(true)
    }

    /// Move to a later phase; never regresses status or progress
    async fn transition(&self, job: &mut SyncJob, status: JobStatus) -> IngestResult<()> {
        if job.status == status {
            return Ok(());
        }
        let progress = ProgressReporter::progress_for(status, job.processed_items, job.total_items)
            .max(job.progress);
        let message = ProgressReporter::message_for(status, job.processed_items, job.total_items);
        self.apply(
            job,
            JobUpdate::status(status)
                .with_progress(progress)
                .with_message(message),
        )
        .await
    }

    async fn checkpoint(&self, job: &mut SyncJob, processed: u64, total: u64) -> IngestResult<()> {
        let progress =
            ProgressReporter::progress_for(job.status, processed, total).max(job.progress);
        let message = ProgressReporter::message_for(job.status, processed, total);
        self.apply(
            job,
            JobUpdate {
                progress: Some(progress),
                total_items: Some(total),
                processed_items: Some(processed),
                message: Some(Some(message)),
                ..JobUpdate::default()
            },
        )
        .await
    }

    async fn complete(&self, job: &mut SyncJob, total: u64) -> IngestResult<()> {
        self.cleanup_spool(job).await;
        info!(job_id = %job.id, kind = %job.kind, total, "job completed");
        self.apply(
            job,
            JobUpdate {
                status: Some(JobStatus::Completed),
                progress: Some(100),
                total_items: Some(total),
                processed_items: Some(total),
                message: Some(Some(ProgressReporter::message_for(
                    JobStatus::Completed,
                    total,
                    total,
                ))),
                error: Some(None),
                artifact: Some(None),
                artifact_path: Some(None),
                claimed_until: Some(None),
            },
        )
        .await
    }

    /// Persist a partial update and mirror it onto the in-memory row
    async fn apply(&self, job: &mut SyncJob, update: JobUpdate) -> IngestResult<()> {
        self.jobs.update(job.id, update.clone()).await?;
        if let Some(status) = update.status {
            job.status = status;
        }
        if let Some(progress) = update.progress {
            job.progress = progress;
        }
        if let Some(total) = update.total_items {
            job.total_items = total;
        }
        if let Some(processed) = update.processed_items {
            job.processed_items = processed;
        }
        if let Some(message) = update.message {
            job.message = message;
        }
        if let Some(error) = update.error {
            job.error = error;
        }
        if let Some(artifact) = update.artifact {
            job.artifact = artifact;
        }
        if let Some(artifact_path) = update.artifact_path {
            job.artifact_path = artifact_path;
        }
        if let Some(claimed_until) = update.claimed_until {
            job.claimed_until = claimed_until;
        }
        job.updated_at = Utc::now();
        Ok(())
    }

    async fn store_artifact(&self, job: &mut SyncJob, artifact: &JobArtifact) -> IngestResult<()> {
        let encoded = serde_json::to_string(artifact)?;
        let total = artifact.len() as u64;

        let update = if encoded.len() <= self.artifact_spill_bytes {
            JobUpdate {
                artifact: Some(Some(encoded)),
                total_items: Some(total),
                ..JobUpdate::default()
            }
        } else {
            let path = self.spool_path(job.id);
            tokio::fs::create_dir_all(&self.spool_dir).await?;
            tokio::fs::write(&path, encoded).await?;
            debug!(job_id = %job.id, path = %path.display(), "artifact spooled to disk");
            JobUpdate {
                artifact_path: Some(Some(path.to_string_lossy().into_owned())),
                total_items: Some(total),
                ..JobUpdate::default()
            }
        };
        self.apply(job, update).await
    }

    async fn load_artifact(&self, job: &SyncJob) -> IngestResult<JobArtifact> {
        if let Some(encoded) = &job.artifact {
            return Ok(serde_json::from_str(encoded)?);
        }
        if let Some(path) = &job.artifact_path {
            let encoded = tokio::fs::read_to_string(path).await.map_err(|e| {
                IngestError::internal(format!("spooled artifact unreadable at {path}: {e}"))
            })?;
            return Ok(serde_json::from_str(&encoded)?);
        }
        Err(IngestError::internal(
            "job reached import phase without an artifact",
        ))
    }

    fn spool_path(&self, job_id: Uuid) -> PathBuf {
        self.spool_dir.join(format!("{job_id}.artifact.json"))
    }

    /// Remove the spooled artifact, if any. Failure here only leaks a
    /// temp file, so it is logged and swallowed.
    pub(crate) async fn cleanup_spool(&self, job: &SyncJob) {
        if let Some(path) = &job.artifact_path
            && let Err(e) = tokio::fs::remove_file(path).await
            && e.kind() != std::io::ErrorKind::NotFound
        {
            warn!(job_id = %job.id, path = %path, error = %e, "failed to remove spooled artifact");
        }
    }
}
