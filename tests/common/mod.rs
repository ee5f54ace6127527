//! In-memory store doubles and fixtures shared by the integration tests
//!
//! The doubles implement the store traits over mutex-held maps so the
//! runner's orchestration can be exercised without a database or a wire.
//! `FlakyGate` lets a test inject one transient persistence failure.

// Each test binary compiles this module; not all of them use every helper.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use lineup_ingest::config::JobConfig;
use lineup_ingest::database::repositories::{ChannelStore, EpgChannelStore, JobStore};
use lineup_ingest::errors::{IngestError, IngestResult};
use lineup_ingest::jobs::{ArtifactFetcher, JobArtifact, JobKind, JobUpdate, SyncJob};
use lineup_ingest::models::{EpgChannelRecord, StoredChannel, StoredEpgChannel};

fn store_error(message: &str) -> IngestError {
    IngestError::Persistence(sea_orm::DbErr::Custom(message.to_string()))
}

/// Trip once, then pass forever
#[derive(Default)]
pub struct FlakyGate {
    remaining_failures: AtomicUsize,
}

impl FlakyGate {
    pub fn fail_next(&self, times: usize) {
        self.remaining_failures.store(times, Ordering::SeqCst);
    }

    fn check(&self) -> IngestResult<()> {
        let value = self.remaining_failures.load(Ordering::SeqCst);
        if value > 0 {
            self.remaining_failures.store(value - 1, Ordering::SeqCst);
            return Err(store_error("injected store failure"));
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryJobStore {
    jobs: Mutex<HashMap<Uuid, SyncJob>>,
    pub gate: FlakyGate,
    pub update_calls: AtomicUsize,
}

impl InMemoryJobStore {
    pub fn get(&self, id: Uuid) -> Option<SyncJob> {
        self.jobs.lock().unwrap().get(&id).cloned()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn create(&self, job: &SyncJob) -> IngestResult<()> {
        self.jobs.lock().unwrap().insert(job.id, job.clone());
        Ok(())
    }

    async fn load(&self, id: Uuid) -> IngestResult<Option<SyncJob>> {
        Ok(self.jobs.lock().unwrap().get(&id).cloned())
    }

    async fn find_active(
        &self,
        owner_id: Uuid,
        target_id: Uuid,
    ) -> IngestResult<Option<SyncJob>> {
        Ok(self
            .jobs
            .lock()
            .unwrap()
            .values()
            .find(|job| {
                job.owner_id == owner_id
                    && job.target_id == target_id
                    && !job.status.is_terminal()
            })
            .cloned())
    }

    async fn update(&self, id: Uuid, update: JobUpdate) -> IngestResult<()> {
        self.gate.check()?;
        self.update_calls.fetch_add(1, Ordering::SeqCst);
        let mut jobs = self.jobs.lock().unwrap();
        let job = jobs
            .get_mut(&id)
            .ok_or_else(|| store_error("no such job"))?;
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

    async fn list_idle_since(&self, cutoff: DateTime<Utc>) -> IngestResult<Vec<SyncJob>> {
        Ok(self
            .jobs
            .lock()
            .unwrap()
            .values()
            .filter(|job| !job.status.is_terminal() && job.updated_at < cutoff)
            .cloned()
            .collect())
    }

    async fn delete_terminal_before(&self, cutoff: DateTime<Utc>) -> IngestResult<u64> {
        let mut jobs = self.jobs.lock().unwrap();
        let before = jobs.len();
        jobs.retain(|_, job| !(job.status.is_terminal() && job.updated_at < cutoff));
        Ok((before - jobs.len()) as u64)
    }
}

#[derive(Default)]
pub struct InMemoryEpgStore {
    rows: Mutex<HashMap<(Uuid, String), StoredEpgChannel>>,
    pub gate: FlakyGate,
    pub write_calls: AtomicUsize,
}

impl InMemoryEpgStore {
    pub fn seed(&self, row: StoredEpgChannel) {
        self.rows
            .lock()
            .unwrap()
            .insert((row.source_id, row.channel_id.clone()), row);
    }

    pub fn all(&self, source_id: Uuid) -> Vec<StoredEpgChannel> {
        let mut rows: Vec<_> = self
            .rows
            .lock()
            .unwrap()
            .values()
            .filter(|row| row.source_id == source_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.channel_id.cmp(&b.channel_id));
        rows
    }
}

#[async_trait]
impl EpgChannelStore for InMemoryEpgStore {
    async fn find_by_source(&self, source_id: Uuid) -> IngestResult<Vec<StoredEpgChannel>> {
        Ok(self.all(source_id))
    }

    async fn upsert_batch(&self, batch: &[StoredEpgChannel]) -> IngestResult<()> {
        self.gate.check()?;
        self.write_calls.fetch_add(1, Ordering::SeqCst);
        let mut rows = self.rows.lock().unwrap();
        for row in batch {
            let key = (row.source_id, row.channel_id.clone());
            // Upsert keeps the original row id and created_at
            let merged = match rows.get(&key) {
                Some(existing) => StoredEpgChannel {
                    id: existing.id,
                    created_at: existing.created_at,
                    ..row.clone()
                },
                None => row.clone(),
            };
            rows.insert(key, merged);
        }
        Ok(())
    }

    async fn delete_by_keys(&self, source_id: Uuid, channel_ids: &[String]) -> IngestResult<u64> {
        self.gate.check()?;
        let mut rows = self.rows.lock().unwrap();
        let before = rows.len();
        for id in channel_ids {
            rows.remove(&(source_id, id.clone()));
        }
        Ok((before - rows.len()) as u64)
    }
}

#[derive(Default)]
pub struct InMemoryChannelStore {
    rows: Mutex<HashMap<(Uuid, String), StoredChannel>>,
}

impl InMemoryChannelStore {
    pub fn seed(&self, row: StoredChannel) {
        self.rows
            .lock()
            .unwrap()
            .insert((row.source_id, row.stream_id.clone()), row);
    }

    pub fn all(&self, source_id: Uuid) -> Vec<StoredChannel> {
        let mut rows: Vec<_> = self
            .rows
            .lock()
            .unwrap()
            .values()
            .filter(|row| row.source_id == source_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.stream_id.cmp(&b.stream_id));
        rows
    }
}

#[async_trait]
impl ChannelStore for InMemoryChannelStore {
    async fn find_by_source(&self, source_id: Uuid) -> IngestResult<Vec<StoredChannel>> {
        Ok(self.all(source_id))
    }

    async fn upsert_batch(&self, batch: &[StoredChannel]) -> IngestResult<()> {
        let mut rows = self.rows.lock().unwrap();
        for row in batch {
            let key = (row.source_id, row.stream_id.clone());
            let merged = match rows.get(&key) {
                Some(existing) => StoredChannel {
                    id: existing.id,
                    created_at: existing.created_at,
                    ..row.clone()
                },
                None => row.clone(),
            };
            rows.insert(key, merged);
        }
        Ok(())
    }

    async fn delete_by_keys(&self, source_id: Uuid, stream_ids: &[String]) -> IngestResult<u64> {
        let mut rows = self.rows.lock().unwrap();
        let before = rows.len();
        for id in stream_ids {
            rows.remove(&(source_id, id.clone()));
        }
        Ok((before - rows.len()) as u64)
    }

    async fn set_auto_epg_batch(&self, updates: &[(Uuid, Option<String>)]) -> IngestResult<()> {
        let mut rows = self.rows.lock().unwrap();
        for (id, auto) in updates {
            if let Some(row) = rows.values_mut().find(|row| row.id == *id) {
                row.auto_epg_channel_id = auto.clone();
                row.updated_at = Utc::now();
            }
        }
        Ok(())
    }
}

/// Fetcher returning a canned artifact, counting how often the network
/// phase actually runs
pub struct CannedFetcher {
    artifact: JobArtifact,
    pub fetch_calls: AtomicUsize,
    pub fail_with: Mutex<Option<IngestError>>,
}

impl CannedFetcher {
    pub fn new(artifact: JobArtifact) -> Self {
        Self {
            artifact,
            fetch_calls: AtomicUsize::new(0),
            fail_with: Mutex::new(None),
        }
    }

    pub fn failing(error: IngestError) -> Self {
        Self {
            artifact: JobArtifact::EpgChannels {
                records: Vec::new(),
            },
            fetch_calls: AtomicUsize::new(0),
            fail_with: Mutex::new(Some(error)),
        }
    }
}

#[async_trait]
impl ArtifactFetcher for CannedFetcher {
    async fn fetch(&self, _kind: JobKind, _source_url: &str) -> IngestResult<JobArtifact> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.fail_with.lock().unwrap().take() {
            return Err(error);
        }
        Ok(self.artifact.clone())
    }
}

pub fn epg_records(count: usize) -> Vec<EpgChannelRecord> {
    (0..count)
        .map(|i| EpgChannelRecord {
            channel_id: format!("ch{i:05}.test"),
            display_name: format!("Channel {i}"),
            logo_url: (i % 2 == 0).then(|| format!("http://logos.test/{i}.png")),
        })
        .collect()
}

pub fn test_job_config() -> JobConfig {
    JobConfig {
        batch_size: 1000,
        ..JobConfig::default()
    }
}

pub fn spool_dir() -> tempfile::TempDir {
    tempfile::tempdir().expect("tempdir")
}
