//! Job type definitions

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

/// Lifecycle states of a sync job
///
/// Ingestion jobs walk `Pending → Downloading → Parsing → Importing →
/// Completed`; the lighter mapping family walks `Pending → Processing →
/// Completed`. `Failed` is reachable from any non-terminal state.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Downloading,
    Parsing,
    Importing,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// What a job ingests and from where
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// XMLTV EPG document fetch + parse + reconcile
    EpgSync,
    /// Xtream-style provider API channel list
    XtreamSync,
    /// M3U playlist channel list
    M3uSync,
    /// Recompute auto EPG mapping between two stored datasets; no fetch
    MappingReconcile,
}

impl JobKind {
    /// The light family skips the download/parse phases entirely
    pub fn is_mapping(&self) -> bool {
        matches!(self, JobKind::MappingReconcile)
    }
}

/// Domain view of a `sync_jobs` row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncJob {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub target_id: Uuid,
    pub kind: JobKind,
    pub source_url: String,
    pub status: JobStatus,
    pub progress: u8,
    pub total_items: u64,
    pub processed_items: u64,
    pub message: Option<String>,
    pub error: Option<String>,
    pub artifact: Option<String>,
    pub artifact_path: Option<String>,
    pub claimed_until: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SyncJob {
    pub fn new(owner_id: Uuid, target_id: Uuid, kind: JobKind, source_url: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            owner_id,
            target_id,
            kind,
            source_url,
            status: JobStatus::Pending,
            progress: 0,
            total_items: 0,
            processed_items: 0,
            message: Some("queued".to_string()),
            error: None,
            artifact: None,
            artifact_path: None,
            claimed_until: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Fetch and parse already happened if either artifact form is set
    pub fn has_artifact(&self) -> bool {
        self.artifact.is_some() || self.artifact_path.is_some()
    }

    /// Whether another worker currently holds the lease
    pub fn lease_held(&self, now: DateTime<Utc>) -> bool {
        self.claimed_until.is_some_and(|until| until > now)
    }
}

/// Partial update for a job row; unset fields are left untouched.
/// Nullable columns use a nested Option: `Some(None)` clears the column.
#[derive(Debug, Clone, Default)]
pub struct JobUpdate {
    pub status: Option<JobStatus>,
    pub progress: Option<u8>,
    pub total_items: Option<u64>,
    pub processed_items: Option<u64>,
    pub message: Option<Option<String>>,
    pub error: Option<Option<String>>,
    pub artifact: Option<Option<String>>,
    pub artifact_path: Option<Option<String>>,
    pub claimed_until: Option<Option<DateTime<Utc>>>,
}

impl JobUpdate {
    pub fn status(status: JobStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn with_progress(mut self, progress: u8) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn with_message<M: Into<String>>(mut self, message: M) -> Self {
        self.message = Some(Some(message.into()));
        self
    }

    pub fn clear_lease(mut self) -> Self {
        self.claimed_until = Some(None);
        self
    }
}

/// One bounded-duration invocation of job processing
///
/// Wall-clock bounded; `max_items` additionally caps the rows written in
/// one call, which keeps per-call work predictable on stores with uneven
/// write latency and makes chunk splitting reproducible in tests.
#[derive(Debug, Clone)]
pub struct ChunkBudget {
    started: Instant,
    max_duration: Duration,
    safety_margin: Duration,
    max_items: Option<usize>,
}

impl ChunkBudget {
    pub fn new(max_duration: Duration, safety_margin: Duration) -> Self {
        Self {
            started: Instant::now(),
            max_duration,
            safety_margin,
            max_items: None,
        }
    }

    pub fn with_max_items(mut self, max_items: usize) -> Self {
        self.max_items = Some(max_items);
        self
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn remaining(&self) -> Duration {
        self.max_duration.saturating_sub(self.elapsed())
    }

    /// Whether it is safe to start another batch: enough wall-clock left
    /// beyond the safety margin, and the per-call item allowance is not
    /// spent
    pub fn allows_batch(&self, items_done_this_call: usize) -> bool {
        if self.remaining() <= self.safety_margin {
            return false;
        }
        match self.max_items {
            Some(max) => items_done_this_call < max,
            None => true,
        }
    }
}
