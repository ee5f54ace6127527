//! Domain models
//!
//! Plain serde structs decoupled from the SeaORM entities. Parsed records
//! are what the parser and provider clients emit; stored records are what
//! the repositories read and write. Identity for stored records is always
//! the stable external key (provider stream id, EPG channel id), never the
//! row uuid, so a re-sync can correlate old and new rows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One `<channel>` element extracted from an XMLTV document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpgChannelRecord {
    /// XMLTV channel id attribute (stable external key)
    pub channel_id: String,
    /// Concatenated, trimmed display-name text
    pub display_name: String,
    /// First `<icon src>` inside the channel, if any
    pub logo_url: Option<String>,
}

impl EpgChannelRecord {
    /// Stable key with the display-name fallback for feeds that ship
    /// blank ids
    pub fn stable_key(&self) -> &str {
        if self.channel_id.is_empty() {
            &self.display_name
        } else {
            &self.channel_id
        }
    }
}

/// One channel entry from a provider (Xtream API or M3U playlist)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderChannelRecord {
    /// Provider stream id (stable external key)
    pub stream_id: String,
    pub name: String,
    pub stream_url: String,
    pub category_id: Option<String>,
    pub logo_url: Option<String>,
    /// tvg-id / epg_channel_id hint supplied by the provider, used by the
    /// mapping job
    pub epg_channel_id: Option<String>,
}

/// Persisted EPG lineup entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredEpgChannel {
    pub id: Uuid,
    pub source_id: Uuid,
    /// Stable external key, unique per source
    pub channel_id: String,
    pub display_name: String,
    pub logo_url: Option<String>,
    /// User-owned: a display-name override the user attached; survives
    /// re-syncs while `channel_id` keeps appearing in the feed
    pub custom_display_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Persisted provider channel entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredChannel {
    pub id: Uuid,
    pub source_id: Uuid,
    /// Stable external key, unique per source
    pub stream_id: String,
    pub name: String,
    pub stream_url: String,
    pub category_id: Option<String>,
    pub logo_url: Option<String>,
    /// Provider-supplied EPG hint (source-owned)
    pub epg_channel_id: Option<String>,
    /// Computed by the mapping reconciliation job (source-owned)
    pub auto_epg_channel_id: Option<String>,
    /// User-owned: the user's explicit EPG mapping; never touched by sync
    /// or mapping jobs
    pub custom_epg_channel_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StoredChannel {
    /// Mapping that generation should use: the user's explicit choice
    /// wins over the computed one
    pub fn effective_epg_channel_id(&self) -> Option<&str> {
        self.custom_epg_channel_id
            .as_deref()
            .or(self.auto_epg_channel_id.as_deref())
    }
}

/// Snapshot returned to callers polling a job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatusSnapshot {
    pub id: Uuid,
    pub status: crate::jobs::JobStatus,
    pub progress: u8,
    pub message: Option<String>,
    pub error: Option<String>,
    pub total_items: u64,
    pub processed_items: u64,
}
