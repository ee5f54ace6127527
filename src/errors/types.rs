//! Error type definitions for the ingestion core
//!
//! The taxonomy distinguishes conditions that are worth retrying with a
//! different retrieval strategy (network faults, stalls, mid-stream
//! corruption) from conditions where retrying cannot help (oversized
//! payloads, malformed sources, conflicting jobs).

use thiserror::Error;

/// Top-level error type for ingestion operations
#[derive(Error, Debug)]
pub enum IngestError {
    /// Connection, DNS, or reset failures while fetching a source
    #[error("Network error fetching {url}: {message}")]
    Network { url: String, message: String },

    /// No bytes arrived within the idle window
    #[error("Stream stalled: no data received from {url} within {idle_secs}s")]
    StallTimeout { url: String, idle_secs: u64 },

    /// Decompressed payload exceeds the representable in-memory size.
    /// Reports both sizes so the failure message can suggest a smaller
    /// or filtered source.
    #[error(
        "Source too large: {decompressed_bytes} bytes decompressed (from {compressed_bytes} compressed) exceeds the {limit_bytes} byte limit; use a smaller or filtered source"
    )]
    OversizedPayload {
        compressed_bytes: u64,
        decompressed_bytes: u64,
        limit_bytes: u64,
    },

    /// Content is not a document we can parse (wrong leading byte,
    /// missing root structure)
    #[error("Malformed source: {message}")]
    MalformedSource { message: String },

    /// Decompression failed mid-stream after exhausting retrieval
    /// strategies
    #[error("Corrupted stream from {url}: {message} (after {attempts} attempts)")]
    CorruptedStream {
        url: String,
        message: String,
        attempts: u32,
    },

    /// A non-terminal job already exists for the same (owner, target)
    #[error("A sync job is already active for owner {owner_id} target {target_id}")]
    Conflict {
        owner_id: uuid::Uuid,
        target_id: uuid::Uuid,
    },

    /// Job or target missing
    #[error("Not found: {resource} with id {id}")]
    NotFound { resource: String, id: String },

    /// Store write or read failure; retried from the last checkpoint on
    /// the next poll
    #[error("Persistence error: {0}")]
    Persistence(#[from] sea_orm::DbErr),

    /// Anything else
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl IngestError {
    pub fn network<U: Into<String>, M: Into<String>>(url: U, message: M) -> Self {
        Self::Network {
            url: url.into(),
            message: message.into(),
        }
    }

    pub fn malformed<M: Into<String>>(message: M) -> Self {
        Self::MalformedSource {
            message: message.into(),
        }
    }

    pub fn not_found<R: Into<String>, I: Into<String>>(resource: R, id: I) -> Self {
        Self::NotFound {
            resource: resource.into(),
            id: id.into(),
        }
    }

    pub fn internal<M: Into<String>>(message: M) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether a fetch hitting this error should fall back to another
    /// retrieval strategy before being surfaced as terminal
    pub fn is_retryable_fetch(&self) -> bool {
        matches!(
            self,
            Self::Network { .. } | Self::StallTimeout { .. } | Self::CorruptedStream { .. }
        )
    }

    /// Whether a failed chunk should leave the job non-terminal so the
    /// next poll retries from the checkpoint
    pub fn is_chunk_retryable(&self) -> bool {
        matches!(self, Self::Persistence(_))
    }
}

impl From<reqwest::Error> for IngestError {
    fn from(e: reqwest::Error) -> Self {
        let url = e
            .url()
            .map(|u| crate::utils::UrlUtils::obfuscate_credentials(u.as_str()))
            .unwrap_or_else(|| "<unknown>".to_string());
        Self::Network {
            url,
            message: e.to_string(),
        }
    }
}

impl From<serde_json::Error> for IngestError {
    fn from(e: serde_json::Error) -> Self {
        Self::Internal {
            message: format!("serialization failed: {e}"),
        }
    }
}

impl From<std::io::Error> for IngestError {
    fn from(e: std::io::Error) -> Self {
        Self::Internal {
            message: format!("io error: {e}"),
        }
    }
}
