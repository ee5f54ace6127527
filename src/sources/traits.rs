//! Provider client seam
//!
//! A source client turns a provider URL into parsed channel records.
//! Protocol details (Xtream JSON API, M3U playlist grammar) live behind
//! this trait so the job runner stays protocol-agnostic.

use async_trait::async_trait;

use crate::errors::IngestResult;
use crate::models::ProviderChannelRecord;

#[async_trait]
pub trait ChannelSource: Send + Sync {
    /// Fetch and parse the provider's channel list
    async fn fetch_channels(&self, source_url: &str) -> IngestResult<Vec<ProviderChannelRecord>>;
}
