//! M3U playlist client
//!
//! Downloads a playlist in one buffered request (playlists are small
//! compared to EPG guides) and walks it line by line. Each `#EXTINF`
//! line plus the following non-comment line forms one channel; entries
//! without a URL line are dropped.
//!
//! Stable key: `tvg-id` when the playlist carries one, otherwise the
//! stream URL itself, which provider playlists keep stable across
//! refreshes.

use async_trait::async_trait;
use bytes::Bytes;
use regex::Regex;
use tracing::{debug, warn};

use crate::errors::{IngestError, IngestResult};
use crate::models::ProviderChannelRecord;
use crate::utils::{DecompressionService, UrlUtils};

use super::traits::ChannelSource;

const MAX_PLAYLIST_BYTES: u64 = 256 * 1024 * 1024;

pub struct M3uClient {
    client: reqwest::Client,
    tvg_id: Regex,
    tvg_logo: Regex,
    group_title: Regex,
}

impl M3uClient {
    pub fn new(client: reqwest::Client) -> Self {
        // Patterns are literals; compile once per client
        Self {
            client,
            tvg_id: Regex::new(r#"(?i)tvg-id="([^"]*)""#).unwrap(),
            tvg_logo: Regex::new(r#"(?i)tvg-logo="([^"]*)""#).unwrap(),
            group_title: Regex::new(r#"(?i)group-title="([^"]*)""#).unwrap(),
        }
    }

    fn capture(&self, regex: &Regex, line: &str) -> Option<String> {
        regex
            .captures(line)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
            .filter(|s| !s.is_empty())
    }

    /// Parse playlist text into channel records
    fn parse_playlist(&self, content: &str) -> IngestResult<Vec<ProviderChannelRecord>> {
        let mut lines = content.lines().peekable();
        match lines.peek() {
            Some(first) if first.trim_start_matches('\u{feff}').starts_with("#EXTM3U") => {}
            _ => {
                return Err(IngestError::malformed(
                    "playlist does not start with #EXTM3U",
                ));
            }
        }

        let mut channels = Vec::new();
        let mut dropped = 0usize;
        let mut pending_extinf: Option<String> = None;

        for line in lines {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if line.starts_with("#EXTINF:") {
                if pending_extinf.replace(line.to_string()).is_some() {
                    dropped += 1;
                }
                continue;
            }
            if line.starts_with('#') {
                continue;
            }
            // A bare URL line closes the pending entry
            let Some(extinf) = pending_extinf.take() else {
                continue;
            };
            match self.parse_entry(&extinf, line) {
                Some(channel) => channels.push(channel),
                None => dropped += 1,
            }
        }
        if pending_extinf.is_some() {
            dropped += 1;
        }

        if dropped > 0 {
            warn!(dropped, "dropped malformed playlist entries");
        }
        Ok(channels)
    }

    fn parse_entry(&self, extinf: &str, url: &str) -> Option<ProviderChannelRecord> {
        // #EXTINF:-1 tvg-id="..." tvg-logo="..." group-title="...",Name
        let comma = extinf.rfind(',')?;
        let name = extinf[comma + 1..].trim();
        if name.is_empty() {
            return None;
        }
        let attributes = &extinf[..comma];

        let tvg_id = self.capture(&self.tvg_id, attributes);
        let stream_id = tvg_id.clone().unwrap_or_else(|| url.to_string());

        Some(ProviderChannelRecord {
            stream_id,
            name: name.to_string(),
            stream_url: url.to_string(),
            category_id: self.capture(&self.group_title, attributes),
            logo_url: self.capture(&self.tvg_logo, attributes),
            epg_channel_id: tvg_id,
        })
    }

    async fn download(&self, source_url: &str) -> IngestResult<String> {
        let masked = UrlUtils::obfuscate_credentials(source_url);
        debug!(url = %masked, "downloading M3U playlist");

        let response = self.client.get(source_url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(IngestError::network(
                masked,
                format!("HTTP {}", status.as_u16()),
            ));
        }

        let body: Bytes = response.bytes().await?;
        let decompressed = DecompressionService::decompress(body, MAX_PLAYLIST_BYTES)?;
        String::from_utf8(decompressed)
            .map_err(|_| IngestError::malformed("playlist is not valid UTF-8"))
    }
}

#[async_trait]
impl ChannelSource for M3uClient {
    async fn fetch_channels(&self, source_url: &str) -> IngestResult<Vec<ProviderChannelRecord>> {
        let content = self.download(source_url).await?;
        self.parse_playlist(&content)
    }
}
