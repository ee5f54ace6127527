//! Auto EPG mapping
//!
//! Resolves each provider channel to an EPG channel id: an exact match
//! on the provider's `epg_channel_id` hint wins, otherwise a normalized
//! display-name match. The result lands in `auto_epg_channel_id`; the
//! user's `custom_epg_channel_id` is never touched, so a user mapping
//! always beats whatever this computes.

use std::collections::{HashMap, HashSet};

use crate::models::{StoredChannel, StoredEpgChannel};

/// Quality suffixes providers bolt onto channel names
const QUALITY_SUFFIXES: [&str; 5] = ["fhd", "uhd", "hd", "sd", "4k"];

/// Lookup structures over one EPG lineup
pub struct EpgIndex {
    ids: HashSet<String>,
    /// normalized display name -> channel id, first occurrence wins
    by_name: HashMap<String, String>,
}

impl EpgIndex {
    pub fn build(lineup: &[StoredEpgChannel]) -> Self {
        let mut ids = HashSet::with_capacity(lineup.len());
        let mut by_name = HashMap::with_capacity(lineup.len());
        for channel in lineup {
            ids.insert(channel.channel_id.clone());
            let normalized = normalize_name(&channel.display_name);
            if !normalized.is_empty() {
                by_name
                    .entry(normalized)
                    .or_insert_with(|| channel.channel_id.clone());
            }
        }
        Self { ids, by_name }
    }

    /// The EPG channel this provider channel should map to, if any
    pub fn resolve(&self, channel: &StoredChannel) -> Option<String> {
        if let Some(hint) = &channel.epg_channel_id
            && self.ids.contains(hint)
        {
            return Some(hint.clone());
        }
        let normalized = normalize_name(&channel.name);
        if normalized.is_empty() {
            return None;
        }
        self.by_name.get(&normalized).cloned()
    }
}

/// Lowercase, strip everything non-alphanumeric, drop a trailing
/// quality suffix ("BBC One FHD" and "bbc-one" normalize equal)
pub fn normalize_name(name: &str) -> String {
    let lowered: String = name
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_ascii_lowercase();

    for suffix in QUALITY_SUFFIXES {
        if lowered.len() > suffix.len()
            && let Some(stripped) = lowered.strip_suffix(suffix)
        {
            return stripped.to_string();
        }
    }
    lowered
}
