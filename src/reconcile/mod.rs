//! Stable-key reconciliation
//!
//! Diffs a freshly fetched record set against the stored lineup for one
//! source. The diff is computed entirely up front; applying it is the
//! job runner's business, batch by batch, so time-budget checks stay
//! effective.
//!
//! The invariant everything here serves: source-owned fields always
//! follow the feed, user-owned fields always survive a re-sync as long
//! as the stable key keeps appearing. Updated rows are built by copying
//! the stored row and refreshing only its source-owned fields, so a
//! user-owned value can never be clobbered by construction.

use std::collections::{HashMap, HashSet};

use chrono::Utc;
use uuid::Uuid;

use crate::models::{EpgChannelRecord, ProviderChannelRecord, StoredChannel, StoredEpgChannel};

/// How missing stable keys are treated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileMode {
    /// The fresh set is the whole lineup; keys it omits are deleted
    FullReplace,
    /// The fresh set is a deliberate subset (category filter etc.);
    /// keys it omits are left untouched
    Filtered,
}

/// Writes and deletes needed to bring the store in line with the feed
#[derive(Debug)]
pub struct ReconcilePlan<S> {
    pub to_insert: Vec<S>,
    pub to_update: Vec<S>,
    /// Stable keys to remove (FullReplace only)
    pub to_delete: Vec<String>,
    /// Rows whose source-owned fields already matched
    pub unchanged: usize,
}

impl<S> ReconcilePlan<S> {
    /// Rows that need an upsert, inserts first
    pub fn into_writes(self) -> (Vec<S>, Vec<String>) {
        let mut writes = self.to_insert;
        writes.extend(self.to_update);
        (writes, self.to_delete)
    }
}

/// Binds one stored/fresh record pair to the generic diff
pub trait ReconcileAdapter {
    type Fresh;
    type Stored: Clone;

    fn fresh_key<'a>(&self, fresh: &'a Self::Fresh) -> &'a str;
    fn stored_key<'a>(&self, stored: &'a Self::Stored) -> &'a str;

    /// Brand-new stored row for a key the store has never seen
    fn insert_row(&self, fresh: &Self::Fresh) -> Self::Stored;

    /// Stored row with its source-owned fields refreshed from the feed,
    /// or `None` when the feed brought nothing new
    fn refreshed(&self, stored: &Self::Stored, fresh: &Self::Fresh) -> Option<Self::Stored>;
}

pub fn reconcile<A: ReconcileAdapter>(
    adapter: &A,
    previous: &[A::Stored],
    fresh: &[A::Fresh],
    mode: ReconcileMode,
) -> ReconcilePlan<A::Stored> {
    let stored_by_key: HashMap<&str, &A::Stored> = previous
        .iter()
        .map(|row| (adapter.stored_key(row), row))
        .collect();

    let mut plan = ReconcilePlan {
        to_insert: Vec::new(),
        to_update: Vec::new(),
        to_delete: Vec::new(),
        unchanged: 0,
    };

    // First occurrence of a duplicated key wins
    let mut seen: HashSet<&str> = HashSet::with_capacity(fresh.len());
    for record in fresh {
        let key = adapter.fresh_key(record);
        if !seen.insert(key) {
            continue;
        }
        match stored_by_key.get(key) {
            None => plan.to_insert.push(adapter.insert_row(record)),
            Some(stored) => match adapter.refreshed(stored, record) {
                Some(row) => plan.to_update.push(row),
                None => plan.unchanged += 1,
            },
        }
    }

    if mode == ReconcileMode::FullReplace {
        plan.to_delete = previous
            .iter()
            .map(|row| adapter.stored_key(row))
            .filter(|key| !seen.contains(key))
            .map(str::to_string)
            .collect();
    }

    plan
}

/// Reconciliation of parsed XMLTV channels against the stored EPG lineup
pub struct EpgReconciler {
    pub source_id: Uuid,
}

impl ReconcileAdapter for EpgReconciler {
    type Fresh = EpgChannelRecord;
    type Stored = StoredEpgChannel;

    fn fresh_key<'a>(&self, fresh: &'a EpgChannelRecord) -> &'a str {
        fresh.stable_key()
    }

    fn stored_key<'a>(&self, stored: &'a StoredEpgChannel) -> &'a str {
        &stored.channel_id
    }

    fn insert_row(&self, fresh: &EpgChannelRecord) -> StoredEpgChannel {
        let now = Utc::now();
        StoredEpgChannel {
            id: Uuid::new_v4(),
            source_id: self.source_id,
            channel_id: fresh.stable_key().to_string(),
            display_name: fresh.display_name.clone(),
            logo_url: fresh.logo_url.clone(),
            custom_display_name: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn refreshed(
        &self,
        stored: &StoredEpgChannel,
        fresh: &EpgChannelRecord,
    ) -> Option<StoredEpgChannel> {
        if stored.display_name == fresh.display_name && stored.logo_url == fresh.logo_url {
            return None;
        }
        Some(StoredEpgChannel {
            display_name: fresh.display_name.clone(),
            logo_url: fresh.logo_url.clone(),
            updated_at: Utc::now(),
            ..stored.clone()
        })
    }
}

/// Reconciliation of provider channel lists against the stored lineup
pub struct ChannelReconciler {
    pub source_id: Uuid,
}

impl ReconcileAdapter for ChannelReconciler {
    type Fresh = ProviderChannelRecord;
    type Stored = StoredChannel;

    fn fresh_key<'a>(&self, fresh: &'a ProviderChannelRecord) -> &'a str {
        &fresh.stream_id
    }

    fn stored_key<'a>(&self, stored: &'a StoredChannel) -> &'a str {
        &stored.stream_id
    }

    fn insert_row(&self, fresh: &ProviderChannelRecord) -> StoredChannel {
        let now = Utc::now();
        StoredChannel {
            id: Uuid::new_v4(),
            source_id: self.source_id,
            stream_id: fresh.stream_id.clone(),
            name: fresh.name.clone(),
            stream_url: fresh.stream_url.clone(),
            category_id: fresh.category_id.clone(),
            logo_url: fresh.logo_url.clone(),
            epg_channel_id: fresh.epg_channel_id.clone(),
            auto_epg_channel_id: None,
            custom_epg_channel_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn refreshed(
        &self,
        stored: &StoredChannel,
        fresh: &ProviderChannelRecord,
    ) -> Option<StoredChannel> {
        if stored.name == fresh.name
            && stored.stream_url == fresh.stream_url
            && stored.category_id == fresh.category_id
            && stored.logo_url == fresh.logo_url
            && stored.epg_channel_id == fresh.epg_channel_id
        {
            return None;
        }
        // auto_epg_channel_id belongs to the mapping job, custom to the
        // user; both ride along untouched
        Some(StoredChannel {
            name: fresh.name.clone(),
            stream_url: fresh.stream_url.clone(),
            category_id: fresh.category_id.clone(),
            logo_url: fresh.logo_url.clone(),
            epg_channel_id: fresh.epg_channel_id.clone(),
            updated_at: Utc::now(),
            ..stored.clone()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh_epg(id: &str, name: &str) -> EpgChannelRecord {
        EpgChannelRecord {
            channel_id: id.to_string(),
            display_name: name.to_string(),
            logo_url: None,
        }
    }

    fn stored_epg(source_id: Uuid, id: &str, name: &str) -> StoredEpgChannel {
        let now = Utc::now();
        StoredEpgChannel {
            id: Uuid::new_v4(),
            source_id,
            channel_id: id.to_string(),
            display_name: name.to_string(),
            logo_url: None,
            custom_display_name: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn inserts_updates_and_deletes_split_correctly() {
        let source_id = Uuid::new_v4();
        let adapter = EpgReconciler { source_id };
        let previous = vec![
            stored_epg(source_id, "keep", "Keep"),
            stored_epg(source_id, "rename", "Old Name"),
            stored_epg(source_id, "gone", "Gone"),
        ];
        let fresh = vec![
            fresh_epg("keep", "Keep"),
            fresh_epg("rename", "New Name"),
            fresh_epg("new", "Brand New"),
        ];

        let plan = reconcile(&adapter, &previous, &fresh, ReconcileMode::FullReplace);

        assert_eq!(plan.to_insert.len(), 1);
        assert_eq!(plan.to_insert[0].channel_id, "new");
        assert_eq!(plan.to_update.len(), 1);
        assert_eq!(plan.to_update[0].display_name, "New Name");
        assert_eq!(plan.to_delete, vec!["gone".to_string()]);
        assert_eq!(plan.unchanged, 1);
    }

    #[test]
    fn filtered_mode_never_deletes() {
        let source_id = Uuid::new_v4();
        let adapter = EpgReconciler { source_id };
        let previous = vec![stored_epg(source_id, "gone", "Gone")];
        let fresh = vec![fresh_epg("new", "New")];

        let plan = reconcile(&adapter, &previous, &fresh, ReconcileMode::Filtered);
        assert!(plan.to_delete.is_empty());
        assert_eq!(plan.to_insert.len(), 1);
    }

    #[test]
    fn duplicate_stable_keys_first_occurrence_wins() {
        let source_id = Uuid::new_v4();
        let adapter = EpgReconciler { source_id };
        let fresh = vec![
            fresh_epg("dup", "First"),
            fresh_epg("dup", "Second"),
            fresh_epg("dup", "Third"),
        ];

        let plan = reconcile(&adapter, &[], &fresh, ReconcileMode::FullReplace);
        assert_eq!(plan.to_insert.len(), 1);
        assert_eq!(plan.to_insert[0].display_name, "First");
    }

    #[test]
    fn user_owned_fields_survive_refresh() {
        let source_id = Uuid::new_v4();
        let adapter = EpgReconciler { source_id };
        let mut stored = stored_epg(source_id, "a", "Feed Name");
        stored.custom_display_name = Some("My Name".to_string());
        let previous = vec![stored];
        let fresh = vec![fresh_epg("a", "Renamed By Feed")];

        let plan = reconcile(&adapter, &previous, &fresh, ReconcileMode::FullReplace);
        assert_eq!(plan.to_update.len(), 1);
        let updated = &plan.to_update[0];
        // Source-owned follows the feed, user-owned survives
        assert_eq!(updated.display_name, "Renamed By Feed");
        assert_eq!(updated.custom_display_name.as_deref(), Some("My Name"));
        // Row identity is stable across the refresh
        assert_eq!(updated.id, previous[0].id);
    }

    #[test]
    fn channel_refresh_keeps_mapping_fields() {
        let source_id = Uuid::new_v4();
        let adapter = ChannelReconciler { source_id };
        let now = Utc::now();
        let stored = StoredChannel {
            id: Uuid::new_v4(),
            source_id,
            stream_id: "42".to_string(),
            name: "Old".to_string(),
            stream_url: "http://host/42.ts".to_string(),
            category_id: None,
            logo_url: None,
            epg_channel_id: None,
            auto_epg_channel_id: Some("auto.uk".to_string()),
            custom_epg_channel_id: Some("user.uk".to_string()),
            created_at: now,
            updated_at: now,
        };
        let fresh = ProviderChannelRecord {
            stream_id: "42".to_string(),
            name: "New".to_string(),
            stream_url: "http://host/42.ts".to_string(),
            category_id: Some("5".to_string()),
            logo_url: None,
            epg_channel_id: None,
        };

        let plan = reconcile(
            &adapter,
            std::slice::from_ref(&stored),
            std::slice::from_ref(&fresh),
            ReconcileMode::FullReplace,
        );
        let updated = &plan.to_update[0];
        assert_eq!(updated.name, "New");
        assert_eq!(updated.auto_epg_channel_id.as_deref(), Some("auto.uk"));
        assert_eq!(updated.custom_epg_channel_id.as_deref(), Some("user.uk"));
    }

    #[test]
    fn identical_feed_produces_empty_plan() {
        let source_id = Uuid::new_v4();
        let adapter = EpgReconciler { source_id };
        let previous = vec![stored_epg(source_id, "a", "Same")];
        let fresh = vec![fresh_epg("a", "Same")];

        let plan = reconcile(&adapter, &previous, &fresh, ReconcileMode::FullReplace);
        assert!(plan.to_insert.is_empty());
        assert!(plan.to_update.is_empty());
        assert!(plan.to_delete.is_empty());
        assert_eq!(plan.unchanged, 1);
    }
}
