//! Data models for tabsync
//!
//! Defines the synchronized aggregate: a [`TabGroup`] owning an ordered list
//! of [`Tab`]s, plus the version helpers every mutation goes through.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Sync state of a single group as seen by this device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum SyncStatus {
    /// Local and remote agree
    Synced,
    /// Local changes not yet pushed
    #[default]
    LocalOnly,
    /// Known remotely, not yet merged locally
    RemoteOnly,
    /// Concurrent edits awaiting resolution
    Conflict,
    /// Upload in flight
    Syncing,
    /// Last sync attempt for this group failed
    Error,
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SyncStatus::Synced => "synced",
            SyncStatus::LocalOnly => "local-only",
            SyncStatus::RemoteOnly => "remote-only",
            SyncStatus::Conflict => "conflict",
            SyncStatus::Syncing => "syncing",
            SyncStatus::Error => "error",
        };
        f.write_str(s)
    }
}

/// A browser tab saved inside a group
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Tab {
    /// Unique identifier
    pub id: Uuid,
    /// The URL
    pub url: String,
    /// Page title at save time
    pub title: String,
    /// Favicon URL, if the page had one
    #[serde(default)]
    pub favicon: Option<String>,
    /// When this tab was saved
    pub created_at: DateTime<Utc>,
    /// When this tab was last opened
    pub last_accessed: DateTime<Utc>,
}

impl Tab {
    /// Create a new tab with the given URL
    pub fn new(url: impl Into<String>) -> Self {
        let url = url.into();
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            title: url.clone(),
            url,
            favicon: None,
            created_at: now,
            last_accessed: now,
        }
    }

    /// Builder-style title setter
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }
}

/// A named, ordered collection of tabs; the unit of synchronization
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TabGroup {
    /// Stable, globally unique identifier
    pub id: Uuid,
    /// Display name
    pub name: String,
    /// Tabs in display order
    pub tabs: Vec<Tab>,
    /// Creation time (immutable)
    pub created_at: DateTime<Utc>,
    /// Time of the last accepted mutation
    pub updated_at: DateTime<Utc>,
    /// Mutation counter, starts at 1
    pub version: u64,
    /// Locked groups are never removed automatically
    #[serde(default)]
    pub is_locked: bool,
    /// Tombstone flag
    #[serde(default)]
    pub is_deleted: bool,
    /// Sync state on this device
    #[serde(default)]
    pub sync_status: SyncStatus,
    /// When this group was last confirmed by the remote
    #[serde(default)]
    pub last_synced_at: Option<DateTime<Utc>>,
    /// Version both sides last agreed on (0 = never synced)
    #[serde(default)]
    pub synced_version: u64,
    /// Device that last wrote this group
    pub device_id: String,
    /// Owning account
    pub user_id: String,
}

impl TabGroup {
    /// Create a new group at version 1
    pub fn new(
        name: impl Into<String>,
        tabs: Vec<Tab>,
        device_id: impl Into<String>,
        user_id: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            tabs,
            created_at: now,
            updated_at: now,
            version: 1,
            is_locked: false,
            is_deleted: false,
            sync_status: SyncStatus::LocalOnly,
            last_synced_at: None,
            synced_version: 0,
            device_id: device_id.into(),
            user_id: user_id.into(),
        }
    }

    /// Record an accepted local mutation
    ///
    /// Bumps the version by exactly one and stamps the writer.
    pub fn touch(&mut self, device_id: &str) {
        self.version += 1;
        self.updated_at = Utc::now();
        self.device_id = device_id.to_string();
        self.sync_status = SyncStatus::LocalOnly;
    }

    /// Soft-delete the group
    pub fn tombstone(&mut self, device_id: &str) {
        self.is_deleted = true;
        self.touch(device_id);
    }

    /// Empty, unlocked, live groups are removed automatically
    pub fn is_auto_removable(&self) -> bool {
        !self.is_deleted && !self.is_locked && self.tabs.is_empty()
    }

    /// Whether local edits happened since the last agreed version
    pub fn has_unsynced_changes(&self) -> bool {
        self.version > self.synced_version
    }

    /// Mark this version as confirmed by the remote
    pub fn mark_synced(&mut self, at: DateTime<Utc>) {
        self.synced_version = self.version;
        self.last_synced_at = Some(at);
        self.sync_status = SyncStatus::Synced;
    }

    /// Compare the user-visible payload, ignoring sync bookkeeping
    pub fn same_content(&self, other: &TabGroup) -> bool {
        self.id == other.id
            && self.version == other.version
            && self.name == other.name
            && self.tabs == other.tabs
            && self.is_locked == other.is_locked
            && self.is_deleted == other.is_deleted
            && self.updated_at.timestamp_millis() == other.updated_at.timestamp_millis()
    }

    /// Position of a tab by id
    pub fn tab_index(&self, tab_id: Uuid) -> Option<usize> {
        self.tabs.iter().position(|t| t.id == tab_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group() -> TabGroup {
        TabGroup::new(
            "Research",
            vec![Tab::new("https://a.example"), Tab::new("https://b.example")],
            "device-a",
            "user-1",
        )
    }

    #[test]
    fn test_new_group_starts_at_version_one() {
        let g = group();
        assert_eq!(g.version, 1);
        assert_eq!(g.synced_version, 0);
        assert_eq!(g.sync_status, SyncStatus::LocalOnly);
        assert!(!g.is_deleted);
        assert!(!g.is_locked);
    }

    #[test]
    fn test_touch_bumps_version_by_one() {
        let mut g = group();
        let before = g.updated_at;
        std::thread::sleep(std::time::Duration::from_millis(5));
        g.touch("device-b");
        assert_eq!(g.version, 2);
        assert_eq!(g.device_id, "device-b");
        assert!(g.updated_at > before);
    }

    #[test]
    fn test_tombstone() {
        let mut g = group();
        g.tombstone("device-a");
        assert!(g.is_deleted);
        assert_eq!(g.version, 2);
        assert!(!g.is_auto_removable());
    }

    #[test]
    fn test_auto_removable() {
        let mut g = group();
        assert!(!g.is_auto_removable());
        g.tabs.clear();
        assert!(g.is_auto_removable());
        g.is_locked = true;
        assert!(!g.is_auto_removable());
    }

    #[test]
    fn test_mark_synced() {
        let mut g = group();
        g.touch("device-a");
        assert!(g.has_unsynced_changes());
        g.mark_synced(Utc::now());
        assert!(!g.has_unsynced_changes());
        assert_eq!(g.synced_version, 2);
        assert_eq!(g.sync_status, SyncStatus::Synced);
    }

    #[test]
    fn test_same_content_ignores_sync_bookkeeping() {
        let g = group();
        let mut other = g.clone();
        other.sync_status = SyncStatus::Synced;
        other.last_synced_at = Some(Utc::now());
        assert!(g.same_content(&other));

        other.name = "Renamed".to_string();
        assert!(!g.same_content(&other));
    }

    #[test]
    fn test_sync_status_serialization() {
        let json = serde_json::to_string(&SyncStatus::LocalOnly).unwrap();
        assert_eq!(json, "\"local-only\"");
        assert_eq!(SyncStatus::RemoteOnly.to_string(), "remote-only");
    }

    #[test]
    fn test_group_serialization() {
        let g = group();
        let json = serde_json::to_string(&g).unwrap();
        let back: TabGroup = serde_json::from_str(&json).unwrap();
        assert_eq!(g, back);
    }
}
