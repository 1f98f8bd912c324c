//! Remote backend interface
//!
//! The engine does not own the backend's wire format. It needs four things
//! from a backend: upload, download, a per-user change subscription and a
//! health check.
//!
//! - `http`: reqwest JSON backend with a websocket change feed
//! - `memory`: shared in-process backend for tests and local demos

pub mod feed;
pub mod http;
pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::{Result, SyncError};
use crate::models::TabGroup;

pub use http::HttpRemoteStore;
pub use memory::MemoryRemoteStore;

/// Kind of row change reported by the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeEventType {
    Insert,
    Update,
    Delete,
}

/// The part of a changed record the listener cares about
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRecord {
    #[serde(default)]
    pub id: Option<Uuid>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub device_id: Option<String>,
}

impl From<&TabGroup> for ChangeRecord {
    fn from(group: &TabGroup) -> Self {
        Self {
            id: Some(group.id),
            user_id: Some(group.user_id.clone()),
            device_id: Some(group.device_id.clone()),
        }
    }
}

/// Push notification delivered by a subscription
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEvent {
    pub event_type: ChangeEventType,
    #[serde(default)]
    pub new_record: Option<ChangeRecord>,
    #[serde(default)]
    pub old_record: Option<ChangeRecord>,
}

impl ChangeEvent {
    pub fn insert(group: &TabGroup) -> Self {
        Self {
            event_type: ChangeEventType::Insert,
            new_record: Some(group.into()),
            old_record: None,
        }
    }

    pub fn update(old: &TabGroup, new: &TabGroup) -> Self {
        Self {
            event_type: ChangeEventType::Update,
            new_record: Some(new.into()),
            old_record: Some(old.into()),
        }
    }

    pub fn delete(old: &TabGroup) -> Self {
        Self {
            event_type: ChangeEventType::Delete,
            new_record: None,
            old_record: Some(old.into()),
        }
    }

    /// Record that identifies the writer: the old row for deletes, the new one otherwise
    fn source_record(&self) -> Option<&ChangeRecord> {
        match self.event_type {
            ChangeEventType::Delete => self.old_record.as_ref(),
            ChangeEventType::Insert | ChangeEventType::Update => self.new_record.as_ref(),
        }
    }

    /// Device that caused this change, if the backend reported it
    pub fn originating_device(&self) -> Option<&str> {
        self.source_record()?.device_id.as_deref()
    }

    /// Account the changed row belongs to
    pub fn user_id(&self) -> Option<&str> {
        self.source_record()?.user_id.as_deref()
    }
}

/// Upload/download of groups plus change notifications, scoped per user
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Upsert `groups`, or replace the user's whole set when `overwrite` is true
    async fn upload_tab_groups(&self, user_id: &str, groups: &[TabGroup], overwrite: bool)
        -> Result<()>;

    /// Fetch every group stored for the user
    async fn download_tab_groups(&self, user_id: &str) -> Result<Vec<TabGroup>>;

    /// Open a change subscription; the channel closes when the connection drops
    async fn subscribe(&self, user_id: &str, capacity: usize) -> Result<mpsc::Receiver<ChangeEvent>>;

    /// Cheap reachability check used by heartbeats
    async fn ping(&self) -> Result<()>;
}

/// Backend used when no remote is configured
///
/// Every call fails with a configuration error, which the scheduler surfaces
/// without retrying.
#[derive(Debug, Default)]
pub struct UnconfiguredRemote;

#[async_trait]
impl RemoteStore for UnconfiguredRemote {
    async fn upload_tab_groups(&self, _: &str, _: &[TabGroup], _: bool) -> Result<()> {
        Err(not_configured())
    }

    async fn download_tab_groups(&self, _: &str) -> Result<Vec<TabGroup>> {
        Err(not_configured())
    }

    async fn subscribe(&self, _: &str, _: usize) -> Result<mpsc::Receiver<ChangeEvent>> {
        Err(not_configured())
    }

    async fn ping(&self) -> Result<()> {
        Err(not_configured())
    }
}

fn not_configured() -> SyncError {
    SyncError::Config("remote_url is not configured".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Tab;

    fn group(device: &str) -> TabGroup {
        TabGroup::new("g", vec![Tab::new("https://a.example")], device, "user-1")
    }

    #[test]
    fn test_originating_device_uses_new_record_for_updates() {
        let old = group("device-old");
        let new = group("device-new");
        let event = ChangeEvent::update(&old, &new);
        assert_eq!(event.originating_device(), Some("device-new"));
    }

    #[test]
    fn test_originating_device_uses_old_record_for_deletes() {
        let event = ChangeEvent::delete(&group("device-a"));
        assert_eq!(event.originating_device(), Some("device-a"));
        assert_eq!(event.user_id(), Some("user-1"));
    }

    #[test]
    fn test_decode_wire_event() {
        let json = r#"{
            "eventType": "delete",
            "oldRecord": {"id": "6f1c9a3e-1d2b-4c5d-8e9f-0a1b2c3d4e5f", "device_id": "device-x"}
        }"#;
        let event: ChangeEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.event_type, ChangeEventType::Delete);
        assert!(event.new_record.is_none());
        assert_eq!(event.originating_device(), Some("device-x"));
        assert_eq!(event.user_id(), None);
    }

    #[test]
    fn test_missing_device_id() {
        let event = ChangeEvent {
            event_type: ChangeEventType::Insert,
            new_record: Some(ChangeRecord::default()),
            old_record: None,
        };
        assert_eq!(event.originating_device(), None);
    }

    #[tokio::test]
    async fn test_unconfigured_remote_fails_with_config_error() {
        let remote = UnconfiguredRemote;
        let err = remote.download_tab_groups("user").await.unwrap_err();
        assert!(matches!(err, SyncError::Config(_)));
        assert!(!err.is_retryable());
    }
}
