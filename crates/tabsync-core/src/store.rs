//! Unified tab group interface
//!
//! The `Store` is what front ends talk to. Every user intent maps to one
//! protected coordinator operation, which persists immediately, followed by
//! a scheduled push at the intent's priority. Network outcomes never fail an
//! intent; they show up in [`Store::sync_status`].
//!
//! ## Usage
//!
//! ```ignore
//! let store = Store::open()?;
//!
//! let group = store.create_group("Research", vec![Tab::new("https://example.com")]).await?;
//! store.rename_group(group.id, "Reading list").await?;
//!
//! // Before exiting a short-lived process
//! store.flush().await?;
//! ```

use std::sync::Arc;

use anyhow::Context;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::Config;
use crate::error::{Result, SyncError};
use crate::identity::{AuthStatus, DeviceIdentity, SessionAuth};
use crate::models::{Tab, TabGroup};
use crate::remote::{HttpRemoteStore, RemoteStore, UnconfiguredRemote};
use crate::storage::{JsonFileStore, LocalStore};
use crate::sync::{
    DedupReport, OperationKind, PendingConflict, Priority, RealtimeHandle, RealtimeListener,
    Resolution, SchedulerStatus, SyncCoordinator, SyncPass, SyncReport, SyncScheduler,
};

/// Entry point for reading and mutating tab groups
pub struct Store {
    config: Config,
    remote: Arc<dyn RemoteStore>,
    auth: Arc<SessionAuth>,
    coordinator: Arc<SyncCoordinator>,
    scheduler: SyncScheduler,
}

impl Store {
    /// Open the store using the default configuration
    pub fn open() -> anyhow::Result<Self> {
        let config = Config::load().context("Failed to load configuration")?;
        Self::open_with_config(config)
    }

    /// Open the store with a specific configuration
    ///
    /// Groups live in a JSON file in the data directory. Without a
    /// `remote_url` every network pass fails with a configuration error.
    pub fn open_with_config(config: Config) -> anyhow::Result<Self> {
        let local: Arc<dyn LocalStore> = Arc::new(JsonFileStore::from_config(&config));
        let remote: Arc<dyn RemoteStore> = match config.remote_url {
            Some(_) => Arc::new(
                HttpRemoteStore::from_config(&config).context("Failed to set up remote backend")?,
            ),
            None => Arc::new(UnconfiguredRemote),
        };
        let device = DeviceIdentity::from_config(&config).context("Failed to load device identity")?;
        let auth = Arc::new(SessionAuth::from_config(&config));

        Ok(Self::from_parts(config, local, remote, device, auth))
    }

    /// Assemble a store from explicit backends
    pub fn from_parts(
        config: Config,
        local: Arc<dyn LocalStore>,
        remote: Arc<dyn RemoteStore>,
        device: DeviceIdentity,
        auth: Arc<SessionAuth>,
    ) -> Self {
        let coordinator = Arc::new(
            SyncCoordinator::new(local, remote.clone(), &device, config.effective_user_id())
                .with_strategy(config.conflict_strategy)
                .with_deletion_ttl(config.pending_deletion_ttl())
                .with_request_timeout(config.scheduler.request_timeout()),
        );
        let scheduler = SyncScheduler::new(coordinator.clone(), auth.clone(), &config.scheduler);

        debug!(
            device_id = %device.current_device_id(),
            user_id = %coordinator.user_id(),
            "Store opened"
        );

        Self {
            config,
            remote,
            auth,
            coordinator,
            scheduler,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn device_id(&self) -> &str {
        self.coordinator.device_id()
    }

    pub fn user_id(&self) -> &str {
        self.coordinator.user_id()
    }

    pub fn coordinator(&self) -> &Arc<SyncCoordinator> {
        &self.coordinator
    }

    pub fn scheduler(&self) -> &SyncScheduler {
        &self.scheduler
    }

    // ==================== Reads ====================

    /// Every live group, in display order
    pub async fn groups(&self) -> Result<Vec<TabGroup>> {
        self.coordinator.visible_groups().await
    }

    /// One live group by id
    pub async fn group(&self, id: Uuid) -> Result<TabGroup> {
        self.groups()
            .await?
            .into_iter()
            .find(|g| g.id == id)
            .ok_or(SyncError::NotFound(id))
    }

    /// Find live groups by id prefix or exact name
    pub async fn find_groups(&self, needle: &str) -> Result<Vec<TabGroup>> {
        let lower = needle.to_lowercase();
        Ok(self
            .groups()
            .await?
            .into_iter()
            .filter(|g| g.id.to_string().starts_with(&lower) || g.name.to_lowercase() == lower)
            .collect())
    }

    // ==================== Group intents ====================

    pub async fn create_group(&self, name: &str, tabs: Vec<Tab>) -> Result<TabGroup> {
        let group = TabGroup::new(name, tabs, self.device_id(), self.user_id());
        let created = group.clone();
        self.coordinator
            .execute_atomic_operation(OperationKind::Create, "create group", move |mut groups| {
                groups.push(group);
                Ok((groups, ()))
            })
            .await?;

        info!(group_id = %created.id, tabs = created.tabs.len(), "Group created");
        self.schedule_push(Priority::CREATE, "create group");
        Ok(created)
    }

    pub async fn rename_group(&self, id: Uuid, name: &str) -> Result<TabGroup> {
        let name = name.to_string();
        let group = self
            .coordinator
            .execute_protected_update(id, "rename group", move |g| {
                g.name = name;
                Ok(())
            })
            .await?;
        self.schedule_push(Priority::RENAME, "rename group");
        Ok(group)
    }

    pub async fn set_locked(&self, id: Uuid, locked: bool) -> Result<TabGroup> {
        let group = self
            .coordinator
            .execute_protected_update(id, "set locked", move |g| {
                g.is_locked = locked;
                Ok(())
            })
            .await?;
        self.schedule_push(Priority::LOCK, "set locked");
        Ok(group)
    }

    pub async fn delete_group(&self, id: Uuid) -> Result<TabGroup> {
        let group = self.coordinator.execute_protected_deletion(id).await?;
        self.schedule_push(Priority::DELETE, "delete group");
        Ok(group)
    }

    /// Move a group to `index` among the live groups
    ///
    /// Ordering is local presentation state: no version bump.
    pub async fn move_group(&self, id: Uuid, index: usize) -> Result<Vec<TabGroup>> {
        let order = self
            .coordinator
            .execute_atomic_operation(OperationKind::Move, "move group", move |mut groups| {
                let from = groups
                    .iter()
                    .position(|g| g.id == id && !g.is_deleted)
                    .ok_or(SyncError::NotFound(id))?;
                let moved = groups.remove(from);

                // Insert before the live group currently at `index`
                let to = groups
                    .iter()
                    .enumerate()
                    .filter(|(_, g)| !g.is_deleted)
                    .nth(index)
                    .map(|(i, _)| i)
                    .unwrap_or(groups.len());
                groups.insert(to, moved);

                let visible: Vec<TabGroup> = groups.iter().filter(|g| !g.is_deleted).cloned().collect();
                Ok((groups, visible))
            })
            .await?;
        self.schedule_push(Priority::MOVE, "move group");
        Ok(order)
    }

    // ==================== Tab intents ====================

    pub async fn add_tab(&self, group_id: Uuid, tab: Tab) -> Result<TabGroup> {
        let group = self
            .coordinator
            .execute_protected_update(group_id, "add tab", move |g| {
                g.tabs.push(tab);
                Ok(())
            })
            .await?;
        self.schedule_push(Priority::UPDATE, "add tab");
        Ok(group)
    }

    /// Remove a tab; an unlocked group losing its last tab is deleted
    pub async fn delete_tab(&self, group_id: Uuid, tab_id: Uuid) -> Result<TabGroup> {
        let group = self
            .coordinator
            .execute_protected_update(group_id, "delete tab", move |g| {
                let index = g
                    .tab_index(tab_id)
                    .ok_or(SyncError::TabNotFound { group_id, tab_id })?;
                g.tabs.remove(index);
                Ok(())
            })
            .await?;

        let priority = if group.is_deleted {
            Priority::DELETE
        } else {
            Priority::UPDATE
        };
        self.schedule_push(priority, "delete tab");
        Ok(group)
    }

    /// Move a tab within or between groups
    ///
    /// Both groups are updated in one write. Returns the touched groups,
    /// source first.
    pub async fn move_tab(
        &self,
        tab_id: Uuid,
        from: Uuid,
        to: Uuid,
        index: Option<usize>,
    ) -> Result<Vec<TabGroup>> {
        if from == to {
            let group = self
                .coordinator
                .execute_protected_update(from, "move tab", move |g| {
                    let current = g
                        .tab_index(tab_id)
                        .ok_or(SyncError::TabNotFound { group_id: from, tab_id })?;
                    let tab = g.tabs.remove(current);
                    let target = index.unwrap_or(g.tabs.len()).min(g.tabs.len());
                    g.tabs.insert(target, tab);
                    Ok(())
                })
                .await?;
            self.schedule_push(Priority::MOVE, "move tab");
            return Ok(vec![group]);
        }

        let device_id = self.device_id().to_string();
        let touched = self
            .coordinator
            .execute_atomic_operation(OperationKind::Move, "move tab", move |mut groups| {
                let source = live_index(&groups, from)?;
                let target = live_index(&groups, to)?;

                let current = groups[source]
                    .tab_index(tab_id)
                    .ok_or(SyncError::TabNotFound { group_id: from, tab_id })?;
                let tab = groups[source].tabs.remove(current);

                let dest = &mut groups[target];
                let at = index.unwrap_or(dest.tabs.len()).min(dest.tabs.len());
                dest.tabs.insert(at, tab);
                dest.touch(&device_id);

                let src = &mut groups[source];
                if src.is_auto_removable() {
                    src.is_deleted = true;
                }
                src.touch(&device_id);

                let touched = vec![groups[source].clone(), groups[target].clone()];
                Ok((groups, touched))
            })
            .await?;

        let priority = if touched[0].is_deleted {
            info!(group_id = %from, "Group emptied by tab move and removed");
            self.coordinator.register_deletion(from);
            Priority::DELETE
        } else {
            Priority::MOVE
        };
        self.schedule_push(priority, "move tab");
        Ok(touched)
    }

    // ==================== Maintenance ====================

    /// Remove duplicate URLs across all groups
    ///
    /// The result replaces the remote set, so the upload runs with
    /// `overwrite`.
    pub async fn deduplicate(&self) -> Result<DedupReport> {
        let report = self.coordinator.execute_protected_deduplication().await?;
        if report.removed_count > 0 || !report.dropped_group_ids.is_empty() {
            self.scheduler
                .request(Priority::UPDATE, SyncPass::overwrite(), "deduplicate");
        }
        Ok(report)
    }

    // ==================== Sync ====================

    /// Pull and push right now
    pub async fn sync_now(&self) -> Result<SyncReport> {
        self.scheduler.run_now(SyncPass::full(), "manual sync").await
    }

    /// Run any scheduled pass immediately
    pub async fn flush(&self) -> Result<Option<SyncReport>> {
        self.scheduler.flush().await
    }

    pub fn sync_status(&self) -> SchedulerStatus {
        self.scheduler.status()
    }

    pub fn is_signed_in(&self) -> bool {
        self.auth.is_authenticated()
    }

    pub fn set_signed_in(&self, signed_in: bool) {
        self.auth.set_authenticated(signed_in);
    }

    pub fn pending_conflicts(&self) -> Vec<PendingConflict> {
        self.coordinator.pending_conflicts()
    }

    pub async fn resolve_conflict(&self, group_id: Uuid, resolution: Resolution) -> Result<TabGroup> {
        let group = self.coordinator.resolve_conflict(group_id, resolution).await?;
        if resolution == Resolution::KeepLocal {
            self.schedule_push(Priority::UPDATE, "resolve conflict");
        }
        Ok(group)
    }

    /// Start listening for changes made on other devices
    pub fn start_realtime(&self) -> RealtimeHandle {
        RealtimeListener::new(
            self.remote.clone(),
            self.coordinator.clone(),
            self.scheduler.clone(),
            self.config.realtime.clone(),
        )
        .spawn()
    }

    fn schedule_push(&self, priority: Priority, label: &str) {
        self.scheduler.request(priority, SyncPass::push(), label);
    }
}

fn live_index(groups: &[TabGroup], id: Uuid) -> Result<usize> {
    groups
        .iter()
        .position(|g| g.id == id && !g.is_deleted)
        .ok_or(SyncError::NotFound(id))
}
