//! Sync coordinator
//!
//! Every read-modify-write of the persisted group list goes through one
//! async mutex (the gate). Inside the gate an operation sees the freshly
//! read list and its write lands before anyone else reads. Network calls
//! happen outside the gate; only the merge or confirmation step re-enters it.
//!
//! Deletions leave a short-lived marker so that a pull racing with the
//! delete (a stale live copy arriving over the network) cannot bring the
//! group back before the tombstone has been pushed.
//!
//! A push first checks the remote copy of everything it is about to send.
//! When another device has moved a group past the version this device last
//! saw, the remote list is merged in before anything is uploaded.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::dedup::dedup;
use super::resolver::{adopt_remote, merge, ConflictStrategy, MergeDecision, MergeDecisionKind, PendingConflict};
use super::retry::with_timeout;
use super::scheduler::{SyncExecutor, SyncPass, SyncReport};
use crate::config::SchedulerConfig;
use crate::error::{Result, SyncError};
use crate::identity::DeviceIdentity;
use crate::models::{SyncStatus, TabGroup};
use crate::remote::RemoteStore;
use crate::storage::LocalStore;

/// Default lifetime of a pending-deletion marker
pub const DEFAULT_DELETION_TTL: Duration = Duration::from_secs(10);

/// Merges a push may run before giving up on a remote that keeps moving
const MAX_PUSH_REBASES: u32 = 2;

/// Kind of protected operation, for logs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Create,
    Update,
    Delete,
    Move,
    Dedup,
    Pull,
    Push,
    Resolve,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OperationKind::Create => "create",
            OperationKind::Update => "update",
            OperationKind::Delete => "delete",
            OperationKind::Move => "move",
            OperationKind::Dedup => "dedup",
            OperationKind::Pull => "pull",
            OperationKind::Push => "push",
            OperationKind::Resolve => "resolve",
        };
        f.write_str(s)
    }
}

/// Which copy wins when a conflict is resolved by hand
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Resolution {
    KeepLocal,
    KeepRemote,
}

impl std::str::FromStr for Resolution {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "local" | "keep-local" => Ok(Resolution::KeepLocal),
            "remote" | "keep-remote" => Ok(Resolution::KeepRemote),
            other => Err(format!("unknown resolution '{}'", other)),
        }
    }
}

/// Result of a protected deduplication
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DedupReport {
    pub removed_count: usize,
    pub dropped_group_ids: Vec<Uuid>,
    pub changed_group_ids: Vec<Uuid>,
}

/// Result of a protected pull
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PullReport {
    pub decisions: Vec<MergeDecision>,
    pub conflicts: usize,
    /// Remote records skipped because they belong to another account
    pub foreign: usize,
    /// Remote records skipped because a local deletion is in flight
    pub blocked: usize,
}

impl PullReport {
    /// Groups whose local copy was replaced or added from the remote
    pub fn adopted(&self) -> usize {
        self.decisions
            .iter()
            .filter(|d| matches!(d.kind, MergeDecisionKind::CloudOnly | MergeDecisionKind::CloudNewer))
            .count()
    }
}

/// What one push attempt would upload
#[derive(Debug, Default)]
struct PushPlan {
    payload: Vec<TabGroup>,
    /// Version each uploaded group had when read, for the confirm step
    expected: HashMap<Uuid, u64>,
    /// Groups the remote moved past since this device last saw them
    stale: Vec<Uuid>,
    /// Conflicts recovered from the download for `Conflict` groups
    recovered: Vec<PendingConflict>,
}

#[derive(Debug, Clone, Copy)]
struct PendingDeletion {
    op_id: u64,
    at: Instant,
}

/// Serialization point for every mutation of the group list
pub struct SyncCoordinator {
    local: Arc<dyn LocalStore>,
    remote: Arc<dyn RemoteStore>,
    device_id: String,
    user_id: String,
    strategy: ConflictStrategy,
    deletion_ttl: Duration,
    request_timeout: Duration,
    gate: tokio::sync::Mutex<()>,
    pending_deletions: Mutex<HashMap<Uuid, PendingDeletion>>,
    conflicts: Mutex<Vec<PendingConflict>>,
    next_op: AtomicU64,
}

impl SyncCoordinator {
    pub fn new(
        local: Arc<dyn LocalStore>,
        remote: Arc<dyn RemoteStore>,
        device: &DeviceIdentity,
        user_id: impl Into<String>,
    ) -> Self {
        Self {
            local,
            remote,
            device_id: device.current_device_id().to_string(),
            user_id: user_id.into(),
            strategy: ConflictStrategy::default(),
            deletion_ttl: DEFAULT_DELETION_TTL,
            request_timeout: SchedulerConfig::default().request_timeout(),
            gate: tokio::sync::Mutex::new(()),
            pending_deletions: Mutex::new(HashMap::new()),
            conflicts: Mutex::new(Vec::new()),
            next_op: AtomicU64::new(1),
        }
    }

    pub fn with_strategy(mut self, strategy: ConflictStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_deletion_ttl(mut self, ttl: Duration) -> Self {
        self.deletion_ttl = ttl;
        self
    }

    /// Deadline for each individual upload or download
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn strategy(&self) -> ConflictStrategy {
        self.strategy
    }

    /// Run `f` on the freshly read list and persist what it returns
    ///
    /// On a failed write the snapshot read at entry is written back and
    /// [`SyncError::StorageWriteFailed`] is returned.
    pub async fn execute_atomic_operation<R, F>(
        &self,
        kind: OperationKind,
        label: &str,
        f: F,
    ) -> Result<R>
    where
        F: FnOnce(Vec<TabGroup>) -> Result<(Vec<TabGroup>, R)> + Send,
        R: Send,
    {
        let op_id = self.next_op.fetch_add(1, Ordering::SeqCst);
        let _gate = self.gate.lock().await;

        let snapshot = self.local.get_groups().await?;
        let before = snapshot.len();
        let (updated, result) = f(snapshot.clone())?;
        let after = updated.len();

        if let Err(source) = self.local.set_groups(&updated).await {
            error!(op_id, kind = %kind, label, error = %source, "Write failed, restoring snapshot");
            if let Err(e) = self.local.set_groups(&snapshot).await {
                error!(op_id, label, error = %e, "Failed to restore snapshot");
            }
            return Err(SyncError::StorageWriteFailed {
                operation: label.to_string(),
                source,
            });
        }

        debug!(op_id, kind = %kind, label, before, after, "Atomic operation committed");
        Ok(result)
    }

    /// Apply `updater` to one live group and bump its version
    ///
    /// An unlocked group left without tabs is tombstoned in the same write.
    pub async fn execute_protected_update<F>(&self, group_id: Uuid, label: &str, updater: F) -> Result<TabGroup>
    where
        F: FnOnce(&mut TabGroup) -> Result<()> + Send,
    {
        let device_id = self.device_id.clone();
        let updated = self
            .execute_atomic_operation(OperationKind::Update, label, move |mut groups| {
                let group = find_live(&mut groups, group_id)?;
                let version = group.version;
                updater(&mut *group)?;
                if group.is_auto_removable() {
                    group.is_deleted = true;
                }
                group.touch(&device_id);
                debug!(%group_id, from = version, to = group.version, "Group updated");
                let updated = group.clone();
                Ok((groups, updated))
            })
            .await?;

        if updated.is_deleted {
            info!(group_id = %updated.id, "Group emptied and removed");
            self.register_deletion(updated.id);
        }
        Ok(updated)
    }

    /// Tombstone a group and block realtime pulls for it until pushed
    pub async fn execute_protected_deletion(&self, group_id: Uuid) -> Result<TabGroup> {
        let device_id = self.device_id.clone();
        let deleted = self
            .execute_atomic_operation(OperationKind::Delete, "delete group", move |mut groups| {
                let group = find_live(&mut groups, group_id)?;
                group.tombstone(&device_id);
                let deleted = group.clone();
                Ok((groups, deleted))
            })
            .await?;

        let op_id = self.register_deletion(group_id);
        info!(%group_id, op_id, version = deleted.version, "Group deleted");
        Ok(deleted)
    }

    /// Whether a realtime pull touching `ids` must wait for a deletion
    pub fn should_block_realtime_sync(&self, ids: &[Uuid]) -> bool {
        let mut pending = self.lock_deletions();
        self.prune_expired(&mut pending);
        let blocked = ids.iter().any(|id| pending.contains_key(id));
        if blocked {
            debug!(pending = pending.len(), "Deletion in flight, blocking realtime sync");
        }
        blocked
    }

    /// Live pending-deletion markers
    pub fn pending_deletion_count(&self) -> usize {
        let mut pending = self.lock_deletions();
        self.prune_expired(&mut pending);
        pending.len()
    }

    /// Deduplicate tabs across groups inside the gate
    pub async fn execute_protected_deduplication(&self) -> Result<DedupReport> {
        let device_id = self.device_id.clone();
        let report = self
            .execute_atomic_operation(OperationKind::Dedup, "deduplicate", move |groups| {
                let outcome = dedup(&groups);
                let mut trimmed: HashMap<Uuid, TabGroup> =
                    outcome.groups.into_iter().map(|g| (g.id, g)).collect();

                let updated = groups
                    .into_iter()
                    .map(|original| {
                        if outcome.dropped_group_ids.contains(&original.id) {
                            let mut dropped = original;
                            dropped.tabs.clear();
                            dropped.tombstone(&device_id);
                            dropped
                        } else if outcome.changed_group_ids.contains(&original.id) {
                            let mut changed = trimmed.remove(&original.id).unwrap_or(original);
                            changed.touch(&device_id);
                            changed
                        } else {
                            original
                        }
                    })
                    .collect();

                let report = DedupReport {
                    removed_count: outcome.removed_count,
                    dropped_group_ids: outcome.dropped_group_ids,
                    changed_group_ids: outcome.changed_group_ids,
                };
                Ok((updated, report))
            })
            .await?;

        for id in &report.dropped_group_ids {
            self.register_deletion(*id);
        }
        info!(
            removed = report.removed_count,
            dropped = report.dropped_group_ids.len(),
            changed = report.changed_group_ids.len(),
            "Deduplication complete"
        );
        Ok(report)
    }

    /// Download remote groups and merge them into the local list
    pub async fn protected_pull(&self) -> Result<PullReport> {
        let downloaded = self.download().await?;
        self.merge_downloaded(downloaded).await
    }

    async fn download(&self) -> Result<Vec<TabGroup>> {
        with_timeout(self.request_timeout, self.remote.download_tab_groups(&self.user_id)).await
    }

    async fn merge_downloaded(&self, downloaded: Vec<TabGroup>) -> Result<PullReport> {
        let total = downloaded.len();
        let (remote, foreign): (Vec<TabGroup>, Vec<TabGroup>) = downloaded
            .into_iter()
            .partition(|g| g.user_id == self.user_id);

        let strategy = self.strategy;
        let (mut report, found, conflicted) = self
            .execute_atomic_operation(OperationKind::Pull, "merge remote", |local| {
                let blocked_ids = self.blocked_ids();
                let (blocked, remote): (Vec<TabGroup>, Vec<TabGroup>) =
                    remote.into_iter().partition(|g| blocked_ids.contains(&g.id));

                let outcome = merge(&local, &remote, strategy);
                let conflicted: HashSet<Uuid> = outcome
                    .groups
                    .iter()
                    .filter(|g| g.sync_status == SyncStatus::Conflict)
                    .map(|g| g.id)
                    .collect();
                let report = PullReport {
                    decisions: outcome.decisions,
                    conflicts: outcome.conflicts.len(),
                    foreign: foreign.len(),
                    blocked: blocked.len(),
                };
                Ok((outcome.groups, (report, outcome.conflicts, conflicted)))
            })
            .await?;

        self.refresh_conflicts(found, Some(&conflicted));
        report.conflicts = self.lock_conflicts().len();

        info!(
            remote = total,
            adopted = report.adopted(),
            conflicts = report.conflicts,
            foreign = report.foreign,
            blocked = report.blocked,
            "Pull merged"
        );
        Ok(report)
    }

    /// Upload local changes and mark what the remote accepted as synced
    ///
    /// A normal push sends groups with unsynced changes, skipping conflicts.
    /// An overwrite push sends the whole list and replaces the remote set;
    /// conflicted groups are sent as their remote copy so the overwrite
    /// neither settles nor deletes them.
    ///
    /// The remote list is downloaded first. If it moved past what this
    /// device last saw, it is merged in and the plan rebuilt; a remote that
    /// keeps moving yields [`SyncError::Conflict`].
    pub async fn protected_push(&self, overwrite: bool) -> Result<usize> {
        if !overwrite && !self.has_outgoing().await? {
            debug!("Nothing to push");
            return Ok(0);
        }

        let mut rebases = 0;
        loop {
            let downloaded = self.download().await?;
            let mut plan = {
                let _gate = self.gate.lock().await;
                let groups = self.local.get_groups().await?;
                self.plan_push(groups, &downloaded, overwrite)
            };

            let Some(&group_id) = plan.stale.first() else {
                self.refresh_conflicts(std::mem::take(&mut plan.recovered), None);
                return self.upload(plan, overwrite).await;
            };
            if rebases == MAX_PUSH_REBASES {
                warn!(%group_id, rebases, "Remote keeps changing, giving up on push");
                return Err(SyncError::Conflict(group_id));
            }
            rebases += 1;
            info!(
                %group_id,
                stale = plan.stale.len(),
                rebases,
                "Remote changed since last sync, merging before push"
            );
            self.merge_downloaded(downloaded).await?;
        }
    }

    async fn has_outgoing(&self) -> Result<bool> {
        let groups = self.local.get_groups().await?;
        Ok(groups.iter().any(|g| g.sync_status != SyncStatus::Conflict && needs_upload(g)))
    }

    async fn upload(&self, plan: PushPlan, overwrite: bool) -> Result<usize> {
        let PushPlan { payload, expected, .. } = plan;
        if !overwrite && payload.is_empty() {
            debug!("Nothing to push");
            return Ok(0);
        }

        with_timeout(
            self.request_timeout,
            self.remote.upload_tab_groups(&self.user_id, &payload, overwrite),
        )
        .await?;

        let confirmed = self
            .execute_atomic_operation(OperationKind::Push, "confirm push", |mut groups| {
                let now = Utc::now();
                let mut confirmed = 0;
                for group in groups.iter_mut() {
                    // Changed during the upload: leave for the next push
                    if expected.get(&group.id) == Some(&group.version)
                        && group.sync_status != SyncStatus::Conflict
                    {
                        group.mark_synced(now);
                        confirmed += 1;
                    }
                }
                Ok((groups, confirmed))
            })
            .await?;

        let pushed_tombstones: Vec<Uuid> = payload
            .iter()
            .filter(|g| g.is_deleted && expected.contains_key(&g.id))
            .map(|g| g.id)
            .collect();
        self.clear_deletions(&pushed_tombstones);

        info!(
            uploaded = payload.len(),
            confirmed,
            overwrite,
            "Push complete"
        );
        Ok(payload.len())
    }

    fn plan_push(&self, groups: Vec<TabGroup>, downloaded: &[TabGroup], overwrite: bool) -> PushPlan {
        let remote: HashMap<Uuid, &TabGroup> = downloaded
            .iter()
            .filter(|g| g.user_id == self.user_id)
            .map(|g| (g.id, g))
            .collect();
        let blocked = self.blocked_ids();
        let mut plan = PushPlan::default();

        if overwrite {
            // Records never merged here would be deleted by the overwrite
            let known: HashSet<Uuid> = groups.iter().map(|g| g.id).collect();
            plan.stale.extend(remote.keys().filter(|id| !known.contains(id)).copied());
        }

        let conflicts = self.lock_conflicts();
        for group in groups {
            let remote_copy = remote.get(&group.id).copied();

            if group.sync_status == SyncStatus::Conflict {
                if !overwrite {
                    continue;
                }
                let pending = conflicts.iter().find(|c| c.group_id == group.id);
                match (remote_copy, pending) {
                    (Some(current), pending) => {
                        if pending.is_none() {
                            plan.recovered.push(PendingConflict {
                                group_id: group.id,
                                local: group.clone(),
                                remote: current.clone(),
                                detected_at: Utc::now(),
                            });
                        }
                        plan.payload.push(current.clone());
                    }
                    (None, Some(c)) => plan.payload.push(c.remote.clone()),
                    // The remote holds no copy: the overwrite cannot delete one
                    (None, None) => {}
                }
                continue;
            }

            if !overwrite && !needs_upload(&group) {
                continue;
            }
            if let Some(current) = remote_copy {
                // A deletion in flight wins over whatever the remote holds
                if current.version > group.synced_version
                    && !current.same_content(&group)
                    && !blocked.contains(&group.id)
                {
                    plan.stale.push(group.id);
                }
            }
            plan.expected.insert(group.id, group.version);
            plan.payload.push(group);
        }
        plan
    }

    /// Conflicts awaiting a decision
    pub fn pending_conflicts(&self) -> Vec<PendingConflict> {
        self.lock_conflicts().clone()
    }

    /// Settle a pending conflict
    ///
    /// Keeping the local copy makes it strictly newer than the remote one so
    /// the next push wins everywhere. Keeping the remote copy adopts it as
    /// synced.
    pub async fn resolve_conflict(&self, group_id: Uuid, resolution: Resolution) -> Result<TabGroup> {
        let conflict = {
            let mut conflicts = self.lock_conflicts();
            let Some(index) = conflicts.iter().position(|c| c.group_id == group_id) else {
                return Err(SyncError::NotFound(group_id));
            };
            conflicts.remove(index)
        };

        let device_id = self.device_id.clone();
        let remote = conflict.remote.clone();
        let result = self
            .execute_atomic_operation(OperationKind::Resolve, "resolve conflict", move |mut groups| {
                let Some(group) = groups.iter_mut().find(|g| g.id == group_id) else {
                    return Err(SyncError::NotFound(group_id));
                };
                match resolution {
                    Resolution::KeepLocal => {
                        group.synced_version = remote.version;
                        group.version = group.version.max(remote.version);
                        group.touch(&device_id);
                    }
                    Resolution::KeepRemote => {
                        *group = adopt_remote(group, &remote, Utc::now());
                    }
                }
                let resolved = group.clone();
                Ok((groups, resolved))
            })
            .await;

        match result {
            Ok(group) => {
                info!(%group_id, ?resolution, version = group.version, "Conflict resolved");
                Ok(group)
            }
            Err(e) => {
                warn!(%group_id, error = %e, "Failed to resolve conflict");
                self.lock_conflicts().push(conflict);
                Err(e)
            }
        }
    }

    /// Groups the user can see: everything except tombstones
    pub async fn visible_groups(&self) -> Result<Vec<TabGroup>> {
        let groups = self.local.get_groups().await?;
        Ok(groups.into_iter().filter(|g| !g.is_deleted).collect())
    }

    /// Every stored id, tombstones included
    pub async fn local_group_ids(&self) -> Result<Vec<Uuid>> {
        let groups = self.local.get_groups().await?;
        Ok(groups.iter().map(|g| g.id).collect())
    }

    pub(crate) fn register_deletion(&self, group_id: Uuid) -> u64 {
        let op_id = self.next_op.fetch_add(1, Ordering::SeqCst);
        self.lock_deletions().insert(
            group_id,
            PendingDeletion {
                op_id,
                at: Instant::now(),
            },
        );
        op_id
    }

    fn clear_deletions(&self, ids: &[Uuid]) {
        if ids.is_empty() {
            return;
        }
        let mut pending = self.lock_deletions();
        for id in ids {
            if let Some(entry) = pending.remove(id) {
                debug!(group_id = %id, op_id = entry.op_id, "Deletion pushed");
            }
        }
    }

    fn blocked_ids(&self) -> HashSet<Uuid> {
        let mut pending = self.lock_deletions();
        self.prune_expired(&mut pending);
        pending.keys().copied().collect()
    }

    fn prune_expired(&self, pending: &mut HashMap<Uuid, PendingDeletion>) {
        let ttl = self.deletion_ttl;
        pending.retain(|_, entry| entry.at.elapsed() < ttl);
    }

    /// Add newly found conflicts; with `conflicted`, also drop entries for
    /// groups no longer in conflict
    fn refresh_conflicts(&self, found: Vec<PendingConflict>, conflicted: Option<&HashSet<Uuid>>) {
        let mut conflicts = self.lock_conflicts();
        if let Some(conflicted) = conflicted {
            conflicts.retain(|c| {
                let live = conflicted.contains(&c.group_id);
                if !live {
                    debug!(group_id = %c.group_id, "Conflict settled by merge");
                }
                live
            });
        }
        for conflict in found {
            warn!(group_id = %conflict.group_id, "Conflicting edits detected");
            match conflicts.iter_mut().find(|c| c.group_id == conflict.group_id) {
                Some(existing) => *existing = conflict,
                None => conflicts.push(conflict),
            }
        }
    }

    fn lock_deletions(&self) -> MutexGuard<'_, HashMap<Uuid, PendingDeletion>> {
        self.pending_deletions.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_conflicts(&self) -> MutexGuard<'_, Vec<PendingConflict>> {
        self.conflicts.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn needs_upload(group: &TabGroup) -> bool {
    group.has_unsynced_changes() || group.sync_status != SyncStatus::Synced
}

fn find_live(groups: &mut [TabGroup], group_id: Uuid) -> Result<&mut TabGroup> {
    groups
        .iter_mut()
        .find(|g| g.id == group_id && !g.is_deleted)
        .ok_or(SyncError::NotFound(group_id))
}

#[async_trait]
impl SyncExecutor for SyncCoordinator {
    async fn run(&self, pass: SyncPass) -> Result<SyncReport> {
        let mut report = SyncReport::default();

        if pass.pull {
            let pull = self.protected_pull().await?;
            report.pulled = true;
            report.merged = pull.adopted();
            report.conflicts = pull.conflicts;
        }

        if pass.push || pass.overwrite {
            report.uploaded = self.protected_push(pass.overwrite).await?;
        }

        Ok(report)
    }
}
