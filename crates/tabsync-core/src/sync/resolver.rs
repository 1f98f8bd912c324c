//! Conflict resolution
//!
//! Last-writer-wins with a version check. Records are matched by id; when
//! both sides hold a record the one with the greater
//! `(updated_at ms, version, device_id)` key wins under the `newest`
//! strategy, unless both sides changed since the last version they agreed
//! on, in which case the record is flagged as a conflict instead of being
//! silently overwritten.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{SyncStatus, TabGroup};

/// How to reconcile a group present on both sides
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConflictStrategy {
    /// Later `updated_at` wins
    #[default]
    Newest,
    /// Local copy always wins
    Local,
    /// Remote copy always wins
    Remote,
    /// Leave differing copies to the user
    Ask,
}

impl std::str::FromStr for ConflictStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "newest" => Ok(ConflictStrategy::Newest),
            "local" => Ok(ConflictStrategy::Local),
            "remote" => Ok(ConflictStrategy::Remote),
            "ask" => Ok(ConflictStrategy::Ask),
            other => Err(format!("unknown conflict strategy '{}'", other)),
        }
    }
}

impl fmt::Display for ConflictStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConflictStrategy::Newest => "newest",
            ConflictStrategy::Local => "local",
            ConflictStrategy::Remote => "remote",
            ConflictStrategy::Ask => "ask",
        };
        f.write_str(s)
    }
}

/// What the resolver did with one group id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeDecisionKind {
    LocalOnly,
    CloudOnly,
    LocalNewer,
    CloudNewer,
    Identical,
    Conflict,
}

impl fmt::Display for MergeDecisionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MergeDecisionKind::LocalOnly => "local_only",
            MergeDecisionKind::CloudOnly => "cloud_only",
            MergeDecisionKind::LocalNewer => "local_newer",
            MergeDecisionKind::CloudNewer => "cloud_newer",
            MergeDecisionKind::Identical => "identical",
            MergeDecisionKind::Conflict => "conflict",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeDecision {
    pub group_id: Uuid,
    pub kind: MergeDecisionKind,
}

/// Two diverged copies of one group, awaiting a human decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingConflict {
    pub group_id: Uuid,
    pub local: TabGroup,
    pub remote: TabGroup,
    pub detected_at: DateTime<Utc>,
}

/// Result of [`merge`]
#[derive(Debug, Clone, Default)]
pub struct MergeOutcome {
    pub groups: Vec<TabGroup>,
    pub decisions: Vec<MergeDecision>,
    pub conflicts: Vec<PendingConflict>,
}

impl MergeOutcome {
    pub fn count(&self, kind: MergeDecisionKind) -> usize {
        self.decisions.iter().filter(|d| d.kind == kind).count()
    }
}

/// Merge a local and a remote group list
pub fn merge(local: &[TabGroup], remote: &[TabGroup], strategy: ConflictStrategy) -> MergeOutcome {
    let now = Utc::now();
    let remote_by_id: HashMap<Uuid, &TabGroup> = remote.iter().map(|g| (g.id, g)).collect();
    let mut outcome = MergeOutcome::default();
    let mut seen = HashSet::new();

    for local_group in local {
        seen.insert(local_group.id);

        let Some(remote_group) = remote_by_id.get(&local_group.id) else {
            let mut kept = local_group.clone();
            if kept.sync_status == SyncStatus::Synced {
                kept.sync_status = SyncStatus::LocalOnly;
            }
            outcome.record(kept, MergeDecisionKind::LocalOnly);
            continue;
        };

        let (group, kind) = resolve_pair(local_group, remote_group, strategy, now, &mut outcome);
        outcome.record(group, kind);
    }

    for remote_group in remote {
        if seen.insert(remote_group.id) {
            let mut adopted = remote_group.clone();
            adopted.mark_synced(now);
            outcome.record(adopted, MergeDecisionKind::CloudOnly);
        }
    }

    outcome
}

impl MergeOutcome {
    fn record(&mut self, group: TabGroup, kind: MergeDecisionKind) {
        self.decisions.push(MergeDecision {
            group_id: group.id,
            kind,
        });
        self.groups.push(group);
    }
}

fn resolve_pair(
    local: &TabGroup,
    remote: &TabGroup,
    strategy: ConflictStrategy,
    now: DateTime<Utc>,
    outcome: &mut MergeOutcome,
) -> (TabGroup, MergeDecisionKind) {
    if local.same_content(remote) {
        let mut same = local.clone();
        // Another device settled it the same way
        if same.sync_status == SyncStatus::Conflict {
            same.mark_synced(now);
        }
        return (same, MergeDecisionKind::Identical);
    }

    let base = local.synced_version;
    let both_changed = base > 0 && local.version > base && remote.version > base;

    let local_wins = match strategy {
        ConflictStrategy::Local => true,
        ConflictStrategy::Remote => false,
        // Only one side moved past the common version: nothing to ask
        ConflictStrategy::Ask => match (base > 0, local.version > base, remote.version > base) {
            (true, true, false) => true,
            (true, false, true) => false,
            _ => return flag_conflict(local, remote, now, outcome),
        },
        ConflictStrategy::Newest => {
            if both_changed {
                return flag_conflict(local, remote, now, outcome);
            }
            compare_recency(local, remote) != Ordering::Less
        }
    };

    if local_wins {
        return (keep_local(local, remote), MergeDecisionKind::LocalNewer);
    }

    // Adopting a remote tombstone would destroy a locked group
    if remote.is_deleted && local.is_locked && !local.is_deleted && strategy != ConflictStrategy::Remote
    {
        return flag_conflict(local, remote, now, outcome);
    }

    (adopt_remote(local, remote, now), MergeDecisionKind::CloudNewer)
}

/// Order two copies by `(updated_at ms, version, device_id)`
pub fn compare_recency(a: &TabGroup, b: &TabGroup) -> Ordering {
    a.updated_at
        .timestamp_millis()
        .cmp(&b.updated_at.timestamp_millis())
        .then(a.version.cmp(&b.version))
        .then_with(|| a.device_id.cmp(&b.device_id))
}

/// Keep the local copy over a differing remote one
///
/// The remote still holds the losing copy, so the kept one is queued for
/// upload with a version above the remote's. The remote version becomes the
/// new base: the pair is not flagged again on the next pull and the push
/// version check sees nothing newer on the remote.
pub fn keep_local(local: &TabGroup, remote: &TabGroup) -> TabGroup {
    let mut kept = local.clone();
    if kept.version <= remote.version {
        kept.version = remote.version + 1;
    }
    kept.synced_version = kept.synced_version.max(remote.version);
    kept.sync_status = SyncStatus::LocalOnly;
    kept
}

/// Replace the local copy with the remote one without lowering the version
pub fn adopt_remote(local: &TabGroup, remote: &TabGroup, now: DateTime<Utc>) -> TabGroup {
    let mut adopted = remote.clone();
    adopted.created_at = local.created_at;
    if remote.version <= local.version {
        adopted.version = local.version + 1;
    }
    adopted.mark_synced(now);
    adopted
}

fn flag_conflict(
    local: &TabGroup,
    remote: &TabGroup,
    now: DateTime<Utc>,
    outcome: &mut MergeOutcome,
) -> (TabGroup, MergeDecisionKind) {
    let mut flagged = local.clone();
    flagged.sync_status = SyncStatus::Conflict;
    outcome.conflicts.push(PendingConflict {
        group_id: local.id,
        local: local.clone(),
        remote: remote.clone(),
        detected_at: now,
    });
    (flagged, MergeDecisionKind::Conflict)
}
