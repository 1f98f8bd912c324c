//! Duplicate tab removal
//!
//! A URL may appear at most once across all live groups. The oldest group
//! keeps its copy; later copies are removed, and unlocked groups emptied by
//! the removal are dropped.

use std::collections::HashSet;

use uuid::Uuid;

use crate::models::TabGroup;

/// Result of [`dedup`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DedupOutcome {
    /// Surviving groups in input order (tombstones included)
    pub groups: Vec<TabGroup>,
    /// Number of tabs removed
    pub removed_count: usize,
    /// Groups removed because they ended up empty
    pub dropped_group_ids: Vec<Uuid>,
    /// Surviving groups that lost at least one tab
    pub changed_group_ids: Vec<Uuid>,
}

/// Remove duplicate URLs across groups
pub fn dedup(groups: &[TabGroup]) -> DedupOutcome {
    let mut scan_order: Vec<usize> = (0..groups.len())
        .filter(|&i| !groups[i].is_deleted)
        .collect();
    scan_order.sort_by_key(|&i| (groups[i].created_at, i));

    let mut seen_urls: HashSet<&str> = HashSet::new();
    let mut kept_tabs: Vec<Option<Vec<usize>>> = vec![None; groups.len()];
    let mut removed_count = 0;

    for &i in &scan_order {
        let mut kept = Vec::with_capacity(groups[i].tabs.len());
        for (tab_index, tab) in groups[i].tabs.iter().enumerate() {
            if seen_urls.insert(tab.url.as_str()) {
                kept.push(tab_index);
            } else {
                removed_count += 1;
            }
        }
        kept_tabs[i] = Some(kept);
    }

    let mut outcome = DedupOutcome {
        removed_count,
        ..DedupOutcome::default()
    };

    for (group, kept) in groups.iter().zip(kept_tabs) {
        let Some(kept) = kept else {
            outcome.groups.push(group.clone());
            continue;
        };

        if kept.is_empty() && !group.is_locked {
            outcome.dropped_group_ids.push(group.id);
            continue;
        }

        if kept.len() == group.tabs.len() {
            outcome.groups.push(group.clone());
            continue;
        }

        let mut trimmed = group.clone();
        trimmed.tabs = kept.into_iter().map(|t| group.tabs[t].clone()).collect();
        outcome.changed_group_ids.push(group.id);
        outcome.groups.push(trimmed);
    }

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Tab;
    use chrono::Duration;

    fn group(name: &str, urls: &[&str], age_secs: i64) -> TabGroup {
        let tabs = urls.iter().map(|u| Tab::new(*u)).collect();
        let mut g = TabGroup::new(name, tabs, "device-a", "user-1");
        g.created_at -= Duration::seconds(age_secs);
        g
    }

    fn urls(g: &TabGroup) -> Vec<&str> {
        g.tabs.iter().map(|t| t.url.as_str()).collect()
    }

    #[test]
    fn test_older_group_keeps_the_url() {
        let a = group("A", &["https://one", "https://two"], 60);
        let b = group("B", &["https://one"], 10);

        let outcome = dedup(&[a.clone(), b.clone()]);
        assert_eq!(outcome.removed_count, 1);
        assert_eq!(outcome.groups.len(), 1);
        assert_eq!(outcome.groups[0], a);
        assert_eq!(outcome.dropped_group_ids, vec![b.id]);
        assert!(outcome.changed_group_ids.is_empty());
    }

    #[test]
    fn test_scan_follows_creation_time_not_position() {
        let newer = group("newer", &["https://one", "https://x"], 0);
        let older = group("older", &["https://one"], 100);

        let outcome = dedup(&[newer.clone(), older.clone()]);
        // Input order preserved
        assert_eq!(outcome.groups[0].id, newer.id);
        assert_eq!(urls(&outcome.groups[0]), vec!["https://x"]);
        assert_eq!(urls(&outcome.groups[1]), vec!["https://one"]);
        assert_eq!(outcome.changed_group_ids, vec![newer.id]);
    }

    #[test]
    fn test_duplicates_inside_one_group() {
        let g = group("g", &["https://a", "https://b", "https://a"], 0);
        let outcome = dedup(&[g]);
        assert_eq!(outcome.removed_count, 1);
        assert_eq!(urls(&outcome.groups[0]), vec!["https://a", "https://b"]);
    }

    #[test]
    fn test_locked_group_survives_emptying() {
        let a = group("A", &["https://one"], 60);
        let mut b = group("B", &["https://one"], 10);
        b.is_locked = true;

        let outcome = dedup(&[a, b.clone()]);
        assert_eq!(outcome.groups.len(), 2);
        assert!(outcome.groups[1].tabs.is_empty());
        assert!(outcome.dropped_group_ids.is_empty());
        assert_eq!(outcome.changed_group_ids, vec![b.id]);
    }

    #[test]
    fn test_tombstones_are_not_scanned() {
        let mut dead = group("dead", &["https://one"], 100);
        dead.is_deleted = true;
        let live = group("live", &["https://one"], 0);

        let outcome = dedup(&[dead.clone(), live.clone()]);
        assert_eq!(outcome.removed_count, 0);
        assert_eq!(outcome.groups, vec![dead, live]);
    }

    #[test]
    fn test_dedup_is_idempotent() {
        let groups = vec![
            group("A", &["https://1", "https://2", "https://1"], 30),
            group("B", &["https://2", "https://3"], 20),
            group("C", &["https://3"], 10),
        ];

        let first = dedup(&groups);
        let second = dedup(&first.groups);
        assert_eq!(second.groups, first.groups);
        assert_eq!(second.removed_count, 0);
        assert!(second.dropped_group_ids.is_empty());
        assert!(second.changed_group_ids.is_empty());
    }
}
