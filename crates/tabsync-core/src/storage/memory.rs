//! In-memory local store

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{LocalStore, StorageError, StorageResult};
use crate::models::TabGroup;

/// [`LocalStore`] kept in process memory
///
/// Writes can be made to fail on demand to exercise rollback paths.
#[derive(Default)]
pub struct MemoryStore {
    groups: Mutex<Vec<TabGroup>>,
    fail_writes: AtomicBool,
    writes: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with a given list
    pub fn with_groups(groups: Vec<TabGroup>) -> Self {
        Self {
            groups: Mutex::new(groups),
            ..Self::default()
        }
    }

    /// Make every following `set_groups` fail until reset
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of successful writes so far
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LocalStore for MemoryStore {
    async fn get_groups(&self) -> StorageResult<Vec<TabGroup>> {
        Ok(self.groups.lock().await.clone())
    }

    async fn set_groups(&self, groups: &[TabGroup]) -> StorageResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::Rejected("write failure injected".to_string()));
        }
        *self.groups.lock().await = groups.to_vec();
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Tab;

    #[tokio::test]
    async fn test_round_trip_and_failure_injection() {
        let store = MemoryStore::new();
        let group = TabGroup::new("g", vec![Tab::new("https://x.example")], "d", "u");

        store.set_groups(&[group.clone()]).await.unwrap();
        assert_eq!(store.get_groups().await.unwrap(), vec![group]);
        assert_eq!(store.write_count(), 1);

        store.fail_writes(true);
        assert!(store.set_groups(&[]).await.is_err());
        assert_eq!(store.get_groups().await.unwrap().len(), 1);
        assert_eq!(store.write_count(), 1);
    }
}
