//! JSON file persistence
//!
//! Saves the group list to `tab_groups.json` in the data directory.
//! Uses atomic writes (write to temp file, then rename) to prevent corruption.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use super::{LocalStore, StorageError, StorageResult};
use crate::config::Config;
use crate::models::TabGroup;

/// File-backed [`LocalStore`]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    /// Store groups at an explicit path
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store groups at the configured location
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.groups_path())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl LocalStore for JsonFileStore {
    /// A missing file is an empty list
    async fn get_groups(&self) -> StorageResult<Vec<TabGroup>> {
        let bytes = match fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(StorageError::ReadError {
                    path: self.path.clone(),
                    source: e,
                })
            }
        };

        serde_json::from_slice(&bytes).map_err(|e| StorageError::InvalidFormat {
            path: self.path.clone(),
            details: e.to_string(),
        })
    }

    async fn set_groups(&self, groups: &[TabGroup]) -> StorageResult<()> {
        let bytes = serde_json::to_vec_pretty(groups).map_err(|e| StorageError::InvalidFormat {
            path: self.path.clone(),
            details: e.to_string(),
        })?;
        atomic_write(&self.path, &bytes).await?;
        debug!(path = ?self.path, groups = groups.len(), "Saved tab groups");
        Ok(())
    }
}

/// Write data to a file atomically
///
/// 1. Write to a temporary file in the same directory
/// 2. Sync the file to disk
/// 3. Rename the temp file to the target path
async fn atomic_write(path: &Path, data: &[u8]) -> StorageResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| StorageError::from_io(e, parent.to_path_buf()))?;
    }

    let temp_path = path.with_extension("tmp");

    let mut file = fs::File::create(&temp_path)
        .await
        .map_err(|e| StorageError::from_io(e, temp_path.clone()))?;
    file.write_all(data)
        .await
        .map_err(|e| StorageError::from_io(e, temp_path.clone()))?;
    file.sync_all()
        .await
        .map_err(|e| StorageError::from_io(e, temp_path.clone()))?;
    drop(file);

    fs::rename(&temp_path, path)
        .await
        .map_err(|e| StorageError::AtomicWriteFailed {
            from: temp_path.clone(),
            to: path.to_path_buf(),
            source: e,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Tab;
    use tempfile::TempDir;

    fn group(name: &str) -> TabGroup {
        TabGroup::new(name, vec![Tab::new("https://example.com")], "dev", "user")
    }

    #[tokio::test]
    async fn test_missing_file_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        let store = JsonFileStore::new(temp_dir.path().join("tab_groups.json"));
        assert!(store.get_groups().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let store = JsonFileStore::new(temp_dir.path().join("tab_groups.json"));

        let groups = vec![group("one"), group("two")];
        store.set_groups(&groups).await.unwrap();

        let loaded = store.get_groups().await.unwrap();
        assert_eq!(loaded, groups);
        assert!(!store.path().with_extension("tmp").exists());
    }

    #[tokio::test]
    async fn test_creates_parent_dirs() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("a").join("b").join("groups.json");
        let store = JsonFileStore::new(&path);

        store.set_groups(&[group("nested")]).await.unwrap();
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_invalid_format() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("tab_groups.json");
        std::fs::write(&path, b"{not json").unwrap();

        let store = JsonFileStore::new(&path);
        let err = store.get_groups().await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidFormat { .. }));
    }

    #[tokio::test]
    async fn test_overwrite_replaces_list() {
        let temp_dir = TempDir::new().unwrap();
        let store = JsonFileStore::new(temp_dir.path().join("tab_groups.json"));

        store.set_groups(&[group("one"), group("two")]).await.unwrap();
        store.set_groups(&[group("three")]).await.unwrap();

        let loaded = store.get_groups().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].name, "three");
    }
}
