//! Local storage layer
//!
//! The persisted group list is the only shared mutable resource in the
//! engine. Stores are durable but not assumed atomic across concurrent
//! callers; serialization is the coordinator's job.
//!
//! - `file`: JSON file with atomic writes (production)
//! - `memory`: in-process store with write-failure injection (tests, demos)

pub mod error;
pub mod file;
pub mod memory;

use async_trait::async_trait;

use crate::models::TabGroup;

pub use error::{StorageError, StorageResult};
pub use file::JsonFileStore;
pub use memory::MemoryStore;

/// Read/write access to the full persisted group list
#[async_trait]
pub trait LocalStore: Send + Sync {
    /// Read every stored group, tombstones included
    async fn get_groups(&self) -> StorageResult<Vec<TabGroup>>;

    /// Replace the stored list
    async fn set_groups(&self, groups: &[TabGroup]) -> StorageResult<()>;
}
