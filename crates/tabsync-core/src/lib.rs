//! tabsync core library
//!
//! This crate provides the core functionality for tabsync, a local-first
//! store for tab groups that stays consistent across devices sharing one
//! account.
//!
//! # Architecture
//!
//! - **Local store**: source of truth on this device; every intent is
//!   persisted before any network traffic
//! - **Coordinator**: one async gate serializing every read-modify-write
//! - **Scheduler**: debounced, prioritized push/pull passes with retry
//! - **Realtime listener**: remote change notifications become pulls
//!
//! Reconciliation is last-writer-wins with a version check; concurrent edits
//! to the same group since the last sync are surfaced as conflicts.
//!
//! # Quick Start
//!
//! ```text
//! let store = Store::open()?;
//!
//! let group = store.create_group("Research", vec![Tab::new("https://example.com")]).await?;
//! store.add_tab(group.id, Tab::new("https://rust-lang.org")).await?;
//!
//! let groups = store.groups().await?;
//! ```
//!
//! # Modules
//!
//! - `store`: unified interface (main entry point)
//! - `models`: tab groups and tabs
//! - `sync`: coordinator, resolver, dedup, scheduler, realtime listener
//! - `storage`: local persistence
//! - `remote`: backend interface and implementations
//! - `identity`: device id and sign-in state
//! - `config`: application configuration

pub mod config;
pub mod error;
pub mod identity;
pub mod models;
pub mod remote;
pub mod storage;
pub mod store;
pub mod sync;

pub use config::Config;
pub use error::{Result, SyncError};
pub use identity::{AuthStatus, DeviceIdentity, SessionAuth};
pub use models::{SyncStatus, Tab, TabGroup};
pub use remote::{ChangeEvent, RemoteStore};
pub use storage::{LocalStore, StorageError};
pub use store::Store;
pub use sync::{ConflictStrategy, Resolution};
