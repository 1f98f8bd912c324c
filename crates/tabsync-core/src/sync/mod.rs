//! Synchronization engine
//!
//! - `coordinator`: serializes every mutation of the stored group list
//! - `resolver`: merges local and remote group lists
//! - `dedup`: removes duplicate tabs across groups
//! - `scheduler`: debounces and prioritizes network passes
//! - `retry`: exponential backoff for network calls
//! - `realtime`: turns remote change notifications into pulls
//!
//! ## Usage
//!
//! ```ignore
//! let coordinator = Arc::new(SyncCoordinator::new(local, remote, &device, user_id));
//! let scheduler = SyncScheduler::new(coordinator.clone(), auth, &config.scheduler);
//!
//! coordinator.execute_protected_deletion(group_id).await?;
//! scheduler.request(Priority::DELETE, SyncPass::push(), "delete group");
//! ```

pub mod coordinator;
pub mod dedup;
pub mod realtime;
pub mod resolver;
pub mod retry;
pub mod scheduler;

pub use coordinator::{DedupReport, OperationKind, PullReport, Resolution, SyncCoordinator};
pub use dedup::{dedup, DedupOutcome};
pub use realtime::{ConnectionState, RealtimeHandle, RealtimeListener};
pub use resolver::{merge, ConflictStrategy, MergeDecision, MergeDecisionKind, MergeOutcome, PendingConflict};
pub use retry::{retry_with_backoff, with_timeout, RetryPolicy};
pub use scheduler::{
    Priority, ScheduleOutcome, SchedulerStatus, SyncExecutor, SyncPass, SyncReport, SyncScheduler,
};
