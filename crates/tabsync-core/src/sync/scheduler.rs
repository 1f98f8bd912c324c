//! Push/pull scheduling
//!
//! Intents never touch the network. They ask the scheduler for a pass, and
//! the scheduler decides when it runs:
//!
//! - High-priority requests (create, update, delete) fire after a short delay,
//!   everything else after the debounce window.
//! - There is one pending slot. An equal or higher priority request replaces
//!   the pending one and restarts the delay; a lower one is folded into it.
//! - Only one pass talks to the network at a time (the sync lock).
//! - Signed-out users get a successful no-op.
//!
//! Outcomes are published on a watch channel instead of being returned to
//! the intent that caused them.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::retry::{retry_with_backoff, RetryPolicy};
use crate::config::SchedulerConfig;
use crate::error::Result;
use crate::identity::AuthStatus;

/// Urgency of a requested pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Priority(pub u8);

impl Priority {
    pub const DELETE: Priority = Priority(10);
    pub const CREATE: Priority = Priority(5);
    pub const UPDATE: Priority = Priority(5);
    pub const RENAME: Priority = Priority(3);
    pub const LOCK: Priority = Priority(3);
    pub const MOVE: Priority = Priority(3);
    pub const TOUCH: Priority = Priority(1);

    /// High-priority passes skip the debounce window
    pub fn is_high(self) -> bool {
        self >= Priority::CREATE
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a pass should do when it fires
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncPass {
    pub pull: bool,
    pub push: bool,
    /// Replace the remote set instead of upserting
    pub overwrite: bool,
}

impl SyncPass {
    pub fn push() -> Self {
        Self {
            push: true,
            ..Self::default()
        }
    }

    pub fn pull() -> Self {
        Self {
            pull: true,
            ..Self::default()
        }
    }

    pub fn full() -> Self {
        Self {
            pull: true,
            push: true,
            overwrite: false,
        }
    }

    pub fn overwrite() -> Self {
        Self {
            pull: false,
            push: true,
            overwrite: true,
        }
    }

    /// Union of two passes
    pub fn merge(self, other: SyncPass) -> SyncPass {
        SyncPass {
            pull: self.pull || other.pull,
            push: self.push || other.push,
            overwrite: self.overwrite || other.overwrite,
        }
    }
}

/// Summary of one executed pass
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SyncReport {
    /// The pass did nothing (signed out or another pass was running)
    pub skipped: bool,
    pub pulled: bool,
    /// Decisions taken by the merge, by kind
    pub merged: usize,
    pub conflicts: usize,
    pub uploaded: usize,
}

impl SyncReport {
    pub fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }
}

/// Whatever performs the network side of a pass
#[async_trait]
pub trait SyncExecutor: Send + Sync {
    async fn run(&self, pass: SyncPass) -> Result<SyncReport>;
}

/// Published scheduler state
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "kebab-case")]
pub enum SchedulerStatus {
    Idle,
    Pending,
    Syncing,
    Synced { at: DateTime<Utc> },
    Failed { error: String },
    SignedOut,
}

impl fmt::Display for SchedulerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedulerStatus::Idle => f.write_str("idle"),
            SchedulerStatus::Pending => f.write_str("pending"),
            SchedulerStatus::Syncing => f.write_str("syncing"),
            SchedulerStatus::Synced { at } => write!(f, "synced at {}", at.to_rfc3339()),
            SchedulerStatus::Failed { error } => write!(f, "failed: {}", error),
            SchedulerStatus::SignedOut => f.write_str("signed out"),
        }
    }
}

/// Result of [`SyncScheduler::request`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleOutcome {
    /// This request now owns the pending slot
    Scheduled,
    /// Folded into a higher-priority pending pass
    Superseded,
}

struct PendingPass {
    id: u64,
    priority: Priority,
    pass: SyncPass,
    label: String,
    timer: JoinHandle<()>,
}

struct Inner {
    executor: Arc<dyn SyncExecutor>,
    auth: Arc<dyn AuthStatus>,
    policy: RetryPolicy,
    debounce: Duration,
    high_priority_delay: Duration,
    pending: Mutex<Option<PendingPass>>,
    next_id: AtomicU64,
    sync_lock: AtomicBool,
    status: watch::Sender<SchedulerStatus>,
}

/// Debouncing, prioritizing front door to the network
#[derive(Clone)]
pub struct SyncScheduler {
    inner: Arc<Inner>,
}

impl SyncScheduler {
    pub fn new(
        executor: Arc<dyn SyncExecutor>,
        auth: Arc<dyn AuthStatus>,
        config: &SchedulerConfig,
    ) -> Self {
        let (status, _) = watch::channel(SchedulerStatus::Idle);
        Self {
            inner: Arc::new(Inner {
                executor,
                auth,
                policy: RetryPolicy::from(config),
                debounce: config.debounce(),
                high_priority_delay: config.high_priority_delay(),
                pending: Mutex::new(None),
                next_id: AtomicU64::new(1),
                sync_lock: AtomicBool::new(false),
                status,
            }),
        }
    }

    /// Ask for a pass; must be called from within a tokio runtime
    pub fn request(&self, priority: Priority, pass: SyncPass, label: &str) -> ScheduleOutcome {
        Inner::request(&self.inner, priority, pass, label)
    }

    /// Run a pass immediately, bypassing the pending slot
    pub async fn run_now(&self, pass: SyncPass, label: &str) -> Result<SyncReport> {
        self.inner.execute(pass, label).await
    }

    /// Drop the pending pass, if any
    pub fn cancel_pending(&self) -> bool {
        let cancelled = self.inner.lock_pending().take();
        match cancelled {
            Some(pending) => {
                pending.timer.abort();
                debug!(label = %pending.label, "Cancelled pending sync pass");
                self.inner.status.send_replace(SchedulerStatus::Idle);
                true
            }
            None => false,
        }
    }

    /// Run the pending pass now instead of waiting for its timer
    pub async fn flush(&self) -> Result<Option<SyncReport>> {
        let pending = self.inner.lock_pending().take();
        let Some(pending) = pending else {
            return Ok(None);
        };
        pending.timer.abort();
        self.inner
            .execute(pending.pass, &pending.label)
            .await
            .map(Some)
    }

    pub fn has_pending(&self) -> bool {
        self.inner.lock_pending().is_some()
    }

    pub fn is_syncing(&self) -> bool {
        self.inner.sync_lock.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> SchedulerStatus {
        self.inner.status.borrow().clone()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<SchedulerStatus> {
        self.inner.status.subscribe()
    }
}

/// Releases the sync lock when dropped
struct SyncLockGuard<'a>(&'a AtomicBool);

impl Drop for SyncLockGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl Inner {
    fn lock_pending(&self) -> std::sync::MutexGuard<'_, Option<PendingPass>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn request(this: &Arc<Self>, priority: Priority, mut pass: SyncPass, label: &str) -> ScheduleOutcome {
        let mut slot = this.lock_pending();

        if let Some(pending) = slot.as_mut() {
            if priority < pending.priority {
                pending.pass = pending.pass.merge(pass);
                debug!(
                    label,
                    priority = %priority,
                    pending = %pending.label,
                    pending_priority = %pending.priority,
                    "Superseded by pending sync pass"
                );
                return ScheduleOutcome::Superseded;
            }
            pending.timer.abort();
            pass = pass.merge(pending.pass);
            debug!(label, replaced = %pending.label, "Replacing pending sync pass");
        }

        let id = this.next_id.fetch_add(1, Ordering::SeqCst);
        let delay = if priority.is_high() {
            this.high_priority_delay
        } else {
            this.debounce
        };

        let inner = Arc::clone(this);
        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            Inner::fire(&inner, id).await;
        });

        *slot = Some(PendingPass {
            id,
            priority,
            pass,
            label: label.to_string(),
            timer,
        });
        drop(slot);

        this.status.send_replace(SchedulerStatus::Pending);
        debug!(label, priority = %priority, delay_ms = delay.as_millis() as u64, "Scheduled sync pass");
        ScheduleOutcome::Scheduled
    }

    async fn fire(this: &Arc<Self>, id: u64) {
        let pending = {
            let mut slot = this.lock_pending();
            match slot.as_ref() {
                Some(p) if p.id == id => slot.take(),
                _ => None,
            }
        };
        let Some(pending) = pending else {
            return;
        };

        if this.sync_lock.load(Ordering::SeqCst) {
            // Another pass holds the network; try again after the delay
            debug!(label = %pending.label, "Sync in progress, re-queueing pass");
            Inner::request(this, pending.priority, pending.pass, &pending.label);
            return;
        }

        if let Err(e) = this.execute(pending.pass, &pending.label).await {
            warn!(label = %pending.label, error = %e, "Scheduled sync pass failed");
        }
    }

    async fn execute(&self, pass: SyncPass, label: &str) -> Result<SyncReport> {
        if !self.auth.is_authenticated() {
            debug!(label, "Not signed in, skipping sync pass");
            self.status.send_replace(SchedulerStatus::SignedOut);
            return Ok(SyncReport::skipped());
        }

        if self
            .sync_lock
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!(label, "Sync already running, skipping pass");
            return Ok(SyncReport::skipped());
        }
        let _lock = SyncLockGuard(&self.sync_lock);

        self.status.send_replace(SchedulerStatus::Syncing);
        let executor = Arc::clone(&self.executor);
        let result = retry_with_backoff(&self.policy, label, || {
            let executor = Arc::clone(&executor);
            async move { executor.run(pass).await }
        })
        .await;

        match result {
            Ok(ref report) => {
                info!(
                    label,
                    pulled = report.pulled,
                    merged = report.merged,
                    conflicts = report.conflicts,
                    uploaded = report.uploaded,
                    "Sync pass complete"
                );
                self.status.send_replace(SchedulerStatus::Synced { at: Utc::now() });
            }
            Err(ref e) => {
                self.status.send_replace(SchedulerStatus::Failed {
                    error: e.to_string(),
                });
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;
    use crate::identity::SessionAuth;
    use std::sync::Mutex as StdMutex;
    use tokio::sync::Notify;

    #[derive(Default)]
    struct RecordingExecutor {
        passes: StdMutex<Vec<SyncPass>>,
        failures: StdMutex<Vec<SyncError>>,
        gate: Option<Arc<Notify>>,
    }

    impl RecordingExecutor {
        fn passes(&self) -> Vec<SyncPass> {
            self.passes.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl SyncExecutor for RecordingExecutor {
        async fn run(&self, pass: SyncPass) -> Result<SyncReport> {
            self.passes.lock().unwrap().push(pass);
            if let Some(ref gate) = self.gate {
                gate.notified().await;
            }
            if let Some(err) = self.failures.lock().unwrap().pop() {
                return Err(err);
            }
            Ok(SyncReport {
                pulled: pass.pull,
                uploaded: usize::from(pass.push),
                ..SyncReport::default()
            })
        }
    }

    fn scheduler(executor: Arc<RecordingExecutor>, signed_in: bool) -> SyncScheduler {
        let auth = Arc::new(SessionAuth::new(signed_in));
        SyncScheduler::new(executor, auth, &SchedulerConfig::default())
    }

    async fn settle(ms: u64) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_high_priority_fires_after_short_delay() {
        let executor = Arc::new(RecordingExecutor::default());
        let scheduler = scheduler(executor.clone(), true);

        scheduler.request(Priority::CREATE, SyncPass::push(), "create");
        settle(50).await;
        assert!(executor.passes().is_empty());
        settle(60).await;
        assert_eq!(executor.passes(), vec![SyncPass::push()]);
        assert!(matches!(scheduler.status(), SchedulerStatus::Synced { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_low_priority_is_debounced() {
        let executor = Arc::new(RecordingExecutor::default());
        let scheduler = scheduler(executor.clone(), true);

        scheduler.request(Priority::RENAME, SyncPass::push(), "rename");
        settle(200).await;
        // Restarts the window
        scheduler.request(Priority::RENAME, SyncPass::push(), "rename");
        settle(200).await;
        assert!(executor.passes().is_empty());
        settle(150).await;
        assert_eq!(executor.passes().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_higher_priority_preempts_pending() {
        let executor = Arc::new(RecordingExecutor::default());
        let scheduler = scheduler(executor.clone(), true);

        assert_eq!(
            scheduler.request(Priority::MOVE, SyncPass::push(), "move"),
            ScheduleOutcome::Scheduled
        );
        settle(20).await;
        assert_eq!(
            scheduler.request(Priority::DELETE, SyncPass::push(), "delete"),
            ScheduleOutcome::Scheduled
        );
        settle(1000).await;

        assert_eq!(executor.passes().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lower_priority_is_folded_into_pending() {
        let executor = Arc::new(RecordingExecutor::default());
        let scheduler = scheduler(executor.clone(), true);

        scheduler.request(Priority::DELETE, SyncPass::push(), "delete");
        assert_eq!(
            scheduler.request(Priority::TOUCH, SyncPass::pull(), "touch"),
            ScheduleOutcome::Superseded
        );
        settle(1000).await;

        assert_eq!(executor.passes(), vec![SyncPass::full()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_signed_out_is_a_no_op() {
        let executor = Arc::new(RecordingExecutor::default());
        let scheduler = scheduler(executor.clone(), false);

        let report = scheduler.run_now(SyncPass::full(), "manual").await.unwrap();
        assert!(report.skipped);

        scheduler.request(Priority::DELETE, SyncPass::push(), "delete");
        settle(500).await;
        assert!(executor.passes().is_empty());
        assert_eq!(scheduler.status(), SchedulerStatus::SignedOut);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_pass_is_skipped_while_locked() {
        let gate = Arc::new(Notify::new());
        let executor = Arc::new(RecordingExecutor {
            gate: Some(gate.clone()),
            ..RecordingExecutor::default()
        });
        let scheduler = scheduler(executor.clone(), true);

        let background = scheduler.clone();
        let first = tokio::spawn(async move { background.run_now(SyncPass::pull(), "first").await });
        settle(10).await;
        assert!(scheduler.is_syncing());

        let second = scheduler.run_now(SyncPass::push(), "second").await.unwrap();
        assert!(second.skipped);

        gate.notify_one();
        let first = first.await.unwrap().unwrap();
        assert!(!first.skipped);
        assert!(!scheduler.is_syncing());
        assert_eq!(executor.passes().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_pass_waits_for_running_pass() {
        let gate = Arc::new(Notify::new());
        let executor = Arc::new(RecordingExecutor {
            gate: Some(gate.clone()),
            ..RecordingExecutor::default()
        });
        let scheduler = scheduler(executor.clone(), true);

        let background = scheduler.clone();
        let first = tokio::spawn(async move { background.run_now(SyncPass::pull(), "first").await });
        settle(10).await;

        scheduler.request(Priority::CREATE, SyncPass::push(), "create");
        settle(300).await;
        // Fired while locked, so it went back into the slot
        assert!(scheduler.has_pending());
        assert_eq!(executor.passes(), vec![SyncPass::pull()]);

        gate.notify_one();
        first.await.unwrap().unwrap();
        settle(150).await;
        assert_eq!(executor.passes(), vec![SyncPass::pull(), SyncPass::push()]);
        assert!(!scheduler.has_pending());

        gate.notify_one();
        settle(10).await;
        assert!(!scheduler.is_syncing());
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_is_retried_then_reported() {
        let executor = Arc::new(RecordingExecutor::default());
        executor
            .failures
            .lock()
            .unwrap()
            .push(SyncError::Transient("503".to_string()));
        let scheduler = scheduler(executor.clone(), true);

        let report = scheduler.run_now(SyncPass::push(), "manual").await.unwrap();
        assert_eq!(report.uploaded, 1);
        assert_eq!(executor.passes().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_failure_surfaces_in_status() {
        let executor = Arc::new(RecordingExecutor::default());
        executor
            .failures
            .lock()
            .unwrap()
            .push(SyncError::Unauthorized("401".to_string()));
        let scheduler = scheduler(executor.clone(), true);
        let mut status = scheduler.subscribe_status();

        scheduler.request(Priority::UPDATE, SyncPass::push(), "update");
        settle(200).await;

        assert_eq!(executor.passes().len(), 1);
        assert!(status.has_changed().unwrap());
        assert!(matches!(
            *status.borrow_and_update(),
            SchedulerStatus::Failed { .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_pending() {
        let executor = Arc::new(RecordingExecutor::default());
        let scheduler = scheduler(executor.clone(), true);

        scheduler.request(Priority::TOUCH, SyncPass::push(), "touch");
        assert!(scheduler.has_pending());
        assert!(scheduler.cancel_pending());
        settle(1000).await;
        assert!(executor.passes().is_empty());
        assert!(!scheduler.cancel_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_runs_pending_pass_immediately() {
        let executor = Arc::new(RecordingExecutor::default());
        let scheduler = scheduler(executor.clone(), true);

        assert!(scheduler.flush().await.unwrap().is_none());

        scheduler.request(Priority::RENAME, SyncPass::push(), "rename");
        let report = scheduler.flush().await.unwrap().unwrap();
        assert_eq!(report.uploaded, 1);
        assert!(!scheduler.has_pending());

        settle(1000).await;
        assert_eq!(executor.passes().len(), 1);
    }

    #[test]
    fn test_priority_levels() {
        assert!(Priority::DELETE.is_high());
        assert!(Priority::UPDATE.is_high());
        assert!(!Priority::RENAME.is_high());
        assert!(Priority::TOUCH < Priority::MOVE);
        assert_eq!(Priority::CREATE, Priority::UPDATE);
    }
}
