//! In-process remote backend
//!
//! Several coordinators can share one [`MemoryRemoteStore`] (it is cheap to
//! clone) to play the role of multiple devices on one account. Uploads emit
//! change events to subscribers the same way a hosted backend would.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use super::{ChangeEvent, RemoteStore};
use crate::error::{Result, SyncError};
use crate::models::TabGroup;

#[derive(Default)]
struct RemoteState {
    groups: HashMap<String, Vec<TabGroup>>,
    subscribers: Vec<(String, mpsc::Sender<ChangeEvent>)>,
    injected_failures: VecDeque<String>,
    failed_subscribes: u32,
    unreachable: bool,
    latency: Duration,
    uploads: usize,
    downloads: usize,
}

/// Shared in-memory [`RemoteStore`]
#[derive(Clone, Default)]
pub struct MemoryRemoteStore {
    state: Arc<Mutex<RemoteState>>,
}

impl MemoryRemoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, RemoteState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Fail the next upload or download with an error classified from `message`
    pub fn fail_next(&self, message: impl Into<String>) {
        self.state().injected_failures.push_back(message.into());
    }

    /// Fail the next `count` subscription attempts
    pub fn fail_subscribes(&self, count: u32) {
        self.state().failed_subscribes = count;
    }

    /// Make `ping` and `subscribe` fail
    pub fn set_reachable(&self, reachable: bool) {
        self.state().unreachable = !reachable;
    }

    /// Delay every upload and download by `latency`
    pub fn set_latency(&self, latency: Duration) {
        self.state().latency = latency;
    }

    async fn simulate_latency(&self) {
        let latency = self.state().latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }

    /// Successful uploads so far
    pub fn upload_count(&self) -> usize {
        self.state().uploads
    }

    /// Successful downloads so far
    pub fn download_count(&self) -> usize {
        self.state().downloads
    }

    /// Snapshot of a user's stored groups
    pub fn groups_for(&self, user_id: &str) -> Vec<TabGroup> {
        self.state().groups.get(user_id).cloned().unwrap_or_default()
    }

    /// Write directly, as another client would, and notify subscribers
    pub fn put_group(&self, group: TabGroup) {
        let mut state = self.state();
        let user_id = group.user_id.clone();
        let stored = state.groups.entry(user_id.clone()).or_default();
        let event = match stored.iter_mut().find(|g| g.id == group.id) {
            Some(existing) => {
                let event = ChangeEvent::update(existing, &group);
                *existing = group;
                event
            }
            None => {
                let event = ChangeEvent::insert(&group);
                stored.push(group);
                event
            }
        };
        broadcast(&mut state, &user_id, vec![event]);
    }

    /// Deliver an arbitrary event to a user's subscribers
    pub fn emit(&self, user_id: &str, event: ChangeEvent) {
        broadcast(&mut self.state(), user_id, vec![event]);
    }

    /// Drop every open subscription (simulates a server-side disconnect)
    pub fn disconnect_all(&self) {
        self.state().subscribers.clear();
    }

    /// Open subscriptions for a user
    pub fn subscriber_count(&self, user_id: &str) -> usize {
        self.state()
            .subscribers
            .iter()
            .filter(|(user, tx)| user == user_id && !tx.is_closed())
            .count()
    }

    fn take_injected_failure(state: &mut RemoteState) -> Result<()> {
        match state.injected_failures.pop_front() {
            Some(message) => Err(SyncError::classify(message)),
            None => Ok(()),
        }
    }
}

fn broadcast(state: &mut RemoteState, user_id: &str, events: Vec<ChangeEvent>) {
    state.subscribers.retain(|(_, tx)| !tx.is_closed());
    for (user, tx) in &state.subscribers {
        if user != user_id {
            continue;
        }
        for event in &events {
            if tx.try_send(event.clone()).is_err() {
                debug!(user_id, "Subscriber channel full, dropping change event");
            }
        }
    }
}

#[async_trait]
impl RemoteStore for MemoryRemoteStore {
    async fn upload_tab_groups(
        &self,
        user_id: &str,
        groups: &[TabGroup],
        overwrite: bool,
    ) -> Result<()> {
        self.simulate_latency().await;
        let mut state = self.state();
        Self::take_injected_failure(&mut state)?;

        let stored = state.groups.entry(user_id.to_string()).or_default();
        let mut events = Vec::new();

        if overwrite {
            for old in stored.iter() {
                if !groups.iter().any(|g| g.id == old.id) {
                    events.push(ChangeEvent::delete(old));
                }
            }
            stored.retain(|old| groups.iter().any(|g| g.id == old.id));
        }

        for group in groups {
            match stored.iter_mut().find(|g| g.id == group.id) {
                Some(existing) => {
                    if !existing.same_content(group) {
                        events.push(ChangeEvent::update(existing, group));
                        *existing = group.clone();
                    }
                }
                None => {
                    events.push(ChangeEvent::insert(group));
                    stored.push(group.clone());
                }
            }
        }

        state.uploads += 1;
        broadcast(&mut state, user_id, events);
        Ok(())
    }

    async fn download_tab_groups(&self, user_id: &str) -> Result<Vec<TabGroup>> {
        self.simulate_latency().await;
        let mut state = self.state();
        Self::take_injected_failure(&mut state)?;
        state.downloads += 1;
        Ok(state.groups.get(user_id).cloned().unwrap_or_default())
    }

    async fn subscribe(&self, user_id: &str, capacity: usize) -> Result<mpsc::Receiver<ChangeEvent>> {
        let mut state = self.state();
        if state.unreachable {
            return Err(SyncError::Transient("backend unreachable".to_string()));
        }
        if state.failed_subscribes > 0 {
            state.failed_subscribes -= 1;
            return Err(SyncError::Transient("subscription refused".to_string()));
        }
        let (tx, rx) = mpsc::channel(capacity.max(1));
        state.subscribers.push((user_id.to_string(), tx));
        Ok(rx)
    }

    async fn ping(&self) -> Result<()> {
        if self.state().unreachable {
            return Err(SyncError::Transient("backend unreachable".to_string()));
        }
        Ok(())
    }
}
