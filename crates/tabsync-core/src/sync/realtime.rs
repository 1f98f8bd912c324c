//! Realtime change listener
//!
//! Keeps a change subscription open, turns remote change notifications into
//! pull requests on the scheduler and reconnects with backoff when the
//! subscription drops. Notifications caused by this device are ignored, and
//! a burst of notifications produces a single pull.
//!
//! ## State machine
//!
//! ```text
//! disconnected -> connecting -> connected <-> unstable
//!                    ^              |
//!                    |        closed | error | offline
//!                    |              v
//!                    +------ reconnecting(n) -- n > max_attempts --> failed
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::coordinator::SyncCoordinator;
use super::scheduler::{Priority, SyncPass, SyncScheduler};
use crate::config::RealtimeConfig;
use crate::remote::{ChangeEvent, RemoteStore};

/// Connection state of the listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "kebab-case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Connected, but heartbeats are failing
    Unstable,
    /// Too many heartbeats failed; about to reconnect
    Offline,
    Error,
    Closed,
    Reconnecting { attempt: u32 },
    /// Gave up reconnecting
    Failed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => f.write_str("disconnected"),
            ConnectionState::Connecting => f.write_str("connecting"),
            ConnectionState::Connected => f.write_str("connected"),
            ConnectionState::Unstable => f.write_str("unstable"),
            ConnectionState::Offline => f.write_str("offline"),
            ConnectionState::Error => f.write_str("error"),
            ConnectionState::Closed => f.write_str("closed"),
            ConnectionState::Reconnecting { attempt } => write!(f, "reconnecting (attempt {})", attempt),
            ConnectionState::Failed => f.write_str("failed"),
        }
    }
}

/// Commands sent to the listener task
#[derive(Debug)]
enum ListenerCommand {
    Shutdown,
}

/// Why a subscription ended
enum ListenExit {
    Shutdown,
    Closed,
    Offline,
}

/// Handle for controlling the background listener
pub struct RealtimeHandle {
    command_tx: mpsc::Sender<ListenerCommand>,
    state_rx: watch::Receiver<ConnectionState>,
    task: JoinHandle<()>,
}

impl RealtimeHandle {
    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Stop the listener and wait for it to exit
    pub async fn shutdown(self) {
        let _ = self.command_tx.send(ListenerCommand::Shutdown).await;
        if let Err(e) = self.task.await {
            warn!("Realtime listener task ended abnormally: {}", e);
        }
    }
}

/// Delay before reconnect attempt `attempt` (1-based)
pub fn reconnect_delay(config: &RealtimeConfig, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(32) as i32;
    let raw = config.base_delay_ms as f64 * config.backoff_multiplier.powi(exponent);
    let capped = raw.min(config.max_delay_ms as f64);
    let millis = if config.jitter {
        // 50%..100% of the capped delay
        capped * rand::thread_rng().gen_range(0.5..=1.0)
    } else {
        capped
    };
    Duration::from_millis(millis as u64)
}

/// Subscribes to remote changes and feeds pulls into the scheduler
pub struct RealtimeListener {
    remote: Arc<dyn RemoteStore>,
    coordinator: Arc<SyncCoordinator>,
    scheduler: SyncScheduler,
    config: RealtimeConfig,
}

impl RealtimeListener {
    pub fn new(
        remote: Arc<dyn RemoteStore>,
        coordinator: Arc<SyncCoordinator>,
        scheduler: SyncScheduler,
        config: RealtimeConfig,
    ) -> Self {
        Self {
            remote,
            coordinator,
            scheduler,
            config,
        }
    }

    /// Start the listener task
    pub fn spawn(self) -> RealtimeHandle {
        let (command_tx, command_rx) = mpsc::channel(4);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let task = tokio::spawn(self.run(command_rx, state_tx));
        RealtimeHandle {
            command_tx,
            state_rx,
            task,
        }
    }

    async fn run(
        self,
        mut command_rx: mpsc::Receiver<ListenerCommand>,
        state: watch::Sender<ConnectionState>,
    ) {
        let user_id = self.coordinator.user_id().to_string();
        let mut attempt = 0u32;

        loop {
            state.send_replace(ConnectionState::Connecting);

            match self.remote.subscribe(&user_id, self.config.channel_capacity).await {
                Ok(events) => {
                    attempt = 0;
                    state.send_replace(ConnectionState::Connected);
                    info!(user_id = %user_id, "Realtime subscription open");

                    match self.listen(events, &mut command_rx, &state).await {
                        ListenExit::Shutdown => break,
                        ListenExit::Closed => {
                            debug!("Realtime subscription closed");
                            state.send_replace(ConnectionState::Closed);
                        }
                        ListenExit::Offline => {
                            warn!("Heartbeat lost, reconnecting");
                            state.send_replace(ConnectionState::Offline);
                        }
                    }
                }
                Err(e) => {
                    warn!(attempt, error = %e, "Realtime subscription failed");
                    state.send_replace(ConnectionState::Error);
                }
            }

            if attempt >= self.config.max_attempts {
                warn!(attempts = attempt, "Giving up on realtime subscription");
                state.send_replace(ConnectionState::Failed);
                // Stay failed until told to stop
                while let Some(cmd) = command_rx.recv().await {
                    if matches!(cmd, ListenerCommand::Shutdown) {
                        break;
                    }
                }
                return;
            }

            attempt += 1;
            state.send_replace(ConnectionState::Reconnecting { attempt });
            let delay = reconnect_delay(&self.config, attempt);
            debug!(attempt, delay_ms = delay.as_millis() as u64, "Waiting before reconnect");

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                cmd = command_rx.recv() => {
                    if matches!(cmd, Some(ListenerCommand::Shutdown) | None) {
                        break;
                    }
                }
            }
        }

        state.send_replace(ConnectionState::Disconnected);
        debug!("Realtime listener stopped");
    }

    async fn listen(
        &self,
        mut events: mpsc::Receiver<ChangeEvent>,
        command_rx: &mut mpsc::Receiver<ListenerCommand>,
        state: &watch::Sender<ConnectionState>,
    ) -> ListenExit {
        let heartbeat_every = Duration::from_millis(self.config.heartbeat_interval_ms);
        let heartbeat_timeout = Duration::from_millis(self.config.heartbeat_timeout_ms);
        let debounce = Duration::from_millis(self.config.debounce_ms);

        let mut heartbeat = tokio::time::interval_at(Instant::now() + heartbeat_every, heartbeat_every);
        let mut missed_heartbeats = 0u32;
        let mut deadline: Option<Instant> = None;
        let mut touched: Vec<Uuid> = Vec::new();

        loop {
            tokio::select! {
                cmd = command_rx.recv() => {
                    if matches!(cmd, Some(ListenerCommand::Shutdown) | None) {
                        return ListenExit::Shutdown;
                    }
                }

                event = events.recv() => {
                    let Some(event) = event else {
                        return ListenExit::Closed;
                    };
                    if !self.accepts(&event) {
                        continue;
                    }
                    touched.extend(event.new_record.iter().chain(event.old_record.iter()).filter_map(|r| r.id));
                    deadline = Some(Instant::now() + debounce);
                }

                _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    deadline = None;
                    self.request_pull(std::mem::take(&mut touched)).await;
                }

                _ = heartbeat.tick() => {
                    let alive = matches!(
                        tokio::time::timeout(heartbeat_timeout, self.remote.ping()).await,
                        Ok(Ok(()))
                    );
                    if alive {
                        if missed_heartbeats > 0 {
                            debug!(missed = missed_heartbeats, "Heartbeat recovered");
                            state.send_replace(ConnectionState::Connected);
                        }
                        missed_heartbeats = 0;
                        continue;
                    }

                    missed_heartbeats += 1;
                    debug!(missed = missed_heartbeats, "Heartbeat failed");
                    if missed_heartbeats >= self.config.offline_after {
                        return ListenExit::Offline;
                    }
                    if missed_heartbeats >= self.config.unstable_after {
                        state.send_replace(ConnectionState::Unstable);
                    }
                }
            }
        }
    }

    /// Drop echoes of our own writes and events for other accounts
    fn accepts(&self, event: &ChangeEvent) -> bool {
        if event.originating_device() == Some(self.coordinator.device_id()) {
            debug!(event_type = ?event.event_type, "Ignoring own change");
            return false;
        }
        if let Some(user_id) = event.user_id() {
            if user_id != self.coordinator.user_id() {
                debug!(user_id, "Ignoring change for another user");
                return false;
            }
        }
        true
    }

    async fn request_pull(&self, mut ids: Vec<Uuid>) {
        match self.coordinator.local_group_ids().await {
            Ok(local) => ids.extend(local),
            Err(e) => warn!(error = %e, "Failed to read local groups"),
        }

        if self.coordinator.should_block_realtime_sync(&ids) {
            debug!("Skipping realtime pull while a deletion is pending");
            return;
        }
        self.scheduler.request(Priority::UPDATE, SyncPass::pull(), "realtime change");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SchedulerConfig;
    use crate::identity::{DeviceIdentity, SessionAuth};
    use crate::models::{Tab, TabGroup};
    use crate::remote::MemoryRemoteStore;
    use crate::storage::{LocalStore, MemoryStore};

    const USER: &str = "user-1";

    struct Fixture {
        local: Arc<MemoryStore>,
        remote: MemoryRemoteStore,
        coordinator: Arc<SyncCoordinator>,
        handle: RealtimeHandle,
    }

    fn config() -> RealtimeConfig {
        RealtimeConfig {
            jitter: false,
            max_attempts: 3,
            ..RealtimeConfig::default()
        }
    }

    fn start(remote: MemoryRemoteStore, config: RealtimeConfig) -> Fixture {
        let local = Arc::new(MemoryStore::new());
        let coordinator = Arc::new(SyncCoordinator::new(
            local.clone(),
            Arc::new(remote.clone()),
            &DeviceIdentity::from_id("device-a"),
            USER,
        ));
        let scheduler = SyncScheduler::new(
            coordinator.clone(),
            Arc::new(SessionAuth::new(true)),
            &SchedulerConfig::default(),
        );
        let handle = RealtimeListener::new(
            Arc::new(remote.clone()),
            coordinator.clone(),
            scheduler,
            config,
        )
        .spawn();
        Fixture {
            local,
            remote,
            coordinator,
            handle,
        }
    }

    fn group(device: &str) -> TabGroup {
        TabGroup::new("g", vec![Tab::new("https://a.example")], device, USER)
    }

    async fn settle(ms: u64) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_connects_and_shuts_down() {
        let f = start(MemoryRemoteStore::new(), config());
        settle(10).await;
        assert_eq!(f.handle.state(), ConnectionState::Connected);
        assert_eq!(f.remote.subscriber_count(USER), 1);

        let mut state = f.handle.subscribe_state();
        f.handle.shutdown().await;
        assert_eq!(*state.borrow_and_update(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_own_changes_do_not_trigger_pull() {
        let f = start(MemoryRemoteStore::new(), config());
        settle(10).await;

        f.local.set_groups(&[group("device-a")]).await.unwrap();
        f.coordinator.protected_push(false).await.unwrap();
        // The push itself checks the remote once
        let after_push = f.remote.download_count();
        settle(2000).await;

        assert_eq!(f.remote.download_count(), after_push);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remote_change_is_pulled_once_after_debounce() {
        let f = start(MemoryRemoteStore::new(), config());
        settle(10).await;

        let first = group("device-b");
        let second = group("device-b");
        f.remote.put_group(first.clone());
        settle(100).await;
        f.remote.put_group(second.clone());

        settle(450).await;
        assert_eq!(f.remote.download_count(), 0);

        settle(300).await;
        assert_eq!(f.remote.download_count(), 1);
        let visible = f.coordinator.visible_groups().await.unwrap();
        assert_eq!(visible.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_other_users_events_are_ignored() {
        let f = start(MemoryRemoteStore::new(), config());
        settle(10).await;

        let mut foreign = group("device-b");
        foreign.user_id = "user-2".to_string();
        f.remote.emit(USER, ChangeEvent::insert(&foreign));
        settle(2000).await;

        assert_eq!(f.remote.download_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pending_deletion_blocks_realtime_pull() {
        let g = group("device-a");
        let f = start(MemoryRemoteStore::new(), config());
        f.local.set_groups(&[g.clone()]).await.unwrap();
        settle(10).await;

        f.coordinator.execute_protected_deletion(g.id).await.unwrap();
        f.remote.put_group(group("device-b"));
        settle(2000).await;

        assert_eq!(f.remote.download_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnects_after_disconnect() {
        let f = start(MemoryRemoteStore::new(), config());
        settle(10).await;

        f.remote.disconnect_all();
        settle(10).await;
        assert_eq!(f.handle.state(), ConnectionState::Reconnecting { attempt: 1 });

        settle(1000).await;
        assert_eq!(f.handle.state(), ConnectionState::Connected);
        assert_eq!(f.remote.subscriber_count(USER), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_attempts() {
        let remote = MemoryRemoteStore::new();
        remote.fail_subscribes(100);
        let f = start(remote, config());

        // 1s + 2s + 4s of backoff
        settle(8000).await;
        assert_eq!(f.handle.state(), ConnectionState::Failed);
        f.handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_heartbeats_mark_connection_unstable() {
        let f = start(MemoryRemoteStore::new(), config());
        settle(10).await;

        f.remote.set_reachable(false);
        settle(95_000).await;
        assert_eq!(f.handle.state(), ConnectionState::Unstable);

        f.remote.set_reachable(true);
        settle(30_000).await;
        assert_eq!(f.handle.state(), ConnectionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lost_heartbeat_goes_offline_and_reconnects() {
        let f = start(MemoryRemoteStore::new(), config());
        settle(10).await;
        let mut state = f.handle.subscribe_state();

        // Misses at 30s, 60s, 90s and 120s
        f.remote.set_reachable(false);
        settle(125_000).await;
        assert_eq!(f.handle.state(), ConnectionState::Unstable);
        assert_eq!(f.remote.subscriber_count(USER), 1);
        let _ = state.borrow_and_update();

        // Fifth miss at 150s drops the subscription and schedules attempt 1
        settle(25_500).await;
        assert!(state.has_changed().unwrap());
        assert_eq!(*state.borrow_and_update(), ConnectionState::Reconnecting { attempt: 1 });
        assert_eq!(f.remote.subscriber_count(USER), 0);

        f.remote.set_reachable(true);
        settle(1_000).await;
        assert_eq!(f.handle.state(), ConnectionState::Connected);
        assert_eq!(f.remote.subscriber_count(USER), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreachable_backend_keeps_reconnecting() {
        let f = start(MemoryRemoteStore::new(), config());
        settle(10).await;

        f.remote.set_reachable(false);
        // Offline at 150s, attempt 1 refused at 151s
        settle(151_500).await;
        assert_eq!(f.handle.state(), ConnectionState::Reconnecting { attempt: 2 });

        f.remote.set_reachable(true);
        settle(2_000).await;
        assert_eq!(f.handle.state(), ConnectionState::Connected);
    }

    #[test]
    fn test_reconnect_delay_grows_and_caps() {
        let config = config();
        assert_eq!(reconnect_delay(&config, 1), Duration::from_millis(1000));
        assert_eq!(reconnect_delay(&config, 2), Duration::from_millis(2000));
        assert_eq!(reconnect_delay(&config, 4), Duration::from_millis(8000));
        assert_eq!(reconnect_delay(&config, 10), Duration::from_millis(30000));

        let jittered = RealtimeConfig {
            jitter: true,
            ..config
        };
        let d = reconnect_delay(&jittered, 2);
        assert!(d >= Duration::from_millis(1000) && d <= Duration::from_millis(2000));
    }
}
