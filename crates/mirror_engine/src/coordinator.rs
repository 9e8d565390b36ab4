//! The poll loop that keeps each device's cached state current.

use crate::api::RemoteDeviceApi;
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::fetcher::EventFetcher;
use crate::repair::{AuthFailureCounter, NoopRepairHook, RepairHook, RepairSignal};
use crate::staleness::{Clock, LivenessRecords, StalenessTracker, SystemClock};
use crate::state::{ApplyOutcome, DegradedReason, DevicePhase, SyncState};
use mirror_protocol::{Cursor, DeviceId, EventBatch, FetchMode, Map, Value};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// A state change published to subscribers.
#[derive(Debug, Clone)]
pub struct StateUpdate {
    /// Device whose state changed.
    pub device_id: DeviceId,
    /// Id of the last applied event.
    pub cursor: Option<Cursor>,
    /// The full cached tree after the change.
    pub state: Arc<Map>,
}

/// Counters accumulated over the coordinator's lifetime for one device.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncStats {
    /// Poll cycles run (not counting skipped ticks).
    pub polls: u64,
    /// Events applied to the cached tree.
    pub events_applied: u64,
    /// Snapshots that replaced the cached tree.
    pub snapshots_applied: u64,
    /// Malformed events skipped.
    pub anomalies_skipped: u64,
    /// Polls that failed authentication.
    pub auth_failures: u64,
    /// Polls that failed for transient reasons.
    pub transient_failures: u64,
    /// Ticks skipped because a cycle was still running.
    pub skipped_ticks: u64,
}

/// Point-in-time view of one device's sync status.
#[derive(Debug, Clone)]
pub struct DeviceStatus {
    /// Current phase.
    pub phase: DevicePhase,
    /// Id of the last applied event.
    pub cursor: Option<Cursor>,
    /// Consecutive authentication failures.
    pub consecutive_auth_failures: u32,
    /// Whether a repair signal is outstanding.
    pub repair_raised: bool,
    /// Whether the most recent poll succeeded.
    pub last_update_success: bool,
    /// Error of the most recent failed poll, cleared on success.
    pub last_error: Option<String>,
    /// Lifetime counters.
    pub stats: SyncStats,
}

impl Default for DeviceStatus {
    fn default() -> Self {
        Self {
            phase: DevicePhase::Uninitialized,
            cursor: None,
            consecutive_auth_failures: 0,
            repair_raised: false,
            last_update_success: false,
            last_error: None,
            stats: SyncStats::default(),
        }
    }
}

/// Result of one poll cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// A previous cycle for the device was still running.
    Skipped,
    /// The cached tree changed and was published.
    Updated {
        /// Events applied.
        events_applied: usize,
        /// Whether a snapshot replaced the tree.
        snapshot: bool,
    },
    /// The fetch succeeded but nothing changed.
    Unchanged,
    /// Credentials were rejected.
    AuthFailed {
        /// Consecutive failures including this one.
        consecutive_failures: u32,
    },
    /// Network failure or timeout.
    TransientFailed,
}

/// Mutable sync state of a device, owned by whichever cycle holds the lock.
struct DeviceCycle {
    state: SyncState,
    phase: DevicePhase,
    auth: AuthFailureCounter,
}

struct DeviceSync {
    device_id: DeviceId,
    cycle: tokio::sync::Mutex<DeviceCycle>,
    published: RwLock<Option<Arc<Map>>>,
    status: RwLock<DeviceStatus>,
    updates: broadcast::Sender<StateUpdate>,
}

impl DeviceSync {
    fn new(device_id: DeviceId, config: &SyncConfig) -> Self {
        let (updates, _) = broadcast::channel(config.update_channel_capacity);
        Self {
            device_id,
            cycle: tokio::sync::Mutex::new(DeviceCycle {
                state: SyncState::new(),
                phase: DevicePhase::Uninitialized,
                auth: AuthFailureCounter::new(config.auth_failure_threshold),
            }),
            published: RwLock::new(None),
            status: RwLock::new(DeviceStatus::default()),
            updates,
        }
    }
}

/// Builds and sets up a [`SyncCoordinator`].
pub struct CoordinatorBuilder<A: RemoteDeviceApi> {
    api: Arc<A>,
    config: SyncConfig,
    devices: Vec<DeviceId>,
    repair_hook: Arc<dyn RepairHook>,
    clock: Arc<dyn Clock>,
}

impl<A: RemoteDeviceApi> CoordinatorBuilder<A> {
    /// Sets the configuration.
    pub fn with_config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the devices to mirror. Without devices, setup discovers them.
    pub fn with_devices(mut self, devices: impl IntoIterator<Item = DeviceId>) -> Self {
        self.devices = devices.into_iter().collect();
        self
    }

    /// Sets the hook receiving repair signals.
    pub fn with_repair_hook(mut self, hook: Arc<dyn RepairHook>) -> Self {
        self.repair_hook = hook;
        self
    }

    /// Sets the clock used for liveness records.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Refreshes credentials, resolves the device list and creates the
    /// coordinator. Polling starts with [`SyncCoordinator::start`].
    ///
    /// Any failure here is fatal and reported as [`SyncError::Setup`].
    pub async fn setup(self) -> SyncResult<Arc<SyncCoordinator<A>>> {
        self.config.validate()?;

        if let Err(e) = self.api.refresh_credentials().await {
            error!(error = %e, "credential refresh failed during setup");
            return Err(SyncError::Setup(format!("credential refresh failed: {e}")));
        }

        let device_ids = if self.devices.is_empty() {
            self.api.list_devices().await.map_err(|e| {
                error!(error = %e, "device discovery failed during setup");
                SyncError::Setup(format!("device discovery failed: {e}"))
            })?
        } else {
            self.devices
        };

        if device_ids.is_empty() {
            error!("no devices found for these credentials");
            return Err(SyncError::Setup("no devices found".into()));
        }

        let devices = device_ids
            .into_iter()
            .map(|id| {
                let device = Arc::new(DeviceSync::new(id.clone(), &self.config));
                (id, device)
            })
            .collect::<BTreeMap<_, _>>();

        let liveness = Arc::new(LivenessRecords::new(self.clock));
        let staleness = StalenessTracker::new(Arc::clone(&liveness), self.config.stale_timeout);
        let (shutdown, _) = watch::channel(false);

        info!(devices = devices.len(), "sync coordinator ready");

        Ok(Arc::new(SyncCoordinator {
            fetcher: EventFetcher::new(self.api, self.config.fetch_timeout),
            config: self.config,
            devices,
            liveness,
            staleness,
            repair_hook: self.repair_hook,
            shutdown,
            tasks: Mutex::new(Vec::new()),
        }))
    }
}

/// Keeps a cached mirror of each device's remote state.
///
/// Every device is polled on a fixed interval. The first successful poll
/// that yields a full snapshot bootstraps the cache; later polls fold in
/// deltas. Failed polls never surface to readers: they keep seeing the last
/// known state while the failure is tracked in [`DeviceStatus`].
///
/// At most one poll cycle per device runs at a time. A tick (or manual
/// refresh) arriving while a cycle is in flight is skipped, not queued.
pub struct SyncCoordinator<A: RemoteDeviceApi> {
    config: SyncConfig,
    fetcher: EventFetcher<A>,
    devices: BTreeMap<DeviceId, Arc<DeviceSync>>,
    liveness: Arc<LivenessRecords>,
    staleness: StalenessTracker,
    repair_hook: Arc<dyn RepairHook>,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl<A: RemoteDeviceApi> SyncCoordinator<A> {
    /// Starts building a coordinator over `api`.
    pub fn builder(api: Arc<A>) -> CoordinatorBuilder<A> {
        CoordinatorBuilder {
            api,
            config: SyncConfig::default(),
            devices: Vec::new(),
            repair_hook: Arc::new(NoopRepairHook),
            clock: Arc::new(SystemClock),
        }
    }

    /// Spawns one poll loop per device. The first tick fires immediately.
    ///
    /// Calling this more than once has no effect. Loops stop on
    /// [`shutdown`](Self::shutdown) or when the coordinator is dropped.
    pub fn start(self: &Arc<Self>) {
        let mut tasks = self.tasks.lock();
        if !tasks.is_empty() || *self.shutdown.borrow() {
            return;
        }

        for device in self.devices.values() {
            let coordinator = Arc::downgrade(self);
            let device = Arc::clone(device);
            let shutdown = self.shutdown.subscribe();
            let interval = self.config.poll_interval;
            tasks.push(tokio::spawn(run_device_loop(
                coordinator,
                device,
                shutdown,
                interval,
            )));
        }

        info!(
            devices = self.devices.len(),
            interval_ms = u64::try_from(self.config.poll_interval.as_millis()).unwrap_or(u64::MAX),
            "polling started"
        );
    }

    /// Stops all poll loops and waits for them to finish.
    ///
    /// A cycle already in flight runs to completion.
    pub async fn shutdown(&self) {
        self.shutdown.send_replace(true);

        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "poll loop ended abnormally");
            }
        }

        info!("sync coordinator stopped");
    }

    /// Runs one poll cycle for `device_id` right away.
    pub async fn refresh(&self, device_id: &DeviceId) -> SyncResult<PollOutcome> {
        if *self.shutdown.borrow() {
            return Err(SyncError::ShuttingDown);
        }
        let device = self.device(device_id)?;
        Ok(self.poll_device(device).await)
    }

    /// The current cached tree of a device, or `None` before bootstrap.
    pub fn get_state(&self, device_id: &DeviceId) -> Option<Arc<Map>> {
        self.devices.get(device_id)?.published.read().clone()
    }

    /// Looks up a value in a device's cached tree by key path.
    ///
    /// An empty path returns the whole tree.
    pub fn get_value(&self, device_id: &DeviceId, path: &[&str]) -> Option<Value> {
        let state = self.get_state(device_id)?;
        match path.split_first() {
            Some((first, rest)) => state.get(*first)?.pointer(rest).cloned(),
            None => Some(Value::Map((*state).clone())),
        }
    }

    /// Subscribes to state changes of a device.
    ///
    /// A receiver that falls more than the channel capacity behind skips to
    /// the newest updates; each update carries the full tree.
    pub fn subscribe(&self, device_id: &DeviceId) -> SyncResult<broadcast::Receiver<StateUpdate>> {
        Ok(self.device(device_id)?.updates.subscribe())
    }

    /// Returns true if the device has no successful poll within the stale
    /// timeout. Unknown devices are always stale.
    pub fn is_stale(&self, device_id: &DeviceId) -> bool {
        self.staleness.is_stale(device_id)
    }

    /// Returns the sync status of a device.
    pub fn status(&self, device_id: &DeviceId) -> SyncResult<DeviceStatus> {
        Ok(self.device(device_id)?.status.read().clone())
    }

    /// The devices managed by this coordinator.
    pub fn devices(&self) -> Vec<DeviceId> {
        self.devices.keys().cloned().collect()
    }

    /// The staleness view over this coordinator's liveness records.
    pub fn staleness(&self) -> &StalenessTracker {
        &self.staleness
    }

    /// The configuration in use.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    fn device(&self, device_id: &DeviceId) -> SyncResult<&Arc<DeviceSync>> {
        self.devices
            .get(device_id)
            .ok_or_else(|| SyncError::UnknownDevice(device_id.clone()))
    }

    async fn poll_device(&self, device: &DeviceSync) -> PollOutcome {
        let Ok(mut cycle) = device.cycle.try_lock() else {
            debug!(device = %device.device_id, "previous cycle still running, skipping tick");
            device.status.write().stats.skipped_ticks += 1;
            return PollOutcome::Skipped;
        };

        if cycle.phase == DevicePhase::Uninitialized {
            cycle.phase = DevicePhase::Bootstrapping;
        }

        let mode = if cycle.state.is_bootstrapped() {
            FetchMode::Incremental
        } else {
            FetchMode::Bootstrap
        };

        let result = self
            .fetcher
            .fetch(&device.device_id, mode, cycle.state.cursor())
            .await;

        let outcome = match result {
            Ok(batch) => self.handle_batch(device, &mut cycle, mode, &batch),
            Err(e) if e.is_auth() => self.handle_auth_failure(device, &mut cycle, &e),
            Err(e) => self.handle_transient_failure(device, &mut cycle, &e),
        };

        let mut status = device.status.write();
        status.phase = cycle.phase;
        status.cursor = cycle.state.cursor().cloned();
        status.consecutive_auth_failures = cycle.auth.consecutive();
        status.repair_raised = cycle.auth.is_raised();
        status.stats.polls += 1;

        outcome
    }

    fn handle_batch(
        &self,
        device: &DeviceSync,
        cycle: &mut DeviceCycle,
        mode: FetchMode,
        batch: &EventBatch,
    ) -> PollOutcome {
        let applied: ApplyOutcome = match mode {
            FetchMode::Bootstrap => cycle.state.apply_bootstrap(batch),
            FetchMode::Incremental => cycle.state.apply_incremental(batch),
        };

        {
            let mut status = device.status.write();
            status.last_update_success = true;
            status.last_error = None;
            status.stats.anomalies_skipped += batch.anomalies().len() as u64;
            status.stats.events_applied += applied.events_applied() as u64;
            status.stats.snapshots_applied += u64::from(applied.snapshot_applied);
        }

        if cycle.auth.record_success() {
            info!(device = %device.device_id, "credentials accepted again, clearing repair signal");
            self.repair_hook.notify(&RepairSignal::Cleared {
                device_id: device.device_id.clone(),
            });
        }

        if !cycle.state.is_bootstrapped() {
            debug!(device = %device.device_id, "no snapshot yet, retrying bootstrap next tick");
            cycle.phase = DevicePhase::Bootstrapping;
            return PollOutcome::Unchanged;
        }

        match cycle.phase {
            DevicePhase::Synchronized => {}
            DevicePhase::Degraded(reason) => {
                info!(device = %device.device_id, ?reason, "device recovered");
            }
            DevicePhase::Uninitialized | DevicePhase::Bootstrapping => {
                info!(
                    device = %device.device_id,
                    cursor = ?cycle.state.cursor(),
                    "device bootstrapped from snapshot"
                );
            }
        }
        cycle.phase = DevicePhase::Synchronized;
        self.liveness.touch(&device.device_id);

        if !applied.changed() {
            return PollOutcome::Unchanged;
        }

        self.publish(device, &cycle.state);
        PollOutcome::Updated {
            events_applied: applied.events_applied(),
            snapshot: applied.snapshot_applied,
        }
    }

    fn handle_auth_failure(
        &self,
        device: &DeviceSync,
        cycle: &mut DeviceCycle,
        err: &SyncError,
    ) -> PollOutcome {
        {
            let mut status = device.status.write();
            status.last_update_success = false;
            status.last_error = Some(err.to_string());
            status.stats.auth_failures += 1;
        }

        if let Some(failures) = cycle.auth.record_failure() {
            error!(
                device = %device.device_id,
                failures,
                "authentication keeps failing, device needs re-pairing"
            );
            self.repair_hook.notify(&RepairSignal::Raised {
                device_id: device.device_id.clone(),
                consecutive_failures: failures,
            });
        } else {
            warn!(
                device = %device.device_id,
                failures = cycle.auth.consecutive(),
                error = %err,
                "authentication error while polling, serving last known state"
            );
        }

        if cycle.phase.has_snapshot() {
            cycle.phase = DevicePhase::Degraded(DegradedReason::Auth);
        }

        PollOutcome::AuthFailed {
            consecutive_failures: cycle.auth.consecutive(),
        }
    }

    fn handle_transient_failure(
        &self,
        device: &DeviceSync,
        cycle: &mut DeviceCycle,
        err: &SyncError,
    ) -> PollOutcome {
        warn!(
            device = %device.device_id,
            error = %err,
            "error communicating with device API, serving last known state"
        );

        {
            let mut status = device.status.write();
            status.last_update_success = false;
            status.last_error = Some(err.to_string());
            status.stats.transient_failures += 1;
        }

        if cycle.phase.has_snapshot() {
            cycle.phase = DevicePhase::Degraded(DegradedReason::Transient);
        }

        PollOutcome::TransientFailed
    }

    fn publish(&self, device: &DeviceSync, state: &SyncState) {
        let Some(tree) = state.tree() else {
            return;
        };

        let snapshot = Arc::new(tree.clone());
        *device.published.write() = Some(Arc::clone(&snapshot));

        // Sending only fails when nobody is subscribed.
        let _ = device.updates.send(StateUpdate {
            device_id: device.device_id.clone(),
            cursor: state.cursor().cloned(),
            state: snapshot,
        });
    }
}

async fn run_device_loop<A: RemoteDeviceApi>(
    coordinator: Weak<SyncCoordinator<A>>,
    device: Arc<DeviceSync>,
    mut shutdown: watch::Receiver<bool>,
    interval: std::time::Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        if *shutdown.borrow() {
            break;
        }

        tokio::select! {
            _ = ticker.tick() => {}
            changed = shutdown.changed() => {
                // The sender is gone once the coordinator is dropped.
                if changed.is_err() {
                    break;
                }
                continue;
            }
        }

        let Some(coordinator) = coordinator.upgrade() else {
            break;
        };
        coordinator.poll_device(&device).await;
    }

    debug!(device = %device.device_id, "poll loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ScriptedDeviceApi;
    use std::time::Duration;

    #[test]
    fn status_starts_uninitialized() {
        let status = DeviceStatus::default();
        assert_eq!(status.phase, DevicePhase::Uninitialized);
        assert_eq!(status.cursor, None);
        assert!(!status.last_update_success);
        assert_eq!(status.stats, SyncStats::default());
    }

    #[tokio::test]
    async fn builder_defaults() {
        let api = Arc::new(ScriptedDeviceApi::new());
        let coordinator = SyncCoordinator::builder(api)
            .with_devices([DeviceId::new("A1")])
            .setup()
            .await
            .unwrap();

        assert_eq!(coordinator.config().poll_interval, Duration::from_secs(30));
        assert_eq!(coordinator.staleness().stale_timeout(), Duration::from_secs(24 * 60 * 60));
        assert_eq!(coordinator.devices(), vec![DeviceId::new("A1")]);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_coordinator_stops_polling() {
        let device = DeviceId::new("A1");
        let api = Arc::new(ScriptedDeviceApi::new());
        let coordinator = SyncCoordinator::builder(Arc::clone(&api))
            .with_devices([device.clone()])
            .with_config(SyncConfig::new().with_poll_interval(Duration::from_millis(10)))
            .setup()
            .await
            .unwrap();

        coordinator.start();
        tokio::time::sleep(Duration::from_millis(35)).await;
        drop(coordinator);

        let polled = api.calls(&device).len();
        assert!(polled >= 3);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(api.calls(&device).len(), polled);
    }
}
