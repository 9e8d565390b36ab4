//! Device liveness records and staleness classification.

use mirror_protocol::DeviceId;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Source of the current time.
pub trait Clock: Send + Sync {
    /// Returns the current instant.
    fn now(&self) -> Instant;
}

/// The monotonic system clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<Instant>,
}

impl ManualClock {
    /// Creates a clock frozen at the current instant.
    pub fn new() -> Self {
        Self {
            now: Mutex::new(Instant::now()),
        }
    }

    /// Moves the clock forward.
    pub fn advance(&self, by: Duration) {
        *self.now.lock() += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock()
    }
}

/// Last successful update time per device.
///
/// Written by the coordinator after each successful poll.
pub struct LivenessRecords {
    clock: Arc<dyn Clock>,
    last_seen: RwLock<HashMap<DeviceId, Instant>>,
}

impl LivenessRecords {
    /// Creates an empty record set.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            last_seen: RwLock::new(HashMap::new()),
        }
    }

    /// Records a successful update of `device_id` at the current time.
    pub fn touch(&self, device_id: &DeviceId) {
        let now = self.clock.now();
        self.last_seen.write().insert(device_id.clone(), now);
    }

    /// Returns when `device_id` was last updated.
    pub fn last_seen(&self, device_id: &DeviceId) -> Option<Instant> {
        self.last_seen.read().get(device_id).copied()
    }

    /// The clock used for timestamps.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }
}

/// Classifies devices as stale after a fixed timeout.
///
/// A read-only view over [`LivenessRecords`].
#[derive(Clone)]
pub struct StalenessTracker {
    records: Arc<LivenessRecords>,
    stale_timeout: Duration,
}

impl StalenessTracker {
    /// Creates a tracker over `records`.
    pub fn new(records: Arc<LivenessRecords>, stale_timeout: Duration) -> Self {
        Self {
            records,
            stale_timeout,
        }
    }

    /// Returns true if the device was never synchronized or its last update
    /// is more than the stale timeout ago.
    pub fn is_stale(&self, device_id: &DeviceId) -> bool {
        match self.records.last_seen(device_id) {
            Some(seen) => {
                let now = self.records.clock().now();
                now.saturating_duration_since(seen) > self.stale_timeout
            }
            None => true,
        }
    }

    /// Returns when `device_id` was last updated.
    pub fn last_seen(&self, device_id: &DeviceId) -> Option<Instant> {
        self.records.last_seen(device_id)
    }

    /// Filters `devices` down to the stale ones.
    pub fn stale_devices<'a>(
        &self,
        devices: impl IntoIterator<Item = &'a DeviceId>,
    ) -> Vec<DeviceId> {
        devices
            .into_iter()
            .filter(|d| self.is_stale(d))
            .cloned()
            .collect()
    }

    /// The configured timeout.
    pub fn stale_timeout(&self) -> Duration {
        self.stale_timeout
    }
}
