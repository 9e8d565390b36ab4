//! Escalation of sustained authentication failures.

use mirror_protocol::DeviceId;
use parking_lot::Mutex;

/// A notification that a device needs (or no longer needs) re-pairing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepairSignal {
    /// Consecutive authentication failures reached the threshold.
    Raised {
        /// Affected device.
        device_id: DeviceId,
        /// Failures counted when the signal was raised.
        consecutive_failures: u32,
    },
    /// A poll succeeded after the signal was raised.
    Cleared {
        /// Affected device.
        device_id: DeviceId,
    },
}

impl RepairSignal {
    /// The device this signal is about.
    pub fn device_id(&self) -> &DeviceId {
        match self {
            RepairSignal::Raised { device_id, .. } | RepairSignal::Cleared { device_id } => {
                device_id
            }
        }
    }
}

/// Receives repair signals from the coordinator.
pub trait RepairHook: Send + Sync {
    /// Called once per threshold crossing and once per recovery.
    fn notify(&self, signal: &RepairSignal);
}

impl<F> RepairHook for F
where
    F: Fn(&RepairSignal) + Send + Sync,
{
    fn notify(&self, signal: &RepairSignal) {
        self(signal)
    }
}

/// A hook that ignores every signal.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopRepairHook;

impl RepairHook for NoopRepairHook {
    fn notify(&self, _signal: &RepairSignal) {}
}

/// A hook that records every signal it receives.
#[derive(Debug, Default)]
pub struct RepairLog {
    signals: Mutex<Vec<RepairSignal>>,
}

impl RepairLog {
    /// Creates an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// All signals received, oldest first.
    pub fn signals(&self) -> Vec<RepairSignal> {
        self.signals.lock().clone()
    }

    /// Number of `Raised` signals received for a device.
    pub fn raised_count(&self, device_id: &DeviceId) -> usize {
        self.signals
            .lock()
            .iter()
            .filter(|s| matches!(s, RepairSignal::Raised { .. }) && s.device_id() == device_id)
            .count()
    }
}

impl RepairHook for RepairLog {
    fn notify(&self, signal: &RepairSignal) {
        self.signals.lock().push(signal.clone());
    }
}

/// Counts consecutive authentication failures of one device.
///
/// The counter reports a threshold crossing once; it re-arms only after a
/// success.
#[derive(Debug, Clone)]
pub struct AuthFailureCounter {
    consecutive: u32,
    threshold: u32,
    raised: bool,
}

impl AuthFailureCounter {
    /// Creates a counter that trips after `threshold` consecutive failures.
    pub fn new(threshold: u32) -> Self {
        Self {
            consecutive: 0,
            threshold,
            raised: false,
        }
    }

    /// Records a failure. Returns the failure count if this failure crosses
    /// the threshold and a repair signal should be raised.
    pub fn record_failure(&mut self) -> Option<u32> {
        self.consecutive = self.consecutive.saturating_add(1);

        if !self.raised && self.consecutive >= self.threshold {
            self.raised = true;
            Some(self.consecutive)
        } else {
            None
        }
    }

    /// Records a success. Returns true if a raised signal should be cleared.
    pub fn record_success(&mut self) -> bool {
        self.consecutive = 0;
        std::mem::replace(&mut self.raised, false)
    }

    /// Current number of consecutive failures.
    pub fn consecutive(&self) -> u32 {
        self.consecutive
    }

    /// Whether a repair signal is currently raised.
    pub fn is_raised(&self) -> bool {
        self.raised
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raises_once_at_threshold() {
        let mut counter = AuthFailureCounter::new(3);

        assert_eq!(counter.record_failure(), None);
        assert_eq!(counter.record_failure(), None);
        assert_eq!(counter.record_failure(), Some(3));
        assert_eq!(counter.record_failure(), None);
        assert_eq!(counter.consecutive(), 4);
        assert!(counter.is_raised());
    }

    #[test]
    fn success_resets_and_rearms() {
        let mut counter = AuthFailureCounter::new(2);
        counter.record_failure();
        assert!(!counter.record_success());

        counter.record_failure();
        assert_eq!(counter.record_failure(), Some(2));
        assert!(counter.record_success());
        assert_eq!(counter.consecutive(), 0);
        assert!(!counter.record_success());

        counter.record_failure();
        assert_eq!(counter.record_failure(), Some(2));
    }

    #[test]
    fn threshold_of_one_raises_immediately() {
        let mut counter = AuthFailureCounter::new(1);
        assert_eq!(counter.record_failure(), Some(1));
    }

    #[test]
    fn repair_log_counts_raises_per_device() {
        let log = RepairLog::new();
        let a = DeviceId::new("A1");
        let b = DeviceId::new("B2");

        log.notify(&RepairSignal::Raised {
            device_id: a.clone(),
            consecutive_failures: 3,
        });
        log.notify(&RepairSignal::Cleared {
            device_id: a.clone(),
        });
        log.notify(&RepairSignal::Raised {
            device_id: b,
            consecutive_failures: 3,
        });

        assert_eq!(log.raised_count(&a), 1);
        assert_eq!(log.signals().len(), 3);
    }

    #[test]
    fn closures_are_hooks() {
        let seen = Mutex::new(0);
        let hook = |_: &RepairSignal| *seen.lock() += 1;
        hook.notify(&RepairSignal::Cleared {
            device_id: DeviceId::new("A1"),
        });
        assert_eq!(*seen.lock(), 1);
    }
}
