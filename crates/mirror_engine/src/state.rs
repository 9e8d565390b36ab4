//! Cached device state and sync phases.

use mirror_protocol::{merge, Cursor, Event, EventBatch, EventKind, Map};

/// Why a synchronized device is currently failing to poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DegradedReason {
    /// Credentials were rejected.
    Auth,
    /// Network failure or timeout.
    Transient,
}

/// The sync phase of one device.
///
/// `Degraded` is informational: polling continues on the same schedule and
/// consumers keep reading the last known state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DevicePhase {
    /// No poll has run yet.
    Uninitialized,
    /// Waiting for a first full snapshot.
    Bootstrapping,
    /// Holding a snapshot and following deltas.
    Synchronized,
    /// Holding a snapshot, but the last poll failed.
    Degraded(DegradedReason),
}

impl DevicePhase {
    /// Returns true once a snapshot has been applied.
    pub fn has_snapshot(&self) -> bool {
        matches!(self, DevicePhase::Synchronized | DevicePhase::Degraded(_))
    }
}

/// What applying a batch changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyOutcome {
    /// Delta events merged into the tree.
    pub deltas_applied: usize,
    /// Whether a snapshot replaced the tree.
    pub snapshot_applied: bool,
}

impl ApplyOutcome {
    /// Returns true if the tree changed and should be published.
    pub fn changed(&self) -> bool {
        self.snapshot_applied || self.deltas_applied > 0
    }

    /// Number of events applied.
    pub fn events_applied(&self) -> usize {
        self.deltas_applied + usize::from(self.snapshot_applied)
    }
}

/// The cached tree of one device plus the last applied event.
///
/// `tree` is `None` until a full snapshot has been applied. After that,
/// deltas only add or overwrite keys; only another snapshot drops keys.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncState {
    tree: Option<Map>,
    cursor: Option<Cursor>,
}

impl SyncState {
    /// Creates an empty state.
    pub fn new() -> Self {
        Self::default()
    }

    /// The cached tree, if a snapshot has been applied.
    pub fn tree(&self) -> Option<&Map> {
        self.tree.as_ref()
    }

    /// The id of the last applied event.
    pub fn cursor(&self) -> Option<&Cursor> {
        self.cursor.as_ref()
    }

    /// Returns true once a snapshot has been applied.
    pub fn is_bootstrapped(&self) -> bool {
        self.tree.is_some()
    }

    /// Applies the result of a bootstrap fetch.
    ///
    /// Only the first snapshot in delivery order is used; deltas in the batch
    /// are ignored. Without a snapshot nothing changes.
    pub fn apply_bootstrap(&mut self, batch: &EventBatch) -> ApplyOutcome {
        match batch.first_snapshot() {
            Some(snapshot) => {
                self.replace(snapshot);
                ApplyOutcome {
                    deltas_applied: 0,
                    snapshot_applied: true,
                }
            }
            None => ApplyOutcome::default(),
        }
    }

    /// Applies the result of an incremental fetch, oldest event first.
    ///
    /// A snapshot replaces the tree and ends processing of the batch. Each
    /// delta is merged and advances the cursor. Deltas arriving before any
    /// snapshot has been held are dropped.
    pub fn apply_incremental(&mut self, batch: &EventBatch) -> ApplyOutcome {
        let mut outcome = ApplyOutcome::default();

        for event in batch.oldest_first() {
            match event.kind {
                EventKind::FullSnapshot => {
                    self.replace(event);
                    outcome.snapshot_applied = true;
                    break;
                }
                EventKind::DeltaPatch => {
                    let Some(tree) = self.tree.as_mut() else {
                        continue;
                    };
                    merge(tree, &event.payload);
                    self.cursor = Some(event.id.clone());
                    outcome.deltas_applied += 1;
                }
            }
        }

        outcome
    }

    fn replace(&mut self, snapshot: &Event) {
        self.tree = Some(snapshot.payload.clone());
        self.cursor = Some(snapshot.id.clone());
    }
}
