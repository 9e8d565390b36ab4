//! # Mirror Engine
//!
//! Polling synchronization engine that keeps a local mirror of remote
//! device state.
//!
//! This crate provides:
//! - Device phase machine (uninitialized → bootstrapping → synchronized ⇄ degraded)
//! - Snapshot bootstrap and incremental delta application
//! - Cursor tracking per device
//! - Repair signalling after sustained authentication failures
//! - Staleness tracking over last successful updates
//! - Remote API abstraction with a scripted implementation for tests
//!
//! ## Architecture
//!
//! Each device is polled on a fixed interval by its own task:
//! 1. Fetch a batch of events (bootstrap or incremental)
//! 2. Apply it to the cached tree, oldest event first
//! 3. Publish the new tree to readers and subscribers
//!
//! Failed polls leave the cached tree untouched.
//!
//! ## Key Invariants
//!
//! - At most one poll cycle per device at a time
//! - A device's cursor is always the id of the last applied event
//! - Readers never observe a partially applied batch
//! - A repair signal is raised once per run of auth failures

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod api;
mod config;
mod coordinator;
mod error;
mod fetcher;
mod repair;
mod staleness;
mod state;

pub use api::{FetchCall, RemoteDeviceApi, ScriptedDeviceApi};
pub use config::{
    SyncConfig, DEFAULT_AUTH_FAILURE_THRESHOLD, DEFAULT_FETCH_TIMEOUT, DEFAULT_POLL_INTERVAL,
    DEFAULT_STALE_TIMEOUT,
};
pub use coordinator::{
    CoordinatorBuilder, DeviceStatus, PollOutcome, StateUpdate, SyncCoordinator, SyncStats,
};
pub use error::{SyncError, SyncResult};
pub use fetcher::EventFetcher;
pub use repair::{AuthFailureCounter, NoopRepairHook, RepairHook, RepairLog, RepairSignal};
pub use staleness::{Clock, LivenessRecords, ManualClock, StalenessTracker, SystemClock};
pub use state::{ApplyOutcome, DegradedReason, DevicePhase, SyncState};
