//! Replay command implementation.
//!
//! A script lists, per device, the results the remote API returns on
//! successive polls:
//!
//! ```json
//! {
//!   "auth_failure_threshold": 3,
//!   "devices": {
//!     "A1": [
//!       {"events": [{"id": 1, "type": "full-status-broadcast", "data": {"A": 1}}]},
//!       {"error": "auth", "message": "token expired"},
//!       {"error": "timeout"}
//!     ]
//!   }
//! }
//! ```

use mirror_engine::{
    RepairLog, RepairSignal, ScriptedDeviceApi, SyncConfig, SyncCoordinator, SyncError,
};
use mirror_protocol::{DeviceId, EventsResponse, RawEvent, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// A replay script.
#[derive(Debug, Deserialize)]
pub struct Script {
    /// Overrides the auth failure threshold.
    #[serde(default)]
    pub auth_failure_threshold: Option<u32>,
    /// Poll results per device, in poll order.
    pub devices: BTreeMap<String, Vec<Step>>,
}

/// The result of one scripted poll.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum Step {
    /// The API returns these events, newest first.
    Events {
        /// Raw events.
        events: Vec<RawEvent>,
    },
    /// The API fails.
    Failure {
        /// Failure kind.
        error: FailureKind,
        /// Error message.
        #[serde(default)]
        message: Option<String>,
    },
}

/// Failure kinds a script can inject.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    /// Rejected credentials.
    Auth,
    /// Network failure.
    Transient,
    /// Fetch timeout.
    Timeout,
}

impl Step {
    fn into_response(self) -> Result<EventsResponse, SyncError> {
        match self {
            Step::Events { events } => Ok(EventsResponse::new(events)),
            Step::Failure { error, message } => {
                let message = message.unwrap_or_else(|| "scripted failure".to_string());
                Err(match error {
                    FailureKind::Auth => SyncError::AuthenticationFailed(message),
                    FailureKind::Transient => SyncError::transport_retryable(message),
                    FailureKind::Timeout => SyncError::Timeout,
                })
            }
        }
    }
}

/// Final state of one replayed device.
#[derive(Debug, Serialize)]
pub struct DeviceReport {
    /// Device id.
    pub device_id: String,
    /// Final phase.
    pub phase: String,
    /// Last applied event id.
    pub cursor: Option<String>,
    /// Whether the device counts as stale.
    pub stale: bool,
    /// Polls that ran.
    pub polls: u64,
    /// Events applied.
    pub events_applied: u64,
    /// Malformed events skipped.
    pub anomalies_skipped: u64,
    /// Repair signals emitted, in order.
    pub repair_signals: Vec<String>,
    /// Final cached tree.
    pub state: Option<Value>,
}

/// Parses a script.
pub fn parse_script(text: &str) -> Result<Script, serde_json::Error> {
    serde_json::from_str(text)
}

/// Runs the replay command.
pub fn run(script_path: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let text = std::fs::read_to_string(script_path)
        .map_err(|e| format!("Cannot read {}: {e}", script_path.display()))?;
    let script = parse_script(&text)?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let reports = runtime.block_on(replay(script))?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&reports)?);
        }
        _ => {
            print_text_output(&reports);
        }
    }

    Ok(())
}

/// Feeds `script` through a coordinator, one refresh per scripted step.
pub async fn replay(script: Script) -> Result<Vec<DeviceReport>, SyncError> {
    let api = Arc::new(ScriptedDeviceApi::new());
    let mut polls = Vec::with_capacity(script.devices.len());

    for (id, steps) in script.devices {
        let device_id = DeviceId::new(id);
        polls.push((device_id.clone(), steps.len()));
        for step in steps {
            api.push_response(&device_id, step.into_response());
        }
    }

    let mut config = SyncConfig::new();
    if let Some(threshold) = script.auth_failure_threshold {
        config = config.with_auth_failure_threshold(threshold);
    }

    let log = Arc::new(RepairLog::new());
    let coordinator = SyncCoordinator::builder(api)
        .with_config(config)
        .with_devices(polls.iter().map(|(id, _)| id.clone()))
        .with_repair_hook(log.clone())
        .setup()
        .await?;

    let mut reports = Vec::with_capacity(polls.len());
    for (device_id, count) in polls {
        for _ in 0..count {
            let outcome = coordinator.refresh(&device_id).await?;
            debug!(device = %device_id, ?outcome, "replayed poll");
        }

        let status = coordinator.status(&device_id)?;
        let repair_signals = log
            .signals()
            .into_iter()
            .filter(|s| s.device_id() == &device_id)
            .map(|s| match s {
                RepairSignal::Raised {
                    consecutive_failures,
                    ..
                } => format!("raised after {consecutive_failures} failures"),
                RepairSignal::Cleared { .. } => "cleared".to_string(),
            })
            .collect();

        reports.push(DeviceReport {
            phase: format!("{:?}", status.phase),
            cursor: status.cursor.map(|c| c.as_str().to_string()),
            stale: coordinator.is_stale(&device_id),
            polls: status.stats.polls,
            events_applied: status.stats.events_applied,
            anomalies_skipped: status.stats.anomalies_skipped,
            repair_signals,
            state: coordinator
                .get_state(&device_id)
                .map(|tree| Value::Map((*tree).clone())),
            device_id: device_id.to_string(),
        });
    }

    coordinator.shutdown().await;
    Ok(reports)
}

fn print_text_output(reports: &[DeviceReport]) {
    for report in reports {
        println!("Device {}", report.device_id);
        println!("  Phase:            {}", report.phase);
        println!(
            "  Cursor:           {}",
            report.cursor.as_deref().unwrap_or("-")
        );
        println!("  Stale:            {}", report.stale);
        println!("  Polls:            {}", report.polls);
        println!("  Events applied:   {}", report.events_applied);
        println!("  Anomalies:        {}", report.anomalies_skipped);
        for signal in &report.repair_signals {
            println!("  Repair signal:    {signal}");
        }
        match &report.state {
            Some(Value::Map(tree)) => {
                println!("  State:");
                for line in super::merge::flatten(tree) {
                    println!("    {line}");
                }
            }
            _ => println!("  State:            (not bootstrapped)"),
        }
    }
}
