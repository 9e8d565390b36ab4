//! Boundary to the remote device API.

use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use mirror_protocol::{Cursor, DeviceId, EventsResponse, FetchMode, RawEvent};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};

/// The remote device cloud.
///
/// This trait abstracts the wire transport and authentication exchange,
/// allowing for different implementations (HTTP, scripted for testing, etc.).
/// Implementations report rejected credentials as
/// [`SyncError::AuthenticationFailed`] and network failures or timeouts as
/// [`SyncError::Transport`] / [`SyncError::Timeout`].
#[async_trait]
pub trait RemoteDeviceApi: Send + Sync + 'static {
    /// Fetches events for a device, newest first.
    ///
    /// With [`FetchMode::Bootstrap`] the cursor is ignored and the most recent
    /// events are returned. With [`FetchMode::Incremental`] only events
    /// strictly newer than `cursor` are returned.
    async fn fetch_events(
        &self,
        device_id: &DeviceId,
        mode: FetchMode,
        cursor: Option<&Cursor>,
    ) -> SyncResult<EventsResponse>;

    /// Refreshes the access credentials.
    async fn refresh_credentials(&self) -> SyncResult<()>;

    /// Lists the devices available to these credentials.
    async fn list_devices(&self) -> SyncResult<Vec<DeviceId>>;
}

/// A recorded call to [`RemoteDeviceApi::fetch_events`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchCall {
    /// Device polled.
    pub device_id: DeviceId,
    /// Requested mode.
    pub mode: FetchMode,
    /// Cursor passed in.
    pub cursor: Option<Cursor>,
}

/// An in-memory API that replays scripted responses.
///
/// Each device has a queue of fetch results consumed one per call. An empty
/// queue answers with no events.
#[derive(Debug, Default)]
pub struct ScriptedDeviceApi {
    devices: Mutex<Vec<DeviceId>>,
    responses: Mutex<HashMap<DeviceId, VecDeque<SyncResult<EventsResponse>>>>,
    refresh_result: Mutex<Option<SyncError>>,
    calls: Mutex<Vec<FetchCall>>,
    refresh_count: AtomicUsize,
}

impl ScriptedDeviceApi {
    /// Creates an API with no devices and no scripted responses.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an API reporting the given devices from `list_devices`.
    pub fn with_devices(devices: impl IntoIterator<Item = DeviceId>) -> Self {
        let api = Self::new();
        *api.devices.lock() = devices.into_iter().collect();
        api
    }

    /// Queues a fetch result for a device.
    pub fn push_response(&self, device_id: &DeviceId, response: SyncResult<EventsResponse>) {
        self.responses
            .lock()
            .entry(device_id.clone())
            .or_default()
            .push_back(response);
    }

    /// Queues a successful fetch returning `events` (newest first).
    pub fn push_events(&self, device_id: &DeviceId, events: Vec<RawEvent>) {
        self.push_response(device_id, Ok(EventsResponse::new(events)));
    }

    /// Queues a failed fetch.
    pub fn push_error(&self, device_id: &DeviceId, error: SyncError) {
        self.push_response(device_id, Err(error));
    }

    /// Makes `refresh_credentials` fail with `error`.
    pub fn fail_refresh(&self, error: SyncError) {
        *self.refresh_result.lock() = Some(error);
    }

    /// Returns the fetch calls made for a device, oldest first.
    pub fn calls(&self, device_id: &DeviceId) -> Vec<FetchCall> {
        self.calls
            .lock()
            .iter()
            .filter(|c| &c.device_id == device_id)
            .cloned()
            .collect()
    }

    /// Number of credential refreshes performed.
    pub fn refresh_count(&self) -> usize {
        self.refresh_count.load(Ordering::SeqCst)
    }

    /// Number of scripted responses not yet consumed for a device.
    pub fn pending(&self, device_id: &DeviceId) -> usize {
        self.responses
            .lock()
            .get(device_id)
            .map_or(0, VecDeque::len)
    }
}

#[async_trait]
impl RemoteDeviceApi for ScriptedDeviceApi {
    async fn fetch_events(
        &self,
        device_id: &DeviceId,
        mode: FetchMode,
        cursor: Option<&Cursor>,
    ) -> SyncResult<EventsResponse> {
        self.calls.lock().push(FetchCall {
            device_id: device_id.clone(),
            mode,
            cursor: cursor.cloned(),
        });

        self.responses
            .lock()
            .get_mut(device_id)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| Ok(EventsResponse::default()))
    }

    async fn refresh_credentials(&self) -> SyncResult<()> {
        self.refresh_count.fetch_add(1, Ordering::SeqCst);
        match self.refresh_result.lock().clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn list_devices(&self) -> SyncResult<Vec<DeviceId>> {
        Ok(self.devices.lock().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mirror_protocol::EventKind;
    use serde_json::json;

    #[tokio::test]
    async fn scripted_responses_are_consumed_in_order() {
        let device = DeviceId::new("A1");
        let api = ScriptedDeviceApi::new();
        api.push_events(
            &device,
            vec![RawEvent::new(1, EventKind::FullSnapshot, json!({"A": 1}))],
        );
        api.push_error(&device, SyncError::Timeout);
        assert_eq!(api.pending(&device), 2);

        let first = api
            .fetch_events(&device, FetchMode::Bootstrap, None)
            .await
            .unwrap();
        assert_eq!(first.events.len(), 1);

        let second = api
            .fetch_events(&device, FetchMode::Incremental, Some(&Cursor::new("1")))
            .await;
        assert!(matches!(second, Err(SyncError::Timeout)));

        let third = api
            .fetch_events(&device, FetchMode::Incremental, Some(&Cursor::new("1")))
            .await
            .unwrap();
        assert!(third.events.is_empty());

        let calls = api.calls(&device);
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[0].mode, FetchMode::Bootstrap);
        assert_eq!(calls[1].cursor, Some(Cursor::new("1")));
    }

    #[tokio::test]
    async fn refresh_failure_is_reported() {
        let api = ScriptedDeviceApi::new();
        assert!(api.refresh_credentials().await.is_ok());

        api.fail_refresh(SyncError::AuthenticationFailed("revoked".into()));
        assert!(api.refresh_credentials().await.unwrap_err().is_auth());
        assert_eq!(api.refresh_count(), 2);
    }

    #[tokio::test]
    async fn lists_configured_devices() {
        let api = ScriptedDeviceApi::with_devices([DeviceId::new("A1"), DeviceId::new("B2")]);
        assert_eq!(api.list_devices().await.unwrap().len(), 2);
    }
}
