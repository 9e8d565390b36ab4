//! Snapshot and delta retrieval.

use crate::api::RemoteDeviceApi;
use crate::error::{SyncError, SyncResult};
use mirror_protocol::{Cursor, DeviceId, EventBatch, FetchMode};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Retrieves event batches from the remote device API.
///
/// The fetcher does not retry; a failed fetch is reported to the caller,
/// which decides when to poll again.
pub struct EventFetcher<A: RemoteDeviceApi> {
    api: Arc<A>,
    timeout: Option<Duration>,
}

impl<A: RemoteDeviceApi> EventFetcher<A> {
    /// Creates a fetcher over `api`. Calls exceeding `timeout` fail with
    /// [`SyncError::Timeout`].
    pub fn new(api: Arc<A>, timeout: Option<Duration>) -> Self {
        Self { api, timeout }
    }

    /// Fetches a batch of events for `device_id`, newest first.
    ///
    /// In bootstrap mode the cursor is not sent. Malformed events are logged
    /// and left out of the batch. No new events yield an empty batch.
    pub async fn fetch(
        &self,
        device_id: &DeviceId,
        mode: FetchMode,
        cursor: Option<&Cursor>,
    ) -> SyncResult<EventBatch> {
        let cursor = match mode {
            FetchMode::Bootstrap => None,
            FetchMode::Incremental => cursor,
        };

        let request = self.api.fetch_events(device_id, mode, cursor);
        let response = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, request)
                .await
                .map_err(|_| SyncError::Timeout)??,
            None => request.await?,
        };

        let batch = EventBatch::decode(response);
        for anomaly in batch.anomalies() {
            warn!(device = %device_id, error = %anomaly, "skipping malformed event");
        }

        if batch.is_empty() {
            debug!(device = %device_id, mode = mode.as_wire(), "no new events");
        } else {
            debug!(
                device = %device_id,
                mode = mode.as_wire(),
                events = batch.len(),
                "fetched events"
            );
        }

        Ok(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ScriptedDeviceApi;
    use async_trait::async_trait;
    use mirror_protocol::{EventKind, EventsResponse, RawEvent};
    use serde_json::json;

    #[tokio::test]
    async fn bootstrap_drops_cursor() {
        let device = DeviceId::new("A1");
        let api = Arc::new(ScriptedDeviceApi::new());
        let fetcher = EventFetcher::new(Arc::clone(&api), None);

        fetcher
            .fetch(&device, FetchMode::Bootstrap, Some(&Cursor::new("9")))
            .await
            .unwrap();
        fetcher
            .fetch(&device, FetchMode::Incremental, Some(&Cursor::new("9")))
            .await
            .unwrap();

        let calls = api.calls(&device);
        assert_eq!(calls[0].cursor, None);
        assert_eq!(calls[1].cursor, Some(Cursor::new("9")));
    }

    #[tokio::test]
    async fn malformed_events_are_skipped() {
        let device = DeviceId::new("A1");
        let api = Arc::new(ScriptedDeviceApi::new());
        api.push_events(
            &device,
            vec![
                RawEvent::new(3, EventKind::DeltaPatch, json!({"A": 2})),
                RawEvent {
                    id: Some(json!(2)),
                    ..RawEvent::default()
                },
                RawEvent::new(1, EventKind::DeltaPatch, json!({"A": 1})),
            ],
        );

        let fetcher = EventFetcher::new(api, None);
        let batch = fetcher
            .fetch(&device, FetchMode::Incremental, Some(&Cursor::new("0")))
            .await
            .unwrap();

        assert_eq!(batch.len(), 2);
        assert_eq!(batch.anomalies().len(), 1);
    }

    #[tokio::test]
    async fn errors_propagate_distinctly() {
        let device = DeviceId::new("A1");
        let api = Arc::new(ScriptedDeviceApi::new());
        api.push_error(&device, SyncError::AuthenticationFailed("expired".into()));
        api.push_error(&device, SyncError::transport_retryable("reset"));

        let fetcher = EventFetcher::new(api, None);
        let first = fetcher.fetch(&device, FetchMode::Bootstrap, None).await;
        let second = fetcher.fetch(&device, FetchMode::Bootstrap, None).await;

        assert!(first.unwrap_err().is_auth());
        assert!(second.unwrap_err().is_retryable());
    }

    struct StalledApi;

    #[async_trait]
    impl RemoteDeviceApi for StalledApi {
        async fn fetch_events(
            &self,
            _device_id: &DeviceId,
            _mode: FetchMode,
            _cursor: Option<&Cursor>,
        ) -> SyncResult<EventsResponse> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(EventsResponse::default())
        }

        async fn refresh_credentials(&self) -> SyncResult<()> {
            Ok(())
        }

        async fn list_devices(&self) -> SyncResult<Vec<DeviceId>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn timeout_surfaces_as_transient() {
        let fetcher = EventFetcher::new(Arc::new(StalledApi), Some(Duration::from_millis(20)));
        let result = fetcher
            .fetch(&DeviceId::new("A1"), FetchMode::Bootstrap, None)
            .await;

        assert!(matches!(result, Err(SyncError::Timeout)));
    }
}
