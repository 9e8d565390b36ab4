//! Events reported by the remote device API.

use crate::error::{ProtocolError, ProtocolResult};
use crate::value::{Map, Value};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Identifier of a remote device (the unit's serial number).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    /// Creates a device identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for DeviceId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// An opaque event identifier marking a position in a device's event stream.
///
/// Identifiers are assigned monotonically by the remote source. Ordering is
/// numeric when both sides are decimal integers; non-numeric identifiers
/// sort after numeric ones and compare as text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cursor(String);

impl Cursor {
    /// Creates a cursor.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the raw identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn sort_key(&self) -> (bool, u64, &str) {
        match self.0.parse::<u64>() {
            Ok(n) => (false, n, &self.0),
            Err(_) => (true, 0, &self.0),
        }
    }

    fn from_json(id: &serde_json::Value) -> ProtocolResult<Self> {
        match id {
            serde_json::Value::String(s) => Ok(Self(s.clone())),
            serde_json::Value::Number(n) => Ok(Self(n.to_string())),
            other => Err(ProtocolError::InvalidId(other.to_string())),
        }
    }
}

impl Ord for Cursor {
    fn cmp(&self, other: &Self) -> Ordering {
        self.sort_key().cmp(&other.sort_key())
    }
}

impl PartialOrd for Cursor {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<u64> for Cursor {
    fn from(id: u64) -> Self {
        Self(id.to_string())
    }
}

impl From<&str> for Cursor {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Kind of event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// The payload is the complete state tree.
    FullSnapshot,
    /// The payload is a partial tree to fold into existing state.
    DeltaPatch,
}

impl EventKind {
    /// Wire name of a full snapshot event.
    pub const FULL_STATUS_BROADCAST: &'static str = "full-status-broadcast";
    /// Wire name of a delta event.
    pub const STATUS_CHANGE_BROADCAST: &'static str = "status-change-broadcast";

    /// Parses a wire type name.
    pub fn from_wire(name: &str) -> Option<Self> {
        match name {
            Self::FULL_STATUS_BROADCAST => Some(EventKind::FullSnapshot),
            Self::STATUS_CHANGE_BROADCAST => Some(EventKind::DeltaPatch),
            _ => None,
        }
    }

    /// Returns the wire type name.
    pub fn as_wire(&self) -> &'static str {
        match self {
            EventKind::FullSnapshot => Self::FULL_STATUS_BROADCAST,
            EventKind::DeltaPatch => Self::STATUS_CHANGE_BROADCAST,
        }
    }
}

/// A decoded event.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    /// Event identifier.
    pub id: Cursor,
    /// Kind of event.
    pub kind: EventKind,
    /// Event payload.
    pub payload: Map,
}

impl Event {
    /// Creates a full snapshot event.
    pub fn snapshot(id: impl Into<Cursor>, payload: Map) -> Self {
        Self {
            id: id.into(),
            kind: EventKind::FullSnapshot,
            payload,
        }
    }

    /// Creates a delta event.
    pub fn delta(id: impl Into<Cursor>, payload: Map) -> Self {
        Self {
            id: id.into(),
            kind: EventKind::DeltaPatch,
            payload,
        }
    }

    /// Returns true if this event replaces the whole tree.
    pub fn is_snapshot(&self) -> bool {
        self.kind == EventKind::FullSnapshot
    }
}

impl TryFrom<RawEvent> for Event {
    type Error = ProtocolError;

    fn try_from(raw: RawEvent) -> ProtocolResult<Self> {
        let id = raw
            .id
            .as_ref()
            .ok_or(ProtocolError::MissingId)
            .and_then(Cursor::from_json)?;

        let event_type = raw.event_type.ok_or_else(|| ProtocolError::MissingType {
            id: id.to_string(),
        })?;

        let kind = EventKind::from_wire(&event_type).ok_or_else(|| ProtocolError::UnknownType {
            id: id.to_string(),
            event_type,
        })?;

        let payload = match raw.data.map(Value::from) {
            Some(Value::Map(m)) => m,
            _ => {
                return Err(ProtocolError::InvalidPayload { id: id.to_string() });
            }
        };

        Ok(Self { id, kind, payload })
    }
}

/// How events are requested from the remote API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMode {
    /// Most recent events, ignoring any cursor. Used until a snapshot is held.
    Bootstrap,
    /// Events strictly newer than a cursor.
    Incremental,
}

impl FetchMode {
    /// Returns the wire name of this mode.
    pub fn as_wire(&self) -> &'static str {
        match self {
            FetchMode::Bootstrap => "latest",
            FetchMode::Incremental => "newer",
        }
    }
}

/// An event as reported on the wire, before validation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawEvent {
    /// Event identifier (string or integer).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<serde_json::Value>,
    /// Wire type name.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub event_type: Option<String>,
    /// Payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl RawEvent {
    /// Creates a well-formed raw event.
    pub fn new(id: impl Into<serde_json::Value>, kind: EventKind, data: serde_json::Value) -> Self {
        Self {
            id: Some(id.into()),
            event_type: Some(kind.as_wire().to_string()),
            data: Some(data),
        }
    }
}

/// Body of a fetch-events response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventsResponse {
    /// Events, newest first.
    #[serde(default)]
    pub events: Vec<RawEvent>,
}

impl EventsResponse {
    /// Creates a response from raw events.
    pub fn new(events: Vec<RawEvent>) -> Self {
        Self { events }
    }

    /// Parses a response body.
    pub fn from_json_str(body: &str) -> ProtocolResult<Self> {
        Ok(serde_json::from_str(body)?)
    }
}

/// An ordered batch of decoded events, newest first as delivered.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventBatch {
    events: Vec<Event>,
    anomalies: Vec<ProtocolError>,
}

impl EventBatch {
    /// Creates a batch from events ordered newest first.
    pub fn new(events: Vec<Event>) -> Self {
        Self {
            events,
            anomalies: Vec::new(),
        }
    }

    /// Decodes a response, setting aside malformed events.
    ///
    /// The relative order of well-formed events is preserved.
    pub fn decode(response: EventsResponse) -> Self {
        let mut events = Vec::with_capacity(response.events.len());
        let mut anomalies = Vec::new();

        for raw in response.events {
            match Event::try_from(raw) {
                Ok(event) => events.push(event),
                Err(e) => anomalies.push(e),
            }
        }

        Self { events, anomalies }
    }

    /// Returns true if the batch holds no usable events.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Number of usable events.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Events in application order (oldest first).
    pub fn oldest_first(&self) -> impl Iterator<Item = &Event> {
        self.events.iter().rev()
    }

    /// The first snapshot in delivery order, i.e. the newest one.
    pub fn first_snapshot(&self) -> Option<&Event> {
        self.events.iter().find(|e| e.is_snapshot())
    }

    /// Malformed events that were skipped while decoding.
    pub fn anomalies(&self) -> &[ProtocolError] {
        &self.anomalies
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn cursor_ordering_is_numeric() {
        assert!(Cursor::new("10") > Cursor::new("9"));
        assert!(Cursor::new("2") < Cursor::new("10"));
        assert!(Cursor::new("abc") > Cursor::new("99999"));
        assert_eq!(Cursor::new("7").cmp(&Cursor::new("7")), Ordering::Equal);
        // Distinct text with equal numeric value still orders consistently.
        assert_ne!(Cursor::new("07").cmp(&Cursor::new("7")), Ordering::Equal);
    }

    #[test]
    fn event_kind_wire_names() {
        assert_eq!(
            EventKind::from_wire("full-status-broadcast"),
            Some(EventKind::FullSnapshot)
        );
        assert_eq!(
            EventKind::from_wire("status-change-broadcast"),
            Some(EventKind::DeltaPatch)
        );
        assert_eq!(EventKind::from_wire("other"), None);
        assert_eq!(FetchMode::Bootstrap.as_wire(), "latest");
        assert_eq!(FetchMode::Incremental.as_wire(), "newer");
    }

    #[test]
    fn decode_response_body() {
        let body = r#"{"events": [
            {"id": 2, "type": "status-change-broadcast", "data": {"B": {"C": 5}}},
            {"id": "1", "type": "full-status-broadcast", "data": {"A": 1}}
        ]}"#;

        let batch = EventBatch::decode(EventsResponse::from_json_str(body).unwrap());
        assert_eq!(batch.len(), 2);
        assert!(batch.anomalies().is_empty());

        let ids: Vec<_> = batch.oldest_first().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2"]);
        assert_eq!(batch.first_snapshot().unwrap().id, Cursor::new("1"));
    }

    #[test]
    fn decode_sets_aside_malformed_events() {
        let response = EventsResponse::new(vec![
            RawEvent::new(4, EventKind::DeltaPatch, json!({"X": 1})),
            RawEvent {
                id: None,
                event_type: Some(EventKind::DeltaPatch.as_wire().into()),
                data: Some(json!({})),
            },
            RawEvent {
                id: Some(json!(3)),
                event_type: None,
                data: Some(json!({})),
            },
            RawEvent {
                id: Some(json!(2)),
                event_type: Some("heartbeat".into()),
                data: Some(json!({})),
            },
            RawEvent::new(1, EventKind::FullSnapshot, json!([1, 2])),
        ]);

        let batch = EventBatch::decode(response);
        assert_eq!(batch.len(), 1);
        assert_eq!(
            batch.anomalies(),
            &[
                ProtocolError::MissingId,
                ProtocolError::MissingType { id: "3".into() },
                ProtocolError::UnknownType {
                    id: "2".into(),
                    event_type: "heartbeat".into()
                },
                ProtocolError::InvalidPayload { id: "1".into() },
            ]
        );
    }

    #[test]
    fn invalid_id_form() {
        let raw = RawEvent {
            id: Some(json!({"nested": true})),
            event_type: Some(EventKind::DeltaPatch.as_wire().into()),
            data: Some(json!({})),
        };
        assert!(matches!(
            Event::try_from(raw),
            Err(ProtocolError::InvalidId(_))
        ));
    }

    #[test]
    fn empty_events_field_defaults() {
        let response = EventsResponse::from_json_str("{}").unwrap();
        assert!(EventBatch::decode(response).is_empty());
    }
}
