//! Test fixtures for state trees and device events.
//!
//! The sample payloads follow the shape an air conditioning controller
//! reports: a handful of top-level sections plus a zone vector.

use mirror_protocol::{DeviceId, EventKind, EventsResponse, Map, RawEvent, Value};
use serde_json::json;

/// Converts a JSON object into a state tree.
///
/// # Panics
///
/// Panics if `json` is not an object.
pub fn tree(json: serde_json::Value) -> Map {
    match Value::from(json) {
        Value::Map(map) => map,
        other => panic!("expected a JSON object, got {other:?}"),
    }
}

/// Shorthand for a device id.
pub fn device(id: &str) -> DeviceId {
    DeviceId::new(id)
}

/// A full-snapshot wire event.
pub fn snapshot_event(id: u64, data: serde_json::Value) -> RawEvent {
    RawEvent::new(id, EventKind::FullSnapshot, data)
}

/// A delta wire event.
pub fn delta_event(id: u64, data: serde_json::Value) -> RawEvent {
    RawEvent::new(id, EventKind::DeltaPatch, data)
}

/// A wire event with an id but no type.
pub fn untyped_event(id: u64) -> RawEvent {
    RawEvent {
        id: Some(json!(id)),
        ..RawEvent::default()
    }
}

/// A response carrying `events`, newest first.
pub fn response(events: Vec<RawEvent>) -> EventsResponse {
    EventsResponse::new(events)
}

/// A complete controller status as delivered in a snapshot.
pub fn sample_status() -> serde_json::Value {
    json!({
        "@metadata": {"connectionId": "c-1"},
        "LiveAircon": {"CompressorMode": "COOL", "Filter": {"NeedsAttention": false}},
        "MasterInfo": {"LiveTemp_oC": 24.5, "LiveOutdoorTemp_oC": 31.0, "LiveHumidity_pc": 48},
        "RemoteZoneInfo": [
            {"NV_Title": "Living", "LiveTemp_oC": 24.0},
            {"NV_Title": "Bedroom", "LiveTemp_oC": 22.5}
        ],
        "UserAirconSettings": {
            "isOn": true,
            "Mode": "COOL",
            "FanMode": "AUTO",
            "TemperatureSetpoint_Cool_oC": 23.0,
            "EnabledZones": [true, true]
        }
    })
}

/// A delta touching nested settings, the zone vector and metadata.
pub fn sample_patch() -> serde_json::Value {
    json!({
        "@metadata": {"connectionId": "c-2"},
        "MasterInfo": {"LiveTemp_oC": 23.5},
        "RemoteZoneInfo[1]": {"NV_Title": "Bedroom", "LiveTemp_oC": 21.0},
        "UserAirconSettings": {"Mode": "HEAT"}
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use mirror_protocol::{merge, Event, EventBatch};

    #[test]
    fn fixture_events_decode() {
        let batch = EventBatch::decode(response(vec![
            delta_event(3, sample_patch()),
            untyped_event(2),
            snapshot_event(1, sample_status()),
        ]));

        assert_eq!(batch.len(), 2);
        assert_eq!(batch.anomalies().len(), 1);
        assert!(batch.first_snapshot().is_some_and(Event::is_snapshot));
    }

    #[test]
    fn sample_patch_applies_to_sample_status() {
        let mut state = tree(sample_status());
        merge(&mut state, &tree(sample_patch()));

        let state = Value::Map(state);
        assert_eq!(
            state.pointer(&["MasterInfo", "LiveTemp_oC"]),
            Some(&Value::Float(23.5))
        );
        assert_eq!(
            state.pointer(&["RemoteZoneInfo", "1", "LiveTemp_oC"]),
            Some(&Value::Float(21.0))
        );
        assert_eq!(
            state.pointer(&["UserAirconSettings", "FanMode"]),
            Some(&Value::from("AUTO"))
        );
        assert_eq!(
            state.pointer(&["@metadata", "connectionId"]),
            Some(&Value::from("c-1"))
        );
    }
}
