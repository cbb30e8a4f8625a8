//! ABOUTME: Shared testing utilities and helper functions
//! ABOUTME: Frigate payload fixtures shared by all crates

use serde_json::{json, Value};

/// Camera used across the fixture payloads
pub const FRONT_DOOR: &str = "front_door";

/// Detection end time used by the fixtures (2023-11-14T22:13:20Z)
pub const END_TIME: f64 = 1_700_000_000.0;

/// Canned summary returned by mocked analysis backends
pub const SUMMARY: &str = "A person walks up the driveway.";

/// Frigate event message of the given type for `camera`
pub fn frigate_event(event_type: &str, camera: &str, event_id: &str, label: &str) -> Value {
    json!({
        "type": event_type,
        "before": {
            "camera": camera,
            "id": event_id,
            "label": label,
            "top_score": 0.5,
        },
        "after": {
            "camera": camera,
            "id": event_id,
            "label": label,
            "top_score": 0.87,
            "end_time": END_TIME,
        }
    })
}

/// Serialized "end" event for `camera`, ready to feed into the event filter
pub fn end_event_payload(camera: &str, event_id: &str, label: &str) -> Vec<u8> {
    frigate_event("end", camera, event_id, label)
        .to_string()
        .into_bytes()
}

/// Frigate `/api/config` body listing the given camera ids
pub fn frigate_config(cameras: &[&str]) -> Value {
    let cameras: serde_json::Map<String, Value> = cameras
        .iter()
        .map(|id| (id.to_string(), json!({ "name": id, "enabled": true })))
        .collect();
    json!({ "mqtt": { "host": "mqtt" }, "cameras": cameras })
}
