//! ABOUTME: Turns raw Frigate event messages into detection events worth analyzing
//! ABOUTME: Drops in-progress events, unmanaged or disabled cameras and incomplete payloads

use serde::Deserialize;
use std::fmt;
use tracing::debug;

use crate::CameraRegistry;

/// Event type Frigate sends once a tracked object is gone
pub const END_EVENT: &str = "end";

/// A finished detection on a managed, enabled camera
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionEvent {
    pub camera: String,
    pub event_id: String,
    pub label: String,
    /// Top score in `[0, 1]`; 0 when Frigate omits it
    pub confidence: f64,
    /// Unix seconds; 0 when Frigate omits it
    pub end_time: f64,
}

#[derive(Debug, Deserialize)]
struct FrigateMessage {
    #[serde(rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    after: EventSnapshot,
}

#[derive(Debug, Default, Deserialize)]
struct EventSnapshot {
    camera: Option<String>,
    id: Option<String>,
    label: Option<String>,
    top_score: Option<f64>,
    end_time: Option<f64>,
}

/// Why a message was dropped; only ever logged
#[derive(Debug, Clone, PartialEq)]
pub enum Rejection {
    Malformed(String),
    NotFinished(Option<String>),
    UnmanagedCamera(Option<String>),
    Disabled(String),
    MissingFields,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::Malformed(err) => write!(f, "payload is not a valid event: {}", err),
            Rejection::NotFinished(kind) => {
                write!(f, "event type {:?} is not \"{}\"", kind.as_deref().unwrap_or(""), END_EVENT)
            }
            Rejection::UnmanagedCamera(camera) => {
                write!(f, "camera {:?} is not managed", camera.as_deref().unwrap_or(""))
            }
            Rejection::Disabled(camera) => write!(f, "analysis is disabled for camera {}", camera),
            Rejection::MissingFields => write!(f, "event id or label is missing"),
        }
    }
}

/// Decide whether a message warrants analysis
pub fn evaluate(payload: &[u8], registry: &CameraRegistry) -> Result<DetectionEvent, Rejection> {
    let message: FrigateMessage =
        serde_json::from_slice(payload).map_err(|e| Rejection::Malformed(e.to_string()))?;

    if message.kind.as_deref() != Some(END_EVENT) {
        return Err(Rejection::NotFinished(message.kind));
    }

    let after = message.after;
    let camera = match after.camera {
        Some(camera) if registry.is_managed(&camera) => camera,
        other => return Err(Rejection::UnmanagedCamera(other)),
    };

    if !registry.is_enabled(&camera) {
        return Err(Rejection::Disabled(camera));
    }

    let (event_id, label) = match (after.id, after.label) {
        (Some(id), Some(label)) if !id.is_empty() && !label.is_empty() => (id, label),
        _ => return Err(Rejection::MissingFields),
    };

    Ok(DetectionEvent {
        camera,
        event_id,
        label,
        confidence: after.top_score.unwrap_or(0.0),
        end_time: after.end_time.unwrap_or(0.0),
    })
}

/// Event filter: `None` means the message is ignored
pub fn filter(payload: &[u8], registry: &CameraRegistry) -> Option<DetectionEvent> {
    match evaluate(payload, registry) {
        Ok(event) => {
            debug!(
                camera = %event.camera,
                event_id = %event.event_id,
                label = %event.label,
                confidence = event.confidence,
                "Accepted detection event"
            );
            Some(event)
        }
        Err(reason) => {
            debug!(reason = %reason, "Ignoring event message");
            None
        }
    }
}
