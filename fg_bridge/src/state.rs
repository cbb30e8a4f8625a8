//! ABOUTME: Analysis results and the sensor state / domain event derived from them
//! ABOUTME: Formats the human readable value and the attribute set downstream automations read

use chrono::{DateTime, Local, Utc};
use fg_core::{format_clock, from_unix_seconds, now_iso8601, to_rfc3339};
use serde::{Deserialize, Serialize};

use crate::DetectionEvent;

/// Sensor value before any analysis has completed for a camera
pub const NO_DETECTION: &str = "No detection";

/// Name carried by every analysis-complete domain event
pub const ANALYSIS_COMPLETE_EVENT: &str = "frigate_gemini_analysis_complete";

/// Terminal output of one pipeline run
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisResult {
    pub summary_text: String,
    pub label: String,
    pub camera: String,
    pub event_id: String,
    pub confidence: f64,
    pub detection_time: DateTime<Utc>,
}

impl AnalysisResult {
    pub fn new(event: &DetectionEvent, summary_text: String) -> Self {
        Self {
            summary_text,
            label: event.label.clone(),
            camera: event.camera.clone(),
            event_id: event.event_id.clone(),
            confidence: event.confidence,
            detection_time: from_unix_seconds(event.end_time),
        }
    }

    /// Confidence as a percentage with one decimal, e.g. `87.0%`
    pub fn confidence_percent(&self) -> String {
        format!("{:.1}%", self.confidence * 100.0)
    }

    /// `person detected at 02:30:45 PM (87.0% confidence)` in local time
    pub fn state_value(&self) -> String {
        format!(
            "{} detected at {} ({} confidence)",
            self.label,
            format_clock(&self.local_detection_time()),
            self.confidence_percent()
        )
    }

    pub fn sensor_state(&self) -> SensorState {
        SensorState {
            camera: self.camera.clone(),
            value: self.state_value(),
            attributes: SensorAttributes {
                camera: self.camera.clone(),
                event_id: Some(self.event_id.clone()),
                label: Some(self.label.clone()),
                confidence: Some(self.confidence_percent()),
                confidence_raw: Some(self.confidence),
                full_analysis: Some(self.summary_text.clone()),
                last_updated: now_iso8601(),
                detection_time: Some(to_rfc3339(&self.local_detection_time())),
            },
        }
    }

    pub fn complete_event(&self) -> AnalysisCompleteEvent {
        AnalysisCompleteEvent {
            event: ANALYSIS_COMPLETE_EVENT.to_string(),
            camera: self.camera.clone(),
            event_id: self.event_id.clone(),
            label: self.label.clone(),
            confidence: self.confidence_percent(),
            confidence_raw: self.confidence,
            analysis: self.summary_text.clone(),
            detection_time: to_rfc3339(&self.local_detection_time()),
        }
    }

    fn local_detection_time(&self) -> DateTime<Local> {
        self.detection_time.with_timezone(&Local)
    }
}

/// Per-camera sensor value plus attributes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorState {
    #[serde(skip)]
    pub camera: String,
    #[serde(rename = "state")]
    pub value: String,
    pub attributes: SensorAttributes,
}

impl SensorState {
    /// State published for a camera at startup
    pub fn idle(camera: &str) -> Self {
        Self {
            camera: camera.to_string(),
            value: NO_DETECTION.to_string(),
            attributes: SensorAttributes {
                camera: camera.to_string(),
                last_updated: now_iso8601(),
                ..Default::default()
            },
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SensorAttributes {
    pub camera: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence_raw: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_analysis: Option<String>,
    pub last_updated: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detection_time: Option<String>,
}

/// Domain event fired for automations after each successful analysis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisCompleteEvent {
    pub event: String,
    pub camera: String,
    pub event_id: String,
    pub label: String,
    pub confidence: String,
    pub confidence_raw: f64,
    pub analysis: String,
    pub detection_time: String,
}
