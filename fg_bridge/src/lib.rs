//! ABOUTME: Bridges Frigate detection events to Gemini video summaries over MQTT
//! ABOUTME: Filter, camera registry, pipeline coordinator, publishers and bus loop

pub mod filter;
pub mod handler;
pub mod mqtt;
pub mod publish;
pub mod registry;
pub mod state;
pub mod switch;

pub use filter::{evaluate, filter, DetectionEvent, Rejection, END_EVENT};
pub use handler::{EventHandler, PipelineSettings};
pub use mqtt::{MessageRouter, Routed};
pub use publish::{MemoryPublisher, MqttPublisher, Published, StatePublisher, Topics};
pub use registry::CameraRegistry;
pub use state::{
    AnalysisCompleteEvent, AnalysisResult, SensorAttributes, SensorState, ANALYSIS_COMPLETE_EVENT,
    NO_DETECTION,
};
pub use switch::{parse_switch_command, SwitchCommand};
