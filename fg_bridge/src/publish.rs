//! ABOUTME: Publication of sensor states, switch states and analysis events
//! ABOUTME: MQTT implementation for production and an in-memory recorder for tests

use async_trait::async_trait;
use fg_core::{Error, Result};
use metrics::counter;
use rumqttc::{AsyncClient, QoS};
use serde::Serialize;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

use crate::{AnalysisCompleteEvent, SensorState};

pub const SWITCH_ON: &str = "ON";
pub const SWITCH_OFF: &str = "OFF";

/// Topic layout under the configured state prefix
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    prefix: String,
}

impl Topics {
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.trim_end_matches('/').to_string(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Retained sensor state for a camera
    pub fn state(&self, camera: &str) -> String {
        format!("{}/{}/state", self.prefix, camera)
    }

    /// Retained analysis switch state for a camera
    pub fn switch_state(&self, camera: &str) -> String {
        format!("{}/{}/analysis", self.prefix, camera)
    }

    /// Where switch commands for a camera arrive
    pub fn switch_command(&self, camera: &str) -> String {
        format!("{}/{}/analysis/set", self.prefix, camera)
    }

    /// Wildcard covering every camera's switch command topic
    pub fn switch_command_filter(&self) -> String {
        format!("{}/+/analysis/set", self.prefix)
    }

    pub fn analysis_complete(&self) -> String {
        format!("{}/analysis_complete", self.prefix)
    }
}

/// Destination for everything the pipeline reports
#[async_trait]
pub trait StatePublisher: Send + Sync {
    async fn publish_state(&self, state: &SensorState) -> Result<()>;

    async fn publish_event(&self, event: &AnalysisCompleteEvent) -> Result<()>;

    async fn publish_switch(&self, camera: &str, enabled: bool) -> Result<()>;
}

pub fn switch_payload(enabled: bool) -> &'static str {
    if enabled {
        SWITCH_ON
    } else {
        SWITCH_OFF
    }
}

fn to_json<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| Error::Validation(format!("Failed to serialize: {}", e)))
}

/// Publishes over the MQTT client shared with the bus loop
#[derive(Clone)]
pub struct MqttPublisher {
    client: AsyncClient,
    topics: Topics,
}

impl MqttPublisher {
    pub fn new(client: AsyncClient, topics: Topics) -> Self {
        Self { client, topics }
    }

    async fn send(&self, topic: String, retain: bool, payload: Vec<u8>) -> Result<()> {
        debug!(topic = %topic, retain, bytes = payload.len(), "Publishing");
        self.client
            .publish(topic.clone(), QoS::AtLeastOnce, retain, payload)
            .await
            .map_err(|e| Error::External(format!("Failed to publish to {}: {}", topic, e)))?;
        counter!("mqtt_messages_published_total").increment(1);
        Ok(())
    }
}

#[async_trait]
impl StatePublisher for MqttPublisher {
    async fn publish_state(&self, state: &SensorState) -> Result<()> {
        let payload = to_json(state)?;
        self.send(self.topics.state(&state.camera), true, payload).await?;
        info!(camera = %state.camera, value = %state.value, "Sensor state published");
        Ok(())
    }

    async fn publish_event(&self, event: &AnalysisCompleteEvent) -> Result<()> {
        let payload = to_json(event)?;
        self.send(self.topics.analysis_complete(), false, payload).await
    }

    async fn publish_switch(&self, camera: &str, enabled: bool) -> Result<()> {
        let payload = switch_payload(enabled).as_bytes().to_vec();
        self.send(self.topics.switch_state(camera), true, payload).await
    }
}

/// Something the [`MemoryPublisher`] saw
#[derive(Debug, Clone, PartialEq)]
pub enum Published {
    State(SensorState),
    Event(AnalysisCompleteEvent),
    Switch { camera: String, enabled: bool },
}

/// Records publications in memory, for tests and dry runs
#[derive(Debug, Clone, Default)]
pub struct MemoryPublisher {
    records: Arc<Mutex<Vec<Published>>>,
}

impl MemoryPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<Published> {
        match self.records.lock() {
            Ok(records) => records.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn states(&self) -> Vec<SensorState> {
        self.records()
            .into_iter()
            .filter_map(|r| match r {
                Published::State(state) => Some(state),
                _ => None,
            })
            .collect()
    }

    pub fn events(&self) -> Vec<AnalysisCompleteEvent> {
        self.records()
            .into_iter()
            .filter_map(|r| match r {
                Published::Event(event) => Some(event),
                _ => None,
            })
            .collect()
    }

    /// Most recent state published for a camera
    pub fn latest_state(&self, camera: &str) -> Option<SensorState> {
        self.states().into_iter().rev().find(|s| s.camera == camera)
    }

    fn push(&self, record: Published) {
        match self.records.lock() {
            Ok(mut records) => records.push(record),
            Err(poisoned) => poisoned.into_inner().push(record),
        }
    }
}

#[async_trait]
impl StatePublisher for MemoryPublisher {
    async fn publish_state(&self, state: &SensorState) -> Result<()> {
        self.push(Published::State(state.clone()));
        Ok(())
    }

    async fn publish_event(&self, event: &AnalysisCompleteEvent) -> Result<()> {
        self.push(Published::Event(event.clone()));
        Ok(())
    }

    async fn publish_switch(&self, camera: &str, enabled: bool) -> Result<()> {
        self.push(Published::Switch {
            camera: camera.to_string(),
            enabled,
        });
        Ok(())
    }
}
