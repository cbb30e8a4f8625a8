//! ABOUTME: MQTT bus loop feeding Frigate events and switch commands to the handler
//! ABOUTME: Resubscribes on every connection and backs off after broker errors

use fg_config::MqttConfig;
use fg_core::Result;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{parse_switch_command, DetectionEvent, EventHandler, SwitchCommand, Topics};

/// Pause before polling again after a connection error
pub const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Upper bound on flushing queued messages and the disconnect at shutdown
pub const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Minimum capacity of the request channel between the client and the event loop
const REQUEST_CAPACITY: usize = 64;

pub fn mqtt_options(config: &MqttConfig) -> MqttOptions {
    let mut options = MqttOptions::new(&config.client_id, &config.host, config.port);
    options.set_keep_alive(Duration::from_secs(config.keep_alive_secs));
    if let Some(username) = &config.username {
        options.set_credentials(username, config.password.as_deref().unwrap_or_default());
    }
    options
}

/// Client handle plus the event loop that must be polled for it to make progress.
///
/// The request channel fits the startup announcements for `cameras` (two messages each)
/// since they are queued before the loop starts polling.
pub fn connect(config: &MqttConfig, cameras: usize) -> (AsyncClient, EventLoop) {
    info!(host = %config.host, port = config.port, client_id = %config.client_id, "Connecting to MQTT broker");
    let capacity = REQUEST_CAPACITY.max(cameras * 2 + 8);
    AsyncClient::new(mqtt_options(config), capacity)
}

/// What an incoming message turned out to be
#[derive(Debug, Clone, PartialEq)]
pub enum Routed {
    Detection(DetectionEvent),
    Switch(SwitchCommand),
    Ignored,
}

/// Maps incoming topics to handler calls
#[derive(Debug, Clone)]
pub struct MessageRouter {
    events_topic: String,
    topics: Topics,
}

impl MessageRouter {
    pub fn new(events_topic: &str, topics: Topics) -> Self {
        Self {
            events_topic: events_topic.to_string(),
            topics,
        }
    }

    pub fn from_config(config: &MqttConfig) -> Self {
        Self::new(&config.events_topic, Topics::new(&config.state_prefix))
    }

    /// Topic filters to subscribe to after each connection
    pub fn subscriptions(&self) -> Vec<String> {
        vec![self.events_topic.clone(), self.topics.switch_command_filter()]
    }

    pub fn route(&self, handler: &EventHandler, topic: &str, payload: &[u8]) -> Routed {
        if topic == self.events_topic {
            return match handler.handle_message(payload) {
                Some(event) => Routed::Detection(event),
                None => Routed::Ignored,
            };
        }

        match parse_switch_command(self.topics.prefix(), topic, payload) {
            Some(command) if handler.apply_switch(&command) => Routed::Switch(command),
            Some(_) => Routed::Ignored,
            None => {
                debug!(topic = %topic, "Ignoring message on unexpected topic");
                Routed::Ignored
            }
        }
    }
}

fn subscribe(client: &AsyncClient, router: &MessageRouter) {
    for filter in router.subscriptions() {
        match client.try_subscribe(filter.as_str(), QoS::AtLeastOnce) {
            Ok(()) => info!(topic = %filter, "Subscribed"),
            Err(e) => warn!(topic = %filter, error = %e, "Failed to subscribe"),
        }
    }
}

/// Poll the broker until `cancel` fires, handing every message to the router
pub async fn run(
    client: &AsyncClient,
    eventloop: &mut EventLoop,
    router: &MessageRouter,
    handler: &EventHandler,
    cancel: &CancellationToken,
) -> Result<()> {
    run_with_reconnect_delay(client, eventloop, router, handler, cancel, RECONNECT_DELAY).await
}

/// [`run`] with a custom pause after connection errors
pub async fn run_with_reconnect_delay(
    client: &AsyncClient,
    eventloop: &mut EventLoop,
    router: &MessageRouter,
    handler: &EventHandler,
    cancel: &CancellationToken,
    reconnect_delay: Duration,
) -> Result<()> {
    loop {
        let polled = tokio::select! {
            _ = cancel.cancelled() => break,
            polled = eventloop.poll() => polled,
        };

        match polled {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                info!(code = ?ack.code, "Connected to MQTT broker");
                subscribe(client, router);
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let routed = router.route(handler, &publish.topic, &publish.payload);
                debug!(topic = %publish.topic, routed = ?routed, "Message routed");
            }
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, delay_ms = reconnect_delay.as_millis() as u64, "MQTT connection error, retrying");
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(reconnect_delay) => {}
                }
            }
        }
    }

    info!("MQTT loop stopping");
    Ok(())
}

/// Keep the connection serviced while `work` finishes, then disconnect.
///
/// Publishes made by `work` (typically [`EventHandler::shutdown`]) only reach the broker
/// while the event loop is polled.
pub async fn drain_and_disconnect<F>(client: &AsyncClient, eventloop: &mut EventLoop, work: F) -> Result<()>
where
    F: Future<Output = Result<()>>,
{
    tokio::pin!(work);
    let outcome = loop {
        tokio::select! {
            outcome = &mut work => break outcome,
            polled = eventloop.poll() => {
                if let Err(e) = polled {
                    debug!(error = %e, "MQTT connection error while draining");
                    tokio::select! {
                        outcome = &mut work => break outcome,
                        _ = tokio::time::sleep(RECONNECT_DELAY) => {}
                    }
                }
            }
        }
    };

    if let Err(e) = client.try_disconnect() {
        debug!(error = %e, "Disconnect request not queued");
        return outcome;
    }

    let flushed = tokio::time::timeout(DISCONNECT_TIMEOUT, async {
        loop {
            match eventloop.poll().await {
                Ok(Event::Outgoing(Outgoing::Disconnect)) => break true,
                Ok(_) => {}
                Err(e) => {
                    debug!(error = %e, "MQTT connection closed before disconnect");
                    break false;
                }
            }
        }
    })
    .await;

    match flushed {
        Ok(true) => info!("Disconnected from MQTT broker"),
        Ok(false) => {}
        Err(_) => warn!(timeout_secs = DISCONNECT_TIMEOUT.as_secs(), "Timed out disconnecting from MQTT broker"),
    }
    outcome
}
