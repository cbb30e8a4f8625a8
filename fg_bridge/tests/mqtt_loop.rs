//! ABOUTME: Bus loop tests against a minimal in-process MQTT 3.1.1 broker
//! ABOUTME: Covers resubscription after reconnects, cancellation and the shutdown flush

use fg_ai::StubAnalyzer;
use fg_bridge::mqtt::{self, drain_and_disconnect, run_with_reconnect_delay};
use fg_bridge::{
    CameraRegistry, EventHandler, MemoryPublisher, MessageRouter, MqttPublisher, PipelineSettings,
    StatePublisher, Topics,
};
use fg_config::MqttConfig;
use fg_frigate::RetryPolicy;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use test_support::FRONT_DOOR;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

const CONNECT: u8 = 1;
const PUBLISH: u8 = 3;
const SUBSCRIBE: u8 = 8;
const PINGREQ: u8 = 12;
const DISCONNECT: u8 = 14;

async fn read_packet(stream: &mut TcpStream) -> (u8, Vec<u8>) {
    let header = stream.read_u8().await.unwrap();
    let mut length = 0usize;
    let mut shift = 0;
    loop {
        let byte = stream.read_u8().await.unwrap();
        length |= ((byte & 0x7f) as usize) << shift;
        if byte & 0x80 == 0 {
            break;
        }
        shift += 7;
    }
    let mut body = vec![0u8; length];
    stream.read_exact(&mut body).await.unwrap();
    (header >> 4, body)
}

/// Topic filters named in a SUBSCRIBE body
fn subscribed_filters(body: &[u8]) -> Vec<String> {
    let mut filters = Vec::new();
    let mut rest = &body[2..];
    while rest.len() > 2 {
        let len = u16::from_be_bytes([rest[0], rest[1]]) as usize;
        filters.push(String::from_utf8(rest[2..2 + len].to_vec()).unwrap());
        rest = &rest[2 + len + 1..];
    }
    filters
}

/// Accept one client, acknowledge its CONNECT and SUBSCRIBEs until `expected` are all covered
async fn accept_session(listener: &TcpListener, expected: &[String]) -> (TcpStream, BTreeSet<String>) {
    let (mut stream, _) = listener.accept().await.unwrap();

    let (kind, _) = read_packet(&mut stream).await;
    assert_eq!(kind, CONNECT);
    stream.write_all(&[0x20, 0x02, 0x00, 0x00]).await.unwrap();

    let mut filters = BTreeSet::new();
    while !expected.iter().all(|filter| filters.contains(filter)) {
        let (kind, body) = read_packet(&mut stream).await;
        match kind {
            SUBSCRIBE => {
                filters.extend(subscribed_filters(&body));
                stream
                    .write_all(&[0x90, 0x03, body[0], body[1], 0x01])
                    .await
                    .unwrap();
            }
            PINGREQ => stream.write_all(&[0xd0, 0x00]).await.unwrap(),
            _ => {}
        }
    }
    (stream, filters)
}

/// QoS 0 PUBLISH from the broker to the client
async fn send_publish(stream: &mut TcpStream, topic: &str, payload: &[u8]) {
    let remaining = 2 + topic.len() + payload.len();
    assert!(remaining < 128);

    let mut packet = vec![0x30, remaining as u8];
    packet.extend_from_slice(&(topic.len() as u16).to_be_bytes());
    packet.extend_from_slice(topic.as_bytes());
    packet.extend_from_slice(payload);
    stream.write_all(&packet).await.unwrap();
}

async fn local_broker() -> (TcpListener, MqttConfig) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let config = MqttConfig {
        host: "127.0.0.1".to_string(),
        port: listener.local_addr().unwrap().port(),
        ..Default::default()
    };
    (listener, config)
}

async fn start_handler(registry: CameraRegistry) -> EventHandler {
    let settings = PipelineSettings {
        frigate_url: "http://127.0.0.1:9".to_string(),
        prompt: "Describe the {label}.".to_string(),
        retry_policy: RetryPolicy::default(),
        clip_dir_prefix: "frigem_bus_".to_string(),
    };
    EventHandler::start(
        settings,
        registry,
        Arc::new(StubAnalyzer::new()),
        Arc::new(MemoryPublisher::new()) as Arc<dyn StatePublisher>,
    )
    .await
    .unwrap()
}

#[tokio::test]
async fn test_resubscribes_after_reconnect_and_routes_commands() {
    let (listener, config) = local_broker().await;
    let router = MessageRouter::from_config(&config);
    let expected = router.subscriptions();
    let registry = CameraRegistry::new([FRONT_DOOR]);
    let handler = start_handler(registry.clone()).await;
    let cancel = CancellationToken::new();

    let broker = {
        let cancel = cancel.clone();
        let registry = registry.clone();
        let expected = expected.clone();
        tokio::spawn(async move {
            let (first_stream, first) = accept_session(&listener, &expected).await;
            drop(first_stream);

            let (mut stream, second) = accept_session(&listener, &expected).await;
            send_publish(&mut stream, "frigem/front_door/analysis/set", b"OFF").await;

            for _ in 0..200 {
                if !registry.is_enabled(FRONT_DOOR) {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            cancel.cancel();
            (first, second)
        })
    };

    let (client, mut eventloop) = mqtt::connect(&config, 1);
    tokio::time::timeout(
        Duration::from_secs(10),
        run_with_reconnect_delay(
            &client,
            &mut eventloop,
            &router,
            &handler,
            &cancel,
            Duration::from_millis(50),
        ),
    )
    .await
    .expect("bus loop should stop after cancellation")
    .unwrap();

    let (first, second) = broker.await.unwrap();
    for filter in &expected {
        assert!(first.contains(filter), "first session missing {}", filter);
        assert!(second.contains(filter), "second session missing {}", filter);
    }
    assert!(!registry.is_enabled(FRONT_DOOR));

    handler.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_cancel_interrupts_reconnect_delay() {
    let (listener, config) = local_broker().await;
    let router = MessageRouter::from_config(&config);
    let expected = router.subscriptions();
    let handler = start_handler(CameraRegistry::new([FRONT_DOOR])).await;
    let cancel = CancellationToken::new();

    let broker = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let (stream, _) = accept_session(&listener, &expected).await;
            drop(stream);
            tokio::time::sleep(Duration::from_millis(200)).await;
            cancel.cancel();
        })
    };

    let (client, mut eventloop) = mqtt::connect(&config, 1);
    tokio::time::timeout(
        Duration::from_secs(5),
        run_with_reconnect_delay(
            &client,
            &mut eventloop,
            &router,
            &handler,
            &cancel,
            Duration::from_secs(60),
        ),
    )
    .await
    .expect("cancellation should cut the reconnect delay short")
    .unwrap();

    broker.await.unwrap();
    handler.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_drain_delivers_late_publishes_before_disconnect() {
    let (listener, config) = local_broker().await;
    let router = MessageRouter::from_config(&config);
    let expected = router.subscriptions();
    let handler = start_handler(CameraRegistry::new([FRONT_DOOR])).await;
    let cancel = CancellationToken::new();

    let broker = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let (mut stream, _) = accept_session(&listener, &expected).await;
            cancel.cancel();

            let mut seen = Vec::new();
            loop {
                let (kind, body) = read_packet(&mut stream).await;
                seen.push(kind);
                match kind {
                    PUBLISH => {
                        let len = u16::from_be_bytes([body[0], body[1]]) as usize;
                        let topic = String::from_utf8(body[2..2 + len].to_vec()).unwrap();
                        assert_eq!(topic, "frigem/front_door/analysis");
                        let pkid = &body[2 + len..4 + len];
                        stream.write_all(&[0x40, 0x02, pkid[0], pkid[1]]).await.unwrap();
                    }
                    DISCONNECT => break,
                    _ => {}
                }
            }
            seen
        })
    };

    let (client, mut eventloop) = mqtt::connect(&config, 1);
    run_with_reconnect_delay(
        &client,
        &mut eventloop,
        &router,
        &handler,
        &cancel,
        Duration::from_millis(50),
    )
    .await
    .unwrap();

    let publisher = MqttPublisher::new(client.clone(), Topics::new(&config.state_prefix));
    let work = async move {
        publisher.publish_switch(FRONT_DOOR, false).await?;
        handler.shutdown().await
    };
    tokio::time::timeout(
        Duration::from_secs(10),
        drain_and_disconnect(&client, &mut eventloop, work),
    )
    .await
    .expect("drain should finish")
    .unwrap();

    let seen = tokio::time::timeout(Duration::from_secs(5), broker)
        .await
        .expect("broker should see the disconnect")
        .unwrap();
    let publish_at = seen.iter().position(|kind| *kind == PUBLISH).unwrap();
    assert_eq!(seen.last(), Some(&DISCONNECT));
    assert!(publish_at < seen.len() - 1);
}
