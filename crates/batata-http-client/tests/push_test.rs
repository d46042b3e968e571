//! UDP push integration tests
//!
//! Subscribes through a full client over a stub transport, then plays the
//! registry's side of the push channel on a real UDP socket.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use batata_http_client::{
    ClientConfig, HttpRequest, InstanceParams, NamingEvent, NoopLogger, ServiceClient, Transport,
};
use bytes::Bytes;
use flate2::Compression;
use flate2::write::GzEncoder;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

/// Answers discovery with a fixed view and remembers the announced UDP port.
#[derive(Default)]
struct StubRegistry {
    udp_port: Mutex<Option<u16>>,
}

impl StubRegistry {
    fn announced_port(&self) -> u16 {
        let port = *self.udp_port.lock();
        port.expect("udpPort was not announced")
    }
}

#[async_trait]
impl Transport for StubRegistry {
    async fn execute(&self, request: HttpRequest) -> batata_http_client::Result<Bytes> {
        if request.path == "/v1/ns/instance/list" {
            if let Some(port) = request.query_value("udpPort") {
                *self.udp_port.lock() = port.parse().ok();
            }
            let body = service_json(&[("10.0.0.1", 8080)]).to_string();
            return Ok(Bytes::from(body));
        }
        Ok(Bytes::from_static(b"ok"))
    }
}

fn service_json(hosts: &[(&str, u16)]) -> Value {
    let hosts: Vec<Value> = hosts
        .iter()
        .map(|(ip, port)| {
            json!({
                "ip": ip,
                "port": port,
                "weight": 1.0,
                "healthy": true,
                "enabled": true,
                "valid": true,
                "clusterName": "DEFAULT",
                "serviceName": "DEFAULT_GROUP@@orders",
            })
        })
        .collect();
    json!({
        "name": "DEFAULT_GROUP@@orders",
        "clusters": "",
        "cacheMillis": 10000,
        "hosts": hosts,
        "lastRefTime": 1700000000000i64,
    })
}

fn gzip(bytes: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(bytes).unwrap();
    encoder.finish().unwrap()
}

async fn subscribed_client() -> (
    ServiceClient,
    Arc<StubRegistry>,
    mpsc::UnboundedReceiver<NamingEvent>,
) {
    let registry = Arc::new(StubRegistry::default());
    let config = ClientConfig {
        discovery_ip: Some("127.0.0.1".to_string()),
        ..Default::default()
    };
    let client = ServiceClient::with_transport(config, registry.clone(), Arc::new(NoopLogger))
        .await
        .unwrap();

    let (tx, rx) = mpsc::unbounded_channel();
    let listener = Arc::new(move |event: NamingEvent| {
        let _ = tx.send(event);
    });
    client
        .naming()
        .subscribe("orders", &InstanceParams::new(), listener)
        .await
        .unwrap();

    (client, registry, rx)
}

async fn next_event(rx: &mut mpsc::UnboundedReceiver<NamingEvent>) -> NamingEvent {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("no naming event within 5s")
        .expect("listener channel closed")
}

async fn exchange(port: u16, datagram: &[u8]) -> Value {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    socket.send_to(datagram, ("127.0.0.1", port)).await.unwrap();

    let mut buf = vec![0u8; 64 * 1024];
    let (len, _) = tokio::time::timeout(Duration::from_secs(5), socket.recv_from(&mut buf))
        .await
        .expect("no ack within 5s")
        .unwrap();
    serde_json::from_slice(&buf[..len]).unwrap()
}

#[tokio::test]
async fn test_subscribe_announces_push_port() {
    let (client, registry, mut rx) = subscribed_client().await;

    let announced = registry.announced_port();
    assert!((54951..55951).contains(&announced));
    assert_eq!(client.naming().push_port("public").await, Some(announced));

    let first = next_event(&mut rx).await;
    assert_eq!(first.service_name, "DEFAULT_GROUP@@orders");
    assert_eq!(first.instances.len(), 1);
}

#[tokio::test]
async fn test_gzip_push_notifies_and_acks() {
    let (_client, registry, mut rx) = subscribed_client().await;
    let port = registry.announced_port();
    next_event(&mut rx).await;

    let envelope = json!({
        "type": "dom",
        "data": service_json(&[("10.0.0.1", 8080), ("10.0.0.2", 8080)]).to_string(),
        "lastRefTime": 42,
    });
    let ack = exchange(port, &gzip(envelope.to_string().as_bytes())).await;

    assert_eq!(ack["type"], "push-ack");
    assert_eq!(ack["lastRefTime"], "42");

    let event = next_event(&mut rx).await;
    assert_eq!(event.instances.len(), 2);
    assert_eq!(event.namespace_id, "public");
}

#[tokio::test]
async fn test_repeated_push_is_acked_but_not_dispatched() {
    let (_client, registry, mut rx) = subscribed_client().await;
    let port = registry.announced_port();
    next_event(&mut rx).await;

    let envelope = json!({
        "type": "service",
        "data": service_json(&[("10.0.0.1", 8080)]).to_string(),
        "lastRefTime": 7,
    });
    let ack = exchange(port, envelope.to_string().as_bytes()).await;
    assert_eq!(ack["type"], "push-ack");

    let quiet = tokio::time::timeout(Duration::from_millis(300), rx.recv()).await;
    assert!(quiet.is_err(), "unchanged push must not notify");
}

#[tokio::test]
async fn test_dump_returns_cached_services() {
    let (_client, registry, mut rx) = subscribed_client().await;
    let port = registry.announced_port();
    next_event(&mut rx).await;

    let envelope = json!({"type": "dump", "data": "", "lastRefTime": 9});
    let ack = exchange(port, envelope.to_string().as_bytes()).await;

    assert_eq!(ack["type"], "dump-ack");
    assert_eq!(ack["lastRefTime"], "9");
    let dump: Value = serde_json::from_str(ack["data"].as_str().unwrap()).unwrap();
    assert!(dump.get("public##DEFAULT_GROUP@@orders").is_some());
}
