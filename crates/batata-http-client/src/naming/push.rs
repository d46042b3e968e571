//! UDP push receiver
//!
//! The registry pushes service changes to a UDP port announced on discovery
//! requests. Every datagram is decoded (gzip when it carries the magic bytes),
//! applied to the service cache with diff suppression, and acknowledged to
//! its sender.

use std::collections::BTreeMap;
use std::io::Read;
use std::net::SocketAddr;
use std::sync::Arc;

use flate2::read::GzDecoder;
use rand::Rng;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::constants::push;
use crate::error::{ClientError, Result};
use crate::log::Logger;
use crate::model::{PushAck, PushEnvelope, Service, parse_service};
use crate::naming::cache::{ServiceCache, ServiceKey};
use crate::naming::listener::{EventListener, NamingEvent, SubscriptionRegistry};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Upper bound for a decompressed push payload.
const MAX_DECOMPRESSED_SIZE: u64 = 16 * 1024 * 1024;

/// Applies fresh service views to the cache and notifies subscribers of
/// real changes.
#[derive(Clone)]
pub struct ChangeNotifier {
    cache: Arc<ServiceCache>,
    subscriptions: Arc<SubscriptionRegistry>,
    logger: Arc<dyn Logger>,
}

impl ChangeNotifier {
    pub fn new(
        cache: Arc<ServiceCache>,
        subscriptions: Arc<SubscriptionRegistry>,
        logger: Arc<dyn Logger>,
    ) -> Self {
        Self {
            cache,
            subscriptions,
            logger,
        }
    }

    pub fn cache(&self) -> &Arc<ServiceCache> {
        &self.cache
    }

    pub fn subscriptions(&self) -> &Arc<SubscriptionRegistry> {
        &self.subscriptions
    }

    /// Replace the cached view with `service` and, when its instances changed,
    /// dispatch it to the key's listeners. Returns whether anything changed.
    pub fn apply(&self, key: ServiceKey, service: Service) -> bool {
        let Some(stored) = self.cache.apply_if_changed(key.clone(), service) else {
            self.logger
                .debug(&format!("service {} unchanged, notification suppressed", key));
            return false;
        };

        let listeners = self.subscriptions.listeners(&key);
        if !listeners.is_empty() {
            self.logger.info(&format!(
                "service {} changed, notifying {} listener(s)",
                key,
                listeners.len()
            ));
        }
        let event = NamingEvent::from_service(&key, &stored);
        for listener in listeners {
            dispatch(listener, event.clone());
        }
        true
    }

    /// Hand `service` to a single listener, bypassing diff suppression.
    pub fn notify_one(
        &self,
        key: &ServiceKey,
        service: &Service,
        listener: Arc<dyn EventListener>,
    ) {
        dispatch(listener, NamingEvent::from_service(key, service));
    }
}

fn dispatch(listener: Arc<dyn EventListener>, event: NamingEvent) {
    tokio::task::spawn_blocking(move || listener.on_event(event));
}

/// Raw datagram payload, decompressed when gzip-encoded.
pub fn decode_datagram(datagram: &[u8]) -> Result<Vec<u8>> {
    if !datagram.starts_with(&GZIP_MAGIC) {
        return Ok(datagram.to_vec());
    }
    let mut decoded = Vec::new();
    GzDecoder::new(datagram)
        .take(MAX_DECOMPRESSED_SIZE)
        .read_to_end(&mut decoded)
        .map_err(|e| ClientError::Protocol(format!("cannot decompress push datagram: {}", e)))?;
    Ok(decoded)
}

/// Push listener of one namespace.
pub struct PushReceiver {
    socket: UdpSocket,
    port: u16,
    namespace_id: String,
    notifier: ChangeNotifier,
    logger: Arc<dyn Logger>,
}

impl PushReceiver {
    /// Bind a port in `54951..55951` on `ip`, trying three random ports.
    pub async fn bind(
        ip: &str,
        namespace_id: &str,
        notifier: ChangeNotifier,
        logger: Arc<dyn Logger>,
    ) -> Result<Self> {
        let mut last_error = String::new();
        for _ in 0..push::BIND_ATTEMPTS {
            let port = push::PORT_BASE + rand::rng().random_range(0..push::PORT_SPAN);
            match UdpSocket::bind((ip, port)).await {
                Ok(socket) => {
                    logger.debug(&format!(
                        "push receiver for namespace {} listening on {}:{}",
                        namespace_id, ip, port
                    ));
                    return Ok(Self {
                        socket,
                        port,
                        namespace_id: namespace_id.to_string(),
                        notifier,
                        logger,
                    });
                }
                Err(e) => {
                    logger.warn(&format!("cannot bind udp {}:{}: {}", ip, port, e));
                    last_error = e.to_string();
                }
            }
        }
        Err(ClientError::Bind(format!(
            "no udp port on {} after {} attempts: {}",
            ip,
            push::BIND_ATTEMPTS,
            last_error
        )))
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn namespace_id(&self) -> &str {
        &self.namespace_id
    }

    /// Decode one datagram, apply it and build the acknowledgement.
    ///
    /// Errors mean the datagram is dropped without an answer.
    pub fn handle_datagram(&self, datagram: &[u8]) -> Result<PushAck> {
        let payload = decode_datagram(datagram)?;
        let envelope = PushEnvelope::parse(&payload)?;
        self.logger.debug(&format!(
            "push received: type={} lastRefTime={}",
            envelope.push_type, envelope.last_ref_time
        ));

        let ack = match envelope.push_type.as_str() {
            push::TYPE_DOM | push::TYPE_SERVICE => {
                match parse_service(envelope.data.as_bytes()) {
                    Ok(service) => {
                        let key = ServiceKey::of_service(&self.namespace_id, &service);
                        self.notifier.apply(key, service);
                    }
                    Err(e) => self.logger.error(&format!(
                        "bad service payload in push for namespace {}: {}",
                        self.namespace_id, e
                    )),
                }
                PushAck::new(push::ACK_PUSH, envelope.last_ref_time, String::new())
            }
            push::TYPE_DUMP => {
                PushAck::new(push::ACK_DUMP, envelope.last_ref_time, self.dump())
            }
            _ => PushAck::new(push::ACK_UNKNOWN, envelope.last_ref_time, String::new()),
        };
        Ok(ack)
    }

    fn dump(&self) -> String {
        let snapshot: BTreeMap<String, Service> = self
            .notifier
            .cache()
            .snapshot(&self.namespace_id)
            .into_iter()
            .collect();
        serde_json::to_string(&snapshot).unwrap_or_else(|e| {
            self.logger
                .error(&format!("cannot serialize service cache dump: {}", e));
            String::new()
        })
    }

    async fn reply(&self, ack: &PushAck, to: SocketAddr) {
        let bytes = match serde_json::to_vec(ack) {
            Ok(bytes) => bytes,
            Err(e) => {
                self.logger.error(&format!("cannot encode push ack: {}", e));
                return;
            }
        };
        if let Err(e) = self.socket.send_to(&bytes, to).await {
            self.logger
                .error(&format!("cannot send push ack to {}: {}", to, e));
        }
    }

    /// Run the receive loop until `cancel` fires. Bad datagrams are logged
    /// and dropped.
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut buf = vec![0u8; push::MAX_DATAGRAM_SIZE];
            loop {
                let received = tokio::select! {
                    _ = cancel.cancelled() => break,
                    received = self.socket.recv_from(&mut buf) => received,
                };
                let (len, from) = match received {
                    Ok(received) => received,
                    Err(e) => {
                        self.logger.error(&format!("udp receive failed: {}", e));
                        continue;
                    }
                };
                match self.handle_datagram(&buf[..len]) {
                    Ok(ack) => self.reply(&ack, from).await,
                    Err(e) => self
                        .logger
                        .error(&format!("dropping push datagram from {}: {}", from, e)),
                }
            }
            self.logger.debug(&format!(
                "push receiver for namespace {} stopped",
                self.namespace_id
            ));
        })
    }
}
