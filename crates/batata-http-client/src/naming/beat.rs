//! Heartbeat reactor
//!
//! Tracks the registrations owned by this process and keeps each ephemeral
//! one alive with a background beat task. Removing a key from the registry is
//! what stops its task; the task notices on its next wake.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashSet;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::constants::{CODE_RESOURCE_NOT_FOUND, DEFAULT_BEAT_INTERVAL, api_path, key};
use crate::error::{ClientError, Result};
use crate::log::Logger;
use crate::param::{BeatKey, Registration};
use crate::transport::{HttpRequest, Transport};

/// Heartbeat state of one registered ephemeral instance
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BeatInfo {
    pub ip: String,
    pub port: u16,
    pub weight: f64,
    /// Grouped service name
    pub service_name: String,
    pub cluster: String,
    pub metadata: HashMap<String, String>,
    pub scheduled: bool,
    /// Wait before the next beat; zero until the server reports one
    #[serde(skip)]
    pub period: Duration,
    #[serde(skip)]
    pub light_beat: bool,
}

impl From<&Registration> for BeatInfo {
    fn from(reg: &Registration) -> Self {
        Self {
            ip: reg.ip.clone(),
            port: reg.port,
            weight: reg.weight,
            service_name: reg.grouped_service_name(),
            cluster: reg.cluster_name.clone(),
            metadata: reg.metadata.clone(),
            scheduled: false,
            period: Duration::ZERO,
            light_beat: false,
        }
    }
}

impl BeatInfo {
    /// Fall back to the default interval while the server has not set one.
    pub fn settle_period(&mut self) {
        if self.period.is_zero() {
            self.period = DEFAULT_BEAT_INTERVAL;
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct BeatResponse {
    client_beat_interval: Option<i64>,
    light_beat_enabled: Option<bool>,
    code: Option<i64>,
}

/// Dedupe registry plus the heartbeat loop of every ephemeral registration.
pub struct BeatReactor {
    transport: Arc<dyn Transport>,
    registered: DashSet<BeatKey>,
    logger: Arc<dyn Logger>,
    cancel: CancellationToken,
}

impl BeatReactor {
    pub fn new(
        transport: Arc<dyn Transport>,
        logger: Arc<dyn Logger>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            transport,
            registered: DashSet::new(),
            logger,
            cancel,
        }
    }

    /// Mark `key` registered. Returns false if it already was.
    pub fn try_add(&self, key: BeatKey) -> bool {
        self.registered.insert(key)
    }

    pub fn remove(&self, key: &BeatKey) -> bool {
        self.registered.remove(key).is_some()
    }

    pub fn is_registered(&self, key: &BeatKey) -> bool {
        self.registered.contains(key)
    }

    pub fn registered_count(&self) -> usize {
        self.registered.len()
    }

    /// Send one heartbeat and fold the server's answer into `beat`.
    ///
    /// An "instance not found" answer re-registers the instance, unless the
    /// registration was removed meanwhile.
    pub async fn send_beat(&self, reg: &Registration, beat: &mut BeatInfo) -> Result<()> {
        let mut request = HttpRequest::put(api_path::INSTANCE_BEAT)
            .query(key::NAMESPACE_ID, reg.namespace_id.clone())
            .query(key::SERVICE_NAME, beat.service_name.clone())
            .query(key::CLUSTER_NAME, beat.cluster.clone())
            .query(key::IP, beat.ip.clone())
            .query(key::PORT, beat.port.to_string());
        if !beat.light_beat {
            request = request.form(key::BEAT, serde_json::to_string(&*beat)?);
        }

        let body = self.transport.execute(request).await?;
        let response: BeatResponse = serde_json::from_slice(&body)
            .map_err(|e| ClientError::Protocol(format!("cannot parse beat response: {}", e)))?;

        if let Some(interval) = response.client_beat_interval.filter(|ms| *ms > 0) {
            beat.period = Duration::from_millis(interval as u64);
        }
        beat.light_beat = response.light_beat_enabled.unwrap_or(false);

        if response.code == Some(CODE_RESOURCE_NOT_FOUND) {
            let key = reg.beat_key();
            if !self.is_registered(&key) {
                return Ok(());
            }
            self.logger
                .warn(&format!("instance {} unknown to server, registering again", key));
            self.transport.execute(reg.register_request()).await?;
        }
        Ok(())
    }

    /// Start the keep-alive loop for `reg`.
    ///
    /// The loop waits `beat.period` (not at all while it is zero), then beats
    /// while the registration is present. A period the server never set
    /// becomes the default 5s after each attempt, so callers that already
    /// beat once should `settle_period` first. The loop ends when the key is
    /// removed or the client shuts down.
    pub fn spawn_keep_alive(
        self: &Arc<Self>,
        reg: Registration,
        mut beat: BeatInfo,
    ) -> JoinHandle<()> {
        let reactor = Arc::clone(self);
        let key = reg.beat_key();
        tokio::spawn(async move {
            loop {
                if !beat.period.is_zero() {
                    tokio::select! {
                        _ = reactor.cancel.cancelled() => return,
                        _ = tokio::time::sleep(beat.period) => {}
                    }
                }
                if reactor.cancel.is_cancelled() || !reactor.is_registered(&key) {
                    reactor
                        .logger
                        .debug(&format!("heartbeat of {} stopped", key));
                    return;
                }
                if let Err(e) = reactor.send_beat(&reg, &mut beat).await {
                    reactor
                        .logger
                        .error(&format!("heartbeat of {} failed: {}", key, e));
                }
                beat.settle_period();
            }
        })
    }
}
