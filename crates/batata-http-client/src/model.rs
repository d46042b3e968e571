//! Client model types
//!
//! Records decoded from discovery responses and push datagrams. Decoding is
//! lenient: absent fields take their defaults.

use std::collections::HashMap;

use serde::{Deserialize, Deserializer, Serialize};
use tokio::time::Instant;

use crate::error::{ClientError, Result};

/// Service instance as reported by the registry
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Instance {
    pub instance_id: String,
    pub ip: String,
    pub port: u16,
    pub weight: f64,
    pub healthy: bool,
    pub enabled: bool,
    pub ephemeral: bool,
    pub valid: bool,
    pub marked: bool,
    pub cluster_name: String,
    pub service_name: String,
    pub metadata: HashMap<String, String>,
}

impl Instance {
    pub fn new(ip: &str, port: u16) -> Self {
        Self {
            ip: ip.to_string(),
            port,
            weight: 1.0,
            healthy: true,
            enabled: true,
            ephemeral: true,
            valid: true,
            ..Default::default()
        }
    }

    /// `ip:port`, the identity used when comparing instance lists.
    pub fn address(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }

    /// Whether any field differs from `other`.
    pub fn differs(&self, other: &Instance) -> bool {
        self.valid != other.valid
            || self.marked != other.marked
            || self.instance_id != other.instance_id
            || self.port != other.port
            || self.ip != other.ip
            || self.weight != other.weight
            || self.metadata != other.metadata
            || self.cluster_name != other.cluster_name
            || self.service_name != other.service_name
            || self.enabled != other.enabled
            || self.healthy != other.healthy
            || self.ephemeral != other.ephemeral
    }
}

/// Service view returned by discovery and carried by push notifications
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Service {
    /// Grouped service name, e.g. "DEFAULT_GROUP@@orders"
    pub name: String,
    pub dom: String,
    pub clusters: String,
    pub cache_millis: i64,
    pub hosts: Vec<Instance>,
    pub last_ref_time: i64,
    pub checksum: String,
    pub env: String,
    #[serde(rename = "useSpecifiedURL")]
    pub use_specified_url: bool,
    pub metadata: HashMap<String, serde_json::Value>,
    /// When this client fetched the view; never serialized
    #[serde(skip)]
    pub fetched_at: Option<Instant>,
}

impl Service {
    /// Healthy and enabled instances
    pub fn healthy_hosts(&self) -> Vec<&Instance> {
        self.hosts
            .iter()
            .filter(|h| h.healthy && h.enabled)
            .collect()
    }

    /// Cluster names in the `clusters` field.
    pub fn cluster_list(&self) -> Vec<String> {
        self.clusters
            .split(',')
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Whether the instance set differs from `other`'s.
    ///
    /// Instances are matched by `ip:port`; a count mismatch, a missing
    /// address or any field difference counts as a change.
    pub fn instances_differ(&self, other: &Service) -> bool {
        if self.hosts.len() != other.hosts.len() {
            return true;
        }
        let by_address: HashMap<String, &Instance> =
            self.hosts.iter().map(|h| (h.address(), h)).collect();
        other
            .hosts
            .iter()
            .any(|h| match by_address.get(&h.address()) {
                Some(mine) => mine.differs(h),
                None => true,
            })
    }
}

/// Decode a service view from a discovery response or push payload.
pub fn parse_service(bytes: &[u8]) -> Result<Service> {
    serde_json::from_slice(bytes)
        .map_err(|e| ClientError::Protocol(format!("cannot parse service: {}", e)))
}

/// Datagram the registry sends to the push listener
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PushEnvelope {
    #[serde(rename = "type")]
    pub push_type: String,
    /// Embedded payload; older servers send a JSON string, newer ones raw JSON
    #[serde(deserialize_with = "string_or_raw")]
    pub data: String,
    pub last_ref_time: i64,
}

impl PushEnvelope {
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| ClientError::Protocol(format!("cannot parse push envelope: {}", e)))
    }
}

fn string_or_raw<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::String(s) => s,
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    })
}

/// Acknowledgement sent back for every push datagram
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushAck {
    #[serde(rename = "type")]
    pub ack_type: String,
    /// Echo of the envelope's lastRefTime, as a decimal string
    pub last_ref_time: String,
    pub data: String,
}

impl PushAck {
    pub fn new(ack_type: &str, last_ref_time: i64, data: String) -> Self {
        Self {
            ack_type: ack_type.to_string(),
            last_ref_time: last_ref_time.to_string(),
            data,
        }
    }
}
