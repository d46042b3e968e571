//! Request parameter assembly
//!
//! Callers pass optional [`InstanceParams`] / [`ConfigParams`]; the engines
//! resolve them against the client defaults into fixed request records
//! ([`Registration`], [`ServiceQuery`]) and the config long-poll fingerprint.

use std::collections::HashMap;

use md5::{Digest, Md5};

use crate::constants::{DEFAULT_CLUSTER, DEFAULT_GROUP, SERVICE_INFO_SPLITER, api_path, key};
use crate::transport::HttpRequest;

const WORD_SEPARATOR: char = '\u{2}';
const LINE_SEPARATOR: char = '\u{1}';

/// Optional per-call naming parameters
#[derive(Clone, Debug, Default, PartialEq)]
pub struct InstanceParams {
    pub group_name: Option<String>,
    pub namespace_id: Option<String>,
    /// Cluster an instance registers into
    pub cluster_name: Option<String>,
    /// Clusters a discovery or subscription is restricted to
    pub clusters: Vec<String>,
    pub weight: Option<f64>,
    pub enabled: Option<bool>,
    pub healthy: Option<bool>,
    pub ephemeral: Option<bool>,
    pub metadata: HashMap<String, String>,
}

impl InstanceParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn group_name(mut self, group: &str) -> Self {
        self.group_name = Some(group.to_string());
        self
    }

    pub fn namespace_id(mut self, namespace_id: &str) -> Self {
        self.namespace_id = Some(namespace_id.to_string());
        self
    }

    pub fn cluster_name(mut self, cluster: &str) -> Self {
        self.cluster_name = Some(cluster.to_string());
        self
    }

    pub fn clusters<I, S>(mut self, clusters: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.clusters = clusters.into_iter().map(Into::into).collect();
        self
    }

    pub fn weight(mut self, weight: f64) -> Self {
        self.weight = Some(weight);
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = Some(enabled);
        self
    }

    pub fn healthy(mut self, healthy: bool) -> Self {
        self.healthy = Some(healthy);
        self
    }

    pub fn ephemeral(mut self, ephemeral: bool) -> Self {
        self.ephemeral = Some(ephemeral);
        self
    }

    pub fn metadata(mut self, key: &str, value: &str) -> Self {
        self.metadata.insert(key.to_string(), value.to_string());
        self
    }

    fn group_or_default(&self) -> String {
        self.group_name
            .clone()
            .unwrap_or_else(|| DEFAULT_GROUP.to_string())
    }

    fn namespace_or(&self, default_namespace_id: &str) -> String {
        self.namespace_id
            .clone()
            .unwrap_or_else(|| default_namespace_id.to_string())
    }
}

/// Optional per-call config parameters
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ConfigParams {
    pub tenant: Option<String>,
    pub app_name: Option<String>,
    pub config_type: Option<String>,
    pub tag: Option<String>,
}

impl ConfigParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tenant(mut self, tenant: &str) -> Self {
        self.tenant = Some(tenant.to_string());
        self
    }

    pub fn app_name(mut self, app_name: &str) -> Self {
        self.app_name = Some(app_name.to_string());
        self
    }

    pub fn config_type(mut self, config_type: &str) -> Self {
        self.config_type = Some(config_type.to_string());
        self
    }

    pub fn tag(mut self, tag: &str) -> Self {
        self.tag = Some(tag.to_string());
        self
    }

    pub(crate) fn tenant_or(&self, default_tenant: &str) -> String {
        self.tenant
            .clone()
            .unwrap_or_else(|| default_tenant.to_string())
    }
}

/// `group@@service`
pub fn grouped_service_name(group: &str, service_name: &str) -> String {
    format!("{}{}{}", group, SERVICE_INFO_SPLITER, service_name)
}

/// Identity of a registration in the dedupe registry.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct BeatKey {
    pub grouped_service_name: String,
    pub cluster_name: String,
    pub namespace_id: String,
    pub ip: String,
    pub port: u16,
}

impl std::fmt::Display for BeatKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}:{}",
            self.grouped_service_name, self.namespace_id, self.cluster_name, self.ip, self.port
        )
    }
}

/// Fully resolved registration of one instance.
#[derive(Clone, Debug, PartialEq)]
pub struct Registration {
    pub ip: String,
    pub port: u16,
    pub service_name: String,
    pub group_name: String,
    pub namespace_id: String,
    pub cluster_name: String,
    pub weight: f64,
    pub enabled: bool,
    pub healthy: bool,
    pub ephemeral: bool,
    pub metadata: HashMap<String, String>,
}

impl Registration {
    pub fn resolve(
        ip: &str,
        port: u16,
        service_name: &str,
        params: &InstanceParams,
        default_namespace_id: &str,
    ) -> Self {
        Self {
            ip: ip.to_string(),
            port,
            service_name: service_name.to_string(),
            group_name: params.group_or_default(),
            namespace_id: params.namespace_or(default_namespace_id),
            cluster_name: params
                .cluster_name
                .clone()
                .unwrap_or_else(|| DEFAULT_CLUSTER.to_string()),
            weight: params.weight.unwrap_or(1.0),
            enabled: params.enabled.unwrap_or(true),
            healthy: params.healthy.unwrap_or(true),
            ephemeral: params.ephemeral.unwrap_or(true),
            metadata: params.metadata.clone(),
        }
    }

    pub fn grouped_service_name(&self) -> String {
        grouped_service_name(&self.group_name, &self.service_name)
    }

    pub fn beat_key(&self) -> BeatKey {
        BeatKey {
            grouped_service_name: self.grouped_service_name(),
            cluster_name: self.cluster_name.clone(),
            namespace_id: self.namespace_id.clone(),
            ip: self.ip.clone(),
            port: self.port,
        }
    }

    /// `POST instance` with the registration as form fields.
    pub fn register_request(&self) -> HttpRequest {
        let metadata = serde_json::to_string(&self.metadata).unwrap_or_else(|_| "{}".to_string());
        HttpRequest::post(api_path::INSTANCE)
            .form(key::IP, self.ip.clone())
            .form(key::PORT, self.port.to_string())
            .form(key::SERVICE_NAME, self.service_name.clone())
            .form(key::NAMESPACE_ID, self.namespace_id.clone())
            .form(key::WEIGHT, self.weight.to_string())
            .form(key::ENABLED, self.enabled.to_string())
            .form(key::HEALTHY, self.healthy.to_string())
            .form(key::METADATA, metadata)
            .form(key::CLUSTER_NAME, self.cluster_name.clone())
            .form(key::GROUP_NAME, self.group_name.clone())
            .form(key::EPHEMERAL, self.ephemeral.to_string())
    }

    /// `DELETE instance` identifying the registration.
    pub fn deregister_request(&self) -> HttpRequest {
        HttpRequest::delete(api_path::INSTANCE)
            .query(key::IP, self.ip.clone())
            .query(key::PORT, self.port.to_string())
            .query(key::SERVICE_NAME, self.service_name.clone())
            .query(key::GROUP_NAME, self.group_name.clone())
            .query(key::NAMESPACE_ID, self.namespace_id.clone())
            .query(key::CLUSTER_NAME, self.cluster_name.clone())
            .query(key::EPHEMERAL, self.ephemeral.to_string())
    }
}

/// Where the registry should push updates for a subscription.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PushTarget {
    pub udp_port: u16,
    pub client_ip: String,
    pub app: String,
}

/// Fully resolved discovery query.
#[derive(Clone, Debug, PartialEq)]
pub struct ServiceQuery {
    pub service_name: String,
    pub group_name: String,
    pub namespace_id: String,
    /// Sorted cluster names
    pub clusters: Vec<String>,
    pub healthy_only: bool,
}

impl ServiceQuery {
    pub fn resolve(
        service_name: &str,
        params: &InstanceParams,
        default_namespace_id: &str,
    ) -> Self {
        let mut clusters = params.clusters.clone();
        clusters.sort();
        Self {
            service_name: service_name.to_string(),
            group_name: params.group_or_default(),
            namespace_id: params.namespace_or(default_namespace_id),
            clusters,
            healthy_only: params.healthy.unwrap_or(true),
        }
    }

    pub fn grouped_service_name(&self) -> String {
        grouped_service_name(&self.group_name, &self.service_name)
    }

    /// `GET instance/list`, optionally announcing a push target.
    pub fn list_request(&self, push: Option<&PushTarget>) -> HttpRequest {
        let mut req = HttpRequest::get(api_path::INSTANCE_LIST)
            .query(key::HEALTHY, self.healthy_only.to_string())
            .query(key::SERVICE_NAME, self.service_name.clone())
            .query(key::GROUP_NAME, self.group_name.clone())
            .query(key::NAMESPACE_ID, self.namespace_id.clone());
        if !self.clusters.is_empty() {
            req = req.query(key::CLUSTERS, self.clusters.join(","));
        }
        if let Some(target) = push {
            req = req
                .query(key::UDP_PORT, target.udp_port.to_string())
                .query(key::CLIENT_IP, target.client_ip.clone())
                .query(key::APP, target.app.clone());
        }
        req
    }
}

/// Hex MD5 digest of `content`.
pub fn md5_hex(content: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(content.as_bytes());
    hex::encode(&hasher.finalize()[..])
}

/// One `Listening-Configs` line: `dataId^2group^2md5[^2tenant]^1`.
pub fn listening_configs(data_id: &str, group: &str, md5: &str, tenant: &str) -> String {
    let capacity = data_id.len() + group.len() + md5.len() + tenant.len() + 4;
    let mut line = String::with_capacity(capacity);
    line.push_str(data_id);
    line.push(WORD_SEPARATOR);
    line.push_str(group);
    line.push(WORD_SEPARATOR);
    line.push_str(md5);
    if !tenant.is_empty() {
        line.push(WORD_SEPARATOR);
        line.push_str(tenant);
    }
    line.push(LINE_SEPARATOR);
    line
}
