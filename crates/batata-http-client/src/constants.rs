// Open API constants for the Nacos v1 HTTP protocol

use std::time::Duration;

pub const CLIENT_VERSION: &str = "batata-http-client:v0.1.0";

pub const DEFAULT_GROUP: &str = "DEFAULT_GROUP";
pub const DEFAULT_CLUSTER: &str = "DEFAULT";
pub const DEFAULT_NAMESPACE_ID: &str = "public";
pub const DEFAULT_CONTEXT_PATH: &str = "/nacos";

pub const DEFAULT_HTTP_TIMEOUT_MS: u64 = 15_000;
pub const DEFAULT_LISTEN_INTERVAL_MS: u64 = 30_000;
pub const DEFAULT_MAX_CACHE_TIME_MS: u64 = 45_000;
pub const DEFAULT_SUBSCRIBE_CACHE_TIME_MS: u64 = 10_000;

/// Extra time the listen HTTP client waits beyond the long-poll timeout.
pub const LISTEN_TIMEOUT_GRACE: Duration = Duration::from_secs(10);

/// Used when a beat fails before the server ever reported an interval.
pub const DEFAULT_BEAT_INTERVAL: Duration = Duration::from_secs(5);

/// Server response code for "instance not found" on a heartbeat.
pub const CODE_RESOURCE_NOT_FOUND: i64 = 20404;

/// Separator between grouped service name parts.
pub const SERVICE_INFO_SPLITER: &str = "@@";

pub mod api_path {
    pub const LOGIN: &str = "/v1/auth/users/login";
    pub const INSTANCE: &str = "/v1/ns/instance";
    pub const INSTANCE_LIST: &str = "/v1/ns/instance/list";
    pub const INSTANCE_BEAT: &str = "/v1/ns/instance/beat";
    pub const CONFIG: &str = "/v1/cs/configs";
    pub const CONFIG_LISTENER: &str = "/v1/cs/configs/listener";
}

pub mod header {
    pub const CLIENT_VERSION: &str = "Client-Version";
    pub const USER_AGENT: &str = "User-Agent";
    pub const CONNECTION: &str = "Connection";
    pub const REQUEST_ID: &str = "RequestId";
    pub const REQUEST_MODULE: &str = "Request-Module";
    pub const CONTENT_TYPE: &str = "Content-Type";
    pub const LONG_PULLING_TIMEOUT: &str = "Long-Pulling-Timeout";

    pub const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded;charset=utf-8";
}

/// Request parameter and response field names.
pub mod key {
    pub const IP: &str = "ip";
    pub const PORT: &str = "port";
    pub const NAMESPACE_ID: &str = "namespaceId";
    pub const WEIGHT: &str = "weight";
    pub const ENABLED: &str = "enabled";
    pub const HEALTHY: &str = "healthy";
    pub const METADATA: &str = "metadata";
    pub const CLUSTER_NAME: &str = "clusterName";
    pub const SERVICE_NAME: &str = "serviceName";
    pub const GROUP_NAME: &str = "groupName";
    pub const EPHEMERAL: &str = "ephemeral";
    pub const BEAT: &str = "beat";
    pub const CLUSTERS: &str = "clusters";
    pub const UDP_PORT: &str = "udpPort";
    pub const CLIENT_IP: &str = "clientIP";
    pub const APP: &str = "app";

    pub const APP_NAME: &str = "appName";
    pub const TENANT: &str = "tenant";
    pub const DATA_ID: &str = "dataId";
    pub const GROUP: &str = "group";
    pub const CONTENT: &str = "content";
    pub const TYPE: &str = "type";
    pub const TAG: &str = "tag";
    pub const LISTENING_CONFIGS: &str = "Listening-Configs";

    pub const USERNAME: &str = "username";
    pub const PASSWORD: &str = "password";
    pub const ACCESS_TOKEN: &str = "accessToken";
}

/// UDP push channel constants.
pub mod push {
    pub const PORT_BASE: u16 = 54951;
    pub const PORT_SPAN: u16 = 1000;
    pub const BIND_ATTEMPTS: usize = 3;
    pub const MAX_DATAGRAM_SIZE: usize = 64 * 1024;

    pub const TYPE_DOM: &str = "dom";
    pub const TYPE_SERVICE: &str = "service";
    pub const TYPE_DUMP: &str = "dump";

    pub const ACK_PUSH: &str = "push-ack";
    pub const ACK_DUMP: &str = "dump-ack";
    pub const ACK_UNKNOWN: &str = "unknown-ack";
}
