//! Client facade
//!
//! `ServiceClient` wires the transport stack, the auth session and both
//! services together and owns the cancellation token every background task
//! observes.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::auth::{AuthSession, SessionTransport};
use crate::config::ConfigService;
use crate::error::Result;
use crate::log::{LogLevel, Logger, TracingLogger};
use crate::naming::NamingService;
use crate::options::ClientConfig;
use crate::transport::{HttpTransport, Transport};

/// Entry point for naming and config operations against one server.
///
/// Dropping the client (or calling [`ServiceClient::shutdown`]) stops every
/// heartbeat, push receiver, subscription refresh, config watch and the
/// token refresh.
pub struct ServiceClient {
    config: Arc<ClientConfig>,
    logger: Arc<dyn Logger>,
    auth: Arc<AuthSession>,
    naming: Arc<NamingService>,
    config_service: Arc<ConfigService>,
    cancel: CancellationToken,
}

impl ServiceClient {
    /// Create a client that logs through `tracing` at `config.log_level`.
    pub async fn new(config: ClientConfig) -> Result<Self> {
        let level: LogLevel = config.log_level.parse().unwrap_or_default();
        Self::with_logger(config, Arc::new(TracingLogger::new(level))).await
    }

    /// Create a client with a custom logger.
    pub async fn with_logger(config: ClientConfig, logger: Arc<dyn Logger>) -> Result<Self> {
        let config = config.resolve()?;
        let transport: Arc<dyn Transport> = Arc::new(HttpTransport::new(&config, logger.clone())?);
        Self::build(config, transport, logger).await
    }

    /// Create a client over a custom transport.
    pub async fn with_transport(
        config: ClientConfig,
        transport: Arc<dyn Transport>,
        logger: Arc<dyn Logger>,
    ) -> Result<Self> {
        let config = config.resolve()?;
        Self::build(config, transport, logger).await
    }

    async fn build(
        config: ClientConfig,
        transport: Arc<dyn Transport>,
        logger: Arc<dyn Logger>,
    ) -> Result<Self> {
        let config = Arc::new(config);
        let cancel = CancellationToken::new();

        let auth = Arc::new(AuthSession::new(
            transport.clone(),
            &config.username,
            &config.password,
            logger.clone(),
        ));
        if auth.is_enabled() {
            auth.login().await?;
            auth.spawn_refresh(cancel.clone());
        }
        let transport: Arc<dyn Transport> =
            Arc::new(SessionTransport::new(transport, auth.clone()));

        let naming = Arc::new(NamingService::new(
            config.clone(),
            transport.clone(),
            logger.clone(),
            cancel.clone(),
        ));
        let config_service = Arc::new(ConfigService::new(
            config.clone(),
            transport,
            logger.clone(),
            cancel.clone(),
        ));

        logger.info(&format!(
            "client started: server={} namespace={} discovery_ip={}",
            config.base_url(),
            config.default_namespace_id,
            config.resolved_discovery_ip()
        ));

        Ok(Self {
            config,
            logger,
            auth,
            naming,
            config_service,
            cancel,
        })
    }

    pub fn naming(&self) -> &Arc<NamingService> {
        &self.naming
    }

    pub fn config(&self) -> &Arc<ConfigService> {
        &self.config_service
    }

    pub fn auth(&self) -> &Arc<AuthSession> {
        &self.auth
    }

    /// Effective configuration, with discovery IP and app name resolved.
    pub fn client_config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn logger(&self) -> &Arc<dyn Logger> {
        &self.logger
    }

    /// Stop every background task of this client.
    pub fn shutdown(&self) {
        if !self.cancel.is_cancelled() {
            self.logger.info("client shutting down");
            self.cancel.cancel();
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Drop for ServiceClient {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use reqwest::Method;

    use super::*;
    use crate::constants::api_path;
    use crate::error::ClientError;
    use crate::log::NoopLogger;
    use crate::param::InstanceParams;
    use crate::transport::mock::MockTransport;

    fn config(username: &str) -> ClientConfig {
        ClientConfig {
            username: username.to_string(),
            password: "nacos".to_string(),
            discovery_ip: Some("127.0.0.1".to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_client_without_credentials_skips_login() {
        let mock = MockTransport::new();
        let client = ServiceClient::with_transport(config(""), mock.clone(), Arc::new(NoopLogger))
            .await
            .unwrap();

        assert!(mock.calls().is_empty());
        assert!(client.auth().token().is_none());
        assert_eq!(client.client_config().app_name.as_deref(), Some("app-127.0.0.1"));
    }

    #[tokio::test]
    async fn test_client_logs_in_and_attaches_token() {
        let mock = MockTransport::new();
        mock.enqueue(
            Method::POST,
            api_path::LOGIN,
            r#"{"accessToken":"abc","tokenTtl":18000}"#,
        );
        mock.set_default(
            Method::GET,
            api_path::INSTANCE_LIST,
            r#"{"name":"DEFAULT_GROUP@@orders","hosts":[]}"#,
        );
        let client =
            ServiceClient::with_transport(config("nacos"), mock.clone(), Arc::new(NoopLogger))
                .await
                .unwrap();

        client
            .naming()
            .get_service("orders", false, &InstanceParams::new())
            .await
            .unwrap();

        let login = &mock.calls_to(Method::POST, api_path::LOGIN)[0];
        assert_eq!(login.query_value("accessToken"), None);
        let list = &mock.calls_to(Method::GET, api_path::INSTANCE_LIST)[0];
        assert_eq!(list.query_value("accessToken"), Some("abc"));
    }

    #[tokio::test]
    async fn test_client_fails_when_login_fails() {
        let mock = MockTransport::new();
        mock.enqueue(Method::POST, api_path::LOGIN, r#"{"accessToken":"abc"}"#);

        let logger = Arc::new(NoopLogger);
        let result = ServiceClient::with_transport(config("nacos"), mock.clone(), logger).await;
        assert!(matches!(result, Err(ClientError::AuthFailed(_))));
    }

    #[tokio::test]
    async fn test_client_rejects_invalid_config() {
        let mock = MockTransport::new();
        let bad = ClientConfig {
            http_timeout_ms: 0,
            ..config("")
        };
        let result = ServiceClient::with_transport(bad, mock, Arc::new(NoopLogger)).await;
        assert!(matches!(result, Err(ClientError::InvalidConfig(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_heartbeats() {
        let mock = MockTransport::new();
        mock.set_default(
            Method::PUT,
            api_path::INSTANCE_BEAT,
            r#"{"clientBeatInterval":5000}"#,
        );
        let client = ServiceClient::with_transport(config(""), mock.clone(), Arc::new(NoopLogger))
            .await
            .unwrap();

        client
            .naming()
            .register_instance("10.0.0.1", 8080, "orders", &InstanceParams::new())
            .await
            .unwrap();
        client.shutdown();
        assert!(client.is_shutdown());
        tokio::time::sleep(Duration::from_secs(30)).await;

        assert_eq!(mock.calls_to(Method::PUT, api_path::INSTANCE_BEAT).len(), 1);
    }
}
