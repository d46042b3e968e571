//! Configuration center service
//!
//! Reads, publishes and removes configs, and watches a config key with the
//! MD5-fingerprint long-poll protocol.

pub mod cache;
pub mod listener;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::constants::{api_path, key};
use crate::error::{ClientError, Result};
use crate::log::Logger;
use crate::options::ClientConfig;
use crate::param::{ConfigParams, listening_configs};
use crate::transport::{HttpRequest, Transport};

use self::cache::ConfigCache;
use self::listener::{ConfigChangeListener, ConfigResponse};

/// Nacos-compatible config service over the v1 HTTP open API.
pub struct ConfigService {
    config: Arc<ClientConfig>,
    transport: Arc<dyn Transport>,
    cache: Arc<ConfigCache>,
    logger: Arc<dyn Logger>,
    cancel: CancellationToken,
}

/// Identity of one watched config
#[derive(Clone, Debug)]
struct WatchKey {
    data_id: String,
    group: String,
    tenant: String,
}

impl WatchKey {
    fn poll_request(&self, md5: &str, timeout: Duration) -> HttpRequest {
        HttpRequest::post(api_path::CONFIG_LISTENER)
            .form(
                key::LISTENING_CONFIGS,
                listening_configs(&self.data_id, &self.group, md5, &self.tenant),
            )
            .long_poll(timeout)
    }

    async fn fetch(&self, transport: &dyn Transport) -> Result<String> {
        fetch_config(transport, &self.data_id, &self.group, &self.tenant).await
    }
}

impl ConfigService {
    pub fn new(
        config: Arc<ClientConfig>,
        transport: Arc<dyn Transport>,
        logger: Arc<dyn Logger>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            transport,
            cache: Arc::new(ConfigCache::new()),
            logger,
            cancel,
        }
    }

    pub fn cache(&self) -> &Arc<ConfigCache> {
        &self.cache
    }

    /// Fetch a config's content and remember it as the last known value.
    pub async fn get_config(
        &self,
        data_id: &str,
        group: &str,
        params: &ConfigParams,
    ) -> Result<String> {
        let tenant = params.tenant_or(&self.config.default_tenant);
        let content = fetch_config(self.transport.as_ref(), data_id, group, &tenant).await?;
        self.cache.update(data_id, group, &tenant, &content);
        Ok(content)
    }

    /// Publish a config. Returns the server's verdict.
    pub async fn publish_config(
        &self,
        data_id: &str,
        group: &str,
        content: &str,
        params: &ConfigParams,
    ) -> Result<bool> {
        let tenant = params.tenant_or(&self.config.default_tenant);
        let mut request = HttpRequest::post(api_path::CONFIG)
            .form(key::DATA_ID, data_id)
            .form(key::GROUP, group)
            .form(key::CONTENT, content);
        if !tenant.is_empty() {
            request = request.form(key::TENANT, tenant);
        }
        let app_name = params
            .app_name
            .clone()
            .unwrap_or_else(|| self.config.resolved_app_name());
        request = request.form(key::APP_NAME, app_name);
        if let Some(config_type) = &params.config_type {
            request = request.form(key::TYPE, config_type.clone());
        }
        if let Some(tag) = &params.tag {
            request = request.form(key::TAG, tag.clone());
        }

        let body = self.transport.execute(request).await?;
        let published = parse_bool(&body)?;
        self.logger.debug(&format!(
            "publish config {}+{}: {}",
            data_id, group, published
        ));
        Ok(published)
    }

    /// Remove a config. Returns the server's verdict.
    pub async fn remove_config(
        &self,
        data_id: &str,
        group: &str,
        params: &ConfigParams,
    ) -> Result<bool> {
        let tenant = params.tenant_or(&self.config.default_tenant);
        let mut request = HttpRequest::delete(api_path::CONFIG)
            .query(key::DATA_ID, data_id)
            .query(key::GROUP, group);
        if !tenant.is_empty() {
            request = request.query(key::TENANT, tenant.clone());
        }

        let body = self.transport.execute(request).await?;
        let removed = parse_bool(&body)?;
        if removed {
            self.cache.remove(data_id, group, &tenant);
        }
        Ok(removed)
    }

    /// Watch a config key with long polling.
    ///
    /// Each change is fetched in full and handed to `listener`. The first
    /// transport or protocol error is sent on the returned channel and ends
    /// the watch; client shutdown ends it with the channel closed.
    pub fn listen_config(
        &self,
        data_id: &str,
        group: &str,
        params: &ConfigParams,
        listener: Arc<dyn ConfigChangeListener>,
    ) -> mpsc::Receiver<ClientError> {
        let (tx, rx) = mpsc::channel(1);
        let watch = WatchKey {
            data_id: data_id.to_string(),
            group: group.to_string(),
            tenant: params.tenant_or(&self.config.default_tenant),
        };
        let transport = self.transport.clone();
        let cache = self.cache.clone();
        let logger = self.logger.clone();
        let cancel = self.cancel.clone();
        let timeout = self.config.listen_interval();

        tokio::spawn(async move {
            let mut md5 = cache.md5(&watch.data_id, &watch.group, &watch.tenant);
            loop {
                let request = watch.poll_request(&md5, timeout);

                let polled = tokio::select! {
                    _ = cancel.cancelled() => return,
                    polled = transport.execute(request) => polled,
                };
                let changed = match polled {
                    Ok(body) => !String::from_utf8_lossy(&body).trim().is_empty(),
                    Err(e) => {
                        logger.error(&format!(
                            "listen config {}+{} failed: {}",
                            watch.data_id, watch.group, e
                        ));
                        let _ = tx.send(e).await;
                        return;
                    }
                };
                if !changed {
                    continue;
                }

                let fetched = tokio::select! {
                    _ = cancel.cancelled() => return,
                    fetched = watch.fetch(transport.as_ref()) => fetched,
                };
                let content = match fetched {
                    Ok(content) => content,
                    Err(e) => {
                        logger.error(&format!(
                            "fetch changed config {}+{} failed: {}",
                            watch.data_id, watch.group, e
                        ));
                        let _ = tx.send(e).await;
                        return;
                    }
                };

                md5 = cache.update(&watch.data_id, &watch.group, &watch.tenant, &content);
                logger.info(&format!(
                    "config {}+{} changed, md5={}",
                    watch.data_id, watch.group, md5
                ));
                listener.receive_config_info(ConfigResponse {
                    data_id: watch.data_id.clone(),
                    group: watch.group.clone(),
                    tenant: watch.tenant.clone(),
                    content,
                    md5: md5.clone(),
                });
            }
        });
        rx
    }
}

async fn fetch_config(
    transport: &dyn Transport,
    data_id: &str,
    group: &str,
    tenant: &str,
) -> Result<String> {
    let mut request = HttpRequest::get(api_path::CONFIG)
        .query(key::DATA_ID, data_id)
        .query(key::GROUP, group);
    if !tenant.is_empty() {
        request = request.query(key::TENANT, tenant);
    }
    let body = transport.execute(request).await?;
    String::from_utf8(body.to_vec())
        .map_err(|e| ClientError::Protocol(format!("config content is not utf-8: {}", e)))
}

fn parse_bool(body: &[u8]) -> Result<bool> {
    match String::from_utf8_lossy(body).trim() {
        "true" => Ok(true),
        "false" => Ok(false),
        other => Err(ClientError::Protocol(format!(
            "expected true or false, got {}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use reqwest::Method;

    use super::*;
    use crate::log::NoopLogger;
    use crate::param::md5_hex;
    use crate::transport::mock::MockTransport;

    fn service(mock: &Arc<MockTransport>, cancel: CancellationToken) -> ConfigService {
        let config = ClientConfig {
            discovery_ip: Some("10.0.0.9".to_string()),
            ..Default::default()
        }
        .resolve()
        .unwrap();
        ConfigService::new(Arc::new(config), mock.clone(), Arc::new(NoopLogger), cancel)
    }

    fn channel_listener() -> (
        Arc<dyn ConfigChangeListener>,
        mpsc::UnboundedReceiver<ConfigResponse>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let listener: Arc<dyn ConfigChangeListener> = Arc::new(move |info: ConfigResponse| {
            let _ = tx.send(info);
        });
        (listener, rx)
    }

    #[tokio::test]
    async fn test_get_config_records_content() {
        let mock = MockTransport::new();
        mock.enqueue(Method::GET, api_path::CONFIG, "port: 8080");
        let service = service(&mock, CancellationToken::new());

        let content = service
            .get_config("app.yml", "DEFAULT_GROUP", &ConfigParams::new().tenant("dev"))
            .await
            .unwrap();
        assert_eq!(content, "port: 8080");
        assert_eq!(
            service.cache().md5("app.yml", "DEFAULT_GROUP", "dev"),
            md5_hex("port: 8080")
        );

        let call = &mock.calls()[0];
        assert_eq!(call.query_value("dataId"), Some("app.yml"));
        assert_eq!(call.query_value("group"), Some("DEFAULT_GROUP"));
        assert_eq!(call.query_value("tenant"), Some("dev"));
    }

    #[tokio::test]
    async fn test_publish_and_remove_config() {
        let mock = MockTransport::new();
        mock.enqueue(Method::POST, api_path::CONFIG, "true");
        mock.enqueue(Method::DELETE, api_path::CONFIG, "false");
        let service = service(&mock, CancellationToken::new());

        let published = service
            .publish_config(
                "app.yml",
                "DEFAULT_GROUP",
                "port: 8080",
                &ConfigParams::new().config_type("yaml"),
            )
            .await
            .unwrap();
        assert!(published);

        let removed = service
            .remove_config("app.yml", "DEFAULT_GROUP", &ConfigParams::new())
            .await
            .unwrap();
        assert!(!removed);

        let publish = &mock.calls_to(Method::POST, api_path::CONFIG)[0];
        assert_eq!(publish.form_value("content"), Some("port: 8080"));
        assert_eq!(publish.form_value("type"), Some("yaml"));
        assert_eq!(publish.form_value("appName"), Some("app-10.0.0.9"));
        assert_eq!(publish.form_value("tenant"), None);
        assert_eq!(publish.form_value("tag"), None);
    }

    #[tokio::test]
    async fn test_publish_rejects_unexpected_body() {
        let mock = MockTransport::new();
        mock.enqueue(Method::POST, api_path::CONFIG, "<html>");
        let service = service(&mock, CancellationToken::new());

        let err = service
            .publish_config("app.yml", "DEFAULT_GROUP", "x", &ConfigParams::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Protocol(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_listen_config_fetches_on_change() {
        let mock = MockTransport::new();
        mock.enqueue(Method::POST, api_path::CONFIG_LISTENER, "");
        mock.enqueue(
            Method::POST,
            api_path::CONFIG_LISTENER,
            "app.yml%02DEFAULT_GROUP%01",
        );
        mock.enqueue(Method::GET, api_path::CONFIG, "port: 9090");
        let service = service(&mock, CancellationToken::new());
        let (listener, mut changes) = channel_listener();

        let _errors =
            service.listen_config("app.yml", "DEFAULT_GROUP", &ConfigParams::new(), listener);

        let change = changes.recv().await.unwrap();
        assert_eq!(change.content, "port: 9090");
        assert_eq!(change.key(), "app.yml+DEFAULT_GROUP");
        assert_eq!(change.md5, md5_hex("port: 9090"));

        mock.wait_for_calls(4).await;
        let post = (Method::POST, api_path::CONFIG_LISTENER.to_string());
        let get = (Method::GET, api_path::CONFIG.to_string());
        assert_eq!(
            mock.routes(),
            vec![post.clone(), post.clone(), get, post]
        );

        let calls = mock.calls();
        assert_eq!(calls[0].long_poll, Some(Duration::from_secs(30)));
        assert_eq!(
            calls[0].form_value("Listening-Configs"),
            Some("app.yml\u{2}DEFAULT_GROUP\u{2}\u{1}")
        );
        let expected = listening_configs("app.yml", "DEFAULT_GROUP", &md5_hex("port: 9090"), "");
        assert_eq!(calls[3].form_value("Listening-Configs"), Some(expected.as_str()));
        assert!(changes.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_listen_config_seeds_fingerprint_from_get() {
        let mock = MockTransport::new();
        mock.enqueue(Method::GET, api_path::CONFIG, "port: 8080");
        let service = service(&mock, CancellationToken::new());
        service
            .get_config("app.yml", "DEFAULT_GROUP", &ConfigParams::new())
            .await
            .unwrap();

        let (listener, _changes) = channel_listener();
        let _errors =
            service.listen_config("app.yml", "DEFAULT_GROUP", &ConfigParams::new(), listener);
        mock.wait_for_calls(2).await;

        let expected = listening_configs("app.yml", "DEFAULT_GROUP", &md5_hex("port: 8080"), "");
        assert_eq!(mock.calls()[1].form_value("Listening-Configs"), Some(expected.as_str()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_listen_config_stops_on_error() {
        let mock = MockTransport::new();
        mock.enqueue_error(
            Method::POST,
            api_path::CONFIG_LISTENER,
            ClientError::Transport("connection refused".to_string()),
        );
        let service = service(&mock, CancellationToken::new());
        let (listener, mut changes) = channel_listener();

        let mut errors =
            service.listen_config("app.yml", "DEFAULT_GROUP", &ConfigParams::new(), listener);

        let err = errors.recv().await.unwrap();
        assert!(err.is_transport());
        assert!(errors.recv().await.is_none());
        assert_eq!(mock.calls().len(), 1);
        assert!(changes.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_listen_config_stops_on_fetch_error() {
        let mock = MockTransport::new();
        mock.enqueue(Method::POST, api_path::CONFIG_LISTENER, "app.yml%02DEFAULT_GROUP%01");
        mock.enqueue_error(
            Method::GET,
            api_path::CONFIG,
            ClientError::RequestFailed {
                status: 500,
                body: "oops".to_string(),
            },
        );
        let service = service(&mock, CancellationToken::new());
        let (listener, _changes) = channel_listener();

        let mut errors =
            service.listen_config("app.yml", "DEFAULT_GROUP", &ConfigParams::new(), listener);

        let err = errors.recv().await.unwrap();
        assert!(matches!(err, ClientError::RequestFailed { status: 500, .. }));
        assert!(errors.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_listen_config_ends_on_shutdown() {
        let mock = MockTransport::new();
        let cancel = CancellationToken::new();
        let service = service(&mock, cancel.clone());
        let (listener, _changes) = channel_listener();

        let mut errors =
            service.listen_config("app.yml", "DEFAULT_GROUP", &ConfigParams::new(), listener);
        mock.wait_for_calls(1).await;
        cancel.cancel();

        assert!(errors.recv().await.is_none());
        assert_eq!(mock.calls().len(), 1);
    }
}
