//! Request transport
//!
//! Every engine talks to the registry through the [`Transport`] trait. The
//! production implementation, [`HttpTransport`], is a thin reqwest wrapper
//! that adds the open API headers and maps non-success responses to errors.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, Method};

use crate::constants::{self, LISTEN_TIMEOUT_GRACE, header};
use crate::error::{ClientError, Result};
use crate::log::Logger;
use crate::options::ClientConfig;

/// A single request against the registry open API.
#[derive(Clone, Debug, PartialEq)]
pub struct HttpRequest {
    pub method: Method,
    /// API path relative to the context path, e.g. "/v1/ns/instance"
    pub path: String,
    pub query: Vec<(String, String)>,
    pub form: Vec<(String, String)>,
    /// Long-poll timeout; set only for config listening
    pub long_poll: Option<Duration>,
}

impl HttpRequest {
    pub fn new(method: Method, path: &str) -> Self {
        Self {
            method,
            path: path.to_string(),
            query: Vec::new(),
            form: Vec::new(),
            long_poll: None,
        }
    }

    pub fn get(path: &str) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: &str) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: &str) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn delete(path: &str) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn query(mut self, key: &str, value: impl Into<String>) -> Self {
        self.query.push((key.to_string(), value.into()));
        self
    }

    pub fn form(mut self, key: &str, value: impl Into<String>) -> Self {
        self.form.push((key.to_string(), value.into()));
        self
    }

    pub fn long_poll(mut self, timeout: Duration) -> Self {
        self.long_poll = Some(timeout);
        self
    }

    /// Value of a query parameter, if present.
    pub fn query_value(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Value of a form field, if present.
    pub fn form_value(&self, key: &str) -> Option<&str> {
        self.form
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Executes requests against the registry and returns the raw response body.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn execute(&self, request: HttpRequest) -> Result<Bytes>;
}

/// reqwest-backed transport for the Nacos v1 open API.
pub struct HttpTransport {
    client: Client,
    listen_client: Client,
    base_url: String,
    enable_log: bool,
    logger: Arc<dyn Logger>,
}

impl HttpTransport {
    pub fn new(config: &ClientConfig, logger: Arc<dyn Logger>) -> Result<Self> {
        let client = Client::builder().timeout(config.http_timeout()).build()?;
        let listen_client = Client::builder()
            .timeout(config.listen_interval() + LISTEN_TIMEOUT_GRACE)
            .build()?;

        Ok(Self {
            client,
            listen_client,
            base_url: config.base_url(),
            enable_log: config.enable_request_log,
            logger,
        })
    }

    fn build_url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn execute(&self, request: HttpRequest) -> Result<Bytes> {
        let url = self.build_url(&request.path);
        let client = if request.long_poll.is_some() {
            &self.listen_client
        } else {
            &self.client
        };

        let mut builder = client
            .request(request.method.clone(), &url)
            .header(header::CLIENT_VERSION, constants::CLIENT_VERSION)
            .header(header::USER_AGENT, constants::CLIENT_VERSION)
            .header(header::CONNECTION, "Keep-Alive")
            .header(header::REQUEST_ID, uuid::Uuid::new_v4().to_string())
            .header(header::REQUEST_MODULE, "Naming")
            .header(header::CONTENT_TYPE, header::FORM_CONTENT_TYPE);

        if let Some(timeout) = request.long_poll {
            builder = builder.header(
                header::LONG_PULLING_TIMEOUT,
                timeout.as_millis().to_string(),
            );
        }
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if !request.form.is_empty() {
            let body = serde_urlencoded::to_string(&request.form)
                .map_err(|e| ClientError::Protocol(format!("failed to encode form: {}", e)))?;
            builder = builder.body(body);
        }

        if self.enable_log {
            self.logger.debug(&format!(
                "http request: {} {} query={:?} form={:?}",
                request.method, url, request.query, request.form
            ));
        }

        let response = builder.send().await.map_err(|e| {
            self.logger
                .error(&format!("http request {} {} failed: {}", request.method, url, e));
            ClientError::from(e)
        })?;

        let status = response.status();
        let body = response.bytes().await?;

        if !status.is_success() {
            let body = String::from_utf8_lossy(&body).to_string();
            self.logger.error(&format!(
                "http request {} {} failed with status {}: {}",
                request.method, url, status, body
            ));
            return Err(ClientError::RequestFailed {
                status: status.as_u16(),
                body,
            });
        }

        if self.enable_log {
            self.logger
                .debug(&format!("http response: {}", String::from_utf8_lossy(&body)));
        }

        Ok(body)
    }
}

#[cfg(test)]
pub(crate) mod mock {
    //! Scripted transport for engine tests.

    use std::collections::{HashMap, VecDeque};

    use parking_lot::Mutex;
    use tokio::sync::Notify;

    use super::*;

    type Route = (Method, String);

    /// Records every request and replays queued responses per (method, path).
    ///
    /// With nothing queued, a route falls back to its default response. A
    /// long-poll request with neither waits out its timeout and returns an
    /// empty body, like a server with no changes.
    #[derive(Default)]
    pub struct MockTransport {
        calls: Mutex<Vec<HttpRequest>>,
        queued: Mutex<HashMap<Route, VecDeque<Result<Bytes>>>>,
        defaults: Mutex<HashMap<Route, String>>,
        notify: Notify,
    }

    impl MockTransport {
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        pub fn enqueue(&self, method: Method, path: &str, body: &str) {
            self.enqueue_result(method, path, Ok(Bytes::from(body.to_string())));
        }

        pub fn enqueue_error(&self, method: Method, path: &str, error: ClientError) {
            self.enqueue_result(method, path, Err(error));
        }

        fn enqueue_result(&self, method: Method, path: &str, result: Result<Bytes>) {
            self.queued
                .lock()
                .entry((method, path.to_string()))
                .or_default()
                .push_back(result);
        }

        pub fn set_default(&self, method: Method, path: &str, body: &str) {
            self.defaults
                .lock()
                .insert((method, path.to_string()), body.to_string());
        }

        pub fn calls(&self) -> Vec<HttpRequest> {
            self.calls.lock().clone()
        }

        pub fn calls_to(&self, method: Method, path: &str) -> Vec<HttpRequest> {
            self.calls
                .lock()
                .iter()
                .filter(|r| r.method == method && r.path == path)
                .cloned()
                .collect()
        }

        /// Sequence of (method, path) for every recorded call.
        pub fn routes(&self) -> Vec<(Method, String)> {
            self.calls
                .lock()
                .iter()
                .map(|r| (r.method.clone(), r.path.clone()))
                .collect()
        }

        /// Wait until at least `n` calls have been recorded.
        pub async fn wait_for_calls(&self, n: usize) {
            loop {
                let notified = self.notify.notified();
                if self.calls.lock().len() >= n {
                    return;
                }
                notified.await;
            }
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn execute(&self, request: HttpRequest) -> Result<Bytes> {
            let route = (request.method.clone(), request.path.clone());
            let long_poll = request.long_poll;
            self.calls.lock().push(request);
            self.notify.notify_waiters();
            tokio::task::yield_now().await;

            let queued = self
                .queued
                .lock()
                .get_mut(&route)
                .and_then(|queue| queue.pop_front());
            if let Some(result) = queued {
                return result;
            }
            if let Some(body) = self.defaults.lock().get(&route).cloned() {
                return Ok(Bytes::from(body));
            }
            if let Some(timeout) = long_poll {
                tokio::time::sleep(timeout).await;
                return Ok(Bytes::new());
            }
            Ok(Bytes::from_static(b"ok"))
        }
    }
}
