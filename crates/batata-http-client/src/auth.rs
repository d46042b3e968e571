//! Authentication session
//!
//! Logs in with username/password, keeps the access token and its TTL, and
//! re-logs-in in the background shortly before the token expires.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use serde::Deserialize;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::constants::{api_path, key};
use crate::error::{ClientError, Result};
use crate::log::Logger;
use crate::transport::{HttpRequest, Transport};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct LoginResponse {
    access_token: Option<String>,
    token_ttl: Option<u64>,
}

/// Token obtained by the last successful login
#[derive(Clone, Debug, PartialEq)]
pub struct TokenInfo {
    pub access_token: String,
    pub ttl: Duration,
    pub last_refresh: Instant,
}

/// Login state shared by every request of a client.
pub struct AuthSession {
    transport: Arc<dyn Transport>,
    username: String,
    password: String,
    token: RwLock<Option<TokenInfo>>,
    logger: Arc<dyn Logger>,
}

impl AuthSession {
    /// `transport` is used unwrapped; login requests never carry a token.
    pub fn new(
        transport: Arc<dyn Transport>,
        username: &str,
        password: &str,
        logger: Arc<dyn Logger>,
    ) -> Self {
        Self {
            transport,
            username: username.to_string(),
            password: password.to_string(),
            token: RwLock::new(None),
            logger,
        }
    }

    /// Whether credentials are configured
    pub fn is_enabled(&self) -> bool {
        !self.username.is_empty()
    }

    /// Current access token, if a login has succeeded.
    pub fn token(&self) -> Option<String> {
        self.token.read().as_ref().map(|t| t.access_token.clone())
    }

    pub fn token_info(&self) -> Option<TokenInfo> {
        self.token.read().clone()
    }

    /// Log in and store the token. A no-op when credentials are absent.
    pub async fn login(&self) -> Result<()> {
        if !self.is_enabled() {
            return Ok(());
        }

        let request = HttpRequest::post(api_path::LOGIN)
            .form(key::USERNAME, self.username.clone())
            .form(key::PASSWORD, self.password.clone());
        let body = self
            .transport
            .execute(request)
            .await
            .map_err(|e| ClientError::AuthFailed(format!("login request failed: {}", e)))?;

        let response: LoginResponse = serde_json::from_slice(&body).map_err(|e| {
            ClientError::AuthFailed(format!("cannot parse login response: {}", e))
        })?;
        let access_token = response
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                ClientError::AuthFailed("login response has no accessToken".to_string())
            })?;
        let ttl = match response.token_ttl {
            Some(ttl) if ttl > 0 => Duration::from_secs(ttl),
            _ => {
                return Err(ClientError::AuthFailed(
                    "login response has no tokenTtl".to_string(),
                ));
            }
        };

        *self.token.write() = Some(TokenInfo {
            access_token,
            ttl,
            last_refresh: Instant::now(),
        });
        self.logger.debug(&format!(
            "login succeeded, token valid for {}s",
            ttl.as_secs()
        ));
        Ok(())
    }

    /// Start the refresh loop: sleep 90% of the TTL, then log in again.
    ///
    /// The first failed refresh ends the loop; requests keep using the last
    /// token. Returns `None` when there is no token to refresh.
    pub fn spawn_refresh(self: &Arc<Self>, cancel: CancellationToken) -> Option<JoinHandle<()>> {
        if !self.is_enabled() || self.token.read().is_none() {
            return None;
        }

        let session = Arc::clone(self);
        Some(tokio::spawn(async move {
            loop {
                let Some(ttl) = session.token_info().map(|t| t.ttl) else {
                    return;
                };
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(ttl * 9 / 10) => {}
                }
                if let Err(e) = session.login().await {
                    session
                        .logger
                        .error(&format!("token refresh failed, giving up: {}", e));
                    return;
                }
            }
        }))
    }
}

/// Transport decorator that appends `accessToken` once a token exists.
pub struct SessionTransport {
    inner: Arc<dyn Transport>,
    session: Arc<AuthSession>,
}

impl SessionTransport {
    pub fn new(inner: Arc<dyn Transport>, session: Arc<AuthSession>) -> Self {
        Self { inner, session }
    }
}

#[async_trait]
impl Transport for SessionTransport {
    async fn execute(&self, request: HttpRequest) -> Result<Bytes> {
        let request = match self.session.token() {
            Some(token) => request.query(key::ACCESS_TOKEN, token),
            None => request,
        };
        self.inner.execute(request).await
    }
}
