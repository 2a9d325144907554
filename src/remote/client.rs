//! reqwest-backed [`RemoteApi`] implementation.

use super::{RemoteApi, RemoteError};
use crate::config::RemoteConfig;
use crate::platform::{Clock, SystemClock};
use crate::store::{Credential, RuleStore};
use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Delay before retry number `retries` (zero-based): `initial * 2^retries`.
#[must_use]
pub fn backoff_delay(initial_ms: u64, retries: u32) -> Duration {
    let multiplier = 1u64.checked_shl(retries.min(63)).unwrap_or(u64::MAX);
    Duration::from_millis(initial_ms.saturating_mul(multiplier))
}

/// Token pair returned by the identity provider's refresh endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct RefreshedToken {
    pub access_token: String,
    pub refresh_token: String,
    /// Lifetime in seconds.
    pub expires_in: u64,
}

impl RefreshedToken {
    fn is_complete(&self) -> bool {
        !self.access_token.is_empty() && !self.refresh_token.is_empty() && self.expires_in > 0
    }
}

/// HTTP client for the bookmark service.
///
/// Only `429 Too Many Requests` is retried, up to `max_retries` times with
/// exponential backoff. Any other non-success status fails immediately and
/// transport errors are never retried.
pub struct RemoteClient {
    http: reqwest::Client,
    config: RemoteConfig,
    store: Arc<RuleStore>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for RemoteClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteClient")
            .field("base_url", &self.config.base_url)
            .field("max_retries", &self.config.max_retries)
            .finish_non_exhaustive()
    }
}

impl RemoteClient {
    /// Create a client that reads and refreshes credentials through `store`.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::Transport`] if the HTTP client cannot be built.
    pub fn new(config: RemoteConfig, store: Arc<RuleStore>) -> Result<Self, RemoteError> {
        let mut builder = reqwest::Client::builder();
        if config.timeout_secs > 0 {
            builder = builder.timeout(Duration::from_secs(config.timeout_secs));
        }
        let http = builder.build().map_err(|e| RemoteError::Transport {
            path: String::new(),
            message: format!("cannot build HTTP client: {e}"),
        })?;
        Ok(Self {
            http,
            config,
            store,
            clock: Arc::new(SystemClock),
        })
    }

    /// Use a different clock for token expiry checks.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Client configuration.
    #[must_use]
    pub fn config(&self) -> &RemoteConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{path}", self.config.base_url)
        } else {
            format!("{}/{path}", self.config.base_url)
        }
    }

    /// Exchange a refresh token for a new token pair.
    ///
    /// Returns `None` on any failure; callers fall back to the stored token.
    pub async fn refresh_token(&self, refresh_token: &str) -> Option<RefreshedToken> {
        let response = match self
            .http
            .post(&self.config.refresh_url)
            .json(&json!({ "refresh_token": refresh_token }))
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!("token refresh request failed: {e}");
                return None;
            }
        };

        let status = response.status();
        if !status.is_success() {
            warn!(status = status.as_u16(), "token refresh rejected");
            return None;
        }

        match response.json::<RefreshedToken>().await {
            Ok(token) if token.is_complete() => Some(token),
            Ok(_) => {
                warn!("token refresh response is missing fields");
                None
            }
            Err(e) => {
                warn!("cannot parse token refresh response: {e}");
                None
            }
        }
    }

    /// Send one request, retrying on 429. Returns the raw response body.
    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        token: &str,
    ) -> Result<String, RemoteError> {
        let url = self.url(path);
        let mut retries: u32 = 0;

        loop {
            let mut request = self.http.request(method.clone(), &url).bearer_auth(token);
            if let Some(body) = body {
                request = request.json(body);
            }

            let response = request.send().await.map_err(|e| RemoteError::Transport {
                path: path.to_owned(),
                message: e.to_string(),
            })?;

            let status = response.status();
            if status == StatusCode::TOO_MANY_REQUESTS && retries < self.config.max_retries {
                let delay = backoff_delay(self.config.initial_backoff_ms, retries);
                warn!(
                    path,
                    attempt = retries + 1,
                    delay_ms = delay.as_millis() as u64,
                    "rate limited, backing off"
                );
                tokio::time::sleep(delay).await;
                retries += 1;
                continue;
            }

            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(RemoteError::Api {
                    status: status.as_u16(),
                    status_text: status.canonical_reason().unwrap_or_default().to_owned(),
                    body,
                    path: path.to_owned(),
                });
            }

            debug!(%method, path, status = status.as_u16(), "request completed");
            return response.text().await.map_err(|e| RemoteError::Transport {
                path: path.to_owned(),
                message: format!("cannot read response body: {e}"),
            });
        }
    }

    async fn send_json(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        token: &str,
    ) -> Result<Value, RemoteError> {
        let text = self.send(method, path, body, token).await?;
        serde_json::from_str(&text).map_err(|e| RemoteError::Decode {
            path: path.to_owned(),
            message: e.to_string(),
        })
    }
}

#[async_trait]
impl RemoteApi for RemoteClient {
    async fn active_token(&self) -> Option<String> {
        let credential = self.store.credential().await?;
        if !credential.is_usable() {
            return None;
        }

        let now = self.clock.now_ms();
        if !credential.is_expiring_soon(now, self.config.token_expiry_buffer_ms()) {
            return Some(credential.access_token);
        }

        debug!(expires_at = ?credential.expires_at, "access token expiring, refreshing");
        let Some(refreshed) = self.refresh_token(&credential.refresh_token).await else {
            return Some(credential.access_token);
        };

        let renewed = Credential::from_login(
            refreshed.access_token,
            refreshed.refresh_token,
            refreshed.expires_in,
            self.clock.now_ms(),
        );
        let access_token = renewed.access_token.clone();
        match self.store.set_credential(renewed).await {
            Ok(()) => info!("access token refreshed"),
            Err(e) => warn!("refreshed token could not be persisted: {e}"),
        }
        Some(access_token)
    }

    async fn get(&self, path: &str, token: &str) -> Result<Value, RemoteError> {
        self.send_json(Method::GET, path, None, token).await
    }

    async fn post(&self, path: &str, body: &Value, token: &str) -> Result<Value, RemoteError> {
        self.send_json(Method::POST, path, Some(body), token).await
    }

    async fn put(&self, path: &str, body: &Value, token: &str) -> Result<Value, RemoteError> {
        self.send_json(Method::PUT, path, Some(body), token).await
    }

    async fn delete(&self, path: &str, token: &str) -> Result<Value, RemoteError> {
        let text = self.send(Method::DELETE, path, None, token).await?;
        Ok(serde_json::from_str(&text).unwrap_or_else(|_| json!({ "result": true })))
    }
}
