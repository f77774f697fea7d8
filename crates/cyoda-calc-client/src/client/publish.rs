//! Publishing derived entities to the platform's REST API.

use crate::client::auth::{CredentialError, TokenSource};
use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::{Client, StatusCode, Url};
use core::time::Duration;
use serde_json::Value;
use std::sync::Arc;

/// Default number of entities the platform groups into one transaction.
pub const DEFAULT_TRANSACTION_WINDOW: u32 = 100;
/// Default platform-side transaction timeout.
pub const DEFAULT_TRANSACTION_TIMEOUT_MS: u32 = 20_000;

/// How often a publish is retried after a server error or a failed
/// connection, and how long to wait in between.
///
/// Delays grow exponentially from `base_delay`, capped at `max_delay`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub const fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay: Duration::from_secs(60),
        }
    }

    pub const fn none() -> Self {
        Self::new(0, Duration::ZERO)
    }

    /// Wait before retry number `retry` (1-based).
    pub fn delay(&self, retry: u32) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }
        let factor = 2u32.saturating_pow(retry - 1);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(1))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Could not refresh credentials: {0}")]
    Credentials(#[from] CredentialError),

    #[error("API URL cannot be a base for entity paths: {url}")]
    InvalidApiUrl { url: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl PublishError {
    /// Connection and timeout failures are worth another attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Http(err) if err.is_connect() || err.is_timeout())
    }
}

/// Status and body of a completed publish call. Non-2xx statuses are not
/// errors at this level; callers decide what counts as success.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishOutcome {
    pub status: StatusCode,
    pub body: String,
}

impl PublishOutcome {
    pub fn is_ok(&self) -> bool {
        self.status == StatusCode::OK
    }
}

/// Saves a JSON tree as entities of `model` at `version`.
#[async_trait]
pub trait EntityPublisher: Send + Sync + 'static {
    async fn publish(
        &self,
        body: &Value,
        model: &str,
        version: u32,
    ) -> Result<PublishOutcome, PublishError>;
}

/// [`EntityPublisher`] backed by the platform's REST API.
///
/// Requests carry the access token obtained at login. On a 401 the token is
/// refreshed through the [`TokenSource`] and the request is retried once.
/// Server errors and connection failures are retried according to the
/// [`RetryPolicy`]; the last response is returned once retries run out.
pub struct HttpEntityPublisher {
    http: Client,
    api_url: Url,
    tokens: Arc<dyn TokenSource>,
    access_token: RwLock<Option<String>>,
    transaction_window: u32,
    transaction_timeout_ms: u32,
    retry: RetryPolicy,
}

impl HttpEntityPublisher {
    pub fn new(http: Client, api_url: Url, tokens: Arc<dyn TokenSource>) -> Self {
        Self {
            http,
            api_url,
            tokens,
            access_token: RwLock::new(None),
            transaction_window: DEFAULT_TRANSACTION_WINDOW,
            transaction_timeout_ms: DEFAULT_TRANSACTION_TIMEOUT_MS,
            retry: RetryPolicy::default(),
        }
    }

    /// Seeds the publisher with the access token returned by login.
    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        *self.access_token.get_mut() = Some(token.into());
        self
    }

    pub fn with_transaction_window(mut self, window: u32) -> Self {
        self.transaction_window = window;
        self
    }

    pub fn with_transaction_timeout_ms(mut self, timeout_ms: u32) -> Self {
        self.transaction_timeout_ms = timeout_ms;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// `<api_url>/entity/JSON/TREE/<model>/<version>`
    pub fn save_url(&self, model: &str, version: u32) -> Result<Url, PublishError> {
        let version = version.to_string();
        let mut url = self.api_url.clone();
        url.path_segments_mut()
            .map_err(|()| PublishError::InvalidApiUrl {
                url: self.api_url.to_string(),
            })?
            .pop_if_empty()
            .extend(["entity", "JSON", "TREE", model, version.as_str()]);
        Ok(url)
    }

    async fn current_token(&self) -> Result<String, PublishError> {
        let cached = self.access_token.read().clone();
        if let Some(token) = cached {
            return Ok(token);
        }
        self.refresh_token().await
    }

    async fn refresh_token(&self) -> Result<String, PublishError> {
        let token = self.tokens.access_token().await?;
        *self.access_token.write() = Some(token.clone());
        Ok(token)
    }

    async fn send(&self, url: &Url, body: &Value, token: &str) -> Result<reqwest::Response, PublishError> {
        Ok(self
            .http
            .post(url.clone())
            .query(&[
                ("transactionWindow", self.transaction_window),
                ("transactionTimeoutMillis", self.transaction_timeout_ms),
            ])
            .bearer_auth(token)
            .json(body)
            .send()
            .await?)
    }
}

#[async_trait]
impl EntityPublisher for HttpEntityPublisher {
    #[tracing::instrument(skip(self, body))]
    async fn publish(
        &self,
        body: &Value,
        model: &str,
        version: u32,
    ) -> Result<PublishOutcome, PublishError> {
        let url = self.save_url(model, version)?;

        let mut token = self.current_token().await?;
        let mut refreshed = false;
        let mut retries = 0;

        loop {
            let can_retry = retries < self.retry.max_retries;
            match self.send(&url, body, &token).await {
                Ok(response) if response.status() == StatusCode::UNAUTHORIZED && !refreshed => {
                    tracing::debug!("Access token rejected, refreshing");
                    refreshed = true;
                    token = self.refresh_token().await?;
                    continue;
                }
                Ok(response) if response.status().is_server_error() && can_retry => {
                    tracing::warn!(status = %response.status(), retries, "Publish failed, retrying");
                }
                Ok(response) => {
                    let status = response.status();
                    let body = response.text().await?;
                    return Ok(PublishOutcome { status, body });
                }
                Err(err) if err.is_transient() && can_retry => {
                    tracing::warn!(error = %err, retries, "Publish failed, retrying");
                }
                Err(err) => return Err(err),
            }

            retries += 1;
            tokio::time::sleep(self.retry.delay(retries)).await;
        }
    }
}
