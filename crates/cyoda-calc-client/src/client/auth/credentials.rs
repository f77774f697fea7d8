//! Bearer credential provider.
//!
//! [`CredentialProvider`] exchanges a long-lived refresh token for short-lived
//! access tokens against the platform's refresh endpoint. Access tokens are
//! never cached: every caller that needs one triggers a fresh fetch, which is
//! what lets the gRPC layer attach a current credential to every call.
//!
//! The refresh token itself is only replaced by [`CredentialProvider::login`]
//! and [`CredentialProvider::set_refresh_token`].

use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::{Client, StatusCode, Url, header};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tonic::Status;

/// Errors raised while logging in or refreshing an access token.
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    /// An access token was requested before any refresh token was stored.
    #[error("No refresh token has been set")]
    MissingRefreshToken,

    /// The refresh endpoint answered with a non-OK status.
    #[error("Failed to refresh tokens: {status}")]
    RefreshFailed { status: StatusCode },

    /// The endpoint answered OK but the expected field was missing.
    #[error("Malformed token response, missing `{field}`: {body}")]
    MalformedResponse { field: &'static str, body: String },

    /// The login endpoint rejected the credentials.
    #[error("Login failed: {status}")]
    LoginFailed { status: StatusCode },

    /// The HTTP request itself failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// A blocking fetch could not build its runtime.
    #[error("Runtime error: {0}")]
    Runtime(#[from] std::io::Error),
}

impl From<CredentialError> for Status {
    fn from(err: CredentialError) -> Self {
        Status::unauthenticated(err.to_string())
    }
}

/// Tokens returned by a successful login.
#[derive(Clone, PartialEq, Eq)]
pub struct BearerTokens {
    pub access_token: String,
    pub refresh_token: String,
}

impl core::fmt::Debug for BearerTokens {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("BearerTokens { .. }")
    }
}

/// Anything able to produce a fresh bearer access token.
#[async_trait]
pub trait TokenSource: Send + Sync + 'static {
    async fn access_token(&self) -> Result<String, CredentialError>;
}

#[derive(Serialize)]
struct LoginBody<'a> {
    username: &'a str,
    password: &'a str,
}

/// Obtains access tokens from a refresh token.
///
/// Safe to share between concurrent RPC calls; each call performs its own
/// HTTP round trip.
pub struct CredentialProvider {
    http: Client,
    refresh_url: Url,
    refresh_token: RwLock<Option<String>>,
}

impl CredentialProvider {
    /// Creates a provider that refreshes against `refresh_url`.
    pub fn new(http: Client, refresh_url: Url) -> Self {
        Self {
            http,
            refresh_url,
            refresh_token: RwLock::new(None),
        }
    }

    pub fn refresh_url(&self) -> &Url {
        &self.refresh_url
    }

    /// Replaces the stored refresh token.
    pub fn set_refresh_token(&self, token: impl Into<String>) {
        *self.refresh_token.write() = Some(token.into());
    }

    pub fn has_refresh_token(&self) -> bool {
        self.refresh_token.read().is_some()
    }

    /// Logs in with a username and password, storing the returned refresh
    /// token.
    #[tracing::instrument(skip(self, password), fields(login_url = %login_url))]
    pub async fn login(
        &self,
        login_url: &Url,
        username: &str,
        password: &str,
    ) -> Result<BearerTokens, CredentialError> {
        let response = self
            .http
            .post(login_url.clone())
            .header("X-Requested-With", "XMLHttpRequest")
            .json(&LoginBody { username, password })
            .send()
            .await?;

        let status = response.status();
        if status != StatusCode::OK {
            tracing::warn!(%status, "Login rejected");
            return Err(CredentialError::LoginFailed { status });
        }

        let body: Value = response.json().await?;
        let access_token = string_field(&body, "token")?;
        let refresh_token = string_field(&body, "refreshToken")?;
        self.set_refresh_token(refresh_token.clone());

        tracing::info!("Logged in");
        Ok(BearerTokens {
            access_token,
            refresh_token,
        })
    }

    /// Fetches a fresh access token from `refresh_url`.
    ///
    /// The current refresh token is sent as a bearer credential. Only an HTTP
    /// 200 whose JSON object carries a `token` field succeeds.
    pub async fn fetch_access_token(&self, refresh_url: &Url) -> Result<String, CredentialError> {
        let refresh_token = self
            .refresh_token
            .read()
            .clone()
            .ok_or(CredentialError::MissingRefreshToken)?;

        let response = self
            .http
            .get(refresh_url.clone())
            .bearer_auth(refresh_token)
            .header(header::CONTENT_TYPE, "application/json")
            .send()
            .await?;

        let status = response.status();
        if status != StatusCode::OK {
            tracing::debug!(%status, "Token refresh rejected");
            return Err(CredentialError::RefreshFailed { status });
        }

        let body: Value = response.json().await?;
        string_field(&body, "token")
    }

    /// Synchronous variant of [`fetch_access_token`](Self::fetch_access_token)
    /// for callers that cannot await.
    ///
    /// Drives the request on a private current-thread runtime, so it must not
    /// be called from inside an async context.
    pub fn fetch_access_token_blocking(&self, refresh_url: &Url) -> Result<String, CredentialError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        runtime.block_on(self.fetch_access_token(refresh_url))
    }
}

#[async_trait]
impl TokenSource for CredentialProvider {
    async fn access_token(&self) -> Result<String, CredentialError> {
        self.fetch_access_token(&self.refresh_url).await
    }
}

#[async_trait]
impl<T: TokenSource + ?Sized> TokenSource for Arc<T> {
    async fn access_token(&self) -> Result<String, CredentialError> {
        (**self).access_token().await
    }
}

fn string_field(body: &Value, field: &'static str) -> Result<String, CredentialError> {
    body.get(field)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| CredentialError::MalformedResponse {
            field,
            body: body.to_string(),
        })
}
