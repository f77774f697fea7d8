//! Authenticated gRPC channel.
//!
//! [`AuthLayer`] wraps a transport service and, for every outbound call,
//! fetches a fresh access token from a [`TokenSource`] and attaches it as an
//! `authorization: Bearer <token>` header. A failed fetch fails only that call,
//! with `Unauthenticated`.
//!
//! [`ChannelFactory`] builds the underlying [`Channel`], plaintext or TLS, and
//! waits for the endpoint to accept a connection before handing it out.

use super::credentials::TokenSource;
use crate::client::config::ChannelConfig;
use cyoda_calc_core::{Error, Result};
use futures::future::BoxFuture;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio_util::sync::CancellationToken;
use tonic::Status;
use tonic::codegen::http::{self, HeaderValue, header::AUTHORIZATION};
use tonic::transport::{Channel, ClientTlsConfig, Endpoint};
use tower::{BoxError, Layer, Service};

/// A channel whose every call carries a freshly fetched bearer token.
pub type AuthenticatedChannel = AuthService<Channel>;

/// Tower layer producing [`AuthService`].
#[derive(Clone)]
pub struct AuthLayer {
    tokens: Arc<dyn TokenSource>,
}

impl AuthLayer {
    pub fn new(tokens: Arc<dyn TokenSource>) -> Self {
        Self { tokens }
    }
}

impl<S> Layer<S> for AuthLayer {
    type Service = AuthService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AuthService {
            inner,
            tokens: Arc::clone(&self.tokens),
        }
    }
}

/// Attaches a per-call bearer credential before forwarding to `inner`.
#[derive(Clone)]
pub struct AuthService<S> {
    inner: S,
    tokens: Arc<dyn TokenSource>,
}

impl<S, B> Service<http::Request<B>> for AuthService<S>
where
    S: Service<http::Request<B>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Into<BoxError>,
    B: Send + 'static,
{
    type Response = S::Response;
    type Error = BoxError;
    type Future = BoxFuture<'static, core::result::Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<core::result::Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(Into::into)
    }

    fn call(&mut self, mut request: http::Request<B>) -> Self::Future {
        // Take the service that was driven to readiness and leave a clone behind.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let tokens = Arc::clone(&self.tokens);

        Box::pin(async move {
            let token = tokens.access_token().await.map_err(|err| {
                tracing::warn!(error = %err, "Could not obtain an access token for the call");
                Box::new(Status::from(err)) as BoxError
            })?;
            let value = HeaderValue::from_str(&format!("Bearer {token}")).map_err(|_| {
                Box::new(Status::unauthenticated(
                    "access token is not a valid header value",
                )) as BoxError
            })?;
            request.headers_mut().insert(AUTHORIZATION, value);
            inner.call(request).await.map_err(Into::into)
        })
    }
}

/// Builds authenticated channels to the streaming endpoint.
#[derive(Clone)]
pub struct ChannelFactory {
    config: ChannelConfig,
    tokens: Arc<dyn TokenSource>,
}

impl ChannelFactory {
    pub fn new(config: ChannelConfig, tokens: Arc<dyn TokenSource>) -> Self {
        Self { config, tokens }
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    fn endpoint(&self) -> Result<Endpoint> {
        let uri = self.config.endpoint_uri();
        let endpoint = Endpoint::from_shared(uri.clone()).map_err(|e| Error::ChannelError {
            context: format!("invalid endpoint {uri}: {e}"),
        })?;
        if self.config.use_tls {
            Ok(endpoint.tls_config(ClientTlsConfig::new().with_native_roots())?)
        } else {
            Ok(endpoint)
        }
    }

    /// Connects to the endpoint, retrying every `connect_retry` until a
    /// connection is established or `cancel` fires.
    #[tracing::instrument(skip_all, fields(endpoint = %self.config.endpoint_uri()))]
    pub async fn connect(&self, cancel: &CancellationToken) -> Result<AuthenticatedChannel> {
        let endpoint = self.endpoint()?;
        let layer = AuthLayer::new(Arc::clone(&self.tokens));
        let mut attempt: u64 = 0;

        loop {
            attempt += 1;
            match endpoint.connect().await {
                Ok(channel) => {
                    tracing::info!(attempt, "Channel connected");
                    return Ok(layer.layer(channel));
                }
                Err(err) => {
                    tracing::warn!(attempt, error = %err, "Channel not ready, retrying");
                }
            }

            tokio::select! {
                () = cancel.cancelled() => {
                    return Err(Error::ChannelError {
                        context: "shutdown requested before the channel became ready".to_string(),
                    });
                }
                () = tokio::time::sleep(self.config.connect_retry) => {}
            }
        }
    }
}
