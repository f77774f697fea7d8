use anyhow::Context;
use clap::Parser;
use cyoda_calc_client::client::{
    auth::{ChannelFactory, CredentialProvider, TokenSource},
    config::{CliArgs, ClientConfig},
    lifecycle::{Lifecycle, shutdown_signal},
    nobel::NobelPrizeProcessor,
    processing::{CalculationDispatcher, ProcessorRegistry},
    publish::HttpEntityPublisher,
    session::{GrpcConnector, Session, SessionState},
    telemetry::init_telemetry,
};
use std::sync::Arc;

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let mut config = ClientConfig::try_from(args)?;

    let providers = init_telemetry()?;

    if cfg!(debug_assertions) {
        tracing::info!("Starting calculation member with full config: {config:#?}");
    } else {
        tracing::info!(
            grpc = %config.channel.endpoint_uri(),
            api = %config.api_url,
            "Starting calculation member"
        );
    }

    let http = reqwest::Client::builder()
        .timeout(config.http_request_timeout)
        .connect_timeout(config.http_connect_timeout)
        .build()
        .context("failed to build HTTP client")?;

    let credentials = Arc::new(CredentialProvider::new(
        http.clone(),
        config.refresh_url.clone(),
    ));
    let secret = config.take_secret().unwrap_or_default();
    let tokens = credentials
        .login(&config.login_url, &config.client_id, &secret)
        .await
        .context("login failed")?;
    drop(secret);

    let token_source: Arc<dyn TokenSource> = credentials;
    let publisher = HttpEntityPublisher::new(http, config.api_url.clone(), Arc::clone(&token_source))
        .with_access_token(tokens.access_token);

    let registry = ProcessorRegistry::new().with(Arc::new(NobelPrizeProcessor::new(Arc::new(
        publisher,
    ))))?;
    tracing::info!(processors = ?registry.names(), "Processors registered");

    let connector = GrpcConnector::new(ChannelFactory::new(config.channel.clone(), token_source));
    let session = Session::new(
        config.session.clone(),
        Arc::new(connector),
        CalculationDispatcher::new(Arc::new(registry)),
    );
    let lifecycle = Lifecycle::new(Arc::new(session));

    let outcome = tokio::select! {
        result = lifecycle.on_ready() => result.map(|_| ()).context("failed to start session"),
        () = shutdown_signal() => Ok(()),
    };

    // Started without interruption: keep streaming until asked to stop.
    if outcome.is_ok() && lifecycle.session().state() == SessionState::Streaming {
        shutdown_signal().await;
    }

    tracing::info!("Stopping calculation member");
    let report = lifecycle.on_shutdown().await;
    tracing::info!(clean = report.clean, "Calculation member stopped");

    providers.shutdown();
    outcome
}
