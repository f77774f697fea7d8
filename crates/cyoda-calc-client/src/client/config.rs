use anyhow::{Context, bail};
use clap::Parser;
use core::time::Duration;
use reqwest::Url;

/// Runtime configuration for the `cyoda-calc-client` binary.
///
/// These settings say where the platform lives, how this member logs in, and
/// how it announces itself on the event stream. All values are parsed from CLI
/// arguments or environment variables (a `.env` file is honoured), with
/// defaults that target a local platform.
#[derive(Parser, Clone)]
#[command(
    name = "cyoda-calc-client",
    version,
    about = "A calculation member that processes entity requests streamed over gRPC"
)]
pub struct CliArgs {
    /// Base URL of the platform's REST API, e.g. `https://my-namespace.cyoda.net/api`.
    ///
    /// Environment variable: `API_URL`
    #[arg(long, env = "API_URL", default_value_t = String::from("http://localhost:8082/api"))]
    pub api_url: String,

    /// Login endpoint. Defaults to `<API_URL>/auth/login`.
    ///
    /// Environment variable: `LOGIN_URL`
    #[arg(long, env = "LOGIN_URL")]
    pub login_url: Option<String>,

    /// Access token refresh endpoint. Defaults to `<API_URL>/auth/token`.
    ///
    /// Environment variable: `REFRESH_URL`
    #[arg(long, env = "REFRESH_URL")]
    pub refresh_url: Option<String>,

    /// User the member logs in as.
    ///
    /// Environment variable: `CLIENT_ID`
    #[arg(long, env = "CLIENT_ID", default_value_t = String::from("my-client-id"))]
    pub client_id: String,

    /// Password for `CLIENT_ID`. Only used for the initial login.
    ///
    /// Environment variable: `CLIENT_SECRET`
    #[arg(long, env = "CLIENT_SECRET", default_value_t = String::from("my-client-secret"), hide_default_value = true)]
    pub client_secret: String,

    /// Host of the gRPC streaming endpoint.
    ///
    /// Environment variable: `GRPC_SERVER`
    #[arg(long, env = "GRPC_SERVER", default_value_t = String::from("localhost"))]
    pub grpc_server: String,

    /// Port of the gRPC streaming endpoint.
    ///
    /// Environment variable: `GRPC_SERVER_PORT`
    #[arg(long, env = "GRPC_SERVER_PORT", default_value_t = 443)]
    pub grpc_server_port: u16,

    /// Negotiate TLS with the gRPC endpoint. Use `false` for plaintext.
    ///
    /// Environment variable: `GRPC_SERVER_USE_TLS`
    #[arg(long, env = "GRPC_SERVER_USE_TLS", default_value_t = true, action = clap::ArgAction::Set)]
    pub grpc_server_use_tls: bool,

    /// Owner announced in the join event.
    ///
    /// Environment variable: `MEMBER_OWNER`
    #[arg(long, env = "MEMBER_OWNER", default_value_t = String::from("CYODA"))]
    pub member_owner: String,

    /// Comma separated capability tags announced in the join event.
    ///
    /// Environment variable: `MEMBER_TAGS`
    #[arg(
        long,
        env = "MEMBER_TAGS",
        value_delimiter = ',',
        default_values_t = [String::from("default"), String::from("prizes")]
    )]
    pub member_tags: Vec<String>,

    /// Source attribute stamped on every outbound event.
    ///
    /// Environment variable: `EVENT_SOURCE`
    #[arg(long, env = "EVENT_SOURCE", default_value_t = String::from("SimpleSample"))]
    pub event_source: String,

    /// How long shutdown waits for the stream to drain before force-closing.
    ///
    /// Environment variable: `DRAIN_TIMEOUT_SECS`
    #[arg(long, env = "DRAIN_TIMEOUT_SECS", default_value_t = 10)]
    pub drain_timeout_secs: u64,

    /// Timeout for a single HTTP request to the REST API.
    ///
    /// Environment variable: `HTTP_REQUEST_TIMEOUT_MS`
    #[arg(long, env = "HTTP_REQUEST_TIMEOUT_MS", default_value_t = 60_000)]
    pub http_request_timeout_ms: u64,

    /// Timeout for establishing an HTTP connection to the REST API.
    ///
    /// Environment variable: `HTTP_CONNECT_TIMEOUT_MS`
    #[arg(long, env = "HTTP_CONNECT_TIMEOUT_MS", default_value_t = 30_000)]
    pub http_connect_timeout_ms: u64,

    /// Delay between attempts while waiting for the gRPC endpoint to accept
    /// connections.
    ///
    /// Environment variable: `CONNECT_RETRY_MS`
    #[arg(long, env = "CONNECT_RETRY_MS", default_value_t = 1_000)]
    pub connect_retry_ms: u64,

    /// Capacity of the queue between the session writer and the gRPC stream.
    ///
    /// Environment variable: `OUTBOUND_BUFFER_SIZE`
    #[arg(long, env = "OUTBOUND_BUFFER_SIZE", default_value_t = 64)]
    pub outbound_buffer_size: usize,
}

/// Where and how to reach the gRPC streaming endpoint.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    pub host: String,
    pub port: u16,
    pub use_tls: bool,
    pub connect_retry: Duration,
}

impl ChannelConfig {
    /// The endpoint URI handed to the transport.
    pub fn endpoint_uri(&self) -> String {
        let scheme = if self.use_tls { "https" } else { "http" };
        format!("{scheme}://{}:{}", self.host, self.port)
    }
}

/// What the session announces and how it drains.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub owner: String,
    pub tags: Vec<String>,
    pub event_source: String,
    pub drain_timeout: Duration,
    pub outbound_buffer_size: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            owner: "CYODA".to_string(),
            tags: vec!["default".to_string(), "prizes".to_string()],
            event_source: "SimpleSample".to_string(),
            drain_timeout: Duration::from_secs(10),
            outbound_buffer_size: 64,
        }
    }
}

/// Validated configuration. The login secret is held only until
/// [`ClientConfig::take_secret`] hands it to the login call.
#[derive(Clone)]
pub struct ClientConfig {
    pub api_url: Url,
    pub login_url: Url,
    pub refresh_url: Url,
    pub client_id: String,
    client_secret: Option<String>,
    pub http_request_timeout: Duration,
    pub http_connect_timeout: Duration,
    pub channel: ChannelConfig,
    pub session: SessionConfig,
}

impl ClientConfig {
    /// Moves the secret out of the configuration so it is not kept around
    /// after login.
    pub fn take_secret(&mut self) -> Option<String> {
        self.client_secret.take()
    }
}

impl core::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("api_url", &self.api_url.as_str())
            .field("login_url", &self.login_url.as_str())
            .field("refresh_url", &self.refresh_url.as_str())
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "<redacted>"))
            .field("http_request_timeout", &self.http_request_timeout)
            .field("http_connect_timeout", &self.http_connect_timeout)
            .field("channel", &self.channel)
            .field("session", &self.session)
            .finish()
    }
}

impl TryFrom<CliArgs> for ClientConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        let api_url = args.api_url.trim_end_matches('/').to_string();
        let parse = |raw: &str, name: &str| {
            Url::parse(raw).with_context(|| format!("{name} is not a valid URL: {raw}"))
        };

        let login_url = args
            .login_url
            .unwrap_or_else(|| format!("{api_url}/auth/login"));
        let refresh_url = args
            .refresh_url
            .unwrap_or_else(|| format!("{api_url}/auth/token"));

        if args.grpc_server.trim().is_empty() {
            bail!("GRPC_SERVER must not be empty");
        }
        if args.grpc_server_port == 0 {
            bail!("GRPC_SERVER_PORT must be greater than 0");
        }
        if args.outbound_buffer_size == 0 {
            bail!("OUTBOUND_BUFFER_SIZE must be greater than 0");
        }
        if args.drain_timeout_secs == 0 {
            bail!("DRAIN_TIMEOUT_SECS must be greater than 0");
        }
        if args.http_request_timeout_ms == 0 || args.http_connect_timeout_ms == 0 {
            bail!("HTTP timeouts must be greater than 0");
        }

        let tags = args
            .member_tags
            .into_iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();

        Ok(Self {
            api_url: parse(&api_url, "API_URL")?,
            login_url: parse(&login_url, "LOGIN_URL")?,
            refresh_url: parse(&refresh_url, "REFRESH_URL")?,
            client_id: args.client_id,
            client_secret: Some(args.client_secret),
            http_request_timeout: Duration::from_millis(args.http_request_timeout_ms),
            http_connect_timeout: Duration::from_millis(args.http_connect_timeout_ms),
            channel: ChannelConfig {
                host: args.grpc_server,
                port: args.grpc_server_port,
                use_tls: args.grpc_server_use_tls,
                connect_retry: Duration::from_millis(args.connect_retry_ms.max(1)),
            },
            session: SessionConfig {
                owner: args.member_owner,
                tags,
                event_source: args.event_source,
                drain_timeout: Duration::from_secs(args.drain_timeout_secs),
                outbound_buffer_size: args.outbound_buffer_size,
            },
        })
    }
}
