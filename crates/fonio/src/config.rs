use std::path::PathBuf;
use std::time::Duration;

use reqwest::Client;
use reqwest::header::{HeaderMap, HeaderValue};

use crate::error::ApiError;

/// User agent mimicking the upstream service's official mobile client.
pub const DEFAULT_USER_AGENT: &str = "okhttp/4.9.3";

/// Configurable surface consumed by the engine.
///
/// The engine does not own configuration loading; embedders construct this
/// (typically through [`EngineConfig::builder`]) from whatever source they
/// use and hand it to the components that need it.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Ordered candidate base hosts for the upstream API.
    pub hosts: Vec<String>,

    /// Per-request timeout applied to every API call.
    pub request_timeout: Duration,

    /// Connection timeout (time to establish the initial connection).
    pub connect_timeout: Duration,

    /// Maximum time between receiving data chunks on an open response.
    /// Bounds a stalled stream without capping the total transfer time.
    pub read_timeout: Duration,

    /// Number of attempts the resilient client makes before returning the
    /// soft "no data" outcome.
    pub retry_limit: u32,

    /// Base delay for linear backoff on throttled or transient failures.
    pub backoff_base: Duration,

    /// Write-buffer size used when streaming assets to disk.
    pub chunk_size: usize,

    /// Directory where transient downloaded artifacts are stored.
    pub storage_root: PathBuf,

    /// Nominal concurrency ceiling. The dispatch loop is single-consumer;
    /// this value is carried for embedders that fan out their own loops.
    pub max_concurrent: u32,

    /// User agent string sent with every request.
    pub user_agent: String,

    /// Extra headers merged over the defaults for API requests.
    pub headers: HeaderMap,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            hosts: Vec::new(),
            request_timeout: Duration::from_secs(15),
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(30),
            retry_limit: 3,
            backoff_base: Duration::from_secs(2),
            chunk_size: 1024 * 1024,
            storage_root: PathBuf::from("downloads"),
            max_concurrent: 3,
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            headers: EngineConfig::default_headers(),
        }
    }
}

impl EngineConfig {
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::default()
    }

    pub fn default_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            reqwest::header::ACCEPT,
            HeaderValue::from_static("application/json"),
        );
        headers.insert(
            reqwest::header::ACCEPT_ENCODING,
            HeaderValue::from_static("gzip, deflate"),
        );
        headers
    }
}

/// Builder for [`EngineConfig`].
#[derive(Debug, Default)]
pub struct EngineConfigBuilder {
    config: EngineConfig,
}

impl EngineConfigBuilder {
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.hosts.push(host.into());
        self
    }

    pub fn hosts<I, S>(mut self, hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.hosts.extend(hosts.into_iter().map(Into::into));
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.config.read_timeout = timeout;
        self
    }

    pub fn retry_limit(mut self, limit: u32) -> Self {
        self.config.retry_limit = limit;
        self
    }

    pub fn backoff_base(mut self, base: Duration) -> Self {
        self.config.backoff_base = base;
        self
    }

    pub fn chunk_size(mut self, size: usize) -> Self {
        self.config.chunk_size = size;
        self
    }

    pub fn storage_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.config.storage_root = root.into();
        self
    }

    pub fn max_concurrent(mut self, max: u32) -> Self {
        self.config.max_concurrent = max;
        self
    }

    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.config.user_agent = agent.into();
        self
    }

    pub fn header(mut self, name: reqwest::header::HeaderName, value: HeaderValue) -> Self {
        self.config.headers.insert(name, value);
        self
    }

    pub fn build(self) -> EngineConfig {
        self.config
    }
}

/// Build the shared HTTP client used for API calls.
///
/// The overall request timeout is applied per request by the resilient
/// client (so a spec-level override can shorten or extend it); only the
/// connection timeout and ambient headers live on the client itself.
pub fn create_client(config: &EngineConfig) -> Result<Client, ApiError> {
    Client::builder()
        .connect_timeout(config.connect_timeout)
        .read_timeout(config.read_timeout)
        .user_agent(config.user_agent.clone())
        .default_headers(config.headers.clone())
        .build()
        .map_err(|e| ApiError::configuration(format!("failed to build HTTP client: {e}")))
}
