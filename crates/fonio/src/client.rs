//! Resilient HTTP access to an upstream API with unstable endpoint topology.
//!
//! Every request runs inside a bounded retry loop that triages failures into
//! three classes: a 404 means the current host is wrong and is abandoned
//! immediately (rotate, no wait); 429/503 mean the host is overloaded and is
//! retried after a linear backoff (rotating would just hit the same limiter
//! elsewhere); transport faults are retried in place after the base delay.
//! Exhausting the budget yields the soft "no data" outcome rather than an
//! error, and callers handle it explicitly.

use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, Method, StatusCode};
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::{EngineConfig, create_client};
use crate::endpoints::EndpointRegistry;
use crate::error::ApiError;

/// Immutable description of one API request, independent of the base host.
#[derive(Debug, Clone)]
pub struct RequestSpec {
    method: Method,
    path: String,
    query: Vec<(String, String)>,
    timeout: Option<Duration>,
}

impl RequestSpec {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            timeout: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Override the configured per-request timeout for this request only.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

/// HTTP client that issues requests through the endpoint registry with
/// bounded retries and failure triage.
#[derive(Debug, Clone)]
pub struct ResilientClient {
    http: Client,
    registry: Arc<EndpointRegistry>,
    retry_limit: u32,
    backoff_base: Duration,
    request_timeout: Duration,
}

impl ResilientClient {
    pub fn new(config: &EngineConfig, registry: Arc<EndpointRegistry>) -> Result<Self, ApiError> {
        Ok(Self {
            http: create_client(config)?,
            registry,
            retry_limit: config.retry_limit,
            backoff_base: config.backoff_base,
            request_timeout: config.request_timeout,
        })
    }

    /// Execute a request, returning the parsed JSON body on success.
    ///
    /// `None` is the soft-failure outcome: the retry budget was exhausted
    /// without a usable response. Callers treat it as "no data", not as a
    /// fault; fallback to other endpoint candidates happens at the call
    /// site (see the catalog resolver).
    pub async fn execute(&self, spec: &RequestSpec) -> Option<Value> {
        for attempt in 0..self.retry_limit {
            let host = self.registry.current();
            let url = format!("{host}{}", spec.path);
            debug!(
                attempt = attempt + 1,
                limit = self.retry_limit,
                method = %spec.method,
                url = %url,
                "issuing API request"
            );

            match self.attempt(&url, spec).await {
                Ok(body) => return Some(body),
                Err(err) if err.should_backoff() => {
                    // Linear backoff against the same endpoint. Throttling
                    // scales with the attempt number; plain transport faults
                    // wait only the base delay.
                    let delay = match &err {
                        ApiError::Throttled { .. } => self.backoff_base * (attempt + 1),
                        _ => self.backoff_base,
                    };
                    warn!(
                        url = %url,
                        error = %err,
                        delay_ms = delay.as_millis() as u64,
                        "transient failure, retrying same endpoint"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    warn!(url = %url, error = %err, "abandoning endpoint");
                    self.registry.rotate();
                }
            }
        }

        warn!(path = %spec.path, "retry budget exhausted without usable response");
        None
    }

    async fn attempt(&self, url: &str, spec: &RequestSpec) -> Result<Value, ApiError> {
        let timeout = spec.timeout.unwrap_or(self.request_timeout);
        let response = self
            .http
            .request(spec.method.clone(), url)
            .query(&spec.query)
            .timeout(timeout)
            .send()
            .await?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(ApiError::from_status(status, url));
        }

        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| ApiError::Decode {
            url: url.to_owned(),
            reason: e.to_string(),
        })
    }
}
