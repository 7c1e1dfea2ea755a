use parking_lot::Mutex;
use tracing::warn;
use url::Url;

use crate::error::ApiError;

/// Ordered set of candidate base hosts with a circular cursor.
///
/// The registry is process-wide shared state: the resilient client rotates
/// it when a host looks wrong, and overlapping operations (a search racing
/// the dispatcher's resolve call) may do so concurrently. Cursor mutation is
/// therefore synchronized even though dispatch itself is single-consumer.
#[derive(Debug)]
pub struct EndpointRegistry {
    hosts: Vec<String>,
    cursor: Mutex<usize>,
}

impl EndpointRegistry {
    /// Build a registry from an ordered host list.
    ///
    /// Hosts must be non-empty and parse as absolute URLs; trailing slashes
    /// are trimmed so path templates can be appended directly.
    pub fn new<I, S>(hosts: I) -> Result<Self, ApiError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut normalized = Vec::new();
        for host in hosts {
            let host = host.into();
            Url::parse(&host).map_err(|e| {
                ApiError::configuration(format!("invalid base host `{host}`: {e}"))
            })?;
            normalized.push(host.trim_end_matches('/').to_owned());
        }
        if normalized.is_empty() {
            return Err(ApiError::configuration("no base hosts configured"));
        }
        Ok(Self {
            hosts: normalized,
            cursor: Mutex::new(0),
        })
    }

    /// The host at the cursor. An out-of-range cursor (only possible through
    /// external mutation in earlier revisions; kept as a guard) resets to 0.
    pub fn current(&self) -> String {
        let mut cursor = self.cursor.lock();
        if *cursor >= self.hosts.len() {
            *cursor = 0;
        }
        self.hosts[*cursor].clone()
    }

    /// Advance the cursor to the next host, wrapping around. A no-op for a
    /// single-host registry.
    pub fn rotate(&self) {
        if self.hosts.len() <= 1 {
            return;
        }
        let mut cursor = self.cursor.lock();
        *cursor = (*cursor + 1) % self.hosts.len();
        warn!(host = %self.hosts[*cursor], "rotated to next base host");
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }
}
