use reqwest::StatusCode;

/// Errors produced while talking to the upstream catalog API.
///
/// The variants encode the retry triage directly: a [`ApiError::Routing`]
/// failure means the current endpoint is wrong and should be abandoned
/// immediately, while [`ApiError::Throttled`] and [`ApiError::Transport`]
/// are transient conditions worth waiting out on the same endpoint.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("routing failure: HTTP {status} for {url}")]
    Routing { status: StatusCode, url: String },

    #[error("upstream throttled: HTTP {status} for {url}")]
    Throttled { status: StatusCode, url: String },

    #[error("transport error: {source}")]
    Transport {
        #[from]
        source: reqwest::Error,
    },

    #[error("unexpected HTTP {status} for {url}")]
    Status { status: StatusCode, url: String },

    #[error("malformed response body for {url}: {reason}")]
    Decode { url: String, reason: String },

    #[error("configuration error: {reason}")]
    Configuration { reason: String },
}

impl ApiError {
    /// Classify a non-success HTTP status into the matching variant.
    pub fn from_status(status: StatusCode, url: impl Into<String>) -> Self {
        let url = url.into();
        match status {
            StatusCode::NOT_FOUND => Self::Routing { status, url },
            StatusCode::TOO_MANY_REQUESTS | StatusCode::SERVICE_UNAVAILABLE => {
                Self::Throttled { status, url }
            }
            _ => Self::Status { status, url },
        }
    }

    pub fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }

    /// True when the error indicates the current endpoint should be
    /// abandoned without waiting (wrong host, unexpected status, bad body).
    pub fn should_rotate(&self) -> bool {
        matches!(
            self,
            Self::Routing { .. } | Self::Status { .. } | Self::Decode { .. }
        )
    }

    /// True when the error is a transient fault worth retrying against the
    /// same endpoint after a backoff delay.
    pub fn should_backoff(&self) -> bool {
        matches!(self, Self::Throttled { .. } | Self::Transport { .. })
    }
}

/// Errors raised while streaming an asset to local storage.
///
/// The engine does not retry internally; any of these is terminal for the
/// transfer and surfaces to the dispatcher as a failed work item.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("transfer request failed: {source}")]
    Network {
        #[from]
        source: reqwest::Error,
    },

    #[error("transfer rejected with HTTP {status} for {url}")]
    Status { status: StatusCode, url: String },

    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
}

/// Failure reported by the delivery sink for a downloaded asset.
///
/// Terminal for the upload step only: the local artifact is preserved so the
/// download does not have to be repeated.
#[derive(Debug, thiserror::Error)]
#[error("delivery failed: {reason}")]
pub struct DeliveryError {
    pub reason: String,
}

impl DeliveryError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Failure to push a status update to a requester.
///
/// Always non-fatal: the dispatcher logs and continues.
#[derive(Debug, thiserror::Error)]
#[error("status notification failed: {reason}")]
pub struct NotifyError {
    pub reason: String,
}

impl NotifyError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}
