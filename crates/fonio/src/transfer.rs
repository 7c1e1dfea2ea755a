//! Transfer engine: streams a resolved asset to local storage.
//!
//! The body is streamed chunk by chunk straight to disk through a buffered
//! writer, so memory stays flat regardless of asset size. Progress callbacks
//! are throttled to one per fixed interval; the completion report always
//! fires. Faults are not retried here: retry policy belongs to the caller,
//! and in this design a failed transfer fails the work item.

use std::path::Path;
use std::time::Duration;

use futures::StreamExt;
use reqwest::{Client, StatusCode};
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::config::EngineConfig;
use crate::error::{ApiError, TransferError};

/// Minimum wall-clock gap between user-visible progress updates.
pub const PROGRESS_INTERVAL: Duration = Duration::from_secs(2);

/// Snapshot of transfer progress handed to the caller's callback.
///
/// `total_bytes` is 0 when the server did not advertise a content length;
/// callers must treat that as indeterminate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransferProgress {
    pub percent: f64,
    pub bytes: u64,
    pub total_bytes: u64,
}

impl TransferProgress {
    fn new(bytes: u64, total_bytes: u64) -> Self {
        let percent = if total_bytes > 0 {
            (bytes as f64 / total_bytes as f64) * 100.0
        } else {
            0.0
        };
        Self {
            percent,
            bytes,
            total_bytes,
        }
    }
}

/// Summary of a completed transfer.
#[derive(Debug, Clone, Copy)]
pub struct TransferReport {
    pub bytes: u64,
    pub elapsed: Duration,
    pub throughput_bps: f64,
}

/// Boxed progress callback, invoked from the transfer loop.
pub type ProgressFn = Box<dyn FnMut(TransferProgress) + Send>;

/// Rate limiter for progress callbacks.
///
/// Owned by the call that initiates the transfer, never shared. Uses tokio's
/// clock so time-controlled tests stay deterministic.
#[derive(Debug)]
pub struct ProgressThrottle {
    last_emit: Option<Instant>,
    interval: Duration,
}

impl ProgressThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            last_emit: None,
            interval,
        }
    }

    /// True at most once per interval; the first call always passes.
    pub fn should_emit(&mut self) -> bool {
        let now = Instant::now();
        match self.last_emit {
            Some(last) if now.duration_since(last) < self.interval => false,
            _ => {
                self.last_emit = Some(now);
                true
            }
        }
    }
}

/// Streams assets over HTTP into local files.
#[derive(Debug, Clone)]
pub struct TransferEngine {
    http: Client,
    chunk_size: usize,
}

impl TransferEngine {
    /// Build an engine from configuration.
    ///
    /// The transfer client deliberately carries no overall request timeout:
    /// a large asset on a slow link can legitimately take longer than any
    /// fixed budget. The connection timeout bounds the initial dial and the
    /// read timeout bounds the gap between chunks, so a stalled stream
    /// errors out instead of hanging the transfer.
    pub fn new(config: &EngineConfig) -> Result<Self, ApiError> {
        let http = Client::builder()
            .connect_timeout(config.connect_timeout)
            .read_timeout(config.read_timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| ApiError::configuration(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            chunk_size: config.chunk_size,
        })
    }

    /// Stream `url` to `dest`, reporting throttled progress.
    ///
    /// Accepts 200 and 206 (partial content); any other status is terminal.
    /// The final progress report is always delivered, at 100% when the total
    /// size was known.
    pub async fn transfer(
        &self,
        url: &str,
        dest: &Path,
        mut on_progress: ProgressFn,
    ) -> Result<TransferReport, TransferError> {
        let started = Instant::now();
        info!(url = %url, dest = %dest.display(), "starting transfer");

        let response = self.http.get(url).send().await?;
        let status = response.status();
        if status != StatusCode::OK && status != StatusCode::PARTIAL_CONTENT {
            return Err(TransferError::Status {
                status,
                url: url.to_owned(),
            });
        }

        let total = response.content_length().unwrap_or(0);
        if total == 0 {
            debug!(url = %url, "content length not advertised, progress is indeterminate");
        }

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = File::create(dest).await?;
        let mut writer = BufWriter::with_capacity(self.chunk_size, file);

        let mut stream = response.bytes_stream();
        let mut downloaded: u64 = 0;
        let mut throttle = ProgressThrottle::new(PROGRESS_INTERVAL);

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            writer.write_all(&chunk).await?;
            downloaded += chunk.len() as u64;

            if throttle.should_emit() {
                on_progress(TransferProgress::new(downloaded, total));
            }
        }
        writer.flush().await?;

        // Completion report bypasses the throttle so the caller always sees
        // the terminal state.
        on_progress(TransferProgress::new(downloaded, total));

        let elapsed = started.elapsed();
        let throughput_bps = if elapsed.as_secs_f64() > 0.0 {
            downloaded as f64 / elapsed.as_secs_f64()
        } else {
            0.0
        };
        info!(
            url = %url,
            bytes = downloaded,
            elapsed_ms = elapsed.as_millis() as u64,
            "transfer complete"
        );

        Ok(TransferReport {
            bytes: downloaded,
            elapsed,
            throughput_bps,
        })
    }
}

#[async_trait::async_trait]
impl crate::dispatcher::MediaTransfer for TransferEngine {
    async fn transfer(
        &self,
        url: &str,
        dest: &Path,
        on_progress: ProgressFn,
    ) -> Result<TransferReport, TransferError> {
        TransferEngine::transfer(self, url, dest, on_progress).await
    }
}
