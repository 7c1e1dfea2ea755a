//! Work queue: the concurrency boundary between many producers and the
//! single dispatcher.
//!
//! Producers submit items concurrently without locking; the unbounded
//! channel preserves FIFO enqueue order and the single consumer drains it.
//! There is no backpressure signal and no per-requester fairness: one
//! requester's large batch can starve others, a known trade-off of the
//! single ordered queue.

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::model::EpisodeRef;

/// Lifecycle of a work item.
///
/// `Queued → Resolving → Downloading → Uploading → Done`, with `Failed`
/// reachable from any non-terminal state. `DeliveryFailed` is the degraded
/// success: the download finished but the sink rejected it, and the local
/// artifact is preserved for manual recovery.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkStatus {
    Queued,
    Resolving,
    Downloading,
    Uploading,
    Done,
    DeliveryFailed { reason: String },
    Failed { reason: String },
}

impl WorkStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Done | Self::DeliveryFailed { .. } | Self::Failed { .. }
        )
    }
}

/// One requester's request to acquire and deliver one asset.
///
/// Owned by the queue until dequeued, then exclusively by the dispatcher
/// until it reaches a terminal state; not persisted.
#[derive(Debug, Clone)]
pub struct WorkItem {
    pub requester: String,
    pub episode: EpisodeRef,
    pub enqueued_at: DateTime<Utc>,
    pub status: WorkStatus,
}

/// Receiving half of the queue, held by the dispatcher.
pub type WorkReceiver = mpsc::UnboundedReceiver<WorkItem>;

/// Cloneable producer handle.
#[derive(Debug, Clone)]
pub struct WorkQueue {
    tx: mpsc::UnboundedSender<WorkItem>,
}

impl WorkQueue {
    pub fn new() -> (Self, WorkReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Enqueue an item. Accepted unconditionally; if the dispatcher is gone
    /// the item is dropped with a warning rather than an error, since the
    /// submitter has no recovery path anyway.
    pub fn submit(&self, requester: impl Into<String>, episode: EpisodeRef) {
        let requester = requester.into();
        let item = WorkItem {
            requester: requester.clone(),
            episode,
            enqueued_at: Utc::now(),
            status: WorkStatus::Queued,
        };
        debug!(requester, episode = %item.episode.id, "work item queued");
        if self.tx.send(item).is_err() {
            warn!(requester, "work queue closed, dropping item");
        }
    }
}
