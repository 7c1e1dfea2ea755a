//! Dispatcher: the single consumer that drives work items to a terminal
//! state.
//!
//! One continuous loop pulls items in FIFO order and walks each through
//! resolve → download → deliver → cleanup, reporting status transitions to
//! the requester along the way. Every per-item failure is absorbed at the
//! item boundary; the loop itself only stops when the queue closes. An
//! infrastructure error outside the well-defined steps (storage not
//! writable) backs off for a fixed delay so a persistently broken dependency
//! cannot spin the loop hot.
//!
//! The collaborators are trait seams in the manner of capability traits:
//! the catalog resolver and transfer engine implement the two internal ones,
//! while [`DeliverySink`] and [`StatusSink`] belong to the embedding
//! presentation layer.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::error::{DeliveryError, NotifyError, TransferError};
use crate::model::EpisodeRef;
use crate::queue::{WorkItem, WorkReceiver, WorkStatus};
use crate::transfer::{ProgressFn, TransferProgress, TransferReport};

/// How long the loop blocks on the queue before waking for housekeeping.
const IDLE_WAIT: Duration = Duration::from_secs(30);

/// Delay after an infrastructure-level error before resuming the loop.
const ERROR_BACKOFF: Duration = Duration::from_secs(5);

/// Resolves an episode identifier to a playable location.
#[async_trait]
pub trait StreamLocator: Send + Sync {
    /// `None` means every candidate was exhausted; the caller must not
    /// attempt a download.
    async fn stream_url(&self, episode_id: &str) -> Option<String>;
}

/// Streams a resolved location to a local file.
#[async_trait]
pub trait MediaTransfer: Send + Sync {
    async fn transfer(
        &self,
        url: &str,
        dest: &Path,
        on_progress: ProgressFn,
    ) -> Result<TransferReport, TransferError>;
}

/// External collaborator that receives the downloaded artifact.
///
/// Called at most once per successful download; the engine never retries
/// delivery.
#[async_trait]
pub trait DeliverySink: Send + Sync {
    async fn deliver(
        &self,
        requester: &str,
        local_path: &Path,
        episode: &EpisodeRef,
    ) -> Result<(), DeliveryError>;
}

/// Status transition pushed to a requester.
#[derive(Debug, Clone, PartialEq)]
pub enum StatusUpdate {
    Resolving { title: String },
    Progress(TransferProgress),
    Uploading { title: String },
    Done { title: String },
    DeliveryFailed { local_path: PathBuf, reason: String },
    Failed { reason: String },
}

/// External collaborator that surfaces status updates to requesters.
///
/// Failures are never fatal; the dispatcher logs and moves on.
#[async_trait]
pub trait StatusSink: Send + Sync {
    async fn notify(&self, requester: &str, update: StatusUpdate) -> Result<(), NotifyError>;
}

/// Single-consumer dispatch loop over the work queue.
pub struct Dispatcher {
    locator: Arc<dyn StreamLocator>,
    transfer: Arc<dyn MediaTransfer>,
    delivery: Arc<dyn DeliverySink>,
    status: Arc<dyn StatusSink>,
    storage_root: PathBuf,
}

impl Dispatcher {
    pub fn new(
        locator: Arc<dyn StreamLocator>,
        transfer: Arc<dyn MediaTransfer>,
        delivery: Arc<dyn DeliverySink>,
        status: Arc<dyn StatusSink>,
        storage_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            locator,
            transfer,
            delivery,
            status,
            storage_root: storage_root.into(),
        }
    }

    /// Run until the queue closes (every producer handle dropped and the
    /// backlog drained). Items are processed strictly one at a time.
    pub async fn run(self, mut rx: WorkReceiver) {
        info!("dispatcher started");
        loop {
            match tokio::time::timeout(IDLE_WAIT, rx.recv()).await {
                // Idle housekeeping tick; nothing to do yet.
                Err(_) => continue,
                Ok(None) => {
                    info!("work queue closed, dispatcher stopping");
                    break;
                }
                Ok(Some(mut item)) => {
                    let episode_id = item.episode.id.clone();
                    if let Err(err) = self.process(&mut item).await {
                        error!(
                            episode = %episode_id,
                            error = %err,
                            "infrastructure error while processing item, backing off"
                        );
                        item.status = WorkStatus::Failed {
                            reason: format!("internal error: {err}"),
                        };
                        self.notify(
                            &item.requester,
                            StatusUpdate::Failed {
                                reason: "internal error, please retry later".to_owned(),
                            },
                        )
                        .await;
                        tokio::time::sleep(ERROR_BACKOFF).await;
                    }
                }
            }
        }
    }

    /// Drive one item to a terminal state.
    ///
    /// Per-item outcomes (unresolved, failed transfer, failed delivery) are
    /// handled here and return `Ok`; only infrastructure faults outside the
    /// step contract bubble up as errors.
    async fn process(&self, item: &mut WorkItem) -> Result<(), std::io::Error> {
        let episode = item.episode.clone();
        let requester = item.requester.clone();
        info!(
            requester,
            episode = %episode.id,
            title = %episode.title,
            "processing work item"
        );

        // Resolving. The stream location is the single point of failure:
        // without it there is nothing to download.
        item.status = WorkStatus::Resolving;
        self.notify(
            &requester,
            StatusUpdate::Resolving {
                title: episode.title.clone(),
            },
        )
        .await;

        let Some(url) = self.locator.stream_url(&episode.id).await else {
            let reason = format!("could not resolve a stream URL for `{}`", episode.title);
            warn!(episode = %episode.id, "stream URL unresolved, failing item");
            item.status = WorkStatus::Failed {
                reason: reason.clone(),
            };
            self.notify(&requester, StatusUpdate::Failed { reason }).await;
            return Ok(());
        };

        // Downloading.
        item.status = WorkStatus::Downloading;
        tokio::fs::create_dir_all(&self.storage_root).await?;
        let dest = self.storage_root.join(artifact_name(&episode.id));

        let result = self.run_transfer(&requester, &url, &dest).await;
        if let Err(err) = result {
            let reason = format!("download failed: {err}");
            error!(episode = %episode.id, error = %err, "transfer failed");
            item.status = WorkStatus::Failed {
                reason: reason.clone(),
            };
            self.notify(&requester, StatusUpdate::Failed { reason }).await;
            remove_artifact(&dest).await;
            return Ok(());
        }

        // Uploading: hand the artifact to the delivery sink.
        item.status = WorkStatus::Uploading;
        self.notify(
            &requester,
            StatusUpdate::Uploading {
                title: episode.title.clone(),
            },
        )
        .await;

        match self.delivery.deliver(&requester, &dest, &episode).await {
            Ok(()) => {
                // Cleanup runs before the success notification so the
                // artifact is removed even if notifying fails.
                remove_artifact(&dest).await;
                item.status = WorkStatus::Done;
                self.notify(
                    &requester,
                    StatusUpdate::Done {
                        title: episode.title.clone(),
                    },
                )
                .await;
                info!(requester, episode = %episode.id, "work item done");
            }
            Err(err) => {
                // Degraded success: the download is good, so the artifact is
                // preserved for manual recovery instead of deleted.
                warn!(
                    episode = %episode.id,
                    error = %err,
                    path = %dest.display(),
                    "delivery failed, artifact preserved"
                );
                item.status = WorkStatus::DeliveryFailed {
                    reason: err.reason.clone(),
                };
                self.notify(
                    &requester,
                    StatusUpdate::DeliveryFailed {
                        local_path: dest.clone(),
                        reason: err.reason,
                    },
                )
                .await;
            }
        }

        Ok(())
    }

    /// Run the transfer with progress forwarded to the status sink.
    ///
    /// The engine's callback is synchronous, so progress crosses into the
    /// async sink through a small channel drained by a forwarder task.
    /// Throttling already happened inside the engine; the channel is lossy
    /// under pressure, which is fine for ephemeral progress.
    async fn run_transfer(
        &self,
        requester: &str,
        url: &str,
        dest: &Path,
    ) -> Result<TransferReport, TransferError> {
        let (tx, mut rx) = mpsc::channel::<TransferProgress>(32);

        let status = Arc::clone(&self.status);
        let progress_requester = requester.to_owned();
        let forwarder = tokio::spawn(async move {
            while let Some(progress) = rx.recv().await {
                if let Err(err) = status
                    .notify(&progress_requester, StatusUpdate::Progress(progress))
                    .await
                {
                    debug!(error = %err, "progress notification failed");
                }
            }
        });

        let on_progress: ProgressFn = Box::new(move |progress| {
            let _ = tx.try_send(progress);
        });
        let result = self.transfer.transfer(url, dest, on_progress).await;

        // The callback (and with it the sender) is dropped by the engine, so
        // the forwarder drains and exits on its own.
        let _ = forwarder.await;
        result
    }

    async fn notify(&self, requester: &str, update: StatusUpdate) {
        if let Err(err) = self.status.notify(requester, update).await {
            debug!(requester, error = %err, "status notification failed");
        }
    }
}

/// Artifact file name for an episode. Identifiers are opaque strings from
/// the upstream, so path separators are neutralized before joining.
fn artifact_name(episode_id: &str) -> String {
    let safe: String = episode_id
        .chars()
        .map(|c| if matches!(c, '/' | '\\' | ':') { '_' } else { c })
        .collect();
    format!("{safe}.mp3")
}

/// Best-effort removal; a failed cleanup is logged, never fatal.
async fn remove_artifact(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(path = %path.display(), "artifact removed"),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => warn!(path = %path.display(), error = %err, "artifact cleanup failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::WorkQueue;
    use parking_lot::Mutex;
    use serde_json::Map;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tempfile::TempDir;

    fn episode(id: &str) -> EpisodeRef {
        EpisodeRef {
            id: id.to_owned(),
            title: "Test".to_owned(),
            duration: Some(1800),
            released: true,
            premium: false,
            extra: Map::new(),
        }
    }

    struct FakeLocator {
        url: Option<String>,
    }

    #[async_trait]
    impl StreamLocator for FakeLocator {
        async fn stream_url(&self, _episode_id: &str) -> Option<String> {
            self.url.clone()
        }
    }

    /// Writes `payload_len` bytes to the destination and emits a mid-stream
    /// and a final progress report, like the real engine would.
    struct FakeTransfer {
        payload_len: u64,
        fail: bool,
        called: AtomicBool,
    }

    impl FakeTransfer {
        fn new(payload_len: u64) -> Self {
            Self {
                payload_len,
                fail: false,
                called: AtomicBool::new(false),
            }
        }

        fn failing() -> Self {
            Self {
                payload_len: 0,
                fail: true,
                called: AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl MediaTransfer for FakeTransfer {
        async fn transfer(
            &self,
            _url: &str,
            dest: &Path,
            mut on_progress: ProgressFn,
        ) -> Result<TransferReport, TransferError> {
            self.called.store(true, Ordering::SeqCst);
            if self.fail {
                return Err(TransferError::Status {
                    status: reqwest::StatusCode::BAD_GATEWAY,
                    url: "http://cdn.test/asset".to_owned(),
                });
            }
            tokio::fs::write(dest, vec![0u8; self.payload_len as usize]).await?;
            on_progress(TransferProgress {
                percent: 50.0,
                bytes: self.payload_len / 2,
                total_bytes: self.payload_len,
            });
            on_progress(TransferProgress {
                percent: 100.0,
                bytes: self.payload_len,
                total_bytes: self.payload_len,
            });
            Ok(TransferReport {
                bytes: self.payload_len,
                elapsed: Duration::from_millis(10),
                throughput_bps: 0.0,
            })
        }
    }

    struct FakeDelivery {
        fail: bool,
        delivered: Mutex<Vec<PathBuf>>,
    }

    impl FakeDelivery {
        fn new(fail: bool) -> Self {
            Self {
                fail,
                delivered: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl DeliverySink for FakeDelivery {
        async fn deliver(
            &self,
            _requester: &str,
            local_path: &Path,
            _episode: &EpisodeRef,
        ) -> Result<(), DeliveryError> {
            if self.fail {
                return Err(DeliveryError::new("sink rejected upload"));
            }
            // The artifact must exist at delivery time.
            assert!(local_path.exists());
            self.delivered.lock().push(local_path.to_owned());
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        events: Mutex<Vec<(String, StatusUpdate)>>,
        fail_on_done: bool,
        failures: AtomicUsize,
    }

    impl RecordingSink {
        fn failing_on_done() -> Self {
            Self {
                fail_on_done: true,
                ..Default::default()
            }
        }

        fn updates(&self) -> Vec<StatusUpdate> {
            self.events.lock().iter().map(|(_, u)| u.clone()).collect()
        }
    }

    #[async_trait]
    impl StatusSink for RecordingSink {
        async fn notify(&self, requester: &str, update: StatusUpdate) -> Result<(), NotifyError> {
            self.events.lock().push((requester.to_owned(), update.clone()));
            if self.fail_on_done && matches!(update, StatusUpdate::Done { .. }) {
                self.failures.fetch_add(1, Ordering::SeqCst);
                return Err(NotifyError::new("requester unreachable"));
            }
            Ok(())
        }
    }

    struct Pipeline {
        locator: Arc<FakeLocator>,
        transfer: Arc<FakeTransfer>,
        delivery: Arc<FakeDelivery>,
        sink: Arc<RecordingSink>,
        storage: TempDir,
    }

    impl Pipeline {
        fn dispatcher(&self) -> Dispatcher {
            Dispatcher::new(
                self.locator.clone(),
                self.transfer.clone(),
                self.delivery.clone(),
                self.sink.clone(),
                self.storage.path(),
            )
        }

        fn artifact(&self, id: &str) -> PathBuf {
            self.storage.path().join(format!("{id}.mp3"))
        }
    }

    fn pipeline(locator: FakeLocator, transfer: FakeTransfer, delivery: FakeDelivery) -> Pipeline {
        Pipeline {
            locator: Arc::new(locator),
            transfer: Arc::new(transfer),
            delivery: Arc::new(delivery),
            sink: Arc::new(RecordingSink::default()),
            storage: TempDir::new().unwrap(),
        }
    }

    #[tokio::test]
    async fn full_success_cleans_up_and_notifies_once() {
        let p = pipeline(
            FakeLocator {
                url: Some("http://cdn.test/ep_1.mp3".to_owned()),
            },
            FakeTransfer::new(1_048_576),
            FakeDelivery::new(false),
        );

        let (queue, rx) = WorkQueue::new();
        queue.submit("user_7", episode("ep_1"));
        drop(queue);
        p.dispatcher().run(rx).await;

        assert!(!p.artifact("ep_1").exists(), "artifact must be cleaned up");
        assert_eq!(p.delivery.delivered.lock().len(), 1);

        let updates = p.sink.updates();
        let done_count = updates
            .iter()
            .filter(|u| matches!(u, StatusUpdate::Done { .. }))
            .count();
        assert_eq!(done_count, 1, "exactly one terminal success notification");
        assert!(matches!(updates[0], StatusUpdate::Resolving { .. }));
        assert!(
            updates
                .iter()
                .any(|u| matches!(u, StatusUpdate::Uploading { .. }))
        );
        assert!(
            !updates
                .iter()
                .any(|u| matches!(u, StatusUpdate::Failed { .. }))
        );
    }

    #[tokio::test]
    async fn unresolved_stream_fails_without_transfer() {
        let p = pipeline(
            FakeLocator { url: None },
            FakeTransfer::new(1024),
            FakeDelivery::new(false),
        );

        let (queue, rx) = WorkQueue::new();
        queue.submit("user_7", episode("ep_404"));
        drop(queue);
        p.dispatcher().run(rx).await;

        assert!(
            !p.transfer.called.load(Ordering::SeqCst),
            "transfer engine must not run for an unresolved stream"
        );
        let updates = p.sink.updates();
        let failed = updates
            .iter()
            .find_map(|u| match u {
                StatusUpdate::Failed { reason } => Some(reason.clone()),
                _ => None,
            })
            .expect("requester must be notified of the failure");
        assert!(
            failed.contains("stream URL"),
            "reason must reference URL resolution, got: {failed}"
        );
    }

    #[tokio::test]
    async fn delivery_failure_preserves_artifact() {
        let p = pipeline(
            FakeLocator {
                url: Some("http://cdn.test/ep_2.mp3".to_owned()),
            },
            FakeTransfer::new(2048),
            FakeDelivery::new(true),
        );

        let (queue, rx) = WorkQueue::new();
        queue.submit("user_7", episode("ep_2"));
        drop(queue);
        p.dispatcher().run(rx).await;

        assert!(
            p.artifact("ep_2").exists(),
            "artifact must survive a delivery failure"
        );
        let updates = p.sink.updates();
        assert!(
            updates
                .iter()
                .any(|u| matches!(u, StatusUpdate::DeliveryFailed { .. }))
        );
        assert!(
            !updates
                .iter()
                .any(|u| matches!(u, StatusUpdate::Done { .. }))
        );
    }

    #[tokio::test]
    async fn cleanup_runs_even_when_success_notification_fails() {
        let p = Pipeline {
            locator: Arc::new(FakeLocator {
                url: Some("http://cdn.test/ep_3.mp3".to_owned()),
            }),
            transfer: Arc::new(FakeTransfer::new(512)),
            delivery: Arc::new(FakeDelivery::new(false)),
            sink: Arc::new(RecordingSink::failing_on_done()),
            storage: TempDir::new().unwrap(),
        };

        let (queue, rx) = WorkQueue::new();
        queue.submit("user_7", episode("ep_3"));
        drop(queue);
        p.dispatcher().run(rx).await;

        assert_eq!(p.sink.failures.load(Ordering::SeqCst), 1);
        assert!(!p.artifact("ep_3").exists());
    }

    #[tokio::test]
    async fn per_item_failure_does_not_stop_the_loop() {
        let p = pipeline(
            FakeLocator {
                url: Some("http://cdn.test/asset.mp3".to_owned()),
            },
            FakeTransfer::failing(),
            FakeDelivery::new(false),
        );

        let (queue, rx) = WorkQueue::new();
        queue.submit("alice", episode("ep_a"));
        queue.submit("bob", episode("ep_b"));
        drop(queue);
        p.dispatcher().run(rx).await;

        let events = p.sink.events.lock();
        let requesters: Vec<&str> = events.iter().map(|(r, _)| r.as_str()).collect();
        assert!(requesters.contains(&"alice"));
        assert!(
            requesters.contains(&"bob"),
            "second item must still be processed after the first fails"
        );
        let failures = events
            .iter()
            .filter(|(_, u)| matches!(u, StatusUpdate::Failed { .. }))
            .count();
        assert_eq!(failures, 2);
    }

    #[tokio::test]
    async fn progress_updates_are_forwarded_to_the_requester() {
        let p = pipeline(
            FakeLocator {
                url: Some("http://cdn.test/ep_4.mp3".to_owned()),
            },
            FakeTransfer::new(4096),
            FakeDelivery::new(false),
        );

        let (queue, rx) = WorkQueue::new();
        queue.submit("user_7", episode("ep_4"));
        drop(queue);
        p.dispatcher().run(rx).await;

        let progress: Vec<TransferProgress> = p
            .sink
            .updates()
            .into_iter()
            .filter_map(|u| match u {
                StatusUpdate::Progress(progress) => Some(progress),
                _ => None,
            })
            .collect();
        assert!(!progress.is_empty());
        assert_eq!(progress.last().unwrap().percent, 100.0);
    }

    #[tokio::test(start_paused = true)]
    async fn unwritable_storage_backs_off_and_continues() {
        let storage = TempDir::new().unwrap();
        // A file where the storage root should be makes create_dir_all fail.
        let blocked_root = storage.path().join("root");
        tokio::fs::write(&blocked_root, b"not a directory").await.unwrap();

        let locator = Arc::new(FakeLocator {
            url: Some("http://cdn.test/ep.mp3".to_owned()),
        });
        let sink = Arc::new(RecordingSink::default());
        let dispatcher = Dispatcher::new(
            locator,
            Arc::new(FakeTransfer::new(64)),
            Arc::new(FakeDelivery::new(false)),
            sink.clone(),
            &blocked_root,
        );

        let (queue, rx) = WorkQueue::new();
        queue.submit("user_7", episode("ep_x"));
        drop(queue);
        dispatcher.run(rx).await;

        let updates = sink.updates();
        assert!(
            updates
                .iter()
                .any(|u| matches!(u, StatusUpdate::Failed { .. }))
        );
    }

    #[test]
    fn artifact_names_neutralize_path_separators() {
        assert_eq!(artifact_name("ep_1"), "ep_1.mp3");
        assert_eq!(artifact_name("../etc/passwd"), ".._etc_passwd.mp3");
    }
}
