//! Fonio: resilient catalog-acquisition and delivery engine.
//!
//! Given a search term, the engine resolves a catalog entry to a playable
//! asset, retrieves it over HTTP and hands it to a delivery sink. The
//! upstream's endpoint topology is unstable (multiple candidate hosts,
//! inconsistent response shapes, intermittent 404/429/503).
//!
//! ## Components
//!
//! - [`EndpointRegistry`] - ordered candidate base hosts with circular
//!   rotation on routing failures
//! - [`ResilientClient`] - bounded retries with failure triage (rotate on
//!   404, back off on 429/503 and transport faults)
//! - [`CatalogResolver`] - domain operations tried across ordered tables of
//!   candidate endpoints and response-shape extraction rules
//! - [`TransferEngine`] - chunked streaming download with throttled
//!   progress reporting
//! - [`WorkQueue`] / [`Dispatcher`] - FIFO queue with a single consumer
//!   driving each item through resolve → download → deliver → cleanup
//!
//! ## Seams
//!
//! The presentation layer stays outside the engine: it submits work through
//! [`WorkQueue::submit`] and participates through the [`StatusSink`] and
//! [`DeliverySink`] traits.
//!
//! ## Failure philosophy
//!
//! Exhausted retries surface as empty/`None` results ("soft failure"), not
//! errors; the dispatcher absorbs all per-item faults at the item boundary
//! and never stops on one.

pub mod catalog;
pub mod client;
pub mod config;
pub mod dispatcher;
pub mod endpoints;
pub mod error;
pub mod model;
pub mod queue;
pub mod transfer;

pub use catalog::CatalogResolver;
pub use client::{RequestSpec, ResilientClient};
pub use config::{EngineConfig, EngineConfigBuilder, create_client};
pub use dispatcher::{
    DeliverySink, Dispatcher, MediaTransfer, StatusSink, StatusUpdate, StreamLocator,
};
pub use endpoints::EndpointRegistry;
pub use error::{ApiError, DeliveryError, NotifyError, TransferError};
pub use model::{CatalogItem, EpisodeRef};
pub use queue::{WorkItem, WorkQueue, WorkReceiver, WorkStatus};
pub use transfer::{
    PROGRESS_INTERVAL, ProgressFn, ProgressThrottle, TransferEngine, TransferProgress,
    TransferReport,
};
