//! Catalog resolver: domain operations over an unstable upstream API.
//!
//! The upstream contract is partially unknown, so every operation is a
//! two-level trial: an ordered table of candidate endpoint paths, and for
//! each successful response an ordered table of extraction rules describing
//! the payload shapes seen in the wild. The first candidate that yields
//! usable data wins; an unusable response moves to the next candidate (the
//! resilient client already retried/rotated underneath). Exhausting every
//! candidate returns empty/`None`, the soft-failure contract, never an
//! error past this boundary.
//!
//! Adding a newly discovered endpoint or payload shape is a one-line table
//! edit.

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::client::{RequestSpec, ResilientClient};
use crate::dispatcher::StreamLocator;
use crate::model::{CatalogItem, EpisodeRef};

/// Candidate paths for series search, tried in order.
const SEARCH_CANDIDATES: &[&str] = &[
    "/api/v1/search",
    "/api/v2/search",
    "/search",
    "/series/search",
];

/// Payload shapes under which search results have been observed.
const SEARCH_RULES: &[&str] = &["/results", "/data/series", "/data", "/series"];

const SERIES_DETAIL_CANDIDATES: &[&str] =
    &["/api/v1/series/{id}", "/api/v2/series/{id}", "/series/{id}"];

const EPISODE_CANDIDATES: &[&str] = &[
    "/api/v1/series/{id}/episodes",
    "/api/v2/series/{id}/episodes",
    "/series/{id}/episodes",
];

const EPISODE_RULES: &[&str] = &["/episodes", "/data", "/items"];

/// Stream resolution is the single point of failure for the pipeline, so it
/// carries the widest candidate table.
const STREAM_CANDIDATES: &[&str] = &[
    "/api/v1/episodes/{id}/stream",
    "/api/v2/episodes/{id}/stream",
    "/episodes/{id}/stream",
    "/stream/{id}",
];

const STREAM_RULES: &[&str] = &["/url", "/stream_url"];

/// First non-empty array matching one of the rules, in rule order.
fn first_array<'a>(body: &'a Value, rules: &[&str]) -> Option<&'a Vec<Value>> {
    rules
        .iter()
        .filter_map(|rule| body.pointer(rule).and_then(Value::as_array))
        .find(|arr| !arr.is_empty())
}

/// First non-empty string matching one of the rules, in rule order.
fn first_string(body: &Value, rules: &[&str]) -> Option<String> {
    rules
        .iter()
        .filter_map(|rule| body.pointer(rule).and_then(Value::as_str))
        .find(|s| !s.is_empty())
        .map(str::to_owned)
}

fn expand(template: &str, id: &str) -> String {
    template.replace("{id}", id)
}

/// Resolver for catalog operations, built on the resilient client.
#[derive(Debug, Clone)]
pub struct CatalogResolver {
    client: ResilientClient,
}

impl CatalogResolver {
    pub fn new(client: ResilientClient) -> Self {
        Self { client }
    }

    /// Search the catalog. Exhausting every candidate returns an empty list.
    pub async fn search(&self, query: &str, limit: usize) -> Vec<CatalogItem> {
        for &candidate in SEARCH_CANDIDATES {
            let spec = RequestSpec::get(candidate)
                .query("q", query)
                .query("type", "series")
                .query("limit", limit.to_string());

            let Some(body) = self.client.execute(&spec).await else {
                continue;
            };

            if let Some(raw) = first_array(&body, SEARCH_RULES) {
                let items: Vec<CatalogItem> = raw
                    .iter()
                    .filter_map(|v| serde_json::from_value(v.clone()).ok())
                    .collect();
                if !items.is_empty() {
                    info!(candidate, count = items.len(), "search resolved");
                    return items;
                }
            }
            debug!(candidate, "no usable search payload, trying next candidate");
        }

        warn!(query, "all search candidates exhausted");
        Vec::new()
    }

    /// Fetch details for one catalog entry.
    pub async fn series_details(&self, series_id: &str) -> Option<CatalogItem> {
        for &candidate in SERIES_DETAIL_CANDIDATES {
            let spec = RequestSpec::get(expand(candidate, series_id));
            let Some(body) = self.client.execute(&spec).await else {
                continue;
            };

            // Details come either at the top level or wrapped under "data".
            let payload = body.pointer("/data").unwrap_or(&body);
            if let Ok(item) = serde_json::from_value::<CatalogItem>(payload.clone()) {
                info!(candidate, series_id, "series details resolved");
                return Some(item);
            }
            debug!(candidate, "undeserializable detail payload, trying next candidate");
        }

        warn!(series_id, "all detail candidates exhausted");
        None
    }

    /// List the episodes under a catalog entry.
    pub async fn episodes(&self, series_id: &str, limit: usize) -> Vec<EpisodeRef> {
        for &candidate in EPISODE_CANDIDATES {
            let spec =
                RequestSpec::get(expand(candidate, series_id)).query("limit", limit.to_string());

            let Some(body) = self.client.execute(&spec).await else {
                continue;
            };

            if let Some(raw) = first_array(&body, EPISODE_RULES) {
                let episodes: Vec<EpisodeRef> = raw
                    .iter()
                    .filter_map(|v| serde_json::from_value(v.clone()).ok())
                    .collect();
                if !episodes.is_empty() {
                    info!(candidate, count = episodes.len(), "episode list resolved");
                    return episodes;
                }
            }
            debug!(candidate, "no usable episode payload, trying next candidate");
        }

        warn!(series_id, "all episode candidates exhausted");
        Vec::new()
    }

    /// Resolve the playable location for an episode.
    ///
    /// This is the critical operation: if it comes back `None` the work item
    /// fails without a download attempt.
    pub async fn stream_url(&self, episode_id: &str, quality: &str) -> Option<String> {
        for &candidate in STREAM_CANDIDATES {
            let spec = RequestSpec::get(expand(candidate, episode_id)).query("quality", quality);

            let Some(body) = self.client.execute(&spec).await else {
                continue;
            };

            if let Some(url) = first_string(&body, STREAM_RULES) {
                info!(candidate, episode_id, "stream location resolved");
                return Some(url);
            }
            debug!(candidate, "no stream URL in payload, trying next candidate");
        }

        warn!(episode_id, "all stream candidates exhausted");
        None
    }
}

#[async_trait]
impl StreamLocator for CatalogResolver {
    async fn stream_url(&self, episode_id: &str) -> Option<String> {
        CatalogResolver::stream_url(self, episode_id, "high").await
    }
}
