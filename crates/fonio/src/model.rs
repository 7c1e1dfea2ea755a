//! Domain types produced by the catalog resolver.
//!
//! The upstream contract is unstable, so deserialization is deliberately
//! lenient: field names seen in different response generations are accepted
//! as aliases and anything unrecognized is kept as passthrough metadata.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One catalog entry (a series/show) as surfaced by search or detail lookup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogItem {
    #[serde(alias = "show_id", alias = "series_id")]
    pub id: String,

    #[serde(default)]
    pub title: String,

    #[serde(default)]
    pub description: String,

    /// Number of items under this entry, when the upstream reports it.
    #[serde(default, alias = "episode_count", alias = "total_episodes")]
    pub episodes: u64,

    /// Anything the upstream sent that we do not model. Passed through to
    /// the presentation layer untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// The minimal unit a transfer needs; everything else is passthrough.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpisodeRef {
    #[serde(alias = "episode_id")]
    pub id: String,

    #[serde(default)]
    pub title: String,

    /// Duration in seconds, when known.
    #[serde(default)]
    pub duration: Option<u64>,

    #[serde(default = "default_released", alias = "is_released")]
    pub released: bool,

    #[serde(default, alias = "is_premium", alias = "is_locked")]
    pub premium: bool,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_released() -> bool {
    true
}
