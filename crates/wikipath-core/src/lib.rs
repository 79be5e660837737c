//! Backend-agnostic types and traits for wikipath.
//!
//! Everything here is deliberately free of I/O:
//! - title normalization and the title-pair conventions
//! - the `Event` stream vocabulary
//! - request/response models and validation
//! - the `LinkSource` trait the engine and validator consume
//!
//! Concrete backends (the MediaWiki client, the SQLite store, the LRU
//! cache) live in `wikipath-local`.

use std::time::Duration;

pub mod event;
pub mod model;
pub mod title;

pub use event::{CacheHitType, Event, ProgressUpdate};
pub use model::{
    graph_edges, graph_nodes, EdgeSource, Node, PathEdge, PathInfo, SearchErrorResponse,
    SearchRecord, SearchRecordDetail, SearchRequest, SearchResponse, SearchStats, Segment,
    SegmentSource,
};
pub use title::{has_repeated_titles, normalize, same_title};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("http error: {0}")]
    Http(String),
    #[error("store error: {0}")]
    Store(String),
    #[error("cache error: {0}")]
    Cache(String),
    #[error("could not find Wikipedia article for '{0}'")]
    Resolve(String),
    #[error("no path found within {max_depth} hops")]
    NoPath {
        max_depth: usize,
        pages_checked: usize,
    },
    #[error("search timed out after {0} seconds")]
    Timeout(u64),
    #[error("search cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, Error>;

/// Remote link oracle over the article graph.
///
/// The engine and validator only ever see this trait, which keeps them
/// testable against in-memory graphs.
#[async_trait::async_trait]
pub trait LinkSource: Send + Sync {
    /// Article-namespace outbound links of `title`, following redirects.
    ///
    /// Returns `Ok(None)` when the remote reports the page missing. An
    /// exhausted-retries transport failure or an HTTP status failure is
    /// surfaced as `Ok(Some(vec![]))` so the page dead-ends instead of
    /// failing the whole search.
    async fn outbound_links(&self, title: &str) -> Result<Option<Vec<String>>>;

    /// Up to `limit` titles that link to `title`.
    ///
    /// Capped at 500 by the remote; when more exist the first `limit` are
    /// returned without pagination.
    async fn inbound_links(&self, title: &str, limit: usize) -> Result<Vec<String>>;

    /// Top-ranked article title for a free-text query, or `None` when no
    /// article matches.
    async fn resolve(&self, query: &str) -> Result<Option<String>>;
}

/// Connection, timeout and retry policy for the remote API client.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ClientConfig {
    /// MediaWiki action endpoint, e.g. `https://en.wikipedia.org/w/api.php`.
    pub endpoint: String,
    /// Identifying user agent, sent on every request.
    pub user_agent: String,
    pub connect_timeout_ms: u64,
    pub request_timeout_ms: u64,
    /// Idle connections kept alive in the pool.
    pub pool_idle_per_host: usize,
    /// Retries for transient transport failures (on top of the first try).
    pub retry_attempts: u32,
    /// Backoff base; attempt `n` sleeps `base * 2^n`.
    pub retry_base_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://en.wikipedia.org/w/api.php".to_string(),
            user_agent: "wikipath/0.1 (hyperlink pathfinding research tool)".to_string(),
            connect_timeout_ms: 5_000,
            request_timeout_ms: 30_000,
            pool_idle_per_host: 100,
            retry_attempts: 3,
            retry_base_ms: 500,
        }
    }
}

impl ClientConfig {
    pub fn endpoint_url(&self) -> Result<url::Url> {
        url::Url::parse(&self.endpoint).map_err(|e| Error::Http(format!("bad endpoint: {e}")))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn retry_base(&self) -> Duration {
        Duration::from_millis(self.retry_base_ms)
    }
}

/// Knobs for one search run. Defaults mirror the public service.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SearchConfig {
    /// Combined forward + backward depth cap.
    pub max_total_depth: usize,
    /// Backlink fetch bound per backward expansion.
    pub backlink_limit: usize,
    /// Sleep after this many processed nodes, to stay polite upstream.
    pub politeness_every: usize,
    pub politeness_pause_ms: u64,
    /// Emit a progress event after this many nodes...
    pub progress_batch: usize,
    /// ...or after this much time, whichever comes first.
    pub progress_interval_ms: u64,
    /// Outer wall-clock budget for a whole search.
    pub budget_secs: u64,
    /// Hop bound for composing a path out of cached segments.
    pub compose_max_hops: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            max_total_depth: 6,
            backlink_limit: 500,
            politeness_every: 10,
            politeness_pause_ms: 50,
            progress_batch: 20,
            progress_interval_ms: 500,
            budget_secs: 300,
            compose_max_hops: 3,
        }
    }
}

impl SearchConfig {
    pub fn politeness_pause(&self) -> Duration {
        Duration::from_millis(self.politeness_pause_ms)
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }

    pub fn budget(&self) -> Duration {
        Duration::from_secs(self.budget_secs)
    }
}

/// Sizing for the in-memory segment cache.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CacheConfig {
    pub max_entries: usize,
    /// Rows pre-loaded from the store on construction.
    pub warm_limit: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            warm_limit: 1_000,
        }
    }
}
