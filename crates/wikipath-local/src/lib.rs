//! Local (reqwest + SQLite) implementations for wikipath.
//!
//! Layout mirrors the data flow of one search:
//! - [`wiki`] — typed client over the MediaWiki action API
//! - [`store`] — durable segment + history tables (SQLite, WAL)
//! - [`cache`] — bounded LRU in front of the store, with composition
//! - [`validate`] — re-verification of cached edges against the live graph
//! - [`bfs`] — the bidirectional BFS engine
//! - [`diverse`] — Jaccard-distance admission for k-diverse results
//! - [`orchestrate`] — cache-aware top-level search
//! - [`progress`] — the bounded event channel between engine and caller

pub mod bfs;
pub mod cache;
pub mod diverse;
pub mod orchestrate;
pub mod progress;
pub mod store;
pub mod validate;
pub mod wiki;

use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub(crate) fn now_epoch_s() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_secs()
}
