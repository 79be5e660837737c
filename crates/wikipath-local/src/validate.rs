//! Edge re-validation for candidate paths.
//!
//! Cached segments and backlink-derived edges can go stale: a link that
//! existed when a segment was stored may since have been removed, or a
//! backlink may be a redirect artifact with no live forward edge. Before a
//! composed or backward-merged path is returned, every directed edge is
//! checked against the current outbound links of its source page.
//!
//! Each unique source page is fetched at most once per memo; edges sharing
//! a source are answered from the memo. Fetches for distinct sources run
//! concurrently.

use std::collections::{HashMap, HashSet};

use futures_util::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use wikipath_core::{normalize, LinkSource};

/// Per-search edge assertions: `(source_normalized, target_normalized) →
/// edge exists`.
///
/// Positive entries are seeded whenever a page's outbound links are
/// fetched; negative entries are only ever written by a failed validation
/// lookup. The memo must not outlive one search, and a validation pass for
/// a composed or backward-meeting candidate must run on a fresh memo so
/// BFS-seeded positives cannot mask stale remote state.
pub type EdgeMemo = HashMap<(String, String), bool>;

/// Records every outbound link of `source_title` as a positive assertion.
pub fn seed_outbound(memo: &mut EdgeMemo, source_title: &str, links: &[String]) {
    let from = normalize(source_title);
    for link in links {
        memo.insert((from.clone(), normalize(link)), true);
    }
}

/// Verifies every consecutive edge of `path` against the live graph.
///
/// Empty and single-node paths are trivially valid. Any stale edge, any
/// missing source page, any transport failure, or cancellation makes the
/// path invalid; staleness is never an error, just a `false`.
pub async fn validate_path(
    path: &[String],
    source: &dyn LinkSource,
    memo: &mut EdgeMemo,
    cancel: &CancellationToken,
) -> bool {
    if path.len() <= 1 {
        return true;
    }

    let edges: Vec<(String, String)> = path
        .windows(2)
        .map(|w| (normalize(&w[0]), normalize(&w[1])))
        .collect();

    // Anything already memoized false fails fast.
    if edges.iter().any(|e| memo.get(e) == Some(&false)) {
        return false;
    }

    // Unique source pages whose links we still need, keyed by normalized
    // form but fetched by canonical title.
    let mut to_fetch: Vec<(String, String)> = Vec::new();
    let mut queued: HashSet<String> = HashSet::new();
    for (i, edge) in edges.iter().enumerate() {
        if memo.get(edge) == Some(&true) {
            continue;
        }
        if queued.insert(edge.0.clone()) {
            to_fetch.push((edge.0.clone(), path[i].clone()));
        }
    }

    if !to_fetch.is_empty() {
        if cancel.is_cancelled() {
            return false;
        }
        let fetched = join_all(to_fetch.iter().map(|(from, canonical)| async move {
            (from.clone(), source.outbound_links(canonical).await)
        }))
        .await;

        for (from, result) in fetched {
            match result {
                Ok(Some(links)) => {
                    for link in &links {
                        memo.insert((from.clone(), normalize(link)), true);
                    }
                }
                Ok(None) => {
                    debug!(page = %from, "validation source page is missing");
                }
                Err(e) => {
                    debug!(page = %from, error = %e, "validation fetch failed");
                }
            }
        }
    }

    for edge in &edges {
        if memo.get(edge) != Some(&true) {
            debug!(from = %edge.0, to = %edge.1, "stale edge, path rejected");
            memo.insert(edge.clone(), false);
            return false;
        }
    }
    true
}
