//! Cache-aware top-level search.
//!
//! Strategy ladder, earliest return wins:
//! 1. same page after resolution
//! 2. direct cache hit
//! 3. composed cache hit, re-validated against the live graph
//! 4. live bidirectional BFS (k-diverse when more than one path is asked)
//!
//! A live result is decomposed into its 2..=4-node sub-paths and written
//! back through the cache, so the next search in the neighborhood can skip
//! the network. Terminal outcomes are recorded in the search history;
//! cancelled searches leave no trace.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use wikipath_core::{
    graph_edges, graph_nodes, normalize, same_title, CacheHitType, EdgeSource, Error, Event,
    LinkSource, PathInfo, Result, SearchConfig, SearchRequest, SearchResponse, SegmentSource,
};

use crate::bfs::{BfsEngine, EngineOutcome, FoundPath};
use crate::cache::SegmentCache;
use crate::now_epoch_s;
use crate::progress::EventSender;
use crate::store::SegmentStore;
use crate::validate::{self, EdgeMemo};

/// Rough cost of one remote page fetch, used to estimate time saved by a
/// cache hit.
const NOMINAL_FETCH_MS: u64 = 500;

/// Sub-paths of up to this many nodes are written back after a live search.
const MAX_SEGMENT_NODES: usize = 4;

pub struct Orchestrator {
    source: Arc<dyn LinkSource>,
    cache: Arc<SegmentCache>,
    store: Option<SegmentStore>,
    config: SearchConfig,
}

impl Orchestrator {
    pub fn new(
        source: Arc<dyn LinkSource>,
        cache: Arc<SegmentCache>,
        store: Option<SegmentStore>,
        config: SearchConfig,
    ) -> Self {
        Self {
            source,
            cache,
            store,
            config,
        }
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    /// Runs one search end to end: validation, resolution, the strategy
    /// ladder, history persistence, and the trailing `Done` event. The
    /// wall-clock budget covers everything after validation.
    pub async fn run(
        &self,
        req: SearchRequest,
        events: EventSender,
        cancel: CancellationToken,
    ) -> Result<SearchResponse> {
        let req = match req.validated() {
            Ok(req) => req,
            Err(e) => {
                events.emit(Event::Error {
                    message: e.to_string(),
                    pages_checked: 0,
                });
                events.emit(Event::Done { search_id: None });
                return Err(e);
            }
        };
        events.emit(Event::Start {
            start: req.start.clone(),
            end: req.end.clone(),
        });

        let budget = self.config.budget();
        let outcome = tokio::select! {
            _ = cancel.cancelled() => Err(Error::Cancelled),
            result = tokio::time::timeout(budget, self.search(&req, &events, &cancel)) => {
                match result {
                    Ok(inner) => inner,
                    Err(_elapsed) => {
                        cancel.cancel();
                        Err(Error::Timeout(budget.as_secs()))
                    }
                }
            }
        };

        match outcome {
            Ok(mut response) => {
                let search_id = self.record_success(&req, &response).await;
                response.search_id = search_id;
                events.emit(Event::Done { search_id });
                Ok(response)
            }
            Err(Error::Cancelled) => {
                debug!("search cancelled, nothing persisted");
                Err(Error::Cancelled)
            }
            Err(e) => {
                let pages_checked = match &e {
                    Error::NoPath { pages_checked, .. } => *pages_checked,
                    _ => 0,
                };
                let search_id = self.record_failure(&req, &e, pages_checked).await;
                events.emit(Event::Error {
                    message: e.to_string(),
                    pages_checked,
                });
                events.emit(Event::Done { search_id });
                Err(e)
            }
        }
    }

    async fn search(
        &self,
        req: &SearchRequest,
        events: &EventSender,
        cancel: &CancellationToken,
    ) -> Result<SearchResponse> {
        let started_at = now_epoch_s();

        events.emit(Event::Resolving {
            message: "Resolving search terms...".to_string(),
        });
        let start = self
            .source
            .resolve(&req.start)
            .await?
            .ok_or_else(|| Error::Resolve(req.start.clone()))?;
        let end = self
            .source
            .resolve(&req.end)
            .await?
            .ok_or_else(|| Error::Resolve(req.end.clone()))?;
        events.emit(Event::Resolved {
            start: start.clone(),
            end: end.clone(),
        });

        if same_title(&start, &end) {
            let path = vec![start];
            events.emit(Event::Complete {
                path: path.clone(),
                hops: 0,
                pages_checked: 0,
                meeting_point: None,
            });
            return Ok(cached_response(path, CacheHitType::SamePage, None));
        }

        if let Some((path, source)) = self.cache_get(&start, &end).await {
            info!(start = %start, end = %end, "direct cache hit");
            let sources = vec![source];
            events.emit(Event::CacheHit {
                hit_type: CacheHitType::Direct,
                path: path.clone(),
                hops: path.len().saturating_sub(1),
                segments_used: Some(1),
                segment_sources: Some(sources.clone()),
            });
            return Ok(cached_response(path, CacheHitType::Direct, Some(sources)));
        }

        if let Some((path, sources)) = self.cache_compose(&start, &end).await {
            let mut memo = EdgeMemo::new();
            if validate::validate_path(&path, self.source.as_ref(), &mut memo, cancel).await {
                info!(segments = sources.len(), "composed cache hit validated");
                events.emit(Event::CacheHit {
                    hit_type: CacheHitType::Composed,
                    path: path.clone(),
                    hops: path.len().saturating_sub(1),
                    segments_used: Some(sources.len()),
                    segment_sources: Some(sources.clone()),
                });
                return Ok(cached_response(path, CacheHitType::Composed, Some(sources)));
            }
            // Staleness is usually transient; the segments stay in place.
            warn!("composed path failed validation, falling back to live search");
        }

        events.emit(Event::CacheMiss {
            message: "no cached route, starting live search".to_string(),
        });

        let engine = BfsEngine::new(self.source.clone(), self.config.clone());
        let outcome = if req.max_paths > 1 {
            engine
                .find_k_paths(&start, &end, req.max_paths, req.min_diversity, events, cancel)
                .await?
        } else {
            engine.find_path(&start, &end, events, cancel).await?
        };
        if outcome.paths.is_empty() {
            return Err(Error::NoPath {
                max_depth: self.config.max_total_depth,
                pages_checked: outcome.pages_visited,
            });
        }

        let mut segments = Vec::new();
        for found in &outcome.paths {
            segments.extend(extract_segments(&found.path));
        }
        self.cache_bulk_put(segments).await;

        let primary = &outcome.paths[0];
        events.emit(Event::Complete {
            path: primary.path.clone(),
            hops: primary.path.len().saturating_sub(1),
            pages_checked: outcome.pages_visited,
            meeting_point: primary.meeting_point.clone(),
        });

        Ok(live_response(req, &outcome, started_at))
    }

    // Store and cache calls are blocking (SQLite); they run on the
    // blocking pool so the search task never stalls the runtime.

    async fn cache_get(&self, start: &str, end: &str) -> Option<(Vec<String>, SegmentSource)> {
        let cache = self.cache.clone();
        let (start, end) = (start.to_string(), end.to_string());
        let lookup = tokio::task::spawn_blocking(move || {
            cache.get(&start, &end).map(|path| {
                let source = cache.provenance(&normalize(&start), &normalize(&end));
                (path, source)
            })
        });
        match lookup.await {
            Ok(hit) => hit,
            Err(e) => {
                warn!(error = %e, "cache read task failed");
                None
            }
        }
    }

    async fn cache_compose(
        &self,
        start: &str,
        end: &str,
    ) -> Option<(Vec<String>, Vec<SegmentSource>)> {
        let cache = self.cache.clone();
        let max_hops = self.config.compose_max_hops;
        let (start, end) = (start.to_string(), end.to_string());
        match tokio::task::spawn_blocking(move || cache.compose(&start, &end, max_hops)).await {
            Ok(composed) => composed,
            Err(e) => {
                warn!(error = %e, "cache compose task failed");
                None
            }
        }
    }

    async fn cache_bulk_put(&self, segments: Vec<(String, String, Vec<String>)>) {
        if segments.is_empty() {
            return;
        }
        let cache = self.cache.clone();
        if let Err(e) = tokio::task::spawn_blocking(move || cache.bulk_put(&segments)).await {
            warn!(error = %e, "segment write-back task failed");
        }
    }

    async fn record_success(&self, req: &SearchRequest, resp: &SearchResponse) -> Option<i64> {
        let store = self.store.clone()?;
        let start_term = req.start.clone();
        let end_term = req.end.clone();
        let path = resp.path.clone();
        let hops = resp.hops;
        let pages_checked = resp.pages_checked;
        let extra_paths: Vec<(Vec<String>, Option<f64>)> = resp
            .paths
            .as_ref()
            .map(|infos| {
                infos
                    .iter()
                    .map(|p| (p.path.clone(), p.diversity_score))
                    .collect()
            })
            .unwrap_or_default();

        let result = tokio::task::spawn_blocking(move || {
            let id = store.save_search(
                &start_term,
                &end_term,
                &path,
                hops,
                pages_checked,
                true,
                None,
            )?;
            if extra_paths.len() > 1 {
                store.save_search_paths(id, &extra_paths)?;
            }
            Ok::<i64, Error>(id)
        })
        .await;

        match result {
            Ok(Ok(id)) => Some(id),
            Ok(Err(e)) => {
                warn!(error = %e, "failed to record search history");
                None
            }
            Err(e) => {
                warn!(error = %e, "history task failed");
                None
            }
        }
    }

    async fn record_failure(&self, req: &SearchRequest, error: &Error, pages_checked: usize) -> Option<i64> {
        let store = self.store.clone()?;
        let start_term = req.start.clone();
        let end_term = req.end.clone();
        let message = error.to_string();

        let result = tokio::task::spawn_blocking(move || {
            store.save_search(
                &start_term,
                &end_term,
                &[],
                0,
                pages_checked,
                false,
                Some(&message),
            )
        })
        .await;

        match result {
            Ok(Ok(id)) => Some(id),
            Ok(Err(e)) => {
                warn!(error = %e, "failed to record search history");
                None
            }
            Err(e) => {
                warn!(error = %e, "history task failed");
                None
            }
        }
    }
}

/// All sub-paths of 2..=4 nodes, keyed by their canonical endpoints. For
/// `A → B → C → D` that is a→b, b→c, c→d, a→c, b→d and a→d.
pub fn extract_segments(path: &[String]) -> Vec<(String, String, Vec<String>)> {
    let n = path.len();
    let mut segments = Vec::new();
    for i in 0..n {
        for j in (i + 2)..=(i + MAX_SEGMENT_NODES).min(n) {
            let segment = path[i..j].to_vec();
            segments.push((segment[0].clone(), segment[j - i - 1].clone(), segment));
        }
    }
    segments
}

fn bfs_provenance(path: &[String], discovered_at: u64) -> Vec<SegmentSource> {
    path.windows(2)
        .map(|w| SegmentSource {
            from_page: normalize(&w[0]),
            to_page: normalize(&w[1]),
            source: EdgeSource::Bfs,
            cached_at: None,
            discovered_at: Some(discovered_at),
        })
        .collect()
}

fn cached_response(
    path: Vec<String>,
    hit_type: CacheHitType,
    sources: Option<Vec<SegmentSource>>,
) -> SearchResponse {
    let hops = path.len().saturating_sub(1);
    let time_saved_ms = match hit_type {
        CacheHitType::SamePage => None,
        _ => Some(hops as u64 * NOMINAL_FETCH_MS),
    };
    let info = PathInfo {
        path: path.clone(),
        hops,
        nodes: graph_nodes(&path),
        edges: graph_edges(&path),
        diversity_score: None,
        is_cached: hit_type != CacheHitType::SamePage,
        cache_hit_type: Some(hit_type),
        segments_used: sources.as_ref().map(|s| s.len()),
        time_saved_ms,
        segment_sources: sources,
        cache_effectiveness: match hit_type {
            CacheHitType::SamePage => None,
            _ => Some(1.0),
        },
    };
    SearchResponse {
        success: true,
        search_id: None,
        path,
        paths: Some(vec![info.clone()]),
        nodes: info.nodes.clone(),
        edges: info.edges.clone(),
        hops,
        pages_checked: 0,
        paths_found: Some(1),
    }
}

fn live_response(req: &SearchRequest, outcome: &EngineOutcome, started_at: u64) -> SearchResponse {
    let infos: Vec<PathInfo> = outcome.paths.iter().map(|f| live_path_info(f, started_at)).collect();
    let primary = &outcome.paths[0];
    SearchResponse {
        success: true,
        search_id: None,
        path: primary.path.clone(),
        paths: if req.max_paths > 1 {
            Some(infos.clone())
        } else {
            Some(vec![infos[0].clone()])
        },
        nodes: graph_nodes(&primary.path),
        edges: graph_edges(&primary.path),
        hops: primary.path.len().saturating_sub(1),
        pages_checked: outcome.pages_visited,
        paths_found: Some(outcome.paths.len()),
    }
}

fn live_path_info(found: &FoundPath, discovered_at: u64) -> PathInfo {
    PathInfo {
        path: found.path.clone(),
        hops: found.path.len().saturating_sub(1),
        nodes: graph_nodes(&found.path),
        edges: graph_edges(&found.path),
        diversity_score: found.diversity_score,
        is_cached: false,
        cache_hit_type: None,
        segments_used: None,
        time_saved_ms: None,
        segment_sources: Some(bfs_provenance(&found.path, discovered_at)),
        cache_effectiveness: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(titles: &[&str]) -> Vec<String> {
        titles.iter().map(|t| t.to_string()).collect()
    }

    #[test]
    fn extracts_all_short_subpaths() {
        let p = path(&["A", "B", "C", "D"]);
        let segs = extract_segments(&p);
        let keys: Vec<(String, String)> = segs
            .iter()
            .map(|(s, e, _)| (s.clone(), e.clone()))
            .collect();
        assert_eq!(
            keys,
            vec![
                ("A".to_string(), "B".to_string()),
                ("A".to_string(), "C".to_string()),
                ("A".to_string(), "D".to_string()),
                ("B".to_string(), "C".to_string()),
                ("B".to_string(), "D".to_string()),
                ("C".to_string(), "D".to_string()),
            ]
        );
        // Segment bodies span their endpoints.
        let (_, _, body) = &segs[2];
        assert_eq!(body, &path(&["A", "B", "C", "D"]));
    }

    #[test]
    fn no_segments_from_trivial_paths() {
        assert!(extract_segments(&path(&["A"])).is_empty());
        assert!(extract_segments(&[]).is_empty());
        assert_eq!(extract_segments(&path(&["A", "B"])).len(), 1);
    }

    #[test]
    fn five_node_paths_skip_over_long_segments() {
        let p = path(&["A", "B", "C", "D", "E"]);
        let segs = extract_segments(&p);
        // No 5-node segment: a→e is absent.
        assert!(segs
            .iter()
            .all(|(_, _, body)| body.len() <= MAX_SEGMENT_NODES));
        assert_eq!(segs.len(), 9);
    }

    #[test]
    fn bfs_provenance_covers_every_edge() {
        let p = path(&["A", "B", "C"]);
        let prov = bfs_provenance(&p, 1234);
        assert_eq!(prov.len(), 2);
        assert_eq!(prov[0].from_page, "a");
        assert_eq!(prov[0].to_page, "b");
        assert_eq!(prov[0].source, EdgeSource::Bfs);
        assert_eq!(prov[0].discovered_at, Some(1234));
        assert_eq!(prov[0].cached_at, None);
    }
}
