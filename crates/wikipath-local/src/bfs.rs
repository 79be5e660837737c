//! Bidirectional BFS over the live article graph.
//!
//! Forward expansion walks outbound links; backward expansion walks
//! backlinks toward the target. The shallower side advances first, which
//! keeps total expansions low when one endpoint is much better connected
//! than the other. Within one direction expansion is strictly FIFO — that
//! is what makes the first meeting a shortest-path witness.
//!
//! A meeting found while expanding forward joins two halves that were both
//! observed live in this search and needs no validation. A meeting found
//! while expanding backward rests on a backlink, which may be a redirect
//! or disambiguation artifact with no live forward edge; that merged path
//! is validated end-to-end on a fresh memo before it counts, and the
//! search continues when validation rejects it.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use wikipath_core::{
    has_repeated_titles, normalize, Error, Event, LinkSource, ProgressUpdate, Result, SearchConfig,
};

use crate::diverse;
use crate::progress::EventSender;
use crate::validate::{self, EdgeMemo};

/// `normalized_title → (parent_normalized, canonical_of_this_title)`; the
/// root's parent is `None`. First write wins, so the map stays a tree.
type ParentMap = HashMap<String, (Option<String>, String)>;

#[derive(Debug)]
struct QueueNode {
    title: String,
    path: Vec<String>,
    depth: usize,
}

/// One admitted path.
#[derive(Debug, Clone)]
pub struct FoundPath {
    pub path: Vec<String>,
    pub meeting_point: Option<String>,
    /// Smallest Jaccard distance to the paths admitted before this one.
    pub diversity_score: Option<f64>,
}

/// What one engine run observed.
#[derive(Debug, Clone, Default)]
pub struct EngineOutcome {
    /// Admitted paths, shortest first.
    pub paths: Vec<FoundPath>,
    /// Nodes expanded across both directions.
    pub pages_checked: usize,
    /// Distinct pages recorded in either parent map.
    pub pages_visited: usize,
}

pub struct BfsEngine {
    source: Arc<dyn LinkSource>,
    config: SearchConfig,
}

impl BfsEngine {
    pub fn new(source: Arc<dyn LinkSource>, config: SearchConfig) -> Self {
        Self { source, config }
    }

    /// Shortest path between two canonical titles; stops at the first one.
    pub async fn find_path(
        &self,
        start: &str,
        end: &str,
        events: &EventSender,
        cancel: &CancellationToken,
    ) -> Result<EngineOutcome> {
        self.search(start, end, 1, 0.0, events, cancel).await
    }

    /// Up to `max_paths` mutually diverse paths, shortest first.
    pub async fn find_k_paths(
        &self,
        start: &str,
        end: &str,
        max_paths: usize,
        min_diversity: f64,
        events: &EventSender,
        cancel: &CancellationToken,
    ) -> Result<EngineOutcome> {
        self.search(start, end, max_paths.max(1), min_diversity, events, cancel)
            .await
    }

    async fn search(
        &self,
        start: &str,
        end: &str,
        max_paths: usize,
        min_diversity: f64,
        events: &EventSender,
        cancel: &CancellationToken,
    ) -> Result<EngineOutcome> {
        let start_n = normalize(start);
        let end_n = normalize(end);

        if start_n == end_n {
            return Ok(EngineOutcome {
                paths: vec![FoundPath {
                    path: vec![start.to_string()],
                    meeting_point: None,
                    diversity_score: None,
                }],
                pages_checked: 0,
                pages_visited: 0,
            });
        }

        let mut forward_queue = VecDeque::from([QueueNode {
            title: start.to_string(),
            path: vec![start.to_string()],
            depth: 0,
        }]);
        let mut backward_queue = VecDeque::from([QueueNode {
            title: end.to_string(),
            path: vec![end.to_string()],
            depth: 0,
        }]);
        let mut forward_parents: ParentMap =
            HashMap::from([(start_n.clone(), (None, start.to_string()))]);
        let mut backward_parents: ParentMap =
            HashMap::from([(end_n.clone(), (None, end.to_string()))]);

        let mut forward_depth = 0usize;
        let mut backward_depth = 0usize;
        let mut pages_checked = 0usize;
        let mut nodes_since_event = 0usize;
        let mut last_event = Instant::now();

        // Positive edge assertions accumulated from forward expansions.
        // Candidate validation always runs on a private memo instead, so
        // these can never mask a stale backward edge.
        let mut memo = EdgeMemo::new();

        let mut admitted: Vec<FoundPath> = Vec::new();
        let mut seen_candidates: HashSet<Vec<String>> = HashSet::new();
        let mut shortest_hops: Option<usize> = None;

        'search: while (!forward_queue.is_empty() || !backward_queue.is_empty())
            && forward_depth + backward_depth <= self.config.max_total_depth
        {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            if let Some(hops) = shortest_hops {
                // Past the shortest answer by more than two hops nothing
                // admissible is left to find.
                if forward_depth + backward_depth > hops + 2 {
                    break;
                }
            }

            let go_forward = !forward_queue.is_empty()
                && (forward_depth <= backward_depth || backward_queue.is_empty());

            if go_forward {
                let Some(node) = forward_queue.pop_front() else {
                    break;
                };
                forward_depth = forward_depth.max(node.depth);
                pages_checked += 1;
                nodes_since_event += 1;
                let node_n = normalize(&node.title);

                let Some(links) = self.source.outbound_links(&node.title).await? else {
                    debug!(title = %node.title, "page missing, dead end");
                    continue;
                };
                validate::seed_outbound(&mut memo, &node.title, &links);

                for link in links {
                    let link_n = normalize(&link);

                    if backward_parents.contains_key(&link_n) {
                        let mut candidate = node.path.clone();
                        candidate.push(link.clone());
                        candidate.extend(reconstruct_backward(&link_n, &backward_parents));

                        // Both halves were observed live by this search;
                        // no validation needed.
                        if self
                            .consider(
                                candidate,
                                Some(link.clone()),
                                false,
                                max_paths,
                                min_diversity,
                                &mut admitted,
                                &mut seen_candidates,
                                &mut shortest_hops,
                                events,
                                cancel,
                            )
                            .await
                            && admitted.len() >= max_paths
                        {
                            break 'search;
                        }
                    }

                    if !forward_parents.contains_key(&link_n) {
                        forward_parents.insert(link_n, (Some(node_n.clone()), link.clone()));
                        let mut path = node.path.clone();
                        path.push(link.clone());
                        forward_queue.push_back(QueueNode {
                            title: link,
                            path,
                            depth: node.depth + 1,
                        });
                    }
                }
            } else if let Some(node) = backward_queue.pop_front() {
                backward_depth = backward_depth.max(node.depth);
                pages_checked += 1;
                nodes_since_event += 1;
                let node_n = normalize(&node.title);

                let links = self
                    .source
                    .inbound_links(&node.title, self.config.backlink_limit)
                    .await?;

                for link in links {
                    let link_n = normalize(&link);

                    if forward_parents.contains_key(&link_n) {
                        let mut candidate = reconstruct_forward(&link_n, &forward_parents);
                        candidate.extend(node.path.iter().cloned());

                        // The backlink edge may be stale; this candidate
                        // must survive end-to-end validation.
                        if self
                            .consider(
                                candidate,
                                Some(link.clone()),
                                true,
                                max_paths,
                                min_diversity,
                                &mut admitted,
                                &mut seen_candidates,
                                &mut shortest_hops,
                                events,
                                cancel,
                            )
                            .await
                            && admitted.len() >= max_paths
                        {
                            break 'search;
                        }
                    }

                    if !backward_parents.contains_key(&link_n) {
                        backward_parents.insert(link_n, (Some(node_n.clone()), link.clone()));
                        let mut path = vec![link.clone()];
                        path.extend(node.path.iter().cloned());
                        backward_queue.push_back(QueueNode {
                            title: link,
                            path,
                            depth: node.depth + 1,
                        });
                    }
                }
            } else {
                break;
            }

            let should_emit = nodes_since_event >= self.config.progress_batch
                || last_event.elapsed() >= self.config.progress_interval();
            if should_emit {
                let elapsed = last_event.elapsed().as_secs_f64();
                let pages_per_second = if elapsed > 0.0 {
                    (nodes_since_event as f64 / elapsed) as u64
                } else {
                    0
                };
                events.emit(Event::Progress(ProgressUpdate {
                    forward_depth,
                    backward_depth,
                    depth: forward_depth + backward_depth,
                    pages_checked,
                    forward_queue_size: forward_queue.len(),
                    backward_queue_size: backward_queue.len(),
                    pages_per_second,
                }));
                last_event = Instant::now();
                nodes_since_event = 0;
            }

            if self.config.politeness_every > 0 && pages_checked % self.config.politeness_every == 0
            {
                tokio::time::sleep(self.config.politeness_pause()).await;
            }
        }

        admitted.sort_by_key(|f| f.path.len());
        Ok(EngineOutcome {
            paths: admitted,
            pages_checked,
            pages_visited: forward_parents.len() + backward_parents.len(),
        })
    }

    /// Dedupes, checks diversity, validates when required, and admits a
    /// meeting-point candidate. Returns whether the candidate was admitted.
    #[allow(clippy::too_many_arguments)]
    async fn consider(
        &self,
        candidate: Vec<String>,
        meeting_point: Option<String>,
        needs_validation: bool,
        max_paths: usize,
        min_diversity: f64,
        admitted: &mut Vec<FoundPath>,
        seen_candidates: &mut HashSet<Vec<String>>,
        shortest_hops: &mut Option<usize>,
        events: &EventSender,
        cancel: &CancellationToken,
    ) -> bool {
        let key: Vec<String> = candidate.iter().map(|t| normalize(t)).collect();
        if !seen_candidates.insert(key) {
            return false;
        }
        if has_repeated_titles(&candidate) {
            return false;
        }

        let admitted_paths: Vec<Vec<String>> = admitted.iter().map(|f| f.path.clone()).collect();
        if !diverse::is_admissible(&candidate, &admitted_paths, min_diversity) {
            debug!(hops = candidate.len() - 1, "candidate below diversity threshold");
            return false;
        }

        if needs_validation {
            let mut private_memo = EdgeMemo::new();
            if !validate::validate_path(&candidate, self.source.as_ref(), &mut private_memo, cancel)
                .await
            {
                debug!(hops = candidate.len() - 1, "backward meeting failed validation, continuing");
                return false;
            }
        }

        let hops = candidate.len() - 1;
        let diversity_score = diverse::min_distance(&candidate, &admitted_paths);
        info!(hops, paths = admitted.len() + 1, "path admitted");
        if max_paths > 1 {
            events.emit(Event::PathFound {
                path: candidate.clone(),
                hops,
                diversity_score,
            });
        }
        shortest_hops.get_or_insert(hops);
        admitted.push(FoundPath {
            path: candidate,
            meeting_point,
            diversity_score,
        });
        true
    }
}

/// Start → meeting point, canonical titles, by chasing parent pointers.
fn reconstruct_forward(meeting: &str, parents: &ParentMap) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = Some(meeting.to_string());
    while let Some(key) = current {
        let Some((parent, canonical)) = parents.get(&key) else {
            break;
        };
        out.push(canonical.clone());
        current = parent.clone();
    }
    out.reverse();
    out
}

/// The segment after the meeting point through to the search's end, in
/// forward order. The meeting point itself is contributed by the other
/// half.
fn reconstruct_backward(meeting: &str, parents: &ParentMap) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = parents.get(meeting).and_then(|(p, _)| p.clone());
    while let Some(key) = current {
        let Some((parent, canonical)) = parents.get(&key) else {
            break;
        };
        out.push(canonical.clone());
        current = parent.clone();
    }
    out
}
