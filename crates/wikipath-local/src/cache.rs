//! Bounded in-memory segment cache in front of the durable store.
//!
//! All keys are normalized titles; values keep canonical titles. The lock
//! is a plain mutex around the LRU map and the hit/miss counters, and it is
//! never held across a store call: reads fall through after release, and
//! `connected_nodes` snapshots the in-memory keys first. Store writes are
//! best-effort — a search never fails because a cache write did.

use std::collections::{BTreeSet, HashSet, VecDeque};
use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard};

use lru::LruCache;
use serde::Serialize;
use tracing::{debug, info, warn};
use wikipath_core::{has_repeated_titles, normalize, CacheConfig, EdgeSource, SegmentSource};

use crate::store::SegmentStore;

/// Store-side neighbor bound per direction for composition queries.
const STORE_NEIGHBOR_LIMIT: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub size: usize,
    pub max_size: usize,
    pub hits: u64,
    pub misses: u64,
    /// Percentage, rounded to two decimals.
    pub hit_rate: f64,
    pub total_requests: u64,
}

type Key = (String, String);

struct Inner {
    lru: LruCache<Key, Vec<String>>,
    hits: u64,
    misses: u64,
}

pub struct SegmentCache {
    inner: Mutex<Inner>,
    store: Option<SegmentStore>,
}

impl SegmentCache {
    /// Builds the cache and warms it with the most-recently-used store
    /// rows.
    pub fn new(cfg: &CacheConfig, store: Option<SegmentStore>) -> Self {
        let cap = NonZeroUsize::new(cfg.max_entries.max(1)).unwrap_or(NonZeroUsize::MIN);
        let mut lru = LruCache::new(cap);

        if let Some(store) = &store {
            match store.recent(cfg.warm_limit) {
                Ok(segments) => {
                    let n = segments.len();
                    // Iterate oldest-first so the most recent rows end up
                    // most-recently-used in the LRU.
                    for seg in segments.into_iter().rev() {
                        lru.put((seg.start, seg.end), seg.path);
                    }
                    info!(segments = n, "warmed segment cache from store");
                }
                Err(e) => warn!(error = %e, "cache warming failed"),
            }
        }

        Self {
            inner: Mutex::new(Inner {
                lru,
                hits: 0,
                misses: 0,
            }),
            store,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Cached path from `start` to `end`, or `None`. A local miss falls
    /// through to the store; a store hit populates the LRU without writing
    /// the store again. The returned path is a defensive copy.
    pub fn get(&self, start: &str, end: &str) -> Option<Vec<String>> {
        let key = (normalize(start), normalize(end));
        {
            let mut g = self.lock();
            if let Some(path) = g.lru.get(&key).cloned() {
                g.hits += 1;
                debug!(start = %key.0, end = %key.1, "cache hit");
                return Some(path);
            }
            g.misses += 1;
            debug!(start = %key.0, end = %key.1, "cache miss");
        }

        let store = self.store.as_ref()?;
        match store.get(&key.0, &key.1) {
            Ok(Some(path)) => {
                debug!(start = %key.0, end = %key.1, "loaded segment from store");
                self.lock().lru.put(key, path.clone());
                Some(path)
            }
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, "segment store read failed");
                None
            }
        }
    }

    /// Stores one segment in both tiers. The store write is best-effort.
    pub fn put(&self, start: &str, end: &str, path: &[String]) {
        if path.len() < 2 {
            warn!(start, end, "ignoring degenerate segment");
            return;
        }
        let key = (normalize(start), normalize(end));
        self.lock().lru.put(key.clone(), path.to_vec());

        if let Some(store) = &self.store {
            if let Err(e) = store.put(&key.0, &key.1, path) {
                warn!(error = %e, "segment store write failed");
            }
        }
    }

    /// `put` semantics over a batch; the store side is one transaction.
    pub fn bulk_put(&self, segments: &[(String, String, Vec<String>)]) {
        let rows: Vec<(String, String, Vec<String>)> = segments
            .iter()
            .filter(|(_, _, p)| p.len() >= 2)
            .map(|(s, e, p)| (normalize(s), normalize(e), p.clone()))
            .collect();
        if rows.is_empty() {
            return;
        }

        {
            let mut g = self.lock();
            for (s, e, p) in &rows {
                g.lru.put((s.clone(), e.clone()), p.clone());
            }
        }
        debug!(segments = rows.len(), "bulk cached segments in memory");

        if let Some(store) = &self.store {
            match store.bulk_put(&rows) {
                Ok(n) => info!(segments = n, "bulk saved segments to store"),
                Err(e) => warn!(error = %e, "bulk segment store write failed"),
            }
        }
    }

    /// Pages connected to `page` by a single cached segment, in the given
    /// direction. Unions the in-memory keys with the store's most-used
    /// counterparties.
    pub fn connected_nodes(&self, page: &str, dir: Direction) -> Vec<String> {
        let page = normalize(page);
        let mut connected: BTreeSet<String> = BTreeSet::new();

        {
            let g = self.lock();
            for ((s, e), _) in g.lru.iter() {
                if dir == Direction::Forward && *s == page {
                    connected.insert(e.clone());
                }
                if dir == Direction::Backward && *e == page {
                    connected.insert(s.clone());
                }
            }
        }

        if let Some(store) = &self.store {
            let result = match dir {
                Direction::Forward => store.neighbors_out(&page, STORE_NEIGHBOR_LIMIT),
                Direction::Backward => store.neighbors_in(&page, STORE_NEIGHBOR_LIMIT),
            };
            match result {
                Ok(list) => connected.extend(list),
                Err(e) => warn!(error = %e, "neighbor query failed"),
            }
        }

        connected.into_iter().collect()
    }

    /// Attempts to stitch a path from `start` to `end` out of cached
    /// segments alone, with per-segment provenance.
    ///
    /// BFS over segments: at most `max_hops` segments are chained, and a
    /// candidate that would repeat a normalized title is discarded. Cached
    /// edges may be stale; callers must validate the result.
    pub fn compose(
        &self,
        start: &str,
        end: &str,
        max_hops: usize,
    ) -> Option<(Vec<String>, Vec<SegmentSource>)> {
        let start_n = normalize(start);
        let end_n = normalize(end);

        if let Some(path) = self.get(start, end) {
            info!(start = %start_n, end = %end_n, "cache composition: direct hit");
            let provenance = vec![self.provenance(&start_n, &end_n)];
            return Some((path, provenance));
        }

        let mut visited: HashSet<String> = HashSet::from([start_n.clone()]);
        let mut queue: VecDeque<(String, Vec<String>, usize, Vec<SegmentSource>)> =
            VecDeque::from([(start_n, vec![start.to_string()], 0, Vec::new())]);

        while let Some((current, path, hops, provenance)) = queue.pop_front() {
            for next in self.connected_nodes(&current, Direction::Forward) {
                if visited.contains(&next) {
                    continue;
                }
                let Some(segment) = self.get(&current, &next) else {
                    continue;
                };

                let mut new_path = path.clone();
                new_path.extend(segment.into_iter().skip(1));
                if has_repeated_titles(&new_path) {
                    continue;
                }

                let mut new_provenance = provenance.clone();
                new_provenance.push(self.provenance(&current, &next));

                if next == end_n {
                    info!(segments = new_provenance.len(), "cache composition: assembled path");
                    return Some((new_path, new_provenance));
                }
                if hops + 1 < max_hops {
                    visited.insert(next.clone());
                    queue.push_back((next, new_path, hops + 1, new_provenance));
                }
            }
        }
        None
    }

    /// Cache-sourced provenance entry for the segment `from → to`.
    pub fn provenance(&self, from: &str, to: &str) -> SegmentSource {
        let cached_at = self
            .store
            .as_ref()
            .and_then(|s| s.created_at(from, to).ok().flatten());
        SegmentSource {
            from_page: from.to_string(),
            to_page: to.to_string(),
            source: EdgeSource::Cache,
            cached_at,
            discovered_at: None,
        }
    }

    pub fn stats(&self) -> CacheStats {
        let g = self.lock();
        let total = g.hits + g.misses;
        let hit_rate = if total > 0 {
            ((g.hits as f64 / total as f64) * 10_000.0).round() / 100.0
        } else {
            0.0
        };
        CacheStats {
            size: g.lru.len(),
            max_size: g.lru.cap().get(),
            hits: g.hits,
            misses: g.misses,
            hit_rate,
            total_requests: total,
        }
    }

    pub fn clear(&self) {
        let mut g = self.lock();
        g.lru.clear();
        g.hits = 0;
        g.misses = 0;
        info!("segment cache cleared");
    }
}
