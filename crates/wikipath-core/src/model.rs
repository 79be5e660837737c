//! Request/response models, segments and provenance.

use serde::{Deserialize, Serialize};

use crate::{normalize, Error, Result};

pub const TERM_MAX_LEN: usize = 200;
pub const MAX_PATHS_CAP: usize = 5;

/// Substrings rejected outright before a term ever reaches the remote API
/// or the store.
const REJECTED_PATTERNS: &[&str] = &["<script", "javascript:", "onerror=", "onclick=", "--"];

/// SQL verbs rejected when they follow a statement separator.
const REJECTED_SQL_TAILS: &[&str] = &["drop", "delete", "insert", "update"];

/// A path-finding request as submitted by the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchRequest {
    pub start: String,
    pub end: String,
    #[serde(default = "default_max_paths")]
    pub max_paths: usize,
    #[serde(default = "default_min_diversity")]
    pub min_diversity: f64,
}

fn default_max_paths() -> usize {
    1
}

fn default_min_diversity() -> f64 {
    0.3
}

impl SearchRequest {
    pub fn new(start: impl Into<String>, end: impl Into<String>) -> Self {
        Self {
            start: start.into(),
            end: end.into(),
            max_paths: default_max_paths(),
            min_diversity: default_min_diversity(),
        }
    }

    /// Validates and trims both terms and the knobs, returning the cleaned
    /// request. Terms are restricted to characters that occur in article
    /// titles; obvious injection patterns are rejected before anything else
    /// sees them.
    pub fn validated(mut self) -> Result<Self> {
        self.start = validate_term(&self.start)?;
        self.end = validate_term(&self.end)?;
        if !(1..=MAX_PATHS_CAP).contains(&self.max_paths) {
            return Err(Error::InvalidRequest(format!(
                "max_paths must be between 1 and {MAX_PATHS_CAP}"
            )));
        }
        if !(0.0..=1.0).contains(&self.min_diversity) {
            return Err(Error::InvalidRequest(
                "min_diversity must be between 0.0 and 1.0".to_string(),
            ));
        }
        Ok(self)
    }
}

fn validate_term(term: &str) -> Result<String> {
    let term = term.trim();
    if term.is_empty() {
        return Err(Error::InvalidRequest("search term cannot be empty".to_string()));
    }
    if term.len() > TERM_MAX_LEN {
        return Err(Error::InvalidRequest(format!(
            "search term too long (max {TERM_MAX_LEN} characters)"
        )));
    }

    let lower = term.to_lowercase();
    if REJECTED_PATTERNS.iter().any(|p| lower.contains(p)) {
        return Err(Error::InvalidRequest(
            "invalid characters detected in search term".to_string(),
        ));
    }
    if let Some(idx) = lower.find(';') {
        let tail = &lower[idx..];
        if REJECTED_SQL_TAILS.iter().any(|v| tail.contains(v)) {
            return Err(Error::InvalidRequest(
                "invalid characters detected in search term".to_string(),
            ));
        }
    }

    let allowed = |c: char| c.is_ascii_alphanumeric() || " -()'.,&".contains(c);
    if !term.chars().all(allowed) {
        return Err(Error::InvalidRequest(
            "search term contains invalid characters; use letters, numbers, spaces and common punctuation".to_string(),
        ));
    }

    Ok(term.to_string())
}

/// Graph node for visualization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub id: usize,
    pub label: String,
    pub title: String,
}

/// Graph edge for visualization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathEdge {
    #[serde(rename = "from")]
    pub from_node: usize,
    pub to: usize,
}

/// Nodes of a path, indexed in path order.
pub fn graph_nodes(path: &[String]) -> Vec<Node> {
    path.iter()
        .enumerate()
        .map(|(id, page)| Node {
            id,
            label: page.clone(),
            title: page.clone(),
        })
        .collect()
}

/// Consecutive edges of a path, by node index.
pub fn graph_edges(path: &[String]) -> Vec<PathEdge> {
    (0..path.len().saturating_sub(1))
        .map(|i| PathEdge {
            from_node: i,
            to: i + 1,
        })
        .collect()
}

/// Where an edge of a returned path came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeSource {
    Cache,
    Bfs,
}

/// Per-segment provenance attached to a returned path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentSource {
    pub from_page: String,
    pub to_page: String,
    pub source: EdgeSource,
    /// Epoch seconds at which the segment was first cached.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cached_at: Option<u64>,
    /// Epoch seconds at which the owning search started.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discovered_at: Option<u64>,
}

/// A persisted sub-path `start → … → end`.
///
/// `start`/`end` are normalized; `path` keeps the canonical titles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    pub start: String,
    pub end: String,
    pub path: Vec<String>,
    pub hops: usize,
    pub use_count: u64,
    pub last_used: u64,
    pub created_at: u64,
}

impl Segment {
    /// Structural invariants every stored segment satisfies.
    pub fn is_well_formed(&self) -> bool {
        if self.path.len() < 2 || self.hops != self.path.len() - 1 {
            return false;
        }
        let first_ok = self.path.first().map(|p| normalize(p) == self.start) == Some(true);
        let last_ok = self.path.last().map(|p| normalize(p) == self.end) == Some(true);
        let mut seen = std::collections::HashSet::new();
        let unique = self.path.iter().all(|p| seen.insert(normalize(p)));
        first_ok && last_ok && unique
    }
}

/// One found path with its visualization graph and cache annotations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathInfo {
    pub path: Vec<String>,
    pub hops: usize,
    pub nodes: Vec<Node>,
    pub edges: Vec<PathEdge>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diversity_score: Option<f64>,
    pub is_cached: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_hit_type: Option<crate::event::CacheHitType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub segments_used: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_saved_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub segment_sources: Option<Vec<SegmentSource>>,
    /// Fraction of the path's edges served from cache.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_effectiveness: Option<f64>,
}

/// Successful search response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search_id: Option<i64>,
    /// Shortest path, kept flat for backwards compatibility.
    pub path: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paths: Option<Vec<PathInfo>>,
    pub nodes: Vec<Node>,
    pub edges: Vec<PathEdge>,
    pub hops: usize,
    pub pages_checked: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paths_found: Option<usize>,
}

/// Failed search response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchErrorResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search_id: Option<i64>,
    pub error: String,
    pub pages_checked: usize,
}

/// Persisted history row for one search attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchRecord {
    pub id: i64,
    pub start_term: String,
    pub end_term: String,
    pub hops: usize,
    pub pages_checked: usize,
    pub success: bool,
    /// Epoch seconds.
    pub created_at: u64,
}

/// History row with the stored path and error detail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchRecordDetail {
    #[serde(flatten)]
    pub record: SearchRecord,
    pub path: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// Aggregate history statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchStats {
    pub total_searches: u64,
    pub successful_searches: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg_hops: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg_pages_checked: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_ordinary_titles() {
        for term in [
            "Python (programming language)",
            "Rock 'n' roll",
            "AC-130",
            "Anderson, Indiana",
            "AT&T",
        ] {
            assert!(validate_term(term).is_ok(), "rejected {term:?}");
        }
    }

    #[test]
    fn trims_and_bounds_terms() {
        assert_eq!(validate_term("  Rust  ").unwrap(), "Rust");
        assert!(validate_term("   ").is_err());
        assert!(validate_term(&"a".repeat(TERM_MAX_LEN + 1)).is_err());
    }

    #[test]
    fn rejects_injection_patterns() {
        for term in [
            "<script>alert(1)</script>",
            "javascript:alert(1)",
            "Robert'); DROP TABLE searches",
            "a -- b",
            "x; delete from searches",
            "snowman \u{2603}",
        ] {
            assert!(validate_term(term).is_err(), "accepted {term:?}");
        }
    }

    #[test]
    fn request_knob_bounds() {
        let mut req = SearchRequest::new("A", "B");
        req.max_paths = 0;
        assert!(req.clone().validated().is_err());
        req.max_paths = 6;
        assert!(req.clone().validated().is_err());
        req.max_paths = 3;
        req.min_diversity = 1.5;
        assert!(req.clone().validated().is_err());
        req.min_diversity = 0.5;
        assert!(req.validated().is_ok());
    }

    #[test]
    fn segment_well_formedness() {
        let seg = Segment {
            start: "a".to_string(),
            end: "c".to_string(),
            path: vec!["A".to_string(), "B".to_string(), "C".to_string()],
            hops: 2,
            use_count: 1,
            last_used: 0,
            created_at: 0,
        };
        assert!(seg.is_well_formed());

        let mut looped = seg.clone();
        looped.path = vec!["A".to_string(), "B".to_string(), "A".to_string()];
        looped.end = "a".to_string();
        assert!(!looped.is_well_formed());

        let mut short = seg;
        short.path.truncate(1);
        assert!(!short.is_well_formed());
    }

    #[test]
    fn graph_shapes_follow_the_path() {
        let path = vec!["A".to_string(), "B".to_string(), "C".to_string()];
        let nodes = graph_nodes(&path);
        let edges = graph_edges(&path);
        assert_eq!(nodes.len(), 3);
        assert_eq!(nodes[2].id, 2);
        assert_eq!(edges, vec![PathEdge { from_node: 0, to: 1 }, PathEdge { from_node: 1, to: 2 }]);
        assert!(graph_edges(&[]).is_empty());
    }
}
