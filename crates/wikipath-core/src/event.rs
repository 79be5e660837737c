//! The streaming event vocabulary.
//!
//! One search produces one ordered stream of these events. They serialize
//! to `{"type": ..., "data": {...}}`, which is also the shape framed as
//! server-sent events by the surface crate.

use serde::{Deserialize, Serialize};

use crate::model::SegmentSource;

/// How a result was served without running a live search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheHitType {
    SamePage,
    Direct,
    Composed,
}

/// Batched in-flight search telemetry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub forward_depth: usize,
    pub backward_depth: usize,
    /// `forward_depth + backward_depth`.
    pub depth: usize,
    /// Nodes expanded so far.
    pub pages_checked: usize,
    pub forward_queue_size: usize,
    pub backward_queue_size: usize,
    pub pages_per_second: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Event {
    Start {
        start: String,
        end: String,
    },
    Resolving {
        message: String,
    },
    Resolved {
        start: String,
        end: String,
    },
    Progress(ProgressUpdate),
    PathFound {
        path: Vec<String>,
        hops: usize,
        #[serde(skip_serializing_if = "Option::is_none")]
        diversity_score: Option<f64>,
    },
    CacheHit {
        hit_type: CacheHitType,
        path: Vec<String>,
        hops: usize,
        #[serde(skip_serializing_if = "Option::is_none")]
        segments_used: Option<usize>,
        #[serde(skip_serializing_if = "Option::is_none")]
        segment_sources: Option<Vec<SegmentSource>>,
    },
    CacheMiss {
        message: String,
    },
    Complete {
        path: Vec<String>,
        hops: usize,
        pages_checked: usize,
        #[serde(skip_serializing_if = "Option::is_none")]
        meeting_point: Option<String>,
    },
    Error {
        message: String,
        pages_checked: usize,
    },
    Keepalive,
    Done {
        #[serde(skip_serializing_if = "Option::is_none")]
        search_id: Option<i64>,
    },
}

impl Event {
    /// Terminal events end the stream; `Done` always follows one of them.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Event::Complete { .. } | Event::CacheHit { .. } | Event::Error { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_with_type_and_data() {
        let ev = Event::Progress(ProgressUpdate {
            forward_depth: 1,
            backward_depth: 2,
            depth: 3,
            pages_checked: 40,
            forward_queue_size: 10,
            backward_queue_size: 20,
            pages_per_second: 7,
        });
        let v = serde_json::to_value(&ev).unwrap();
        assert_eq!(v["type"], "progress");
        assert_eq!(v["data"]["pages_checked"], 40);
    }

    #[test]
    fn keepalive_is_bare() {
        let v = serde_json::to_value(Event::Keepalive).unwrap();
        assert_eq!(v, serde_json::json!({"type": "keepalive"}));
    }

    #[test]
    fn hit_types_use_snake_case() {
        let v = serde_json::to_value(CacheHitType::SamePage).unwrap();
        assert_eq!(v, serde_json::json!("same_page"));
    }
}
