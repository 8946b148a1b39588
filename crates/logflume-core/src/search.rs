// Search request/result model
//
// A SearchRequest carries the ANDed filters, pagination and free-text
// query; validation enforces the page-size and time-window bounds before
// any store is touched. The canonical cache key is derived here so the
// cache layer and the tests agree on one serialization.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{FieldViolation, ValidationError};
use crate::record::LogLevel;
use crate::stores::SearchDocument;

/// Largest page a caller may request.
pub const MAX_PAGE_SIZE: usize = 1000;
/// Page size applied when the caller does not specify one.
pub const DEFAULT_PAGE_SIZE: usize = 50;
/// Widest allowed `[startTime, endTime]` window, inclusive.
pub const MAX_WINDOW_DAYS: i64 = 7;

/// Filtered, paginated log search. All filters are optional and ANDed;
/// sort is always `timestamp` descending.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchRequest {
    pub service_id: Option<String>,
    pub level: Option<LogLevel>,
    pub trace_id: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    /// Free-text query, matched against `message` only.
    pub query: Option<String>,
    pub page: usize,
    pub size: usize,
}

impl Default for SearchRequest {
    fn default() -> Self {
        Self {
            service_id: None,
            level: None,
            trace_id: None,
            start_time: None,
            end_time: None,
            query: None,
            page: 0,
            size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl SearchRequest {
    /// Enforce page-size bounds and the time-window contract:
    /// `endTime >= startTime` and a window of at most 7 days (inclusive,
    /// so exactly 7 days passes).
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut violations = Vec::new();

        if self.size == 0 {
            violations.push(FieldViolation::new("size", "must be at least 1"));
        } else if self.size > MAX_PAGE_SIZE {
            violations.push(FieldViolation::new(
                "size",
                format!("must not exceed {}", MAX_PAGE_SIZE),
            ));
        }

        if let (Some(start), Some(end)) = (self.start_time, self.end_time) {
            if end < start {
                violations.push(FieldViolation::new(
                    "endTime",
                    "must not precede startTime",
                ));
            } else if end - start > Duration::days(MAX_WINDOW_DAYS) {
                violations.push(FieldViolation::new(
                    "endTime",
                    format!("window must not exceed {} days", MAX_WINDOW_DAYS),
                ));
            }
        }

        if violations.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::new(violations))
        }
    }

    /// Canonical serialization used as the cache key. Absent filters get a
    /// fixed `-` placeholder so equivalent requests collide.
    pub fn cache_key(&self) -> String {
        fn opt(value: Option<&str>) -> &str {
            value.unwrap_or("-")
        }
        fn instant(value: Option<DateTime<Utc>>) -> String {
            value
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "-".to_string())
        }

        format!(
            "svc:{}|lvl:{}|trc:{}|from:{}|to:{}|q:{}|page:{}|size:{}",
            opt(self.service_id.as_deref()),
            self.level.map(|l| l.as_str()).unwrap_or("-"),
            opt(self.trace_id.as_deref()),
            instant(self.start_time),
            instant(self.end_time),
            opt(self.query.as_deref()),
            self.page,
            self.size,
        )
    }
}

/// Whether aggregations cover the entire filter match or only the returned
/// page (the degraded fallback path).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregationScope {
    Full,
    Page,
}

/// One page of results plus full-set aggregations and structural counts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    pub logs: Vec<SearchDocument>,
    pub total_elements: u64,
    pub total_pages: u64,
    pub current_page: usize,
    pub size: usize,
    /// Measured search latency; on a cache hit this reflects
    /// cache-retrieval time, not the original search time.
    pub search_time_ms: u64,
    pub level_counts: BTreeMap<String, u64>,
    pub service_counts: BTreeMap<String, u64>,
    pub aggregation_scope: AggregationScope,
}

impl SearchResult {
    /// Structural page count for a given total and page size.
    pub fn page_count(total_elements: u64, size: usize) -> u64 {
        if size == 0 {
            return 0;
        }
        total_elements.div_ceil(size as u64)
    }
}
