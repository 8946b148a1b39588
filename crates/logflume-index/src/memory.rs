// In-memory search index
//
// Documents are keyed by (service_id, timestamp, message) so re-indexing a
// batch is an idempotent upsert. serviceId, level and traceId are keyword
// (exact) filters; message is the only analyzed field, matched on
// lowercased tokens with OR semantics. Aggregations always cover the whole
// filter match, never just the returned page.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use logflume_core::{SearchBackendError, SearchDocument, SearchHits, SearchRequest, SearchStore};

type DocKey = (String, DateTime<Utc>, String);

/// Reference `SearchStore` implementation.
#[derive(Default)]
pub struct MemorySearchIndex {
    docs: Mutex<HashMap<DocKey, SearchDocument>>,
    unavailable: Mutex<Option<String>>,
    search_calls: AtomicU64,
}

fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

impl MemorySearchIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an unreachable search store. Every call fails until cleared
    /// with `None`.
    pub fn set_unavailable(&self, reason: Option<String>) {
        *self.unavailable.lock() = reason;
    }

    /// Number of `search` calls answered, including failed ones.
    pub fn search_count(&self) -> u64 {
        self.search_calls.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.docs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_available(&self) -> Result<(), SearchBackendError> {
        match self.unavailable.lock().as_ref() {
            Some(reason) => Err(SearchBackendError::Unavailable(reason.clone())),
            None => Ok(()),
        }
    }

    fn matches(doc: &SearchDocument, request: &SearchRequest, query_tokens: &[String]) -> bool {
        if let Some(service_id) = &request.service_id {
            if &doc.service_id != service_id {
                return false;
            }
        }
        if let Some(level) = request.level {
            if doc.level != level {
                return false;
            }
        }
        if let Some(trace_id) = &request.trace_id {
            if doc.trace_id.as_ref() != Some(trace_id) {
                return false;
            }
        }
        if let Some(start) = request.start_time {
            if doc.timestamp < start {
                return false;
            }
        }
        if let Some(end) = request.end_time {
            if doc.timestamp > end {
                return false;
            }
        }
        if !query_tokens.is_empty() {
            let message_tokens = tokenize(&doc.message);
            if !query_tokens.iter().any(|t| message_tokens.contains(t)) {
                return false;
            }
        }
        true
    }
}

#[async_trait]
impl SearchStore for MemorySearchIndex {
    async fn index_batch(&self, documents: Vec<SearchDocument>) -> Result<(), SearchBackendError> {
        self.check_available()?;

        let mut docs = self.docs.lock();
        for doc in documents {
            let key = (doc.service_id.clone(), doc.timestamp, doc.message.clone());
            docs.insert(key, doc);
        }
        Ok(())
    }

    async fn search(&self, request: &SearchRequest) -> Result<SearchHits, SearchBackendError> {
        self.search_calls.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;

        let query_tokens = request
            .query
            .as_deref()
            .map(tokenize)
            .unwrap_or_default();

        let docs = self.docs.lock();
        let mut matched: Vec<&SearchDocument> = docs
            .values()
            .filter(|d| Self::matches(d, request, &query_tokens))
            .collect();

        // Newest first; record_id (present documents first) breaks ties.
        matched.sort_by(|a, b| {
            b.timestamp
                .cmp(&a.timestamp)
                .then(b.record_id.cmp(&a.record_id))
        });

        let total = matched.len() as u64;

        let mut level_counts: BTreeMap<String, u64> = BTreeMap::new();
        let mut service_counts: BTreeMap<String, u64> = BTreeMap::new();
        for doc in &matched {
            *level_counts.entry(doc.level.as_str().to_string()).or_insert(0) += 1;
            *service_counts.entry(doc.service_id.clone()).or_insert(0) += 1;
        }

        let documents = matched
            .into_iter()
            .skip(request.page * request.size)
            .take(request.size)
            .cloned()
            .collect();

        Ok(SearchHits {
            documents,
            total,
            level_counts,
            service_counts,
        })
    }

    async fn probe(&self) -> Result<(), SearchBackendError> {
        self.check_available()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use logflume_core::LogLevel;

    fn doc(id: i64, service: &str, level: LogLevel, message: &str, secs: i64) -> SearchDocument {
        SearchDocument {
            record_id: Some(id),
            received_at: None,
            timestamp: Utc.timestamp_opt(secs, 0).unwrap(),
            service_id: service.to_string(),
            level,
            message: message.to_string(),
            trace_id: None,
            metadata: Default::default(),
        }
    }

    #[tokio::test]
    async fn test_index_is_idempotent_upsert() {
        let index = MemorySearchIndex::new();
        let d = doc(1, "auth", LogLevel::Info, "login ok", 10);
        index.index_batch(vec![d.clone()]).await.unwrap();
        index.index_batch(vec![d]).await.unwrap();
        assert_eq!(index.len(), 1);
    }

    #[tokio::test]
    async fn test_analyzed_match_on_message() {
        let index = MemorySearchIndex::new();
        index
            .index_batch(vec![
                doc(1, "auth", LogLevel::Info, "Connection reset by peer", 10),
                doc(2, "auth", LogLevel::Info, "user logged in", 11),
            ])
            .await
            .unwrap();

        let hits = index
            .search(&SearchRequest {
                query: Some("RESET".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(hits.total, 1);
        assert_eq!(hits.documents[0].record_id, Some(1));

        // Token match, not substring: "res" matches nothing.
        let none = index
            .search(&SearchRequest {
                query: Some("res".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(none.total, 0);
    }

    #[tokio::test]
    async fn test_aggregations_cover_whole_match_not_page() {
        let index = MemorySearchIndex::new();
        let mut batch = Vec::new();
        for i in 0..30 {
            let level = match i % 3 {
                0 => LogLevel::Info,
                1 => LogLevel::Warning,
                _ => LogLevel::Error,
            };
            batch.push(doc(i, "auth", level, &format!("event {}", i), i));
        }
        index.index_batch(batch).await.unwrap();

        let hits = index
            .search(&SearchRequest {
                size: 5,
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(hits.documents.len(), 5);
        assert_eq!(hits.total, 30);
        assert_eq!(hits.level_counts.get("INFO"), Some(&10));
        assert_eq!(hits.level_counts.get("WARNING"), Some(&10));
        assert_eq!(hits.level_counts.get("ERROR"), Some(&10));
        assert_eq!(hits.service_counts.get("auth"), Some(&30));
    }

    #[tokio::test]
    async fn test_sorted_newest_first_with_pagination() {
        let index = MemorySearchIndex::new();
        let batch = (0..10)
            .map(|i| doc(i, "auth", LogLevel::Info, &format!("event {}", i), i))
            .collect();
        index.index_batch(batch).await.unwrap();

        let page0 = index
            .search(&SearchRequest {
                size: 4,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(page0.documents[0].record_id, Some(9));

        let page1 = index
            .search(&SearchRequest {
                page: 1,
                size: 4,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(page1.documents[0].record_id, Some(5));
    }

    #[tokio::test]
    async fn test_unavailable_index_fails_all_calls() {
        let index = MemorySearchIndex::new();
        index.set_unavailable(Some("connection refused".to_string()));

        assert!(index.index_batch(vec![]).await.is_err());
        assert!(index.search(&SearchRequest::default()).await.is_err());
        assert!(index.probe().await.is_err());
        assert_eq!(index.search_count(), 1);
    }
}
