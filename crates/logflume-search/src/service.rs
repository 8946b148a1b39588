// Search service
//
// Validates the request, then answers from the search store in one round
// trip: the requested page plus counts by level and by service over the
// entire filter match. If the search store is unreachable or times out,
// the same request is re-issued against the authoritative store; that path
// can only aggregate over the returned page, and the response says so.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::{counter, histogram};
use thiserror::Error;
use tracing::warn;

use logflume_core::{
    AggregationScope, DurableStore, FallbackPage, SearchDocument, SearchHits, SearchRequest,
    SearchResult, SearchStore, ValidationError,
};

#[derive(Debug, Error)]
pub enum SearchError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// Both the search store and the fallback store failed.
    #[error("search unavailable: {0}")]
    Unavailable(String),
}

pub struct SearchService {
    search_store: Arc<dyn SearchStore>,
    fallback: Arc<dyn DurableStore>,
    query_timeout: Duration,
}

impl SearchService {
    pub fn new(
        search_store: Arc<dyn SearchStore>,
        fallback: Arc<dyn DurableStore>,
        query_timeout: Duration,
    ) -> Self {
        Self {
            search_store,
            fallback,
            query_timeout,
        }
    }

    pub async fn search(&self, request: &SearchRequest) -> Result<SearchResult, SearchError> {
        request.validate()?;

        let start = Instant::now();
        let primary = tokio::time::timeout(self.query_timeout, self.search_store.search(request));

        let backend_error = match primary.await {
            Ok(Ok(hits)) => {
                let result = Self::from_hits(request, hits, start);
                histogram!(
                    "search.duration_ms",
                    start.elapsed().as_secs_f64() * 1000.0
                );
                return Ok(result);
            }
            Ok(Err(err)) => err.to_string(),
            Err(_) => format!("search store exceeded {:?}", self.query_timeout),
        };

        counter!("search.backend.errors.total", 1);
        warn!(
            error = %backend_error,
            "search store failed; answering from authoritative store"
        );
        self.fallback_search(request, start).await
    }

    async fn fallback_search(
        &self,
        request: &SearchRequest,
        start: Instant,
    ) -> Result<SearchResult, SearchError> {
        let query = tokio::time::timeout(self.query_timeout, self.fallback.query(request));
        let page = match query.await {
            Ok(Ok(page)) => page,
            Ok(Err(err)) => return Err(SearchError::Unavailable(err.to_string())),
            Err(_) => {
                return Err(SearchError::Unavailable(format!(
                    "fallback query exceeded {:?}",
                    self.query_timeout
                )))
            }
        };

        counter!("search.fallback.total", 1);
        histogram!(
            "search.duration_ms",
            start.elapsed().as_secs_f64() * 1000.0
        );
        Ok(Self::from_fallback(request, page, start))
    }

    fn from_hits(request: &SearchRequest, hits: SearchHits, start: Instant) -> SearchResult {
        SearchResult {
            total_pages: SearchResult::page_count(hits.total, request.size),
            total_elements: hits.total,
            current_page: request.page,
            size: request.size,
            search_time_ms: start.elapsed().as_millis() as u64,
            logs: hits.documents,
            level_counts: hits.level_counts,
            service_counts: hits.service_counts,
            aggregation_scope: AggregationScope::Full,
        }
    }

    fn from_fallback(request: &SearchRequest, page: FallbackPage, start: Instant) -> SearchResult {
        let logs: Vec<SearchDocument> = page.records.iter().map(SearchDocument::from).collect();

        // The authoritative store cannot cheaply aggregate the whole match;
        // counts cover the returned page only and are flagged as such.
        let mut level_counts: BTreeMap<String, u64> = BTreeMap::new();
        let mut service_counts: BTreeMap<String, u64> = BTreeMap::new();
        for doc in &logs {
            *level_counts.entry(doc.level.as_str().to_string()).or_insert(0) += 1;
            *service_counts.entry(doc.service_id.clone()).or_insert(0) += 1;
        }

        SearchResult {
            logs,
            total_elements: page.total,
            total_pages: SearchResult::page_count(page.total, request.size),
            current_page: request.page,
            size: request.size,
            search_time_ms: start.elapsed().as_millis() as u64,
            level_counts,
            service_counts,
            aggregation_scope: AggregationScope::Page,
        }
    }
}
