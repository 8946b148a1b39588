// Look-aside result cache
//
// The caller checks the cache first, queries the search service on a miss,
// then fills the cache. Empty results are never stored, and a cache
// backend failure is logged, counted and bypassed; the user-facing request
// never fails because the cache is unhealthy. The cache knows nothing
// about the fallback store; the search service mediates that.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use metrics::counter;
use parking_lot::Mutex;
use tracing::warn;

use logflume_core::{CacheError, ResultCache, SearchRequest, SearchResult};

use crate::service::{SearchError, SearchService};

/// Search front door: look-aside cache over the search service.
pub struct CachedSearch {
    service: SearchService,
    cache: Arc<dyn ResultCache>,
}

impl CachedSearch {
    pub fn new(service: SearchService, cache: Arc<dyn ResultCache>) -> Self {
        Self { service, cache }
    }

    pub async fn search(&self, request: &SearchRequest) -> Result<SearchResult, SearchError> {
        request.validate()?;

        let key = request.cache_key();
        let start = Instant::now();

        match self.cache.get(&key).await {
            Ok(Some(mut cached)) => {
                counter!("cache.hits.total", 1);
                // Report cache-retrieval time, not the original search time.
                cached.search_time_ms = start.elapsed().as_millis() as u64;
                return Ok(cached);
            }
            Ok(None) => {
                counter!("cache.misses.total", 1);
            }
            Err(err) => {
                counter!("cache.errors.total", 1);
                warn!(error = %err, "cache get failed; bypassing to search service");
            }
        }

        let result = self.service.search(request).await?;

        if result.total_elements > 0 {
            if let Err(err) = self.cache.put(&key, &result).await {
                counter!("cache.errors.total", 1);
                warn!(error = %err, "cache fill failed; result served uncached");
            }
        }

        Ok(result)
    }
}

struct Entry {
    result: SearchResult,
    expires_at: Instant,
}

impl Entry {
    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// Reference `ResultCache`: TTL entries behind one mutex, pruned on insert
/// once the entry count passes `max_entries`.
pub struct MemoryResultCache {
    entries: Mutex<HashMap<String, Entry>>,
    ttl: Duration,
    max_entries: usize,
    failure: Mutex<Option<String>>,
}

impl MemoryResultCache {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
            max_entries,
            failure: Mutex::new(None),
        }
    }

    /// Simulate a cache backend outage. Every call fails until cleared.
    pub fn set_failure(&self, reason: Option<String>) {
        *self.failure.lock() = reason;
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_available(&self) -> Result<(), CacheError> {
        match self.failure.lock().as_ref() {
            Some(reason) => Err(CacheError(reason.clone())),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ResultCache for MemoryResultCache {
    async fn get(&self, key: &str) -> Result<Option<SearchResult>, CacheError> {
        self.check_available()?;

        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(entry) if entry.is_expired() => {
                entries.remove(key);
                Ok(None)
            }
            Some(entry) => Ok(Some(entry.result.clone())),
            None => Ok(None),
        }
    }

    async fn put(&self, key: &str, result: &SearchResult) -> Result<(), CacheError> {
        self.check_available()?;

        let mut entries = self.entries.lock();
        if entries.len() >= self.max_entries {
            entries.retain(|_, entry| !entry.is_expired());
            // Still over: evict whatever expires soonest
            while entries.len() >= self.max_entries {
                let key = entries
                    .iter()
                    .min_by_key(|(_, entry)| entry.expires_at)
                    .map(|(k, _)| k.clone());
                match key {
                    Some(k) => entries.remove(&k),
                    None => break,
                };
            }
        }

        entries.insert(
            key.to_string(),
            Entry {
                result: result.clone(),
                expires_at: Instant::now() + self.ttl,
            },
        );
        Ok(())
    }

    async fn probe(&self) -> Result<(), CacheError> {
        self.check_available()
    }
}
