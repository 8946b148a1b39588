// In-memory authoritative store
//
// write_batch is atomic per call: ids and receipt times are assigned and
// the rows appended inside one lock scope, so a failure leaves nothing
// behind. Records are frozen at persistence; there is no update or delete
// path. Failure injection knobs exist for the pipeline tests.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;

use logflume_core::{
    DurableStore, FallbackPage, LogRecord, SearchRequest, StoreError, StoredRecord,
};

#[derive(Default)]
struct StoreState {
    rows: Vec<StoredRecord>,
    next_id: i64,
}

/// Reference `DurableStore`: an append-only table behind one mutex.
#[derive(Default)]
pub struct MemoryLogStore {
    state: Mutex<StoreState>,
    write_failure: Mutex<Option<StoreError>>,
    probe_failure: Mutex<Option<StoreError>>,
}

impl MemoryLogStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail with `error` until cleared with
    /// `None`. Test-double knob; a broker outage in miniature.
    pub fn set_write_failure(&self, error: Option<StoreError>) {
        *self.write_failure.lock() = error;
    }

    pub fn set_probe_failure(&self, error: Option<StoreError>) {
        *self.probe_failure.lock() = error;
    }

    pub fn len(&self) -> usize {
        self.state.lock().rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fetch one row by id. Test/operator helper, not a pipeline path.
    pub fn record(&self, record_id: i64) -> Option<StoredRecord> {
        self.state
            .lock()
            .rows
            .iter()
            .find(|r| r.record_id == record_id)
            .cloned()
    }

    /// All rows for one service in persistence order. Test helper.
    pub fn records_for_service(&self, service_id: &str) -> Vec<StoredRecord> {
        self.state
            .lock()
            .rows
            .iter()
            .filter(|r| r.record.service_id == service_id)
            .cloned()
            .collect()
    }

    fn matches(record: &StoredRecord, request: &SearchRequest) -> bool {
        if let Some(service_id) = &request.service_id {
            if &record.record.service_id != service_id {
                return false;
            }
        }
        if let Some(level) = request.level {
            if record.record.level != level {
                return false;
            }
        }
        if let Some(trace_id) = &request.trace_id {
            if record.record.trace_id.as_ref() != Some(trace_id) {
                return false;
            }
        }
        if let Some(start) = request.start_time {
            if record.record.timestamp < start {
                return false;
            }
        }
        if let Some(end) = request.end_time {
            if record.record.timestamp > end {
                return false;
            }
        }
        if let Some(query) = &request.query {
            let needle = query.to_lowercase();
            if !record.record.message.to_lowercase().contains(&needle) {
                return false;
            }
        }
        true
    }
}

#[async_trait]
impl DurableStore for MemoryLogStore {
    async fn write_batch(&self, records: Vec<LogRecord>) -> Result<Vec<StoredRecord>, StoreError> {
        if let Some(error) = self.write_failure.lock().clone() {
            return Err(error);
        }

        let received_at = Utc::now();
        let mut state = self.state.lock();

        let stored: Vec<StoredRecord> = records
            .into_iter()
            .map(|record| {
                let record_id = state.next_id;
                state.next_id += 1;
                StoredRecord {
                    record_id,
                    received_at,
                    record,
                }
            })
            .collect();

        state.rows.extend(stored.iter().cloned());
        Ok(stored)
    }

    async fn query(&self, request: &SearchRequest) -> Result<FallbackPage, StoreError> {
        let state = self.state.lock();

        let mut matched: Vec<&StoredRecord> = state
            .rows
            .iter()
            .filter(|r| Self::matches(r, request))
            .collect();

        // Newest first; record_id breaks timestamp ties deterministically.
        matched.sort_by(|a, b| {
            b.record
                .timestamp
                .cmp(&a.record.timestamp)
                .then(b.record_id.cmp(&a.record_id))
        });

        let total = matched.len() as u64;
        let records = matched
            .into_iter()
            .skip(request.page * request.size)
            .take(request.size)
            .cloned()
            .collect();

        Ok(FallbackPage { records, total })
    }

    async fn probe(&self) -> Result<(), StoreError> {
        if let Some(error) = self.probe_failure.lock().clone() {
            return Err(error);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};
    use logflume_core::LogLevel;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn record(service: &str, level: LogLevel, message: &str, secs: i64) -> LogRecord {
        LogRecord {
            timestamp: at(secs),
            service_id: service.to_string(),
            level,
            message: message.to_string(),
            trace_id: None,
            metadata: Default::default(),
        }
    }

    #[tokio::test]
    async fn test_write_batch_assigns_monotonic_ids() {
        let store = MemoryLogStore::new();
        let stored = store
            .write_batch(vec![
                record("auth", LogLevel::Info, "a", 10),
                record("auth", LogLevel::Info, "b", 11),
                record("auth", LogLevel::Info, "c", 12),
            ])
            .await
            .unwrap();

        let ids: Vec<i64> = stored.iter().map(|r| r.record_id).collect();
        assert_eq!(ids, vec![0, 1, 2]);
        assert!(stored.iter().all(|r| r.received_at >= at(0)));
        assert_eq!(store.len(), 3);
    }

    #[tokio::test]
    async fn test_ids_continue_across_batches() {
        let store = MemoryLogStore::new();
        store
            .write_batch(vec![record("auth", LogLevel::Info, "a", 10)])
            .await
            .unwrap();
        let second = store
            .write_batch(vec![record("auth", LogLevel::Info, "b", 11)])
            .await
            .unwrap();
        assert_eq!(second[0].record_id, 1);
    }

    #[tokio::test]
    async fn test_failed_write_persists_nothing() {
        let store = MemoryLogStore::new();
        store.set_write_failure(Some(StoreError::Transient("injected".into())));

        let err = store
            .write_batch(vec![record("auth", LogLevel::Info, "a", 10)])
            .await
            .unwrap_err();
        assert!(err.is_transient());
        assert!(store.is_empty());

        store.set_write_failure(None);
        let stored = store
            .write_batch(vec![record("auth", LogLevel::Info, "a", 10)])
            .await
            .unwrap();
        assert_eq!(stored[0].record_id, 0);
    }

    #[tokio::test]
    async fn test_query_filters_and_paginates() {
        let store = MemoryLogStore::new();
        let mut batch = Vec::new();
        for i in 0..10 {
            batch.push(record("auth", LogLevel::Info, &format!("login {}", i), i));
            batch.push(record("billing", LogLevel::Error, "charge failed", 100 + i));
        }
        store.write_batch(batch).await.unwrap();

        let page = store
            .query(&SearchRequest {
                service_id: Some("auth".to_string()),
                size: 3,
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(page.total, 10);
        assert_eq!(page.records.len(), 3);
        // Newest first
        assert_eq!(page.records[0].record.message, "login 9");

        let second = store
            .query(&SearchRequest {
                service_id: Some("auth".to_string()),
                page: 1,
                size: 3,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(second.records[0].record.message, "login 6");
    }

    #[tokio::test]
    async fn test_query_substring_is_case_insensitive() {
        let store = MemoryLogStore::new();
        store
            .write_batch(vec![
                record("auth", LogLevel::Info, "Connection RESET by peer", 1),
                record("auth", LogLevel::Info, "all good", 2),
            ])
            .await
            .unwrap();

        let page = store
            .query(&SearchRequest {
                query: Some("reset".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.records[0].record.message, "Connection RESET by peer");
    }

    #[tokio::test]
    async fn test_query_time_window_is_inclusive() {
        let store = MemoryLogStore::new();
        store
            .write_batch(vec![
                record("auth", LogLevel::Info, "before", 9),
                record("auth", LogLevel::Info, "start", 10),
                record("auth", LogLevel::Info, "end", 20),
                record("auth", LogLevel::Info, "after", 21),
            ])
            .await
            .unwrap();

        let page = store
            .query(&SearchRequest {
                start_time: Some(at(10)),
                end_time: Some(at(20)),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(page.total, 2);
        let messages: Vec<&str> = page
            .records
            .iter()
            .map(|r| r.record.message.as_str())
            .collect();
        assert_eq!(messages, vec!["end", "start"]);
    }

    #[tokio::test]
    async fn test_probe_failure_injection() {
        let store = MemoryLogStore::new();
        assert!(store.probe().await.is_ok());
        store.set_probe_failure(Some(StoreError::Transient("down".into())));
        assert!(store.probe().await.is_err());
    }
}
