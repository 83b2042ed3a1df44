use crate::error::{RemoteError, RemoteResult};
use crate::query::{Filter, Query};
use crate::record_store::{row_id, InsertOutcome, RecordStore, Row};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Which record store method was called.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RecordMethod {
    Select,
    Insert,
    Update,
    Delete,
}

/// One call seen by a [`MemoryRecordStore`].
#[derive(Clone, Debug, PartialEq)]
pub struct RecordCall {
    pub method: RecordMethod,
    pub collection: String,
    /// Id of the inserted record, for inserts.
    pub record_id: Option<String>,
    /// Whether the call failed (injected fault or rejected request).
    pub failed: bool,
}

#[derive(Default)]
struct Inner {
    collections: HashMap<String, Vec<Row>>,
    /// Consumed one per call, before the sticky failure.
    queued_failures: VecDeque<RemoteError>,
    /// Returned by every call while set.
    sticky_failure: Option<RemoteError>,
    calls: Vec<RecordCall>,
}

/// Record store kept in memory.
///
/// Clones share the same data, so a test can keep one handle for inspection
/// while another is owned by the engine.
#[derive(Clone, Default)]
pub struct MemoryRecordStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add rows to a collection as if they already existed remotely.
    pub fn seed(&self, collection: &str, rows: impl IntoIterator<Item = Row>) {
        self.inner()
            .collections
            .entry(collection.to_string())
            .or_default()
            .extend(rows);
    }

    /// Current rows of a collection.
    pub fn rows(&self, collection: &str) -> Vec<Row> {
        self.inner()
            .collections
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }

    /// Fail the next call with `error`. Queued failures are consumed in order.
    pub fn fail_next(&self, error: RemoteError) {
        self.inner().queued_failures.push_back(error);
    }

    /// Fail every call with `error` until cleared with `None`.
    pub fn set_failure(&self, error: Option<RemoteError>) {
        self.inner().sticky_failure = error;
    }

    /// Every call so far, in order.
    pub fn calls(&self) -> Vec<RecordCall> {
        self.inner().calls.clone()
    }

    /// Ids passed to insert calls that reached the store, failed or not.
    pub fn inserted_ids(&self) -> Vec<String> {
        self.inner()
            .calls
            .iter()
            .filter(|c| c.method == RecordMethod::Insert)
            .filter_map(|c| c.record_id.clone())
            .collect()
    }

    fn begin(&self, method: RecordMethod, collection: &str, record_id: Option<String>) -> RemoteResult<MutexGuard<'_, Inner>> {
        let mut inner = self.inner();
        let fault = inner
            .queued_failures
            .pop_front()
            .or_else(|| inner.sticky_failure.clone());
        inner.calls.push(RecordCall {
            method,
            collection: collection.to_string(),
            record_id,
            failed: fault.is_some(),
        });
        match fault {
            Some(err) => Err(err),
            None => Ok(inner),
        }
    }
}

fn merge(row: &mut Row, changes: &Row) {
    if let (Value::Object(target), Value::Object(changes)) = (row, changes) {
        for (key, value) in changes {
            target.insert(key.clone(), value.clone());
        }
    }
}

impl RecordStore for MemoryRecordStore {
    async fn select(&self, collection: &str, query: &Query) -> RemoteResult<Vec<Row>> {
        let inner = self.begin(RecordMethod::Select, collection, None)?;
        let rows = inner.collections.get(collection).cloned().unwrap_or_default();
        Ok(query.apply(rows))
    }

    async fn insert(&self, collection: &str, record: Row) -> RemoteResult<InsertOutcome> {
        let id = row_id(&record);
        let mut inner = self.begin(RecordMethod::Insert, collection, id.clone())?;
        let id = id.ok_or_else(|| {
            RemoteError::InvalidPayload(format!("{} insert without an id", collection))
        })?;
        if !record.is_object() {
            return Err(RemoteError::InvalidPayload("record must be an object".to_string()));
        }

        let rows = inner.collections.entry(collection.to_string()).or_default();
        if rows.iter().any(|r| row_id(r).as_deref() == Some(id.as_str())) {
            return Ok(InsertOutcome::AlreadyExists);
        }
        rows.push(record.clone());
        Ok(InsertOutcome::Created(record))
    }

    async fn update(&self, collection: &str, filters: &[Filter], changes: Row) -> RemoteResult<Vec<Row>> {
        let mut inner = self.begin(RecordMethod::Update, collection, None)?;
        if filters.is_empty() {
            return Err(RemoteError::InvalidPayload(
                "refusing to update without a filter".to_string(),
            ));
        }
        let mut updated = Vec::new();
        if let Some(rows) = inner.collections.get_mut(collection) {
            for row in rows.iter_mut() {
                if filters.iter().all(|f| f.matches(row)) {
                    merge(row, &changes);
                    updated.push(row.clone());
                }
            }
        }
        Ok(updated)
    }

    async fn delete(&self, collection: &str, filters: &[Filter]) -> RemoteResult<usize> {
        let mut inner = self.begin(RecordMethod::Delete, collection, None)?;
        if filters.is_empty() {
            return Err(RemoteError::InvalidPayload(
                "refusing to delete without a filter".to_string(),
            ));
        }
        let Some(rows) = inner.collections.get_mut(collection) else {
            return Ok(0);
        };
        let before = rows.len();
        rows.retain(|row| !filters.iter().all(|f| f.matches(row)));
        Ok(before - rows.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::Order;
    use serde_json::json;

    #[tokio::test]
    async fn test_insert_is_idempotent_on_id() {
        let store = MemoryRecordStore::new();
        let first = store
            .insert("observations", json!({ "id": "a", "rating": 6 }))
            .await
            .unwrap();
        assert!(first.is_created());

        let second = store
            .insert("observations", json!({ "id": "a", "rating": 9 }))
            .await
            .unwrap();
        assert_eq!(second, InsertOutcome::AlreadyExists);
        assert_eq!(store.rows("observations"), vec![json!({ "id": "a", "rating": 6 })]);
        assert_eq!(store.inserted_ids(), vec!["a".to_string(), "a".to_string()]);
    }

    #[tokio::test]
    async fn test_select_filters_orders_and_limits() {
        let store = MemoryRecordStore::new();
        store.seed(
            "players",
            vec![
                json!({ "id": "1", "name": "Ana", "updated_at": "2026-01-03" }),
                json!({ "id": "2", "name": "Ben", "updated_at": "2026-01-01" }),
                json!({ "id": "3", "name": "Bea", "updated_at": "2026-01-02" }),
            ],
        );
        let query = Query::new()
            .filter(Filter::like("name", "B%"))
            .order(Order::desc("updated_at"))
            .limit(1);
        let rows = store.select("players", &query).await.unwrap();
        assert_eq!(rows, vec![json!({ "id": "3", "name": "Bea", "updated_at": "2026-01-02" })]);
    }

    #[tokio::test]
    async fn test_update_and_delete_matching_rows() {
        let store = MemoryRecordStore::new();
        store.seed("players", vec![json!({ "id": "p1", "status": "watch" })]);

        let updated = store
            .update("players", &[Filter::eq("id", "p1")], json!({ "status": "signed" }))
            .await
            .unwrap();
        assert_eq!(updated, vec![json!({ "id": "p1", "status": "signed" })]);

        let missing = store
            .update("players", &[Filter::eq("id", "nope")], json!({ "status": "x" }))
            .await
            .unwrap();
        assert!(missing.is_empty());

        assert_eq!(store.delete("players", &[Filter::eq("id", "p1")]).await.unwrap(), 1);
        assert_eq!(store.delete("players", &[Filter::eq("id", "p1")]).await.unwrap(), 0);
        assert_eq!(store.delete("unknown", &[Filter::eq("id", "p1")]).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_fault_injection() {
        let store = MemoryRecordStore::new();
        store.fail_next(RemoteError::Timeout);
        let err = store.insert("observations", json!({ "id": "a" })).await.unwrap_err();
        assert_eq!(err, RemoteError::Timeout);
        assert!(store.rows("observations").is_empty());

        store.set_failure(Some(RemoteError::Network("offline".into())));
        assert!(store.select("positions", &Query::new()).await.is_err());
        store.set_failure(None);
        assert!(store.select("positions", &Query::new()).await.is_ok());

        let calls = store.calls();
        assert_eq!(calls.len(), 3);
        assert!(calls[0].failed && calls[1].failed && !calls[2].failed);
        assert_eq!(calls[0].record_id.as_deref(), Some("a"));
    }
}
