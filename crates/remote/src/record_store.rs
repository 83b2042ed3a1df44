//! Remote record store capability.
//!
//! Collections hold JSON rows with a string `id` column. Inserts are
//! idempotent on that id: inserting a row whose id already exists reports
//! [`InsertOutcome::AlreadyExists`] instead of creating a duplicate, which is
//! what makes replaying queued writes safe.

use crate::error::RemoteResult;
use crate::query::{Filter, Query};
use serde_json::Value;

/// A record as exchanged with the remote store.
pub type Row = Value;

/// Result of an idempotent insert.
#[derive(Clone, Debug, PartialEq)]
pub enum InsertOutcome {
    /// The row was created; carries the stored representation.
    Created(Row),
    /// A row with the same id already existed and was left untouched.
    AlreadyExists,
}

impl InsertOutcome {
    pub fn is_created(&self) -> bool {
        matches!(self, InsertOutcome::Created(_))
    }
}

/// Record store capability trait.
#[trait_variant::make(Send)]
pub trait RecordStore: Send + Sync {
    /// Rows of `collection` matching `query`.
    async fn select(&self, collection: &str, query: &Query) -> RemoteResult<Vec<Row>>;

    /// Insert `record`, keyed by its `id` field.
    async fn insert(&self, collection: &str, record: Row) -> RemoteResult<InsertOutcome>;

    /// Apply `changes` to every matching row; returns the updated rows.
    async fn update(&self, collection: &str, filters: &[Filter], changes: Row) -> RemoteResult<Vec<Row>>;

    /// Delete every matching row; returns how many were deleted.
    async fn delete(&self, collection: &str, filters: &[Filter]) -> RemoteResult<usize>;
}

/// The string id of a row, if present.
pub fn row_id(row: &Row) -> Option<String> {
    match row.get("id")? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
