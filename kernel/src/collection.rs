// Collection Storage Port
//
// The narrow, document-oriented interface every storage backend
// provides. Stores above this layer depend only on these operations.
//
// This module defines *interfaces only*.

use std::cmp::Ordering;

use serde_json::{Map, Value};

/// A stored document: a JSON object whose `_id` field is its primary key.
pub type Record = Map<String, Value>;

/// Name of the primary-key field.
pub const KEY_FIELD: &str = "_id";

/// Backend-neutral failures. Each backend translates its native
/// errors into these before returning.
#[derive(Debug, thiserror::Error)]
pub enum CollectionError {
    #[error("duplicate key `{0}`")]
    DuplicateKey(String),

    #[error("record has no string `_id` field")]
    MissingKey,

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("corrupted collection `{collection}`: {reason}")]
    Corrupted { collection: String, reason: String },

    #[error("data directory `{}` is already in use by another store", path.display())]
    Locked { path: std::path::PathBuf },
}

/// Outcome of `replace_one`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplaceResult {
    pub matched_count: u64,
}

/// Range query: `field >= since`, ascending by `field`, truncated to `limit`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FindQuery {
    pub field: String,
    pub since: String,
    pub limit: usize,
    /// Strip `_id` from returned records.
    pub exclude_key: bool,
}

impl FindQuery {
    pub fn since(field: impl Into<String>, since: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            since: since.into(),
            limit: usize::MAX,
            exclude_key: false,
        }
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn without_key(mut self) -> Self {
        self.exclude_key = true;
        self
    }

    /// Whether `record` falls inside the range. Records lacking a string
    /// `field` never match.
    pub fn matches(&self, record: &Record) -> bool {
        field_str(record, &self.field).is_some_and(|value| value >= self.since.as_str())
    }

    /// Sort, truncate and project already-matching records.
    pub fn finish(&self, mut records: Vec<Record>) -> Vec<Record> {
        records.sort_by(|a, b| self.compare(a, b));
        records.truncate(self.limit);
        if self.exclude_key {
            for record in &mut records {
                record.remove(KEY_FIELD);
            }
        }
        records
    }

    fn compare(&self, a: &Record, b: &Record) -> Ordering {
        field_str(a, &self.field).cmp(&field_str(b, &self.field))
    }
}

/// Storage port for one named collection.
///
/// Properties required from implementations:
/// - `insert_one` checks key uniqueness and writes atomically
/// - `replace_one` never creates a record
/// - reads observe every write previously acknowledged to any caller
pub trait Collection: Send + Sync {
    /// Insert `record`, failing with `DuplicateKey` if its `_id` exists.
    fn insert_one(&self, record: Record) -> Result<(), CollectionError>;

    /// Replace the record stored under `key`. `matched_count == 0`
    /// means nothing was stored under it and nothing was written.
    fn replace_one(&self, key: &str, record: Record) -> Result<ReplaceResult, CollectionError>;

    fn find_one(&self, key: &str) -> Result<Option<Record>, CollectionError>;

    fn find(&self, query: &FindQuery) -> Result<Vec<Record>, CollectionError>;
}

/// Primary key of `record`.
pub fn record_key(record: &Record) -> Result<&str, CollectionError> {
    field_str(record, KEY_FIELD).ok_or(CollectionError::MissingKey)
}

fn field_str<'a>(record: &'a Record, field: &str) -> Option<&'a str> {
    record.get(field).and_then(Value::as_str)
}
