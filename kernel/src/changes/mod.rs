// Changes Log
//
// Append-only, timestamp-ordered record of mutations. Consumers keep
// the timestamp of the last change they processed (the cursor) and
// poll for everything at or after it.
//
// The timestamp is the primary key of a change: two changes with the
// same timestamp cannot both be stored.

mod feed;

pub use feed::ChangesFeed;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, trace, warn};

use crate::collection::{Collection, CollectionError, FindQuery, KEY_FIELD};
use crate::domain::Entity;
use crate::store::{not_an_object, StoreError};

/// Page size used when a caller does not pick one.
pub const DEFAULT_LIMIT: usize = 500;

const TIMESTAMP_FIELD: &str = "timestamp";

/// One entry of the changes feed.
///
/// Only `timestamp` is required. Anything else is caller-defined and
/// stored verbatim; by convention `entity` and `id` name what changed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Change {
    pub timestamp: String,

    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Change {
    pub fn new(timestamp: impl Into<String>) -> Self {
        Self {
            timestamp: timestamp.into(),
            fields: Map::new(),
        }
    }

    /// Change describing a mutation of entity `id` of kind `E`.
    pub fn for_entity<E: Entity>(timestamp: impl Into<String>, id: &str) -> Self {
        Self::new(timestamp)
            .with_field("entity", E::KIND)
            .with_field("id", id)
    }

    pub fn with_field(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(key.to_string(), value.into());
        self
    }

    /// Marks the change as a removal of the entity.
    pub fn deleted(self) -> Self {
        self.with_field("deleted", true)
    }

    pub fn is_deleted(&self) -> bool {
        self.get("deleted").and_then(Value::as_bool).unwrap_or(false)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn entity(&self) -> Option<&str> {
        self.get("entity").and_then(Value::as_str)
    }

    pub fn id(&self) -> Option<&str> {
        self.get("id").and_then(Value::as_str)
    }
}

/// Storage contract for the changes feed.
pub trait ChangesLog: Send + Sync {
    /// Append `change`. Fails with `AlreadyExists` if a change with the
    /// same timestamp is already stored.
    fn add(&self, change: &Change) -> Result<(), StoreError>;

    /// Changes with `timestamp >= since`, oldest first, at most `limit`.
    fn filter(&self, since: &str, limit: usize) -> Result<Vec<Change>, StoreError>;

    /// `filter` with the default page size.
    fn since(&self, since: &str) -> Result<Vec<Change>, StoreError> {
        self.filter(since, DEFAULT_LIMIT)
    }
}

/// `ChangesLog` over any `Collection`, keyed by timestamp.
#[derive(Clone)]
pub struct ChangesStore {
    collection: Arc<dyn Collection>,
}

impl ChangesStore {
    pub fn new(collection: Arc<dyn Collection>) -> Self {
        Self { collection }
    }
}

impl ChangesLog for ChangesStore {
    fn add(&self, change: &Change) -> Result<(), StoreError> {
        let mut record = match serde_json::to_value(change).map_err(CollectionError::from)? {
            Value::Object(map) => map,
            other => return Err(not_an_object(&change.timestamp, &other)),
        };
        record.insert(KEY_FIELD.into(), Value::String(change.timestamp.clone()));

        match self.collection.insert_one(record) {
            Ok(()) => {
                debug!(timestamp = %change.timestamp, "change recorded");
                Ok(())
            }
            Err(CollectionError::DuplicateKey(key)) => {
                warn!(timestamp = %key, "change rejected: timestamp already in use");
                Err(StoreError::AlreadyExists(key))
            }
            Err(other) => Err(other.into()),
        }
    }

    fn filter(&self, since: &str, limit: usize) -> Result<Vec<Change>, StoreError> {
        let query = FindQuery::since(TIMESTAMP_FIELD, since)
            .limit(limit)
            .without_key();

        let changes = self
            .collection
            .find(&query)?
            .into_iter()
            .map(|record| {
                let timestamp = record
                    .get(TIMESTAMP_FIELD)
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                serde_json::from_value(Value::Object(record)).map_err(|e| {
                    StoreError::InvalidRecord {
                        id: timestamp,
                        reason: e.to_string(),
                    }
                })
            })
            .collect::<Result<Vec<Change>, _>>()?;

        trace!(since, limit, returned = changes.len(), "changes page");
        Ok(changes)
    }
}
