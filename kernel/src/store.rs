// Data Store
//
// Generic add/update/fetch persistence for domain entities, written
// once against the collection storage port. Backend failures are
// translated into semantic errors here and never leak past this layer
// as backend-specific signals.

use std::marker::PhantomData;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use crate::collection::{Collection, CollectionError, Record, KEY_FIELD};
use crate::domain::Entity;
use crate::manifest::{Manifest, ManifestError};

/// Semantic errors surfaced to application code.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("cannot add data with id \"{0}\": the id is already in use")]
    AlreadyExists(String),

    #[error("cannot {operation} data with id \"{id}\": data does not exist")]
    DoesNotExist { operation: &'static str, id: String },

    #[error("invalid mutation: {0}")]
    Manifest(#[from] ManifestError),

    #[error("stored record \"{id}\" is not a valid manifest: {reason}")]
    InvalidRecord { id: String, reason: String },

    #[error("storage backend error: {0}")]
    Backend(CollectionError),
}

impl StoreError {
    /// Whether repeating the same call, unchanged, may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Backend(CollectionError::Io(_)))
    }
}

impl From<CollectionError> for StoreError {
    fn from(err: CollectionError) -> Self {
        match err {
            CollectionError::DuplicateKey(key) => StoreError::AlreadyExists(key),
            other => StoreError::Backend(other),
        }
    }
}

/// Persistence contract for one entity kind.
pub trait DataStore<E: Entity>: Send + Sync {
    /// Insert a new entity. Fails with `AlreadyExists` if its identity
    /// is taken; nothing is written in that case.
    fn add(&self, entity: &E) -> Result<(), StoreError>;

    /// Replace a stored entity wholesale. Fails with `DoesNotExist` if
    /// nothing is stored under its identity; never creates a record.
    fn update(&self, entity: &E) -> Result<(), StoreError>;

    fn fetch(&self, id: &str) -> Result<E, StoreError>;
}

/// `DataStore` over any `Collection`.
pub struct CollectionStore<E> {
    collection: Arc<dyn Collection>,
    _entity: PhantomData<fn() -> E>,
}

impl<E> Clone for CollectionStore<E> {
    fn clone(&self) -> Self {
        Self {
            collection: self.collection.clone(),
            _entity: PhantomData,
        }
    }
}

impl<E: Entity> CollectionStore<E> {
    pub fn new(collection: Arc<dyn Collection>) -> Self {
        Self {
            collection,
            _entity: PhantomData,
        }
    }
}

/// Serialized form of `entity`, with `_id` injected when absent.
///
/// Returns the record together with its primary key. A caller-supplied
/// `_id` is kept as-is and used as the key.
fn to_record<E: Entity>(entity: &E) -> Result<(String, Record), StoreError> {
    let mut record = match serde_json::to_value(entity.manifest()).map_err(CollectionError::from)? {
        Value::Object(map) => map,
        other => return Err(not_an_object(entity.identity(), &other)),
    };

    let key = match record.get(KEY_FIELD).and_then(Value::as_str) {
        Some(key) if !key.is_empty() => key.to_string(),
        _ => {
            let key = entity.identity().to_string();
            record.insert(KEY_FIELD.into(), Value::String(key.clone()));
            key
        }
    };
    Ok((key, record))
}

pub(crate) fn not_an_object(id: &str, value: &Value) -> StoreError {
    StoreError::InvalidRecord {
        id: id.to_string(),
        reason: format!("expected a JSON object, got `{value}`"),
    }
}

/// Decodes a stored record, dropping the `_id` the store injected.
fn from_record<E: Entity>(key: &str, mut record: Record) -> Result<E, StoreError> {
    let injected = matches!(
        (record.get(KEY_FIELD), record.get("id")),
        (Some(stored), Some(id)) if stored == id
    );
    if injected {
        record.remove(KEY_FIELD);
    }

    let manifest: Manifest =
        serde_json::from_value(Value::Object(record)).map_err(|e| StoreError::InvalidRecord {
            id: key.to_string(),
            reason: e.to_string(),
        })?;
    Ok(E::from_manifest(manifest))
}

impl<E: Entity> DataStore<E> for CollectionStore<E> {
    fn add(&self, entity: &E) -> Result<(), StoreError> {
        let (key, record) = to_record(entity)?;

        match self.collection.insert_one(record) {
            Ok(()) => {
                debug!(kind = E::KIND, id = %key, "added");
                Ok(())
            }
            Err(CollectionError::DuplicateKey(_)) => {
                warn!(kind = E::KIND, id = %key, "add rejected: id already in use");
                Err(StoreError::AlreadyExists(entity.identity().to_string()))
            }
            Err(other) => Err(other.into()),
        }
    }

    fn update(&self, entity: &E) -> Result<(), StoreError> {
        let (key, record) = to_record(entity)?;
        let result = self.collection.replace_one(&key, record)?;

        if result.matched_count == 0 {
            warn!(kind = E::KIND, id = %key, "update rejected: no such record");
            return Err(StoreError::DoesNotExist {
                operation: "update",
                id: entity.identity().to_string(),
            });
        }
        debug!(kind = E::KIND, id = %key, "updated");
        Ok(())
    }

    fn fetch(&self, id: &str) -> Result<E, StoreError> {
        match self.collection.find_one(id)? {
            Some(record) => {
                debug!(kind = E::KIND, id, "fetched");
                from_record(id, record)
            }
            None => Err(StoreError::DoesNotExist {
                operation: "fetch",
                id: id.to_string(),
            }),
        }
    }
}
