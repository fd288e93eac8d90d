// In-Memory Backend
//
// Process-local collections used as a test double for the
// persistent backend. Nothing survives the process.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::collection::{
    record_key, Collection, CollectionError, FindQuery, Record, ReplaceResult, KEY_FIELD,
};
use crate::session::Backend;

/// A single collection held in a map keyed by `_id`.
#[derive(Debug, Default)]
pub struct InMemoryCollection {
    records: Mutex<BTreeMap<String, Record>>,
}

impl InMemoryCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Collection for InMemoryCollection {
    fn insert_one(&self, record: Record) -> Result<(), CollectionError> {
        let key = record_key(&record)?.to_string();
        let mut records = self.records.lock();

        if records.contains_key(&key) {
            return Err(CollectionError::DuplicateKey(key));
        }
        records.insert(key, record);
        Ok(())
    }

    fn replace_one(&self, key: &str, mut record: Record) -> Result<ReplaceResult, CollectionError> {
        let mut records = self.records.lock();

        match records.get_mut(key) {
            Some(existing) => {
                record.insert(KEY_FIELD.into(), key.into());
                *existing = record;
                Ok(ReplaceResult { matched_count: 1 })
            }
            None => Ok(ReplaceResult { matched_count: 0 }),
        }
    }

    fn find_one(&self, key: &str) -> Result<Option<Record>, CollectionError> {
        Ok(self.records.lock().get(key).cloned())
    }

    fn find(&self, query: &FindQuery) -> Result<Vec<Record>, CollectionError> {
        let matching = self
            .records
            .lock()
            .values()
            .filter(|record| query.matches(record))
            .cloned()
            .collect();
        Ok(query.finish(matching))
    }
}

/// Hands out one shared in-memory collection per name.
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    collections: Mutex<BTreeMap<String, Arc<InMemoryCollection>>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Backend for InMemoryBackend {
    fn collection(&self, name: &str) -> Result<Arc<dyn Collection>, CollectionError> {
        let collection: Arc<dyn Collection> = self
            .collections
            .lock()
            .entry(name.to_string())
            .or_default()
            .clone();
        Ok(collection)
    }
}
