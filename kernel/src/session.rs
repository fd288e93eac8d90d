// Session
//
// The single persistence entry point handed to application code:
// one data store per entity kind plus the changes log, all built
// from the same backend.

use std::sync::Arc;

use crate::changes::{ChangesLog, ChangesStore};
use crate::collection::{Collection, CollectionError};
use crate::domain::{Document, DocumentsBundle, Journal};
use crate::store::{CollectionStore, DataStore};

pub const DOCUMENTS: &str = "documents";
pub const DOCUMENTS_BUNDLES: &str = "documents_bundles";
pub const JOURNALS: &str = "journals";
pub const CHANGES: &str = "changes";

/// A storage engine able to hand out named collections.
///
/// Asking twice for the same name must yield the same underlying
/// collection.
pub trait Backend: Send + Sync {
    fn collection(&self, name: &str) -> Result<Arc<dyn Collection>, CollectionError>;
}

/// Stores for every entity kind plus the changes log.
#[derive(Clone)]
pub struct Session {
    documents: CollectionStore<Document>,
    documents_bundles: CollectionStore<DocumentsBundle>,
    journals: CollectionStore<Journal>,
    changes: ChangesStore,
}

impl Session {
    pub fn new(backend: &dyn Backend) -> Result<Self, CollectionError> {
        Ok(Self {
            documents: CollectionStore::new(backend.collection(DOCUMENTS)?),
            documents_bundles: CollectionStore::new(backend.collection(DOCUMENTS_BUNDLES)?),
            journals: CollectionStore::new(backend.collection(JOURNALS)?),
            changes: ChangesStore::new(backend.collection(CHANGES)?),
        })
    }

    pub fn documents(&self) -> &dyn DataStore<Document> {
        &self.documents
    }

    pub fn documents_bundles(&self) -> &dyn DataStore<DocumentsBundle> {
        &self.documents_bundles
    }

    pub fn journals(&self) -> &dyn DataStore<Journal> {
        &self.journals
    }

    pub fn changes(&self) -> &dyn ChangesLog {
        &self.changes
    }
}
