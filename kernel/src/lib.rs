// Document Store Kernel
//
// Versioned manifests for documents, documents bundles and journals,
// their persistence contract, and the changes feed used by downstream
// consumers to synchronize incrementally.

pub mod adapters;
pub mod changes;
pub mod clock;
pub mod collection;
pub mod config;
pub mod domain;
pub mod manifest;
pub mod session;
pub mod store;

pub use changes::{Change, ChangesFeed, ChangesLog};
pub use clock::{Clock, FixedClock, SystemClock};
pub use domain::{Document, DocumentsBundle, Entity, Journal};
pub use manifest::{Manifest, ManifestError, NewAssets};
pub use session::{Backend, Session};
pub use store::{DataStore, StoreError};
