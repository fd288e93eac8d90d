// Domain Entities
//
// Documents, documents bundles and journals are thin immutable
// wrappers around a manifest. Mutating methods never touch `self`;
// they return a new wrapper around the derived manifest.

use crate::clock::Clock;
use crate::manifest::{self, Manifest, ManifestError, NewAssets, ResolvedVersion};

/// Anything a `DataStore` can persist.
pub trait Entity: Sized {
    /// Human-readable kind, used in change records and log lines.
    const KIND: &'static str;

    fn from_manifest(manifest: Manifest) -> Self;

    fn manifest(&self) -> &Manifest;

    fn into_manifest(self) -> Manifest;

    /// Fresh entity with an empty version history.
    fn create(id: impl ToString) -> Self {
        Self::from_manifest(manifest::create(id))
    }

    fn identity(&self) -> &str {
        &self.manifest().id
    }

    /// Latest version, if any.
    fn latest_version(&self) -> Option<&manifest::Version> {
        self.manifest().latest_version()
    }
}

macro_rules! entity {
    ($(#[$meta:meta])* $name:ident, $kind:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq)]
        pub struct $name {
            manifest: Manifest,
        }

        impl Entity for $name {
            const KIND: &'static str = $kind;

            fn from_manifest(manifest: Manifest) -> Self {
                Self { manifest }
            }

            fn manifest(&self) -> &Manifest {
                &self.manifest
            }

            fn into_manifest(self) -> Manifest {
                self.manifest
            }
        }

        impl $name {
            /// Wrap a new version of the underlying data.
            pub fn new_version(
                &self,
                data: &str,
                assets: impl Into<NewAssets>,
                clock: &dyn Clock,
            ) -> Self {
                Self::from_manifest(manifest::add_version(&self.manifest, data, assets, clock))
            }
        }
    };
}

entity!(
    /// A scholarly article and its XML, assets and renditions.
    Document,
    "Document"
);

entity!(
    /// An issue-like grouping of documents.
    DocumentsBundle,
    "DocumentsBundle"
);

entity!(Journal, "Journal");

impl Document {
    pub fn new_asset_version(
        &self,
        asset_id: &str,
        locator: &str,
        clock: &dyn Clock,
    ) -> Result<Self, ManifestError> {
        manifest::add_asset_version(&self.manifest, asset_id, locator, clock)
            .map(Self::from_manifest)
    }

    pub fn new_rendition_version(
        &self,
        filename: &str,
        url: &str,
        mimetype: &str,
        lang: &str,
        size_bytes: u64,
        clock: &dyn Clock,
    ) -> Result<Self, ManifestError> {
        manifest::add_rendition_version(
            &self.manifest,
            filename,
            url,
            mimetype,
            lang,
            size_bytes,
            clock,
        )
        .map(Self::from_manifest)
    }

    /// Version at `index` (`-1` is the latest) with each asset resolved
    /// to its most recent upload.
    pub fn version(&self, index: isize) -> Result<ResolvedVersion, ManifestError> {
        self.manifest.version(index).map(ResolvedVersion::from)
    }

    /// Version that was current at `timestamp`.
    pub fn version_at(&self, timestamp: &str) -> Result<ResolvedVersion, ManifestError> {
        self.manifest.version_at(timestamp).map(ResolvedVersion::from)
    }
}
