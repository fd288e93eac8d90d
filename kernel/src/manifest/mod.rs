// Manifest Versioning
//
// A manifest is the complete version lineage of one entity.
// Every operation here is pure: it reads a manifest and returns a
// brand-new one, leaving the input untouched. Only the latest
// version may receive new asset or rendition uploads.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::clock::Clock;

/// The versioned record of a document, bundle or journal.
///
/// Top-level keys other than `id` and `versions` (storage revision
/// tokens, metadata, etc.) are kept in `extra` and survive every
/// mutation verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub id: String,

    #[serde(default)]
    pub versions: Vec<Version>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One immutable snapshot within a manifest's history.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Version {
    #[serde(default)]
    pub data: String,

    /// Asset identifier -> upload history. An empty history means the
    /// asset is declared but has not been uploaded yet.
    #[serde(default)]
    pub assets: BTreeMap<String, Vec<AssetRecord>>,

    #[serde(default)]
    pub timestamp: String,

    #[serde(default)]
    pub renditions: Vec<Rendition>,
}

/// One upload of a named asset, persisted as a `[timestamp, locator]` pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "(String, String)", into = "(String, String)")]
pub struct AssetRecord {
    pub timestamp: String,
    pub locator: String,
}

impl From<(String, String)> for AssetRecord {
    fn from((timestamp, locator): (String, String)) -> Self {
        Self { timestamp, locator }
    }
}

impl From<AssetRecord> for (String, String) {
    fn from(record: AssetRecord) -> Self {
        (record.timestamp, record.locator)
    }
}

/// A distinct output artifact of a version, keyed by
/// `(filename, mimetype, lang)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rendition {
    pub filename: String,
    pub mimetype: String,
    pub lang: String,
    #[serde(default)]
    pub data: Vec<RenditionRecord>,
}

impl Rendition {
    fn matches(&self, filename: &str, mimetype: &str, lang: &str) -> bool {
        self.filename == filename && self.mimetype == mimetype && self.lang == lang
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenditionRecord {
    pub timestamp: String,
    pub url: String,
    pub size_bytes: u64,
}

/// Assets declared by a new version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NewAssets {
    /// Identifiers only; every history starts empty.
    Declared(Vec<String>),

    /// Identifier -> locator. A non-empty locator seeds the history with
    /// one upload; an empty one only declares the asset.
    Located(BTreeMap<String, String>),
}

impl NewAssets {
    pub fn none() -> Self {
        NewAssets::Declared(Vec::new())
    }
}

impl<S: Into<String>> From<Vec<S>> for NewAssets {
    fn from(ids: Vec<S>) -> Self {
        NewAssets::Declared(ids.into_iter().map(Into::into).collect())
    }
}

impl From<&[&str]> for NewAssets {
    fn from(ids: &[&str]) -> Self {
        NewAssets::Declared(ids.iter().map(|id| id.to_string()).collect())
    }
}

impl From<BTreeMap<String, String>> for NewAssets {
    fn from(located: BTreeMap<String, String>) -> Self {
        NewAssets::Located(located)
    }
}

/// Latest-upload view of a version: each asset maps to its most
/// recent locator, or `""` if it was never uploaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedVersion {
    pub data: String,
    pub assets: BTreeMap<String, String>,
    pub timestamp: String,
    pub renditions: Vec<Rendition>,
}

impl From<&Version> for ResolvedVersion {
    fn from(version: &Version) -> Self {
        let assets = version
            .assets
            .iter()
            .map(|(id, history)| {
                let latest = history
                    .last()
                    .map(|record| record.locator.clone())
                    .unwrap_or_default();
                (id.clone(), latest)
            })
            .collect();

        Self {
            data: version.data.clone(),
            assets,
            timestamp: version.timestamp.clone(),
            renditions: version.renditions.clone(),
        }
    }
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ManifestError {
    #[error("asset `{asset_id}` is not declared in the latest version")]
    UnknownAsset { asset_id: String },

    #[error("manifest `{id}` has no versions")]
    NoVersions { id: String },

    #[error("missing version: {0}")]
    MissingVersion(String),
}

impl Manifest {
    pub fn latest_version(&self) -> Option<&Version> {
        self.versions.last()
    }

    /// Version at `index`; negative indexes count from the end.
    pub fn version(&self, index: isize) -> Result<&Version, ManifestError> {
        let len = self.versions.len() as isize;
        let position = if index < 0 { len + index } else { index };

        if position < 0 || position >= len {
            return Err(ManifestError::MissingVersion(format!("index {index}")));
        }
        Ok(&self.versions[position as usize])
    }

    /// Latest version created at or before `timestamp`.
    pub fn version_at(&self, timestamp: &str) -> Result<&Version, ManifestError> {
        self.versions
            .iter()
            .rev()
            .find(|version| version.timestamp.as_str() <= timestamp)
            .ok_or_else(|| ManifestError::MissingVersion(format!("at {timestamp}")))
    }

    fn latest_version_mut(&mut self) -> Result<&mut Version, ManifestError> {
        let id = self.id.clone();
        self.versions
            .last_mut()
            .ok_or(ManifestError::NoVersions { id })
    }
}

/// New manifest with no versions. The identity is always stringified.
pub fn create(id: impl ToString) -> Manifest {
    Manifest {
        id: id.to_string(),
        versions: Vec::new(),
        extra: Map::new(),
    }
}

/// Append a new version pointing at `data`.
pub fn add_version(
    manifest: &Manifest,
    data: &str,
    assets: impl Into<NewAssets>,
    clock: &dyn Clock,
) -> Manifest {
    let now = clock.now();

    let assets = match assets.into() {
        NewAssets::Declared(ids) => ids.into_iter().map(|id| (id, Vec::new())).collect(),
        NewAssets::Located(located) => located
            .into_iter()
            .map(|(id, locator)| {
                let history = if locator.is_empty() {
                    Vec::new()
                } else {
                    vec![AssetRecord {
                        timestamp: now.clone(),
                        locator,
                    }]
                };
                (id, history)
            })
            .collect(),
    };

    let mut next = manifest.clone();
    next.versions.push(Version {
        data: data.to_string(),
        assets,
        timestamp: now,
        renditions: Vec::new(),
    });
    next
}

/// Record a new upload of an asset declared by the latest version.
///
/// Asset slots are fixed when a version is created; an identifier the
/// latest version does not declare is rejected.
pub fn add_asset_version(
    manifest: &Manifest,
    asset_id: &str,
    locator: &str,
    clock: &dyn Clock,
) -> Result<Manifest, ManifestError> {
    let mut next = manifest.clone();
    let history = next
        .latest_version_mut()?
        .assets
        .get_mut(asset_id)
        .ok_or_else(|| ManifestError::UnknownAsset {
            asset_id: asset_id.to_string(),
        })?;

    history.push(AssetRecord {
        timestamp: clock.now(),
        locator: locator.to_string(),
    });
    Ok(next)
}

/// Record a new upload of a rendition of the latest version.
///
/// Uploads with the same `(filename, mimetype, lang)` accumulate under
/// one rendition; any difference in the triple starts a new one.
pub fn add_rendition_version(
    manifest: &Manifest,
    filename: &str,
    url: &str,
    mimetype: &str,
    lang: &str,
    size_bytes: u64,
    clock: &dyn Clock,
) -> Result<Manifest, ManifestError> {
    let mut next = manifest.clone();
    let renditions = &mut next.latest_version_mut()?.renditions;

    let record = RenditionRecord {
        timestamp: clock.now(),
        url: url.to_string(),
        size_bytes,
    };

    match renditions
        .iter()
        .position(|rendition| rendition.matches(filename, mimetype, lang))
    {
        Some(position) => renditions[position].data.push(record),
        None => renditions.push(Rendition {
            filename: filename.to_string(),
            mimetype: mimetype.to_string(),
            lang: lang.to_string(),
            data: vec![record],
        }),
    }
    Ok(next)
}
