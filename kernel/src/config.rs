// Store Configuration
//
// Selects the storage backend a session is built on.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::adapters::{FileBackend, InMemoryBackend};
use crate::changes::DEFAULT_LIMIT;
use crate::collection::CollectionError;
use crate::session::{Backend, Session};

/// Store configuration loaded from JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    pub backend: BackendConfig,

    /// Page size used when replaying the changes feed.
    #[serde(default = "default_page_size")]
    pub changes_page_size: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackendConfig {
    /// Nothing outlives the process.
    Memory,

    /// JSON-lines collections under `path`.
    File { path: PathBuf },
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("cannot open backend: {0}")]
    Backend(#[from] CollectionError),
}

fn default_page_size() -> usize {
    DEFAULT_LIMIT
}

impl StoreConfig {
    /// Default built-in config (used if no config is provided).
    pub fn default_config() -> Self {
        Self {
            backend: BackendConfig::Memory,
            changes_page_size: DEFAULT_LIMIT,
        }
    }

    pub fn from_json_str(data: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(data)?)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let data = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&data)
    }

    /// Same config, persisted under `path`.
    pub fn with_data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.backend = BackendConfig::File { path: path.into() };
        self
    }

    pub fn open_backend(&self) -> Result<Box<dyn Backend>, ConfigError> {
        Ok(match &self.backend {
            BackendConfig::Memory => Box::new(InMemoryBackend::new()),
            BackendConfig::File { path } => Box::new(FileBackend::open(path)?),
        })
    }

    pub fn open_session(&self) -> Result<Session, ConfigError> {
        let backend = self.open_backend()?;
        Ok(Session::new(backend.as_ref())?)
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::default_config()
    }
}
