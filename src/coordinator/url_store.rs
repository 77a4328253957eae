use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::Result;

/// Sink for the resolved coordinator URLs, keyed by alias
#[async_trait]
pub trait UrlStore: Send + Sync {
    async fn persist(&self, urls: &BTreeMap<String, String>) -> Result<()>;
}

/// Writes the URL map as a JSON object to a file
#[derive(Debug, Clone)]
pub struct JsonFileUrlStore {
    path: PathBuf,
}

impl JsonFileUrlStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `$XDG_DATA_HOME/fedbook/federation_urls.json` (platform equivalent)
    pub fn default_location() -> Option<PathBuf> {
        dirs::data_dir().map(|dir| dir.join("fedbook").join("federation_urls.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn load(&self) -> Result<BTreeMap<String, String>> {
        let raw = tokio::fs::read_to_string(&self.path).await?;
        Ok(serde_json::from_str(&raw)?)
    }
}

#[async_trait]
impl UrlStore for JsonFileUrlStore {
    async fn persist(&self, urls: &BTreeMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let body = serde_json::to_vec_pretty(urls)?;
        tokio::fs::write(&self.path, body).await?;
        debug!(path = %self.path.display(), count = urls.len(), "persisted coordinator urls");
        Ok(())
    }
}
