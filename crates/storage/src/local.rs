//! Local object store — mirrors bucket URIs on the filesystem.
//!
//! `s3://saferplaces.co/SaferPlaces-Agent/dev/user==u1/layer_registry.json`
//! maps to `<root>/saferplaces.co/SaferPlaces-Agent/dev/user==u1/layer_registry.json`.
//!
//! Useful for development and single-host deployments where the processing
//! APIs share a mounted volume with the agent.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use saferplaces_core::error::StorageError;
use saferplaces_core::storage::ObjectStore;
use tracing::debug;

pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Resolve a bucket URI to a path under the root.
    pub fn resolve(&self, uri: &str) -> Result<PathBuf, StorageError> {
        let key = uri
            .strip_prefix("s3://")
            .or_else(|| uri.strip_prefix("file://"))
            .ok_or_else(|| StorageError::UnsupportedUri(uri.to_string()))?;

        let relative = Path::new(key);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));
        if key.is_empty() || escapes {
            return Err(StorageError::UnsupportedUri(uri.to_string()));
        }
        Ok(self.root.join(relative))
    }
}

fn io_error(path: &Path, e: std::io::Error) -> StorageError {
    StorageError::Io {
        path: path.display().to_string(),
        reason: e.to_string(),
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    fn name(&self) -> &str {
        "local"
    }

    async fn download(&self, uri: &str, dest: &Path) -> Result<Option<PathBuf>, StorageError> {
        let source = self.resolve(uri)?;
        if !tokio::fs::try_exists(&source).await.map_err(|e| io_error(&source, e))? {
            debug!(uri, "object not found");
            return Ok(None);
        }
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| io_error(parent, e))?;
        }
        tokio::fs::copy(&source, dest).await.map_err(|e| io_error(&source, e))?;
        debug!(uri, dest = %dest.display(), "object downloaded");
        Ok(Some(dest.to_path_buf()))
    }

    async fn upload(&self, src: &Path, uri: &str) -> Result<bool, StorageError> {
        let target = self.resolve(uri)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| io_error(parent, e))?;
        }
        tokio::fs::copy(src, &target).await.map_err(|e| io_error(src, e))?;
        debug!(uri, "object uploaded");
        Ok(true)
    }
}
