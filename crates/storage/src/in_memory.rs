//! In-memory backends — useful for testing and ephemeral sessions.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use saferplaces_core::error::StorageError;
use saferplaces_core::message::ThreadId;
use saferplaces_core::storage::{Checkpoint, Checkpointer, ObjectStore};
use tokio::sync::RwLock;

/// An object store that keeps object bytes in a map keyed by URI.
#[derive(Clone, Default)]
pub struct InMemoryObjectStore {
    objects: Arc<RwLock<HashMap<String, Vec<u8>>>>,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Put an object directly, bypassing the filesystem.
    pub async fn put(&self, uri: impl Into<String>, bytes: Vec<u8>) {
        self.objects.write().await.insert(uri.into(), bytes);
    }

    pub async fn get(&self, uri: &str) -> Option<Vec<u8>> {
        self.objects.read().await.get(uri).cloned()
    }

    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn download(&self, uri: &str, dest: &Path) -> Result<Option<PathBuf>, StorageError> {
        let Some(bytes) = self.get(uri).await else {
            return Ok(None);
        };
        tokio::fs::write(dest, bytes).await.map_err(|e| StorageError::Io {
            path: dest.display().to_string(),
            reason: e.to_string(),
        })?;
        Ok(Some(dest.to_path_buf()))
    }

    async fn upload(&self, src: &Path, uri: &str) -> Result<bool, StorageError> {
        let bytes = tokio::fs::read(src).await.map_err(|e| StorageError::Io {
            path: src.display().to_string(),
            reason: e.to_string(),
        })?;
        self.put(uri, bytes).await;
        Ok(true)
    }
}

/// Checkpoints kept in a map keyed by thread id.
#[derive(Clone, Default)]
pub struct InMemoryCheckpointer {
    checkpoints: Arc<RwLock<HashMap<String, Checkpoint>>>,
}

impl InMemoryCheckpointer {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Checkpointer for InMemoryCheckpointer {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), StorageError> {
        self.checkpoints
            .write()
            .await
            .insert(checkpoint.thread_id.0.clone(), checkpoint.clone());
        Ok(())
    }

    async fn load(&self, thread_id: &ThreadId) -> Result<Option<Checkpoint>, StorageError> {
        Ok(self.checkpoints.read().await.get(thread_id.as_str()).cloned())
    }

    async fn delete(&self, thread_id: &ThreadId) -> Result<bool, StorageError> {
        Ok(self.checkpoints.write().await.remove(thread_id.as_str()).is_some())
    }
}
