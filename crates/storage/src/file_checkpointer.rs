//! File-based checkpoints — one JSON document per thread.
//!
//! Storage location: `~/.saferplaces/checkpoints/<thread_id>.json`
//!
//! Writes go to a temporary sibling first and are renamed into place, so a
//! crash mid-write leaves the previous checkpoint intact.

use std::path::PathBuf;

use async_trait::async_trait;
use saferplaces_core::error::StorageError;
use saferplaces_core::message::ThreadId;
use saferplaces_core::storage::{Checkpoint, Checkpointer};
use tracing::{debug, warn};

pub struct FileCheckpointer {
    dir: PathBuf,
}

impl FileCheckpointer {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn path_for(&self, thread_id: &ThreadId) -> PathBuf {
        let file: String = thread_id
            .as_str()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir.join(format!("{file}.json"))
    }
}

fn io_error(path: &std::path::Path, e: impl std::fmt::Display) -> StorageError {
    StorageError::Io {
        path: path.display().to_string(),
        reason: e.to_string(),
    }
}

#[async_trait]
impl Checkpointer for FileCheckpointer {
    fn name(&self) -> &str {
        "file"
    }

    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), StorageError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| io_error(&self.dir, e))?;

        let path = self.path_for(&checkpoint.thread_id);
        let tmp = path.with_extension("json.tmp");
        let content = serde_json::to_vec_pretty(checkpoint).map_err(|e| io_error(&path, e))?;

        tokio::fs::write(&tmp, content).await.map_err(|e| io_error(&tmp, e))?;
        tokio::fs::rename(&tmp, &path).await.map_err(|e| io_error(&path, e))?;
        debug!(thread_id = %checkpoint.thread_id, path = %path.display(), "checkpoint saved");
        Ok(())
    }

    async fn load(&self, thread_id: &ThreadId) -> Result<Option<Checkpoint>, StorageError> {
        let path = self.path_for(thread_id);
        let content = match tokio::fs::read(&path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_error(&path, e)),
        };

        match serde_json::from_slice::<Checkpoint>(&content) {
            Ok(checkpoint) => Ok(Some(checkpoint)),
            Err(e) => {
                warn!(error = %e, path = %path.display(), "Skipping corrupted checkpoint");
                Ok(None)
            }
        }
    }

    async fn delete(&self, thread_id: &ThreadId) -> Result<bool, StorageError> {
        let path = self.path_for(thread_id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(io_error(&path, e)),
        }
    }
}
