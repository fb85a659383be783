//! JSON documents on top of an [`ObjectStore`].
//!
//! Object stores move files. These helpers stage a scratch file in the
//! system temp dir so callers can read and write typed documents such as
//! the project's `layer_registry.json`.

use std::path::PathBuf;

use saferplaces_core::error::StorageError;
use saferplaces_core::storage::ObjectStore;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::warn;

fn scratch_path() -> PathBuf {
    std::env::temp_dir().join(format!("saferplaces-{}.json", uuid::Uuid::new_v4()))
}

/// Download and parse the JSON document at `uri`.
///
/// Returns `Ok(None)` when the object does not exist.
pub async fn load_json<T: DeserializeOwned>(
    store: &dyn ObjectStore,
    uri: &str,
) -> Result<Option<T>, StorageError> {
    let scratch = scratch_path();
    let Some(path) = store.download(uri, &scratch).await? else {
        return Ok(None);
    };

    let read = tokio::fs::read(&path).await;
    if let Err(e) = tokio::fs::remove_file(&path).await {
        warn!(error = %e, path = %path.display(), "Failed to remove scratch file");
    }
    let bytes = read.map_err(|e| StorageError::Io {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;

    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|e| StorageError::Corrupt {
            path: uri.to_string(),
            reason: e.to_string(),
        })
}

/// Serialize `value` and upload it to `uri`.
pub async fn save_json<T: Serialize + ?Sized>(
    store: &dyn ObjectStore,
    uri: &str,
    value: &T,
) -> Result<bool, StorageError> {
    let scratch = scratch_path();
    let bytes = serde_json::to_vec_pretty(value).map_err(|e| StorageError::Corrupt {
        path: uri.to_string(),
        reason: e.to_string(),
    })?;
    tokio::fs::write(&scratch, bytes)
        .await
        .map_err(|e| StorageError::Io {
            path: scratch.display().to_string(),
            reason: e.to_string(),
        })?;

    let uploaded = store.upload(&scratch, uri).await;
    if let Err(e) = tokio::fs::remove_file(&scratch).await {
        warn!(error = %e, path = %scratch.display(), "Failed to remove scratch file");
    }
    uploaded
}
