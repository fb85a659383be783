//! Storage backends for the SaferPlaces agent.
//!
//! - [`LocalObjectStore`] mirrors `s3://bucket/key` URIs under a local root
//! - [`InMemoryObjectStore`] and [`InMemoryCheckpointer`] for tests and
//!   ephemeral sessions
//! - [`FileCheckpointer`] keeps one JSON document per thread
//!
//! [`documents`] layers JSON load/save on top of any object store.

pub mod documents;
pub mod file_checkpointer;
pub mod in_memory;
pub mod local;

use std::sync::Arc;

use saferplaces_config::StorageConfig;
use saferplaces_core::storage::{Checkpointer, ObjectStore};

pub use documents::{load_json, save_json};
pub use file_checkpointer::FileCheckpointer;
pub use in_memory::{InMemoryCheckpointer, InMemoryObjectStore};
pub use local::LocalObjectStore;

/// Build the object store and checkpointer selected by `storage.backend`.
pub fn build_from_config(config: &StorageConfig) -> (Arc<dyn ObjectStore>, Arc<dyn Checkpointer>) {
    match config.backend.as_str() {
        "memory" => (
            Arc::new(InMemoryObjectStore::new()),
            Arc::new(InMemoryCheckpointer::new()),
        ),
        _ => (
            Arc::new(LocalObjectStore::new(config.local_root())),
            Arc::new(FileCheckpointer::new(config.checkpoint_dir())),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_backend_selected_by_config() {
        let config = StorageConfig {
            backend: "memory".into(),
            ..StorageConfig::default()
        };
        let (store, checkpoints) = build_from_config(&config);
        assert_eq!(store.name(), "in_memory");
        assert_eq!(checkpoints.name(), "in_memory");
    }

    #[test]
    fn local_backend_is_default() {
        let (store, checkpoints) = build_from_config(&StorageConfig::default());
        assert_eq!(store.name(), "local");
        assert_eq!(checkpoints.name(), "file");
    }
}
