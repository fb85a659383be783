//! Storage traits — object storage and per-thread checkpoints.
//!
//! Implementations live in the `saferplaces-storage` crate.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StorageError;
use crate::message::ThreadId;
use crate::state::ConversationState;
use crate::tool::Interrupt;

/// Read/write access to the bucket that holds project artifacts.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    fn name(&self) -> &str;

    /// Copy the object at `uri` into `dest`. Returns `None` when the object
    /// does not exist.
    async fn download(&self, uri: &str, dest: &Path) -> Result<Option<PathBuf>, StorageError>;

    /// Copy the local file `src` to `uri`. Returns whether the object was written.
    async fn upload(&self, src: &Path, uri: &str) -> Result<bool, StorageError>;
}

/// A suspension waiting for the user's reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingInterrupt {
    /// Name of the interrupt node that suspended the turn.
    pub node: String,
    pub interrupt: Interrupt,
}

/// Durable snapshot of one thread between turns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub thread_id: ThreadId,
    pub state: ConversationState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending: Option<PendingInterrupt>,
    pub saved_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn new(thread_id: ThreadId, state: ConversationState, pending: Option<PendingInterrupt>) -> Self {
        Self {
            thread_id,
            state,
            pending,
            saved_at: Utc::now(),
        }
    }
}

/// Persists thread checkpoints so a suspended turn survives a restart.
#[async_trait]
pub trait Checkpointer: Send + Sync {
    fn name(&self) -> &str;

    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), StorageError>;

    async fn load(&self, thread_id: &ThreadId) -> Result<Option<Checkpoint>, StorageError>;

    async fn delete(&self, thread_id: &ThreadId) -> Result<bool, StorageError>;
}
