//! Checkpoint persistence
//!
//! The pipeline talks to durable storage only through [`CheckpointStore`].
//! Every backend must make `save` an atomic compare-and-swap on the
//! checkpoint version so racing calls for one thread cannot lose updates.

use async_trait::async_trait;

use crate::checkpoint::TurnCheckpoint;

pub mod file;
pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

pub use file::FileCheckpointStore;
pub use memory::MemoryCheckpointStore;
#[cfg(feature = "postgres")]
pub use postgres::PostgresCheckpointStore;

/// Error type for checkpoint store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Version conflict on thread {thread_id}: expected {expected}, found {actual}")]
    VersionConflict {
        thread_id: String,
        expected: u64,
        actual: u64,
    },

    #[error("Invalid thread id: {0}")]
    InvalidThreadId(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage backend error: {0}")]
    Backend(String),
}

#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Latest checkpoint for a thread, with `version` set to the stored version.
    async fn load(&self, thread_id: &str) -> Result<Option<TurnCheckpoint>, StoreError>;

    /// Write `checkpoint` if the stored version still equals
    /// `checkpoint.version` (0 meaning "no checkpoint yet").
    /// Returns the new stored version.
    async fn save(&self, checkpoint: &TurnCheckpoint) -> Result<u64, StoreError>;
}

/// Reject ids that cannot safely be used as a storage key or filename.
pub fn validate_thread_id(thread_id: &str) -> Result<(), StoreError> {
    if thread_id.is_empty() {
        return Err(StoreError::InvalidThreadId(
            "thread id cannot be empty".to_string(),
        ));
    }
    if thread_id.contains('/') || thread_id.contains('\\') || thread_id.contains("..") {
        return Err(StoreError::InvalidThreadId(format!(
            "thread id contains invalid characters: {thread_id:?}"
        )));
    }
    if thread_id.chars().any(|c| c.is_control()) {
        return Err(StoreError::InvalidThreadId(format!(
            "thread id contains control characters: {thread_id:?}"
        )));
    }
    Ok(())
}
