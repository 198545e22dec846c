use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::{validate_thread_id, CheckpointStore, StoreError};
use crate::checkpoint::TurnCheckpoint;

/// In-process store. Used by tests and single-process deployments.
#[derive(Default)]
pub struct MemoryCheckpointStore {
    checkpoints: RwLock<HashMap<String, TurnCheckpoint>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.checkpoints.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.checkpoints.read().await.is_empty()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn load(&self, thread_id: &str) -> Result<Option<TurnCheckpoint>, StoreError> {
        Ok(self.checkpoints.read().await.get(thread_id).cloned())
    }

    async fn save(&self, checkpoint: &TurnCheckpoint) -> Result<u64, StoreError> {
        validate_thread_id(&checkpoint.thread_id)?;

        let mut checkpoints = self.checkpoints.write().await;
        let actual = checkpoints
            .get(&checkpoint.thread_id)
            .map(|c| c.version)
            .unwrap_or(0);

        if actual != checkpoint.version {
            return Err(StoreError::VersionConflict {
                thread_id: checkpoint.thread_id.clone(),
                expected: checkpoint.version,
                actual,
            });
        }

        let mut stored = checkpoint.clone();
        stored.version = actual + 1;
        checkpoints.insert(stored.thread_id.clone(), stored);
        Ok(actual + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::{RequestKey, TurnMarker};
    use crate::types::{ConversationState, Message};

    fn checkpoint(thread_id: &str) -> TurnCheckpoint {
        let mut state = ConversationState::new();
        state.push_message(Message::user("hi"));
        TurnCheckpoint::new(
            thread_id,
            state,
            TurnMarker::new(RequestKey::for_request(None, "hi"), 0),
        )
    }

    #[tokio::test]
    async fn test_save_assigns_versions() {
        let store = MemoryCheckpointStore::new();
        let mut cp = checkpoint("t1");

        cp.version = store.save(&cp).await.unwrap();
        assert_eq!(cp.version, 1);
        cp.version = store.save(&cp).await.unwrap();
        assert_eq!(cp.version, 2);

        let loaded = store.load("t1").await.unwrap().unwrap();
        assert_eq!(loaded.version, 2);
    }

    #[tokio::test]
    async fn test_stale_write_is_rejected() {
        let store = MemoryCheckpointStore::new();
        let mut first = checkpoint("t1");
        first.version = store.save(&first).await.unwrap();

        let stale = first.clone();
        first.version = store.save(&first).await.unwrap();

        let err = store.save(&stale).await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::VersionConflict {
                expected: 1,
                actual: 2,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_create_twice_conflicts() {
        let store = MemoryCheckpointStore::new();
        store.save(&checkpoint("t1")).await.unwrap();
        assert!(store.save(&checkpoint("t1")).await.is_err());
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_missing_thread() {
        let store = MemoryCheckpointStore::new();
        assert!(store.load("nope").await.unwrap().is_none());
        assert!(store.is_empty().await);
    }
}
