use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use super::{validate_thread_id, CheckpointStore, StoreError};
use crate::checkpoint::TurnCheckpoint;

/// One JSON file per thread under `base_path`.
///
/// Files are replaced by write-to-temp-then-rename, so a reader never sees a
/// half-written checkpoint. The compare-and-swap is serialised by a
/// process-local lock: only one process may own a directory.
pub struct FileCheckpointStore {
    base_path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileCheckpointStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn path_for(&self, thread_id: &str) -> Result<PathBuf, StoreError> {
        validate_thread_id(thread_id)?;
        Ok(self.base_path.join(format!("{thread_id}.json")))
    }

    async fn read(&self, path: &Path) -> Result<Option<TurnCheckpoint>, StoreError> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_atomic(&self, path: &Path, thread_id: &str, content: &[u8]) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(&self.base_path).await?;

        let tmp_path = self.base_path.join(format!(
            ".{}.{}.tmp",
            thread_id,
            uuid::Uuid::new_v4().simple()
        ));

        let write_result = async {
            let mut file = tokio::fs::File::create(&tmp_path).await?;
            file.write_all(content).await?;
            file.flush().await?;
            file.sync_all().await?;
            drop(file);
            tokio::fs::rename(&tmp_path, path).await
        }
        .await;

        if let Err(e) = write_result {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(StoreError::Io(e));
        }
        Ok(())
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn load(&self, thread_id: &str) -> Result<Option<TurnCheckpoint>, StoreError> {
        let path = self.path_for(thread_id)?;
        self.read(&path).await
    }

    async fn save(&self, checkpoint: &TurnCheckpoint) -> Result<u64, StoreError> {
        let path = self.path_for(&checkpoint.thread_id)?;
        let _guard = self.write_lock.lock().await;

        let actual = self.read(&path).await?.map(|c| c.version).unwrap_or(0);
        if actual != checkpoint.version {
            return Err(StoreError::VersionConflict {
                thread_id: checkpoint.thread_id.clone(),
                expected: checkpoint.version,
                actual,
            });
        }

        let mut stored = checkpoint.clone();
        stored.version = actual + 1;
        let content = serde_json::to_vec_pretty(&stored)?;
        self.write_atomic(&path, &stored.thread_id, &content).await?;

        tracing::debug!(
            thread_id = %stored.thread_id,
            version = stored.version,
            "file store: checkpoint written"
        );
        Ok(stored.version)
    }
}
