use crate::application::ports::sync_checkpoint::SyncCheckpoint;
use crate::shared::error::AppError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

#[derive(Debug, Serialize, Deserialize)]
struct CheckpointFile {
    last_sync_time: DateTime<Utc>,
}

/// `last_sync_time` in a small JSON file next to the database.
pub struct FileSyncCheckpoint {
    path: PathBuf,
}

impl FileSyncCheckpoint {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl SyncCheckpoint for FileSyncCheckpoint {
    async fn load(&self) -> Result<Option<DateTime<Utc>>, AppError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        match serde_json::from_slice::<CheckpointFile>(&bytes) {
            Ok(file) => Ok(Some(file.last_sync_time)),
            Err(err) => {
                // a torn or foreign file only costs one full pull
                tracing::warn!(
                    target: "store",
                    path = %self.path.display(),
                    error = %err,
                    "ignoring unreadable sync checkpoint"
                );
                Ok(None)
            }
        }
    }

    async fn save(&self, last_sync_time: DateTime<Utc>) -> Result<(), AppError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let body = serde_json::to_vec_pretty(&CheckpointFile { last_sync_time })?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, body).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    async fn clear(&self) -> Result<(), AppError> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

/// Process-local checkpoint for tests and ephemeral sessions.
#[derive(Default)]
pub struct MemorySyncCheckpoint {
    value: RwLock<Option<DateTime<Utc>>>,
}

impl MemorySyncCheckpoint {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SyncCheckpoint for MemorySyncCheckpoint {
    async fn load(&self) -> Result<Option<DateTime<Utc>>, AppError> {
        Ok(*self.value.read().await)
    }

    async fn save(&self, last_sync_time: DateTime<Utc>) -> Result<(), AppError> {
        *self.value.write().await = Some(last_sync_time);
        Ok(())
    }

    async fn clear(&self) -> Result<(), AppError> {
        *self.value.write().await = None;
        Ok(())
    }
}
