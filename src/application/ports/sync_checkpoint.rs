use crate::shared::error::AppError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Durable home of `last_sync_time`, kept outside the record database so it
/// survives a store rebuild.
#[async_trait]
pub trait SyncCheckpoint: Send + Sync {
    async fn load(&self) -> Result<Option<DateTime<Utc>>, AppError>;
    async fn save(&self, last_sync_time: DateTime<Utc>) -> Result<(), AppError>;
    async fn clear(&self) -> Result<(), AppError>;
}
