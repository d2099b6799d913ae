use crate::shared::error::AppError;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};

/// SQLite pool shared by the record store and the operation queue.
///
/// Writers take `write_lock` so a record write and its queue entry never
/// interleave with another writer. Readers only take a pooled connection.
#[derive(Clone)]
pub struct ConnectionPool {
    pool: Arc<SqlitePool>,
    write_gate: Arc<Mutex<()>>,
}

impl ConnectionPool {
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        connect_timeout: Duration,
    ) -> Result<Self, sqlx::Error> {
        let in_memory = is_memory_url(database_url);
        let mut options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(5));
        if !in_memory {
            options = options.journal_mode(SqliteJournalMode::Wal);
        }

        let pool_options = if in_memory {
            // every connection to `:memory:` is a separate database
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(max_connections.max(1))
        };

        let pool = pool_options
            .acquire_timeout(connect_timeout)
            .connect_with(options)
            .await?;

        Ok(Self {
            pool: Arc::new(pool),
            write_gate: Arc::new(Mutex::new(())),
        })
    }

    pub async fn from_memory() -> Result<Self, sqlx::Error> {
        Self::new("sqlite::memory:", 1, Duration::from_secs(30)).await
    }

    pub fn get_pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn write_lock(&self) -> MutexGuard<'_, ()> {
        self.write_gate.lock().await
    }

    /// A failed migration leaves the store unusable and is reported as
    /// `LocalDataUnavailable`.
    pub async fn migrate(&self) -> Result<(), AppError> {
        sqlx::migrate!("./migrations")
            .run(self.pool.as_ref())
            .await
            .map_err(AppError::from)
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn is_memory_url(url: &str) -> bool {
    url.contains(":memory:") || url.contains("mode=memory")
}
