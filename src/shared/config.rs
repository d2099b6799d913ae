use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub sync: SyncConfig,
    pub pull: PullConfig,
    pub remote: RemoteConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// `None` means `<data_dir>/fieldsync.db`.
    pub url: Option<String>,
    pub max_connections: u32,
    pub connection_timeout: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    pub auto_sync: bool,
    pub sync_interval: u64,
    pub max_retry: u32,
    pub batch_size: u32,
    pub request_timeout: u64,
    pub backoff_base: u64,
    pub backoff_max: u64,
    pub max_push_rounds: u32,
    #[serde(default)]
    pub squash_updates: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullConfig {
    pub lookback_days: u32,
    pub lookahead_days: u32,
    pub overlap_secs: u64,
    pub full_refresh_every: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    pub base_url: String,
    #[serde(default)]
    pub api_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_dir: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: None,
                max_connections: 5,
                connection_timeout: 30,
            },
            sync: SyncConfig::default(),
            pull: PullConfig::default(),
            remote: RemoteConfig {
                base_url: "http://localhost:8080/api".to_string(),
                api_token: None,
            },
            storage: StorageConfig {
                data_dir: default_data_dir(),
            },
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            auto_sync: true,
            sync_interval: 300, // 5 minutes
            max_retry: 5,
            batch_size: 50,
            request_timeout: 30,
            backoff_base: 2,
            backoff_max: 300,
            max_push_rounds: 8,
            squash_updates: false,
        }
    }
}

impl Default for PullConfig {
    fn default() -> Self {
        Self {
            lookback_days: 30,
            lookahead_days: 30,
            overlap_secs: 60,
            full_refresh_every: 12,
        }
    }
}

impl SyncConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(v) = std::env::var("FIELDSYNC_DATA_DIR") {
            let trimmed = v.trim();
            if !trimmed.is_empty() {
                cfg.storage.data_dir = trimmed.to_string();
            }
        }
        if let Ok(v) = std::env::var("FIELDSYNC_DATABASE_URL") {
            let trimmed = v.trim();
            if !trimmed.is_empty() {
                cfg.database.url = Some(trimmed.to_string());
            }
        }
        if let Ok(v) = std::env::var("FIELDSYNC_DB_MAX_CONNECTIONS") {
            if let Some(value) = parse_u32(&v) {
                cfg.database.max_connections = value.max(1);
            }
        }

        if let Ok(v) = std::env::var("FIELDSYNC_REMOTE_URL") {
            let trimmed = v.trim().trim_end_matches('/');
            if !trimmed.is_empty() {
                cfg.remote.base_url = trimmed.to_string();
            }
        }
        if let Ok(v) = std::env::var("FIELDSYNC_API_TOKEN") {
            cfg.remote.api_token = Some(v).filter(|token| !token.trim().is_empty());
        }

        if let Ok(v) = std::env::var("FIELDSYNC_AUTO_SYNC") {
            cfg.sync.auto_sync = parse_bool(&v, cfg.sync.auto_sync);
        }
        if let Ok(v) = std::env::var("FIELDSYNC_SYNC_INTERVAL_SECS") {
            if let Some(value) = parse_u64(&v) {
                cfg.sync.sync_interval = value.max(1);
            }
        }
        if let Ok(v) = std::env::var("FIELDSYNC_MAX_RETRY") {
            if let Some(value) = parse_u32(&v) {
                cfg.sync.max_retry = value.max(1);
            }
        }
        if let Ok(v) = std::env::var("FIELDSYNC_BATCH_SIZE") {
            if let Some(value) = parse_u32(&v) {
                cfg.sync.batch_size = value.max(1);
            }
        }
        if let Ok(v) = std::env::var("FIELDSYNC_REQUEST_TIMEOUT_SECS") {
            if let Some(value) = parse_u64(&v) {
                cfg.sync.request_timeout = value.max(1);
            }
        }
        if let Ok(v) = std::env::var("FIELDSYNC_SQUASH_UPDATES") {
            cfg.sync.squash_updates = parse_bool(&v, cfg.sync.squash_updates);
        }

        if let Ok(v) = std::env::var("FIELDSYNC_PULL_LOOKBACK_DAYS") {
            if let Some(value) = parse_u32(&v) {
                cfg.pull.lookback_days = value;
            }
        }
        if let Ok(v) = std::env::var("FIELDSYNC_PULL_LOOKAHEAD_DAYS") {
            if let Some(value) = parse_u32(&v) {
                cfg.pull.lookahead_days = value;
            }
        }
        if let Ok(v) = std::env::var("FIELDSYNC_PULL_FULL_REFRESH_EVERY") {
            if let Some(value) = parse_u32(&v) {
                cfg.pull.full_refresh_every = value.max(1);
            }
        }

        cfg
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.database.max_connections == 0 {
            return Err("Database max_connections must be greater than 0".to_string());
        }
        if self.sync.sync_interval == 0 {
            return Err("Sync interval must be greater than 0".to_string());
        }
        if self.sync.max_retry == 0 {
            return Err("Sync max_retry must be greater than 0".to_string());
        }
        if self.sync.batch_size == 0 {
            return Err("Sync batch_size must be greater than 0".to_string());
        }
        if self.sync.request_timeout == 0 {
            return Err("Sync request_timeout must be greater than 0".to_string());
        }
        if self.sync.backoff_base > self.sync.backoff_max {
            return Err("Sync backoff_base must not exceed backoff_max".to_string());
        }
        if self.pull.lookback_days == 0 && self.pull.lookahead_days == 0 {
            return Err("Pull window must span at least one day".to_string());
        }
        if self.pull.full_refresh_every == 0 {
            return Err("Pull full_refresh_every must be greater than 0".to_string());
        }
        if self.remote.base_url.trim().is_empty() {
            return Err("Remote base_url must not be empty".to_string());
        }
        Ok(())
    }

    pub fn data_dir(&self) -> PathBuf {
        PathBuf::from(&self.storage.data_dir)
    }

    pub fn database_url(&self) -> String {
        match &self.database.url {
            Some(url) => url.clone(),
            None => format!(
                "sqlite:{}",
                self.data_dir().join("fieldsync.db").to_string_lossy()
            ),
        }
    }

    pub fn checkpoint_path(&self) -> PathBuf {
        self.data_dir().join("sync_checkpoint.json")
    }
}

fn default_data_dir() -> String {
    dirs::data_dir()
        .map(|dir| dir.join("fieldsync"))
        .unwrap_or_else(|| PathBuf::from("./data"))
        .to_string_lossy()
        .into_owned()
}

fn parse_bool(s: &str, default: bool) -> bool {
    match s.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" => false,
        _ => default,
    }
}

fn parse_u64(value: &str) -> Option<u64> {
    value.trim().parse::<u64>().ok()
}

fn parse_u32(value: &str) -> Option<u32> {
    value.trim().parse::<u32>().ok()
}
