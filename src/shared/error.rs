use crate::application::ports::remote_service::RemoteError;
use std::fmt;

#[derive(Debug)]
pub enum AppError {
    Database(String),
    LocalDataUnavailable(String),
    Storage(String),
    NotFound(String),
    InvalidInput(String),
    ValidationError(String),
    TenantMismatch(String),
    ConfigurationError(String),
    SerializationError(String),
    DeserializationError(String),
    Remote(RemoteError),
    Internal(String),
}

impl AppError {
    /// Errors that mean the on-device store cannot be trusted any more.
    pub fn is_local_storage_failure(&self) -> bool {
        matches!(
            self,
            AppError::Database(_) | AppError::LocalDataUnavailable(_) | AppError::Storage(_)
        )
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Database(msg) => write!(f, "Database error: {}", msg),
            AppError::LocalDataUnavailable(msg) => {
                write!(f, "Offline data unavailable: {}", msg)
            }
            AppError::Storage(msg) => write!(f, "Storage error: {}", msg),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::InvalidInput(msg) => write!(f, "Invalid input: {}", msg),
            AppError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            AppError::TenantMismatch(msg) => write!(f, "Tenant mismatch: {}", msg),
            AppError::ConfigurationError(msg) => write!(f, "Configuration error: {}", msg),
            AppError::SerializationError(msg) => write!(f, "Serialization error: {}", msg),
            AppError::DeserializationError(msg) => write!(f, "Deserialization error: {}", msg),
            AppError::Remote(err) => write!(f, "Remote error: {}", err),
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for AppError {}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::Database(err.to_string())
    }
}

impl From<sqlx::migrate::MigrateError> for AppError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        AppError::LocalDataUnavailable(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::SerializationError(err.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Storage(err.to_string())
    }
}

impl From<RemoteError> for AppError {
    fn from(err: RemoteError) -> Self {
        AppError::Remote(err)
    }
}

impl From<String> for AppError {
    fn from(err: String) -> Self {
        AppError::Internal(err)
    }
}

impl From<&str> for AppError {
    fn from(err: &str) -> Self {
        AppError::Internal(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
