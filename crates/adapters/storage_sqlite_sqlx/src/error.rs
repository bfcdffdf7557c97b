//! Storage-specific error type wrapping sqlx errors.

use plughub_domain::error::{PlugHubError, ValidationError};

/// Errors originating from the `SQLite` storage layer.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// A query or connection failed.
    #[error("database error")]
    Database(#[from] sqlx::Error),

    /// Failed to serialize or deserialize a stored JSON value.
    #[error("JSON serialization error")]
    Json(#[from] serde_json::Error),

    /// Failed to run migrations.
    #[error("migration error")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl StorageError {
    fn is_unique_violation(&self) -> bool {
        match self {
            Self::Database(err) => err
                .as_database_error()
                .is_some_and(|db| db.is_unique_violation()),
            _ => false,
        }
    }
}

impl From<StorageError> for PlugHubError {
    fn from(err: StorageError) -> Self {
        if err.is_unique_violation() {
            return ValidationError::invalid_field("unique_id", "already configured").into();
        }
        Self::Storage(Box::new(err))
    }
}
