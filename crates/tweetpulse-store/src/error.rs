//! Error types for the tweetpulse-store crate.
//!
//! All storage operations return [`StoreError`] via [`StoreResult`].
//! Callers above the adapter only need to distinguish
//! [`StoreError::StorageUnavailable`] from the rest; everything a backend can
//! fail with while reading or writing a key is folded into that variant.

use thiserror::Error;

/// Alias for `Result<T, StoreError>`.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur in the storage adapter.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing store refused access (permission denied, quota exceeded,
    /// file cannot be opened, ...). Never retried by this crate.
    #[error("storage unavailable: {reason}")]
    StorageUnavailable { reason: String },

    /// SQLite operation failed outside of a key read/write (open, pragmas).
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// JSON serialization or deserialization failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// A schema migration of the SQLite backend failed.
    #[error("migration v{version} failed: {message}")]
    Migration { version: u32, message: String },

    /// A blocking task was cancelled or panicked.
    #[error("background task failed: {0}")]
    TaskJoin(String),
}

impl StoreError {
    /// Build a [`StoreError::StorageUnavailable`] from any displayable cause.
    pub fn unavailable(reason: impl std::fmt::Display) -> Self {
        Self::StorageUnavailable {
            reason: reason.to_string(),
        }
    }

    /// Whether this error means the store could not be reached at all.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::StorageUnavailable { .. })
    }
}

impl From<tokio::task::JoinError> for StoreError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::TaskJoin(err.to_string())
    }
}
