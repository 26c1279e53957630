//! Engine error types.
//!
//! Storage failures travel up unchanged inside [`EngineError::Store`] so the
//! caller can tell `StorageUnavailable` apart and keep showing its previous
//! value. Malformed persisted data never shows up here: it is repaired during
//! load. Broadcast failures never show up either.

use tweetpulse_store::StoreError;

/// Unified error type for engine operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The store adapter failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A bulk reply import contained structurally invalid entries. Nothing
    /// was imported.
    #[error("invalid format: {invalid} of {total} item(s) don't match the stored reply structure")]
    ImportValidation { invalid: usize, total: usize },

    /// A bulk reply import could not be read at all.
    #[error("invalid import: {0}")]
    InvalidImport(String),

    /// A daily target of zero was requested.
    #[error("daily {field} target must be greater than zero")]
    InvalidTarget { field: &'static str },

    /// The configuration file could not be read or parsed.
    #[error("configuration error: {0}")]
    Config(String),

    /// JSON serialization failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// The state service task has stopped.
    #[error("state service is not running")]
    ServiceClosed,
}

impl EngineError {
    /// Whether the underlying store refused access.
    pub fn is_storage_unavailable(&self) -> bool {
        matches!(self, Self::Store(err) if err.is_unavailable())
    }
}

/// Convenience alias used throughout the engine crate.
pub type EngineResult<T> = std::result::Result<T, EngineError>;
