//! The persisted key-value contract and its SQLite implementation.
//!
//! Values are whole JSON documents. A single `set` replaces the document for
//! one key atomically; nothing spans keys, so callers that write several keys
//! must tolerate a partial write.

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, instrument};

use crate::db::Database;
use crate::error::{StoreError, StoreResult};

/// Async get/set over a local key-value area.
///
/// Implementations report every access failure as
/// [`StoreError::StorageUnavailable`].
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read the document stored under `key`, or `None` when absent.
    async fn get(&self, key: &str) -> StoreResult<Option<Value>>;

    /// Store `value` under `key`, replacing any previous document.
    async fn set(&self, key: &str, value: Value) -> StoreResult<()>;

    /// Delete `key`, returning whether it existed.
    async fn remove(&self, key: &str) -> StoreResult<bool>;
}

/// [`KeyValueStore`] backed by the `kv_store` table of a SQLite database.
#[derive(Clone)]
pub struct SqliteStore {
    db: Database,
}

impl SqliteStore {
    /// Wrap an already-migrated database.
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Open (or create) the database file at `path` and migrate it.
    pub async fn open(path: impl AsRef<std::path::Path>) -> StoreResult<Self> {
        let db = Database::open_and_migrate(path.as_ref().to_path_buf()).await?;
        Ok(Self::new(db))
    }

    /// In-memory SQLite store, migrated.
    pub async fn open_in_memory() -> StoreResult<Self> {
        let db = Database::open_in_memory()?;
        db.run_migrations().await?;
        Ok(Self::new(db))
    }
}

#[async_trait]
impl KeyValueStore for SqliteStore {
    #[instrument(skip(self))]
    async fn get(&self, key: &str) -> StoreResult<Option<Value>> {
        let key = key.to_string();
        let raw: Option<String> = self
            .db
            .execute(move |conn| {
                let result = conn.query_row(
                    "SELECT value FROM kv_store WHERE key = ?1",
                    rusqlite::params![key],
                    |row| row.get(0),
                );
                match result {
                    Ok(value) => Ok(Some(value)),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(StoreError::unavailable(e)),
                }
            })
            .await?;

        raw.map(|text| serde_json::from_str(&text).map_err(StoreError::from))
            .transpose()
    }

    #[instrument(skip(self, value))]
    async fn set(&self, key: &str, value: Value) -> StoreResult<()> {
        let key = key.to_string();
        let text = serde_json::to_string(&value)?;
        self.db
            .execute(move |conn| {
                let now = chrono::Utc::now().timestamp_millis();
                conn.execute(
                    "INSERT INTO kv_store (key, value, updated_at) VALUES (?1, ?2, ?3) \
                     ON CONFLICT(key) DO UPDATE SET value = excluded.value, \
                     updated_at = excluded.updated_at",
                    rusqlite::params![key, text, now],
                )
                .map_err(StoreError::unavailable)?;
                debug!(key = %key, bytes = text.len(), "document stored");
                Ok(())
            })
            .await
    }

    #[instrument(skip(self))]
    async fn remove(&self, key: &str) -> StoreResult<bool> {
        let key = key.to_string();
        self.db
            .execute(move |conn| {
                let deleted = conn
                    .execute(
                        "DELETE FROM kv_store WHERE key = ?1",
                        rusqlite::params![key],
                    )
                    .map_err(StoreError::unavailable)?;
                Ok(deleted > 0)
            })
            .await
    }
}

// ── tests ────────────────────────────────────────────────────────────
