//! # tweetpulse-store
//!
//! Persisted store adapter for the TweetPulse state engine.
//!
//! The engine only sees the async [`KeyValueStore`] contract: whole JSON
//! documents read and written per key, atomic per key, no transactions across
//! keys. Two backends ship with the crate:
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │  KeyValueStore (get / set / remove)     │
//! ├────────────────────┬────────────────────┤
//! │  SqliteStore       │  MemoryStore       │
//! │  kv_store table    │  RwLock<HashMap>   │
//! ├────────────────────┴────────────────────┤
//! │  Database (rusqlite WAL, blocking pool) │
//! │  Migrations (versioned, transactional)  │
//! └─────────────────────────────────────────┘
//! ```
//!
//! ## Quick start
//!
//! ```ignore
//! use tweetpulse_store::{KeyValueStore, SqliteStore};
//!
//! let store = SqliteStore::open("data/tweetpulse.db").await?;
//! store.set("greeting", serde_json::json!("hello")).await?;
//! ```

pub mod db;
pub mod error;
pub mod kv;
pub mod memory;
pub mod migration;

// ── re-exports ───────────────────────────────────────────────────────

pub use db::Database;
pub use error::{StoreError, StoreResult};
pub use kv::{KeyValueStore, SqliteStore};
pub use memory::MemoryStore;
