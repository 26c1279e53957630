//! SQL schema migrations for the SQLite backend.
//!
//! Each applied version is recorded in `_migrations`, so reopening a file
//! only runs what it has not seen yet. This covers the table layout only; the
//! JSON documents inside `kv_store` carry their own version, handled by the
//! engine.

use rusqlite::Connection;
use tracing::{debug, info, warn};

use crate::error::{StoreError, StoreResult};

struct Migration {
    version: u32,
    description: &'static str,
    /// One or more statements, run as a batch.
    sql: &'static str,
}

/// Table layout history, oldest first. Only ever append.
static MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "kv_store: one JSON document per key",
        sql: r#"
            CREATE TABLE kv_store (
                key   TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
        "#,
    },
    Migration {
        version: 2,
        description: "kv_store.updated_at: last write time per key",
        sql: r#"
            ALTER TABLE kv_store ADD COLUMN updated_at INTEGER NOT NULL DEFAULT 0;
        "#,
    },
];

// ── public API ───────────────────────────────────────────────────────

/// Bring the table layout of `conn` up to the newest migration.
///
/// Blocking; the async side reaches it through [`Database::run_migrations`].
///
/// [`Database::run_migrations`]: crate::Database::run_migrations
pub fn run_all(conn: &Connection) -> StoreResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version     INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at  INTEGER NOT NULL
        );",
    )
    .map_err(|e| migration_error(0, "cannot create _migrations", e))?;

    let from = current_version(conn)?;
    let mut applied = 0;
    for migration in MIGRATIONS.iter().filter(|m| m.version > from) {
        apply(conn, migration)?;
        applied += 1;
    }

    if applied == 0 {
        debug!(version = from, "kv schema already current");
    } else {
        info!(from, applied, "kv schema migrated");
    }
    Ok(())
}

/// Highest applied migration, 0 for a fresh file.
pub fn current_version(conn: &Connection) -> StoreResult<u32> {
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM _migrations",
        [],
        |row| row.get(0),
    )
    .map_err(|e| migration_error(0, "cannot read schema version", e))
}

// ── internals ────────────────────────────────────────────────────────

fn migration_error(version: u32, what: &str, err: rusqlite::Error) -> StoreError {
    StoreError::Migration {
        version,
        message: format!("{what}: {err}"),
    }
}

/// Run one migration and record it, atomically.
fn apply(conn: &Connection, migration: &Migration) -> StoreResult<()> {
    let version = migration.version;
    info!(version, description = migration.description, "applying kv migration");

    // Dropping the transaction without commit rolls it back.
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| migration_error(version, "cannot begin", e))?;
    tx.execute_batch(migration.sql).map_err(|e| {
        warn!(version, %e, "kv migration failed, rolling back");
        migration_error(version, "statement failed", e)
    })?;
    tx.execute(
        "INSERT INTO _migrations (version, description, applied_at) VALUES (?1, ?2, ?3)",
        rusqlite::params![version, migration.description, chrono::Utc::now().timestamp()],
    )
    .map_err(|e| migration_error(version, "cannot record", e))?;
    tx.commit()
        .map_err(|e| migration_error(version, "cannot commit", e))
}

// ── tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const LATEST_VERSION: u32 = 2;

    #[test]
    fn migrations_are_ordered() {
        for window in MIGRATIONS.windows(2) {
            assert!(window[1].version > window[0].version);
        }
    }

    #[test]
    fn run_all_on_fresh_db() {
        let conn = Connection::open_in_memory().unwrap();
        run_all(&conn).unwrap();
        assert_eq!(current_version(&conn).unwrap(), LATEST_VERSION);
    }

    #[test]
    fn run_all_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run_all(&conn).unwrap();
        run_all(&conn).unwrap();
        assert_eq!(current_version(&conn).unwrap(), LATEST_VERSION);
    }

    #[test]
    fn kv_store_supports_upsert_with_timestamp() {
        let conn = Connection::open_in_memory().unwrap();
        run_all(&conn).unwrap();

        for value in ["1", "2"] {
            conn.execute(
                "INSERT INTO kv_store (key, value, updated_at) VALUES ('k', ?1, 7) \
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
                [value],
            )
            .unwrap();
        }

        let (value, updated_at): (String, i64) = conn
            .query_row(
                "SELECT value, updated_at FROM kv_store WHERE key = 'k'",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!(value, "2");
        assert_eq!(updated_at, 7);
    }
}
