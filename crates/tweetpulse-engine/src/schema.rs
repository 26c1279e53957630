//! Persisted layout and its migrations.
//!
//! Two kinds of migration live here:
//!
//! - [`migrate_legacy`] splits the single legacy document (settings, counters
//!   and reply log together) into the core key and the reply log key. It runs
//!   before every read and costs one `get` once the legacy key is gone.
//! - [`upgrade`] walks the core document through an ordered migration
//!   list, tagging it with `schemaVersion`. Migrations only ever fill the new
//!   shape forward; deprecated fields are read, never written.

use serde_json::{Map, Value};
use tracing::{debug, info, instrument, warn};
use tweetpulse_store::{KeyValueStore, StoreResult};

/// Single-document layout of the first releases.
pub const LEGACY_KEY: &str = "tweetReplyState";
/// Settings, counters and history.
pub const CORE_KEY: &str = "tweetReplyState.core";
/// The stored reply log, a JSON array.
pub const REPLIES_KEY: &str = "tweetReplyState.storedReplies";

/// Field of the core document holding its schema version.
pub const SCHEMA_VERSION_FIELD: &str = "schemaVersion";

/// Field of the legacy document holding the reply log.
const LEGACY_REPLIES_FIELD: &str = "storedReplies";

struct Migration {
    version: u32,
    description: &'static str,
    apply: fn(&mut Map<String, Value>),
}

/// All document migrations in order. Add new migrations to the end.
static MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "forward-fill llmModel into openRouterModel",
        apply: forward_fill_llm_model,
    },
    Migration {
        version: 2,
        description: "back-fill seconds in daily and history entries",
        apply: backfill_seconds,
    },
];

/// Version written by this build.
pub const CURRENT_SCHEMA_VERSION: u32 = 2;

// ── legacy split ─────────────────────────────────────────────────────

/// Move the legacy document, if any, into the split keys.
///
/// A destination key that already holds data is left alone, so a stale
/// legacy document never overwrites newer state. The legacy key is deleted
/// afterwards. Malformed legacy content is copied as-is and repaired by the
/// default merge on load. Returns whether a legacy document was found.
#[instrument(skip(store))]
pub async fn migrate_legacy(store: &dyn KeyValueStore) -> StoreResult<bool> {
    let Some(legacy) = store.get(LEGACY_KEY).await? else {
        return Ok(false);
    };

    info!("splitting legacy state document");
    let (core, replies) = split_legacy(legacy);

    if store.get(CORE_KEY).await?.is_none() {
        store.set(CORE_KEY, core).await?;
        debug!("legacy core fields copied");
    } else {
        warn!("core key already populated, discarding legacy core fields");
    }

    if store.get(REPLIES_KEY).await?.is_none() {
        store.set(REPLIES_KEY, replies).await?;
        debug!("legacy reply log copied");
    } else {
        warn!("reply log key already populated, discarding legacy replies");
    }

    store.remove(LEGACY_KEY).await?;
    info!("legacy state document removed");
    Ok(true)
}

fn split_legacy(legacy: Value) -> (Value, Value) {
    match legacy {
        Value::Object(mut map) => {
            let replies = match map.remove(LEGACY_REPLIES_FIELD) {
                Some(list @ Value::Array(_)) => list,
                Some(_) => {
                    warn!("legacy reply log is not an array, starting empty");
                    Value::Array(Vec::new())
                }
                None => Value::Array(Vec::new()),
            };
            (Value::Object(map), replies)
        }
        other => {
            warn!("legacy state document is not an object");
            (other, Value::Array(Vec::new()))
        }
    }
}

// ── versioned chain ──────────────────────────────────────────────────

/// Schema version of a core document; untagged documents are version 0.
pub fn schema_version(doc: &Value) -> u32 {
    doc.get(SCHEMA_VERSION_FIELD)
        .and_then(Value::as_u64)
        .and_then(|v| u32::try_from(v).ok())
        .unwrap_or(0)
}

/// Apply every pending migration to `doc` in place.
///
/// Returns whether anything ran, i.e. whether the document needs to be
/// written back. Non-object documents and documents from a newer build are
/// left untouched.
pub fn upgrade(doc: &mut Value) -> bool {
    let current = schema_version(doc);
    let Value::Object(map) = doc else {
        return false;
    };

    if current > CURRENT_SCHEMA_VERSION {
        warn!(
            found = current,
            supported = CURRENT_SCHEMA_VERSION,
            "state document is newer than this build, reading best-effort"
        );
        return false;
    }

    let mut applied = false;
    for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
        info!(
            version = migration.version,
            description = migration.description,
            "applying state migration"
        );
        (migration.apply)(map);
        applied = true;
    }

    if applied {
        map.insert(
            SCHEMA_VERSION_FIELD.to_string(),
            Value::from(CURRENT_SCHEMA_VERSION),
        );
    }
    applied
}

/// v1: `llmModel` predates per-provider model names.
fn forward_fill_llm_model(doc: &mut Map<String, Value>) {
    let has_model = doc
        .get("openRouterModel")
        .is_some_and(|v| !v.is_null());
    if has_model {
        return;
    }
    if let Some(legacy @ Value::String(_)) = doc.get("llmModel") {
        let legacy = legacy.clone();
        doc.insert("openRouterModel".to_string(), legacy);
    }
}

/// v2: `seconds` was added to the daily bucket after release.
fn backfill_seconds(doc: &mut Map<String, Value>) {
    fn ensure_seconds(entry: &mut Value) {
        if let Value::Object(fields) = entry {
            if !fields.get("seconds").is_some_and(Value::is_u64) {
                fields.insert("seconds".to_string(), Value::from(0u64));
            }
        }
    }

    if let Some(daily) = doc.get_mut("daily") {
        ensure_seconds(daily);
    }
    if let Some(Value::Object(history)) = doc.get_mut("history") {
        history.values_mut().for_each(ensure_seconds);
    }
}

// ── tests ────────────────────────────────────────────────────────────
