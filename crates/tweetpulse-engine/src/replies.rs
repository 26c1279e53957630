//! Stored reply log.
//!
//! Every reply the user sends can be captured with its provenance: typed by
//! hand, sent as the AI suggested it, or edited from an AI suggestion. The
//! log lives under its own key, separate from the core state, and changes to
//! it do not trigger a `stateChanged` notification.

use std::collections::HashSet;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Number, Value};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::engine::StateEngine;
use crate::error::{EngineError, EngineResult};
use crate::schema::{self, REPLIES_KEY};

/// The tweet a reply was written against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TweetRef {
    pub author_handle: String,
    pub text: String,
}

/// How a reply came to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReplyKind {
    Manual,
    AiUnmodified,
    AiModified,
}

impl ReplyKind {
    /// Classify a sent reply against the AI suggestion shown for it, if any.
    /// An empty suggestion counts as none.
    pub fn classify(reply: &str, ai_generated: Option<&str>) -> Self {
        match ai_generated {
            None | Some("") => Self::Manual,
            Some(suggestion) if suggestion == reply => Self::AiUnmodified,
            Some(_) => Self::AiModified,
        }
    }
}

/// One captured reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredReply {
    pub id: String,
    /// Milliseconds since the Unix epoch. Any JSON number is accepted on
    /// read; fractional milliseconds are truncated.
    #[serde(deserialize_with = "lenient_millis")]
    pub timestamp: i64,
    pub original_tweet: TweetRef,
    pub reply: String,
    #[serde(rename = "type")]
    pub kind: ReplyKind,
    /// The suggestion before the user edited it. Only kept for
    /// [`ReplyKind::AiModified`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_generated_reply: Option<String>,
    /// Prompt that produced the suggestion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_id: Option<String>,
}

impl StoredReply {
    /// Build a classified entry with a fresh id.
    pub fn capture(
        original_tweet: TweetRef,
        reply: impl Into<String>,
        ai_generated: Option<&str>,
        prompt_id: Option<String>,
        timestamp: i64,
    ) -> Self {
        let reply = reply.into();
        let kind = ReplyKind::classify(&reply, ai_generated);
        let ai_generated_reply = match kind {
            ReplyKind::AiModified => ai_generated.map(str::to_owned),
            _ => None,
        };
        let prompt_id = match kind {
            ReplyKind::Manual => None,
            _ => prompt_id,
        };

        Self {
            id: Uuid::now_v7().to_string(),
            timestamp,
            original_tweet,
            reply,
            kind,
            ai_generated_reply,
            prompt_id,
        }
    }
}

fn lenient_millis<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let number = Number::deserialize(deserializer)?;
    number
        .as_i64()
        .or_else(|| {
            number
                .as_f64()
                .filter(|f| f.is_finite())
                .map(|f| f as i64)
        })
        .ok_or_else(|| serde::de::Error::custom(format!("timestamp {number} out of range")))
}

/// The persisted log as raw elements, unparsed.
fn raw_items(raw: Option<Value>) -> Vec<Value> {
    match raw {
        Some(Value::Array(items)) => items,
        Some(_) => {
            warn!("stored reply log is not an array, treating as empty");
            Vec::new()
        }
        None => Vec::new(),
    }
}

/// Parse a persisted log, skipping elements that no longer parse. Skipped
/// elements stay in the store.
fn read_log(items: Vec<Value>) -> Vec<StoredReply> {
    items
        .into_iter()
        .enumerate()
        .filter_map(|(index, item)| match serde_json::from_value(item) {
            Ok(reply) => Some(reply),
            Err(err) => {
                warn!(index, %err, "skipping malformed stored reply");
                None
            }
        })
        .collect()
}

/// Parse and validate an import document.
///
/// Elements that do not match the [`StoredReply`] shape are invalid, and so is
/// every repeat of an id already seen earlier in the array.
pub fn parse_import(json: &str) -> EngineResult<Vec<StoredReply>> {
    if json.trim().is_empty() {
        return Err(EngineError::InvalidImport("no data to import".into()));
    }
    let parsed: Value = serde_json::from_str(json)
        .map_err(|err| EngineError::InvalidImport(format!("not valid JSON: {err}")))?;
    let Value::Array(items) = parsed else {
        return Err(EngineError::InvalidImport(
            "expected an array of stored replies".into(),
        ));
    };

    let total = items.len();
    let mut seen = HashSet::with_capacity(total);
    let mut replies = Vec::with_capacity(total);
    let mut invalid = 0;

    for item in items {
        match serde_json::from_value::<StoredReply>(item) {
            Ok(reply) if seen.insert(reply.id.clone()) => replies.push(reply),
            Ok(reply) => {
                debug!(id = %reply.id, "duplicate id in import");
                invalid += 1;
            }
            Err(_) => invalid += 1,
        }
    }

    if invalid > 0 {
        return Err(EngineError::ImportValidation { invalid, total });
    }
    Ok(replies)
}

impl StateEngine {
    /// The full log in insertion order.
    #[instrument(skip(self))]
    pub async fn get_stored_replies(&self) -> EngineResult<Vec<StoredReply>> {
        Ok(read_log(self.load_raw_log().await?))
    }

    async fn load_raw_log(&self) -> EngineResult<Vec<Value>> {
        schema::migrate_legacy(self.store()).await?;
        Ok(raw_items(self.store().get(REPLIES_KEY).await?))
    }

    async fn store_raw_log(&self, items: Vec<Value>) -> EngineResult<()> {
        self.store().set(REPLIES_KEY, Value::Array(items)).await?;
        Ok(())
    }

    /// Replace the whole log.
    #[instrument(skip(self, replies), fields(count = replies.len()))]
    pub async fn set_stored_replies(&self, replies: Vec<StoredReply>) -> EngineResult<()> {
        let value = serde_json::to_value(&replies)?;
        self.store().set(REPLIES_KEY, value).await?;
        Ok(())
    }

    /// Append one entry. Id uniqueness is the caller's concern.
    ///
    /// Existing elements are written back as stored, including ones this
    /// build cannot parse.
    #[instrument(skip(self, reply), fields(id = %reply.id))]
    pub async fn add_stored_reply(&self, reply: StoredReply) -> EngineResult<()> {
        let mut items = self.load_raw_log().await?;
        items.push(serde_json::to_value(&reply)?);
        self.store_raw_log(items).await
    }

    /// Remove the first element whose `id` matches. Returns whether one was
    /// found. Other elements are left as stored.
    #[instrument(skip(self))]
    pub async fn delete_stored_reply(&self, id: &str) -> EngineResult<bool> {
        let mut items = self.load_raw_log().await?;
        let Some(index) = items
            .iter()
            .position(|item| item.get("id").and_then(Value::as_str) == Some(id))
        else {
            debug!("no stored reply with that id");
            return Ok(false);
        };
        items.remove(index);
        self.store_raw_log(items).await?;
        Ok(true)
    }

    /// Classify and append a sent reply, unless capture is switched off.
    #[instrument(skip_all)]
    pub async fn capture_reply(
        &self,
        original_tweet: TweetRef,
        reply: String,
        ai_generated: Option<String>,
        prompt_id: Option<String>,
    ) -> EngineResult<Option<StoredReply>> {
        let state = self.get_state().await?;
        if !state.capture_replies {
            debug!("reply capture disabled, skipping");
            return Ok(None);
        }

        let entry = StoredReply::capture(
            original_tweet,
            reply,
            ai_generated.as_deref(),
            prompt_id,
            self.clock().epoch_millis(),
        );
        debug!(id = %entry.id, kind = ?entry.kind, "capturing reply");
        self.add_stored_reply(entry.clone()).await?;
        Ok(Some(entry))
    }

    /// Replace the log with the entries in `json`, all or nothing.
    ///
    /// Returns the number of imported entries. On any validation failure the
    /// existing log is left as it was.
    #[instrument(skip_all)]
    pub async fn import_stored_replies(&self, json: &str) -> EngineResult<usize> {
        let replies = parse_import(json)?;
        let count = replies.len();
        self.set_stored_replies(replies).await?;
        info!(count, "stored replies imported");
        Ok(count)
    }

    /// The log as a pretty-printed JSON array, readable by
    /// [`import_stored_replies`](Self::import_stored_replies).
    pub async fn export_stored_replies(&self) -> EngineResult<String> {
        let replies = self.get_stored_replies().await?;
        Ok(serde_json::to_string_pretty(&replies)?)
    }
}

// ── tests ────────────────────────────────────────────────────────────
