//! The aggregate state owned by the engine and its persisted shape.
//!
//! Persisted JSON uses camelCase field names. Loading goes through
//! [`State::from_persisted`], which never fails: whatever cannot be read is
//! replaced by defaults.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use crate::replies::StoredReply;

/// Which daily counter an event feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CounterKind {
    Tweet,
    Reply,
}

impl std::fmt::Display for CounterKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tweet => f.write_str("tweet"),
            Self::Reply => f.write_str("reply"),
        }
    }
}

/// Today's tallies.
///
/// Count fields absent from older persisted shapes read as 0; `date` is
/// required, a bucket without one is unusable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyCounts {
    pub date: NaiveDate,
    #[serde(default)]
    pub tweets: u32,
    #[serde(default)]
    pub replies: u32,
    #[serde(default)]
    pub seconds: u64,
}

impl DailyCounts {
    /// A zeroed bucket for `date`.
    pub fn empty(date: NaiveDate) -> Self {
        Self {
            date,
            tweets: 0,
            replies: 0,
            seconds: 0,
        }
    }

    /// The counters without the date, as archived into history.
    pub fn snapshot(&self) -> DaySnapshot {
        DaySnapshot {
            tweets: self.tweets,
            replies: self.replies,
            seconds: self.seconds,
        }
    }

    /// Zero the counters in place, keeping the date.
    pub fn clear(&mut self) {
        self.tweets = 0;
        self.replies = 0;
        self.seconds = 0;
    }
}

/// One archived day.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaySnapshot {
    #[serde(default)]
    pub tweets: u32,
    #[serde(default)]
    pub replies: u32,
    #[serde(default)]
    pub seconds: u64,
}

/// Archived days keyed by local calendar date.
pub type HistoryMap = BTreeMap<NaiveDate, DaySnapshot>;

/// User-configured daily goals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Targets {
    pub tweets: u32,
    pub replies: u32,
}

impl Targets {
    pub fn is_valid(&self) -> bool {
        self.tweets > 0 && self.replies > 0
    }
}

impl Default for Targets {
    fn default() -> Self {
        Self {
            tweets: 5,
            replies: 50,
        }
    }
}

/// LLM provider used for reply suggestions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    #[default]
    OpenRouter,
    Google,
}

/// Hotkey used when none has been configured.
pub const DEFAULT_PROMPT_CYCLE_HOTKEY: &str = "alt+s";

fn default_true() -> bool {
    true
}

/// Everything the engine persists under the core key.
///
/// API keys and model names are opaque: the engine stores them and hands
/// them back, nothing more.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct State {
    pub daily: DailyCounts,
    #[serde(default)]
    pub history: HistoryMap,
    #[serde(default)]
    pub targets: Targets,

    #[serde(default)]
    pub provider: Provider,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub open_router_api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub open_router_model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub google_api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub google_model: Option<String>,
    #[serde(default)]
    pub use_image_understanding: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_project_id: Option<String>,
    #[serde(default)]
    pub use_memory: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_prompt_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_cycle_hotkey: Option<String>,
    #[serde(default = "default_true")]
    pub capture_replies: bool,
    #[serde(default)]
    pub inject_in_system_prompts: bool,
}

impl State {
    /// A fresh state whose live bucket is `today`.
    pub fn new(today: NaiveDate) -> Self {
        Self::with_targets(today, Targets::default())
    }

    pub fn with_targets(today: NaiveDate, targets: Targets) -> Self {
        Self {
            daily: DailyCounts::empty(today),
            history: HistoryMap::new(),
            targets,
            provider: Provider::default(),
            open_router_api_key: None,
            open_router_model: None,
            google_api_key: None,
            google_model: None,
            use_image_understanding: false,
            memory_api_key: None,
            memory_project_id: None,
            use_memory: false,
            selected_prompt_id: None,
            prompt_cycle_hotkey: None,
            capture_replies: true,
            inject_in_system_prompts: false,
        }
    }

    /// The configured hotkey, or [`DEFAULT_PROMPT_CYCLE_HOTKEY`].
    pub fn prompt_cycle_hotkey(&self) -> &str {
        self.prompt_cycle_hotkey
            .as_deref()
            .unwrap_or(DEFAULT_PROMPT_CYCLE_HOTKEY)
    }

    /// Model name for the active provider, if any.
    pub fn active_model(&self) -> Option<&str> {
        match self.provider {
            Provider::OpenRouter => self.open_router_model.as_deref(),
            Provider::Google => self.google_model.as_deref(),
        }
    }

    /// Merge a persisted document onto `defaults`.
    ///
    /// Top-level fields are taken one by one; a missing or unreadable field
    /// keeps its default. `daily` and `targets` are all-or-nothing: an
    /// unreadable object is replaced wholesale rather than merged per nested
    /// field. Unreadable history entries are dropped individually.
    pub fn from_persisted(raw: Value, defaults: State) -> State {
        let Value::Object(mut map) = raw else {
            warn!("persisted state is not an object, using defaults");
            return defaults;
        };

        let mut state = defaults;

        if let Some(daily) = take_field::<DailyCounts>(&mut map, "daily") {
            state.daily = daily;
        }
        if let Some(targets) = take_field::<Targets>(&mut map, "targets") {
            if targets.is_valid() {
                state.targets = targets;
            } else {
                warn!(?targets, "persisted targets are not positive, using defaults");
            }
        }
        if let Some(history) = take_field::<Map<String, Value>>(&mut map, "history") {
            state.history = read_history(history);
        }

        if let Some(provider) = take_field(&mut map, "provider") {
            state.provider = provider;
        }
        state.open_router_api_key = take_field(&mut map, "openRouterApiKey");
        state.open_router_model = take_field(&mut map, "openRouterModel");
        state.google_api_key = take_field(&mut map, "googleApiKey");
        state.google_model = take_field(&mut map, "googleModel");
        state.memory_api_key = take_field(&mut map, "memoryApiKey");
        state.memory_project_id = take_field(&mut map, "memoryProjectId");
        state.selected_prompt_id = take_field(&mut map, "selectedPromptId");
        state.prompt_cycle_hotkey = take_field(&mut map, "promptCycleHotkey");

        if let Some(v) = take_field(&mut map, "useImageUnderstanding") {
            state.use_image_understanding = v;
        }
        if let Some(v) = take_field(&mut map, "useMemory") {
            state.use_memory = v;
        }
        if let Some(v) = take_field(&mut map, "captureReplies") {
            state.capture_replies = v;
        }
        if let Some(v) = take_field(&mut map, "injectInSystemPrompts") {
            state.inject_in_system_prompts = v;
        }

        state
    }
}

/// Remove `key` from `map` and read it as `T`; `None` when absent, null, or
/// unreadable.
fn take_field<T: DeserializeOwned>(map: &mut Map<String, Value>, key: &str) -> Option<T> {
    let value = map.remove(key)?;
    if value.is_null() {
        return None;
    }
    match serde_json::from_value(value) {
        Ok(v) => Some(v),
        Err(err) => {
            warn!(field = key, %err, "ignoring malformed persisted field");
            None
        }
    }
}

fn read_history(raw: Map<String, Value>) -> HistoryMap {
    let mut history = HistoryMap::new();
    for (key, value) in raw {
        let Ok(date) = key.parse::<NaiveDate>() else {
            warn!(key = %key, "dropping history entry with unparseable date");
            continue;
        };
        match serde_json::from_value::<DaySnapshot>(value) {
            Ok(snapshot) => {
                history.insert(date, snapshot);
            }
            Err(err) => warn!(%date, %err, "dropping malformed history entry"),
        }
    }
    history
}

/// `State` together with the stored reply log, the unified view handed to
/// surfaces that want everything at once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppSnapshot {
    #[serde(flatten)]
    pub state: State,
    pub stored_replies: Vec<StoredReply>,
}

// ── tests ────────────────────────────────────────────────────────────
