//! The daily state engine.
//!
//! Every operation is a load-mutate-store round trip against the
//! [`KeyValueStore`]: migrate the legacy layout, read the core document, run
//! the schema chain, merge onto defaults, roll over to today, apply the
//! change, write back, broadcast. Nothing is cached between calls.
//!
//! The engine itself does not serialize concurrent callers. Wrap it in a
//! [`StateService`](crate::StateService) when several tasks share one store.

use std::sync::Arc;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, instrument};
use tweetpulse_store::{KeyValueStore, SqliteStore};

use crate::bus::{Notification, StateBus};
use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::rollover::{prune_history, rollover_if_needed};
use crate::schema::{self, CORE_KEY, CURRENT_SCHEMA_VERSION, SCHEMA_VERSION_FIELD};
use crate::state::{AppSnapshot, CounterKind, DailyCounts, Provider, State, Targets};

/// A single-field settings change.
///
/// Serializes as `{"setting": "useMemory", "value": true}` so UI surfaces can
/// send settings changes as plain messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "setting", content = "value", rename_all = "camelCase")]
pub enum SettingUpdate {
    Targets(Targets),
    Provider(Provider),
    OpenRouterApiKey(Option<String>),
    OpenRouterModel(Option<String>),
    GoogleApiKey(Option<String>),
    GoogleModel(Option<String>),
    UseImageUnderstanding(bool),
    MemoryApiKey(Option<String>),
    MemoryProjectId(Option<String>),
    UseMemory(bool),
    SelectedPromptId(Option<String>),
    PromptCycleHotkey(Option<String>),
    CaptureReplies(bool),
    InjectInSystemPrompts(bool),
}

impl SettingUpdate {
    /// The setting's wire name, safe to log. Values are never included since
    /// some of them are API keys.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Targets(_) => "targets",
            Self::Provider(_) => "provider",
            Self::OpenRouterApiKey(_) => "openRouterApiKey",
            Self::OpenRouterModel(_) => "openRouterModel",
            Self::GoogleApiKey(_) => "googleApiKey",
            Self::GoogleModel(_) => "googleModel",
            Self::UseImageUnderstanding(_) => "useImageUnderstanding",
            Self::MemoryApiKey(_) => "memoryApiKey",
            Self::MemoryProjectId(_) => "memoryProjectId",
            Self::UseMemory(_) => "useMemory",
            Self::SelectedPromptId(_) => "selectedPromptId",
            Self::PromptCycleHotkey(_) => "promptCycleHotkey",
            Self::CaptureReplies(_) => "captureReplies",
            Self::InjectInSystemPrompts(_) => "injectInSystemPrompts",
        }
    }
}

/// Owner of the persisted daily state.
pub struct StateEngine {
    store: Arc<dyn KeyValueStore>,
    bus: StateBus,
    clock: Arc<dyn Clock>,
    history_retention_days: Option<u32>,
    default_targets: Targets,
}

impl StateEngine {
    /// Create an engine over `store` that publishes on `bus`, using the
    /// system clock and default settings.
    pub fn new(store: Arc<dyn KeyValueStore>, bus: StateBus) -> Self {
        Self {
            store,
            bus,
            clock: Arc::new(SystemClock),
            history_retention_days: None,
            default_targets: Targets::default(),
        }
    }

    /// Replace the clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Take retention and default targets from `config`.
    #[must_use]
    pub fn with_config(mut self, config: &EngineConfig) -> Self {
        self.history_retention_days = config.history_retention_days;
        self.default_targets = config.default_targets;
        self
    }

    /// Open the SQLite store named by `config` and build an engine on it.
    pub async fn from_config(config: &EngineConfig) -> EngineResult<Self> {
        let store = SqliteStore::open(&config.database_path).await?;
        info!(path = %config.database_path.display(), "state engine opened");
        Ok(Self::new(Arc::new(store), StateBus::new(config.bus_capacity)).with_config(config))
    }

    /// The bus this engine publishes on.
    pub fn bus(&self) -> &StateBus {
        &self.bus
    }

    pub(crate) fn store(&self) -> &dyn KeyValueStore {
        self.store.as_ref()
    }

    pub(crate) fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    fn defaults(&self) -> State {
        State::with_targets(self.clock.today(), self.default_targets)
    }

    // ── load / store ─────────────────────────────────────────────────

    /// Read the core document without rolling over. The flag tells whether
    /// the stored document differs from what was returned.
    async fn load(&self) -> EngineResult<(State, bool)> {
        schema::migrate_legacy(self.store()).await?;

        match self.store.get(CORE_KEY).await? {
            None => {
                debug!("no stored state, seeding defaults");
                Ok((self.defaults(), true))
            }
            Some(mut raw) => {
                let repaired = !raw.is_object();
                let migrated = schema::upgrade(&mut raw);
                Ok((State::from_persisted(raw, self.defaults()), repaired || migrated))
            }
        }
    }

    /// Roll over to today and apply the retention window.
    fn bring_current(&self, state: &mut State) -> bool {
        let today = self.clock.today();
        let rolled = rollover_if_needed(state, today);
        let pruned = self
            .history_retention_days
            .is_some_and(|days| prune_history(&mut state.history, today, days) > 0);
        rolled || pruned
    }

    /// Load, bring current, apply `mutate`, store.
    async fn update<F>(&self, mutate: F) -> EngineResult<State>
    where
        F: FnOnce(&mut State) + Send,
    {
        let (mut state, _) = self.load().await?;
        self.bring_current(&mut state);
        mutate(&mut state);
        self.set_state(state.clone()).await?;
        Ok(state)
    }

    /// The current state, rolled over to today.
    ///
    /// Writes back (and broadcasts) only when the stored document was absent,
    /// migrated, repaired or rolled over.
    #[instrument(skip(self))]
    pub async fn get_state(&self) -> EngineResult<State> {
        let (mut state, mut dirty) = self.load().await?;
        dirty |= self.bring_current(&mut state);
        if dirty {
            self.set_state(state.clone()).await?;
        }
        Ok(state)
    }

    /// Persist `state` as-is, then broadcast it. Invariants are not checked.
    #[instrument(skip_all)]
    pub async fn set_state(&self, state: State) -> EngineResult<()> {
        let mut doc = serde_json::to_value(&state)?;
        if let Value::Object(map) = &mut doc {
            map.insert(
                SCHEMA_VERSION_FIELD.to_string(),
                Value::from(CURRENT_SCHEMA_VERSION),
            );
        }
        self.store.set(CORE_KEY, doc).await?;
        self.bus.publish(Notification::StateChanged { state });
        Ok(())
    }

    /// Load and write back, so back-filled fields reach the store. Called on
    /// install and startup.
    pub async fn ensure_initialized(&self) -> EngineResult<State> {
        let state = self.get_state().await?;
        self.set_state(state.clone()).await?;
        Ok(state)
    }

    /// Discard the core state and start over for today. The reply log is
    /// kept.
    #[instrument(skip(self))]
    pub async fn reinitialize(&self) -> EngineResult<State> {
        let state = self.defaults();
        self.set_state(state.clone()).await?;
        info!("state reinitialized");
        Ok(state)
    }

    /// State and reply log together.
    pub async fn get_app_snapshot(&self) -> EngineResult<AppSnapshot> {
        let state = self.get_state().await?;
        let stored_replies = self.get_stored_replies().await?;
        Ok(AppSnapshot {
            state,
            stored_replies,
        })
    }

    // ── counters ─────────────────────────────────────────────────────

    /// Count one tweet or reply for today.
    #[instrument(skip(self))]
    pub async fn increment(&self, kind: CounterKind) -> EngineResult<DailyCounts> {
        let state = self
            .update(|state| {
                let counter = match kind {
                    CounterKind::Tweet => &mut state.daily.tweets,
                    CounterKind::Reply => &mut state.daily.replies,
                };
                *counter = counter.saturating_add(1);
            })
            .await?;
        debug!(
            tweets = state.daily.tweets,
            replies = state.daily.replies,
            "counter incremented"
        );
        Ok(state.daily)
    }

    /// Add active time to today.
    #[instrument(skip(self))]
    pub async fn add_seconds(&self, seconds: u64) -> EngineResult<DailyCounts> {
        let state = self
            .update(|state| state.daily.seconds = state.daily.seconds.saturating_add(seconds))
            .await?;
        Ok(state.daily)
    }

    /// Zero the counters for `date` (today when `None`).
    ///
    /// When the stored bucket is for another date it is archived first;
    /// resetting the stored date itself never touches history.
    ///
    /// A `date` other than today only holds until the next read, which rolls
    /// the bucket to today and resumes any counters archived for it.
    #[instrument(skip(self))]
    pub async fn reset_for_date(&self, date: Option<NaiveDate>) -> EngineResult<State> {
        let target = date.unwrap_or_else(|| self.clock.today());
        let (mut state, _) = self.load().await?;
        if rollover_if_needed(&mut state, target) {
            debug!(%target, "archived before reset");
        }
        state.daily.clear();
        self.set_state(state.clone()).await?;
        Ok(state)
    }

    /// Milliseconds until the next local midnight, for arming a timer.
    pub fn millis_until_next_local_midnight(&self) -> i64 {
        self.clock.millis_until_next_midnight()
    }

    // ── settings ─────────────────────────────────────────────────────

    /// Both targets must be greater than zero.
    pub async fn set_targets(&self, targets: Targets) -> EngineResult<()> {
        if targets.tweets == 0 {
            return Err(EngineError::InvalidTarget { field: "tweets" });
        }
        if targets.replies == 0 {
            return Err(EngineError::InvalidTarget { field: "replies" });
        }
        self.update(|state| state.targets = targets).await?;
        Ok(())
    }

    pub async fn set_provider(&self, provider: Provider) -> EngineResult<()> {
        self.update(|state| state.provider = provider).await?;
        Ok(())
    }

    pub async fn set_open_router_api_key(&self, key: Option<String>) -> EngineResult<()> {
        self.update(|state| state.open_router_api_key = key).await?;
        Ok(())
    }

    pub async fn set_open_router_model(&self, model: Option<String>) -> EngineResult<()> {
        self.update(|state| state.open_router_model = model).await?;
        Ok(())
    }

    pub async fn set_google_api_key(&self, key: Option<String>) -> EngineResult<()> {
        self.update(|state| state.google_api_key = key).await?;
        Ok(())
    }

    pub async fn set_google_model(&self, model: Option<String>) -> EngineResult<()> {
        self.update(|state| state.google_model = model).await?;
        Ok(())
    }

    pub async fn set_use_image_understanding(&self, enabled: bool) -> EngineResult<()> {
        self.update(|state| state.use_image_understanding = enabled)
            .await?;
        Ok(())
    }

    pub async fn set_memory_api_key(&self, key: Option<String>) -> EngineResult<()> {
        self.update(|state| state.memory_api_key = key).await?;
        Ok(())
    }

    pub async fn set_memory_project_id(&self, project_id: Option<String>) -> EngineResult<()> {
        self.update(|state| state.memory_project_id = project_id)
            .await?;
        Ok(())
    }

    pub async fn set_use_memory(&self, enabled: bool) -> EngineResult<()> {
        self.update(|state| state.use_memory = enabled).await?;
        Ok(())
    }

    pub async fn set_selected_prompt_id(&self, prompt_id: Option<String>) -> EngineResult<()> {
        self.update(|state| state.selected_prompt_id = prompt_id)
            .await?;
        Ok(())
    }

    /// Also publishes `hotkeyChanged` with the effective hotkey, so content
    /// contexts can rebind without a reload.
    pub async fn set_prompt_cycle_hotkey(&self, hotkey: Option<String>) -> EngineResult<()> {
        let state = self
            .update(|state| state.prompt_cycle_hotkey = hotkey)
            .await?;
        self.bus.publish(Notification::HotkeyChanged {
            hotkey: state.prompt_cycle_hotkey().to_string(),
        });
        Ok(())
    }

    pub async fn set_capture_replies(&self, enabled: bool) -> EngineResult<()> {
        self.update(|state| state.capture_replies = enabled).await?;
        Ok(())
    }

    pub async fn set_inject_in_system_prompts(&self, enabled: bool) -> EngineResult<()> {
        self.update(|state| state.inject_in_system_prompts = enabled)
            .await?;
        Ok(())
    }

    /// Dispatch a [`SettingUpdate`] to its setter.
    #[instrument(skip_all, fields(setting = update.name()))]
    pub async fn apply_setting(&self, update: SettingUpdate) -> EngineResult<()> {
        match update {
            SettingUpdate::Targets(v) => self.set_targets(v).await,
            SettingUpdate::Provider(v) => self.set_provider(v).await,
            SettingUpdate::OpenRouterApiKey(v) => self.set_open_router_api_key(v).await,
            SettingUpdate::OpenRouterModel(v) => self.set_open_router_model(v).await,
            SettingUpdate::GoogleApiKey(v) => self.set_google_api_key(v).await,
            SettingUpdate::GoogleModel(v) => self.set_google_model(v).await,
            SettingUpdate::UseImageUnderstanding(v) => self.set_use_image_understanding(v).await,
            SettingUpdate::MemoryApiKey(v) => self.set_memory_api_key(v).await,
            SettingUpdate::MemoryProjectId(v) => self.set_memory_project_id(v).await,
            SettingUpdate::UseMemory(v) => self.set_use_memory(v).await,
            SettingUpdate::SelectedPromptId(v) => self.set_selected_prompt_id(v).await,
            SettingUpdate::PromptCycleHotkey(v) => self.set_prompt_cycle_hotkey(v).await,
            SettingUpdate::CaptureReplies(v) => self.set_capture_replies(v).await,
            SettingUpdate::InjectInSystemPrompts(v) => self.set_inject_in_system_prompts(v).await,
        }
    }
}

// ── tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tweetpulse_store::MemoryStore;

    use super::*;
    use crate::clock::FixedClock;

    fn date(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    fn setup(day: &str) -> (StateEngine, Arc<MemoryStore>, Arc<FixedClock>) {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(FixedClock::on(date(day)));
        let engine = StateEngine::new(store.clone(), StateBus::new(16)).with_clock(clock.clone());
        (engine, store, clock)
    }

    #[tokio::test]
    async fn first_access_persists_defaults() {
        let (engine, store, _) = setup("2024-01-02");
        let mut rx = engine.bus().subscribe();

        let state = engine.get_state().await.unwrap();

        assert_eq!(state, State::new(date("2024-01-02")));
        let stored = store.get(CORE_KEY).await.unwrap().unwrap();
        assert_eq!(stored["schemaVersion"], CURRENT_SCHEMA_VERSION);
        assert!(matches!(
            rx.try_recv().unwrap().as_ref(),
            Notification::StateChanged { .. }
        ));
    }

    #[tokio::test]
    async fn clean_read_does_not_write() {
        let (engine, _, _) = setup("2024-01-02");
        engine.get_state().await.unwrap();

        let mut rx = engine.bus().subscribe();
        engine.get_state().await.unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn corrupt_document_is_replaced_by_defaults() {
        let (engine, store, _) = setup("2024-01-02");
        store.set(CORE_KEY, json!("corrupt")).await.unwrap();

        let state = engine.get_state().await.unwrap();

        assert_eq!(state, State::new(date("2024-01-02")));
        assert!(store.get(CORE_KEY).await.unwrap().unwrap().is_object());
    }

    #[tokio::test]
    async fn configured_defaults_seed_fresh_state() {
        let (engine, _, _) = setup("2024-01-02");
        let config = EngineConfig {
            default_targets: Targets {
                tweets: 2,
                replies: 20,
            },
            ..EngineConfig::default()
        };
        let engine = engine.with_config(&config);

        let state = engine.get_state().await.unwrap();
        assert_eq!(state.targets, Targets { tweets: 2, replies: 20 });
    }

    #[tokio::test]
    async fn increments_count_per_kind() {
        let (engine, _, _) = setup("2024-01-02");
        engine.increment(CounterKind::Tweet).await.unwrap();
        engine.increment(CounterKind::Reply).await.unwrap();
        let daily = engine.increment(CounterKind::Reply).await.unwrap();

        assert_eq!(daily.tweets, 1);
        assert_eq!(daily.replies, 2);
        assert_eq!(engine.get_state().await.unwrap().daily, daily);
    }

    #[tokio::test]
    async fn increment_after_midnight_lands_in_new_day() {
        let (engine, _, clock) = setup("2024-01-02");
        engine.increment(CounterKind::Tweet).await.unwrap();

        clock.set_date(date("2024-01-03"));
        let daily = engine.increment(CounterKind::Tweet).await.unwrap();

        assert_eq!(daily.date, date("2024-01-03"));
        assert_eq!(daily.tweets, 1);
        let state = engine.get_state().await.unwrap();
        assert_eq!(state.history[&date("2024-01-02")].tweets, 1);
    }

    #[tokio::test]
    async fn add_seconds_accumulates_and_saturates() {
        let (engine, _, _) = setup("2024-01-02");
        engine.add_seconds(30).await.unwrap();
        assert_eq!(engine.add_seconds(15).await.unwrap().seconds, 45);
        assert_eq!(engine.add_seconds(u64::MAX).await.unwrap().seconds, u64::MAX);
    }

    #[tokio::test]
    async fn reset_defaults_to_today() {
        let (engine, _, _) = setup("2024-01-02");
        engine.increment(CounterKind::Reply).await.unwrap();

        let state = engine.reset_for_date(None).await.unwrap();

        assert_eq!(state.daily, DailyCounts::empty(date("2024-01-02")));
        assert!(state.history.is_empty());
    }

    #[tokio::test]
    async fn zero_targets_are_rejected() {
        let (engine, _, _) = setup("2024-01-02");
        let err = engine
            .set_targets(Targets {
                tweets: 0,
                replies: 3,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidTarget { field: "tweets" }));
        assert_eq!(engine.get_state().await.unwrap().targets, Targets::default());
    }

    #[tokio::test]
    async fn setters_change_exactly_one_field() {
        let (engine, _, _) = setup("2024-01-02");
        let before = engine.get_state().await.unwrap();

        engine.set_use_memory(true).await.unwrap();

        let after = engine.get_state().await.unwrap();
        assert!(after.use_memory);
        assert_eq!(State { use_memory: false, ..after }, before);
    }

    #[tokio::test]
    async fn apply_setting_dispatches() {
        let (engine, _, _) = setup("2024-01-02");
        let update: SettingUpdate =
            serde_json::from_value(json!({ "setting": "googleModel", "value": "gemini" })).unwrap();
        engine.apply_setting(update).await.unwrap();
        engine
            .apply_setting(SettingUpdate::Provider(Provider::Google))
            .await
            .unwrap();

        let state = engine.get_state().await.unwrap();
        assert_eq!(state.active_model(), Some("gemini"));
    }

    #[test]
    fn setting_names_match_wire_tag_and_hide_values() {
        let updates = [
            SettingUpdate::OpenRouterApiKey(Some("sk-or-secret".into())),
            SettingUpdate::GoogleApiKey(Some("g-secret".into())),
            SettingUpdate::MemoryApiKey(Some("m-secret".into())),
            SettingUpdate::UseMemory(true),
            SettingUpdate::InjectInSystemPrompts(false),
        ];
        for update in updates {
            let wire = serde_json::to_value(&update).unwrap();
            assert_eq!(wire["setting"], update.name());
            assert!(!update.name().contains("secret"));
        }
    }

    #[tokio::test]
    async fn hotkey_change_is_broadcast() {
        let (engine, _, _) = setup("2024-01-02");
        engine.get_state().await.unwrap();
        let mut rx = engine.bus().subscribe();

        engine
            .set_prompt_cycle_hotkey(Some("ctrl+k".into()))
            .await
            .unwrap();
        engine.set_prompt_cycle_hotkey(None).await.unwrap();

        let mut hotkeys = Vec::new();
        while let Ok(n) = rx.try_recv() {
            if let Notification::HotkeyChanged { hotkey } = n.as_ref() {
                hotkeys.push(hotkey.clone());
            }
        }
        assert_eq!(hotkeys, ["ctrl+k", "alt+s"]);
    }

    #[tokio::test]
    async fn reinitialize_keeps_reply_log() {
        let (engine, _, _) = setup("2024-01-02");
        engine.set_use_memory(true).await.unwrap();
        engine
            .capture_reply(
                crate::replies::TweetRef {
                    author_handle: "@a".into(),
                    text: "t".into(),
                },
                "hi".into(),
                None,
                None,
            )
            .await
            .unwrap();

        let state = engine.reinitialize().await.unwrap();

        assert!(!state.use_memory);
        assert_eq!(engine.get_stored_replies().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unavailable_store_surfaces_error() {
        let (engine, store, _) = setup("2024-01-02");
        store.set_offline(true);

        let err = engine.increment(CounterKind::Tweet).await.unwrap_err();
        assert!(err.is_storage_unavailable());
    }

    #[tokio::test]
    async fn midnight_delay_comes_from_clock() {
        let (engine, _, _) = setup("2024-01-02");
        assert_eq!(engine.millis_until_next_local_midnight(), 12 * 3_600_000);
    }
}
