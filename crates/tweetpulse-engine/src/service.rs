//! Single-writer state service.
//!
//! ```text
//!   StateHandle ──┐
//!   StateHandle ──┼──→ mpsc::Sender<Command> ──→ service task ──→ StateEngine
//!   StateHandle ──┘         (bounded)              (one at a time)
//!        ↑                                              │
//!        └──────────────── oneshot reply ───────────────┘
//! ```
//!
//! The engine's load-mutate-store round trips are not atomic against each
//! other. Moving the engine into one task and funnelling every request
//! through a channel removes lost updates between callers in the same
//! process. The task exits once every [`StateHandle`] is dropped.

use chrono::NaiveDate;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use crate::bus::StateBus;
use crate::config::EngineConfig;
use crate::engine::{SettingUpdate, StateEngine};
use crate::error::{EngineError, EngineResult};
use crate::replies::{StoredReply, TweetRef};
use crate::state::{AppSnapshot, CounterKind, DailyCounts, State};

type Responder<T> = oneshot::Sender<EngineResult<T>>;

/// Requests handled by the service task.
enum Command {
    GetState(Responder<State>),
    GetSnapshot(Responder<AppSnapshot>),
    Increment(CounterKind, Responder<DailyCounts>),
    AddSeconds(u64, Responder<DailyCounts>),
    ResetForDate(Option<NaiveDate>, Responder<State>),
    Apply(SettingUpdate, Responder<()>),
    CaptureReply {
        original_tweet: TweetRef,
        reply: String,
        ai_generated: Option<String>,
        prompt_id: Option<String>,
        respond: Responder<Option<StoredReply>>,
    },
    GetStoredReplies(Responder<Vec<StoredReply>>),
    DeleteStoredReply(String, Responder<bool>),
    ImportStoredReplies(String, Responder<usize>),
    Reinitialize(Responder<State>),
}

/// Owns a [`StateEngine`] on a background task.
pub struct StateService;

impl StateService {
    /// Move `engine` onto a new task and return a handle to it. `queue` is the
    /// command channel capacity.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(engine: StateEngine, queue: usize) -> StateHandle {
        let (tx, rx) = mpsc::channel(queue.max(1));
        let bus = engine.bus().clone();
        tokio::spawn(run(engine, rx));
        info!("state service started");
        StateHandle { tx, bus }
    }

    /// [`spawn`](Self::spawn) with the queue size from `config`.
    pub fn from_config(engine: StateEngine, config: &EngineConfig) -> StateHandle {
        Self::spawn(engine, config.service_queue)
    }

    /// Open the engine described by `config` and spawn it.
    pub async fn start(config: &EngineConfig) -> EngineResult<StateHandle> {
        let engine = StateEngine::from_config(config).await?;
        Ok(Self::from_config(engine, config))
    }
}

async fn run(engine: StateEngine, mut rx: mpsc::Receiver<Command>) {
    while let Some(command) = rx.recv().await {
        handle(&engine, command).await;
    }
    info!("state service stopped");
}

async fn handle(engine: &StateEngine, command: Command) {
    // A dropped reply receiver only means the caller stopped waiting.
    match command {
        Command::GetState(respond) => {
            let _ = respond.send(engine.get_state().await);
        }
        Command::GetSnapshot(respond) => {
            let _ = respond.send(engine.get_app_snapshot().await);
        }
        Command::Increment(kind, respond) => {
            let _ = respond.send(engine.increment(kind).await);
        }
        Command::AddSeconds(seconds, respond) => {
            let _ = respond.send(engine.add_seconds(seconds).await);
        }
        Command::ResetForDate(date, respond) => {
            let _ = respond.send(engine.reset_for_date(date).await);
        }
        Command::Apply(update, respond) => {
            let _ = respond.send(engine.apply_setting(update).await);
        }
        Command::CaptureReply {
            original_tweet,
            reply,
            ai_generated,
            prompt_id,
            respond,
        } => {
            let result = engine
                .capture_reply(original_tweet, reply, ai_generated, prompt_id)
                .await;
            let _ = respond.send(result);
        }
        Command::GetStoredReplies(respond) => {
            let _ = respond.send(engine.get_stored_replies().await);
        }
        Command::DeleteStoredReply(id, respond) => {
            let _ = respond.send(engine.delete_stored_reply(&id).await);
        }
        Command::ImportStoredReplies(json, respond) => {
            let _ = respond.send(engine.import_stored_replies(&json).await);
        }
        Command::Reinitialize(respond) => {
            let _ = respond.send(engine.reinitialize().await);
        }
    }
}

/// Cloneable client for a running [`StateService`].
#[derive(Clone)]
pub struct StateHandle {
    tx: mpsc::Sender<Command>,
    bus: StateBus,
}

impl StateHandle {
    async fn request<T>(&self, make: impl FnOnce(Responder<T>) -> Command) -> EngineResult<T> {
        let (respond, response) = oneshot::channel();
        self.tx
            .send(make(respond))
            .await
            .map_err(|_| EngineError::ServiceClosed)?;
        response.await.map_err(|_| EngineError::ServiceClosed)?
    }

    /// The bus the service's engine publishes on.
    pub fn bus(&self) -> &StateBus {
        &self.bus
    }

    /// Whether the service task is still accepting requests.
    pub fn is_running(&self) -> bool {
        !self.tx.is_closed()
    }

    pub async fn get_state(&self) -> EngineResult<State> {
        self.request(Command::GetState).await
    }

    pub async fn get_app_snapshot(&self) -> EngineResult<AppSnapshot> {
        self.request(Command::GetSnapshot).await
    }

    pub async fn increment(&self, kind: CounterKind) -> EngineResult<DailyCounts> {
        self.request(|r| Command::Increment(kind, r)).await
    }

    pub async fn add_seconds(&self, seconds: u64) -> EngineResult<DailyCounts> {
        self.request(|r| Command::AddSeconds(seconds, r)).await
    }

    pub async fn reset_for_date(&self, date: Option<NaiveDate>) -> EngineResult<State> {
        self.request(|r| Command::ResetForDate(date, r)).await
    }

    pub async fn apply_setting(&self, update: SettingUpdate) -> EngineResult<()> {
        debug!(setting = update.name(), "setting change requested");
        self.request(|r| Command::Apply(update, r)).await
    }

    pub async fn capture_reply(
        &self,
        original_tweet: TweetRef,
        reply: String,
        ai_generated: Option<String>,
        prompt_id: Option<String>,
    ) -> EngineResult<Option<StoredReply>> {
        self.request(|respond| Command::CaptureReply {
            original_tweet,
            reply,
            ai_generated,
            prompt_id,
            respond,
        })
        .await
    }

    pub async fn get_stored_replies(&self) -> EngineResult<Vec<StoredReply>> {
        self.request(Command::GetStoredReplies).await
    }

    pub async fn delete_stored_reply(&self, id: impl Into<String>) -> EngineResult<bool> {
        let id = id.into();
        self.request(|r| Command::DeleteStoredReply(id, r)).await
    }

    pub async fn import_stored_replies(&self, json: impl Into<String>) -> EngineResult<usize> {
        let json = json.into();
        self.request(|r| Command::ImportStoredReplies(json, r)).await
    }

    pub async fn reinitialize(&self) -> EngineResult<State> {
        self.request(Command::Reinitialize).await
    }
}

// ── tests ────────────────────────────────────────────────────────────
