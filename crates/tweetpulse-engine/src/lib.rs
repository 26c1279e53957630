//! TweetPulse daily state engine.
//!
//! This crate owns the persisted state of the extension and every rule about
//! how it changes:
//!
//! - **[`engine`]** -- [`StateEngine`]: counters, settings and lazy rollover
//!   over a [`KeyValueStore`](tweetpulse_store::KeyValueStore).
//! - **[`rollover`]** -- Pure day rollover and history retention.
//! - **[`schema`]** -- Legacy key split and the versioned migration chain.
//! - **[`replies`]** -- Stored reply log with capture classification and
//!   all-or-nothing import.
//! - **[`bus`]** -- Best-effort change notifications over
//!   [`tokio::sync::broadcast`].
//! - **[`service`]** -- Single-writer task that serializes all requests.
//! - **[`clock`]** -- Local calendar time, injectable for tests.
//! - **[`config`]** -- `[engine]` table of the TOML configuration.
//! - **[`error`]** -- Unified engine error types via [`thiserror`].
//!
//! The library logs through [`tracing`] and never installs a subscriber.

pub mod bus;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod replies;
pub mod rollover;
pub mod schema;
pub mod service;
pub mod state;

// Re-export the most commonly used types at the crate root for convenience.
pub use bus::{Notification, StateBus};
pub use clock::{Clock, FixedClock, SystemClock};
pub use config::EngineConfig;
pub use engine::{SettingUpdate, StateEngine};
pub use error::{EngineError, EngineResult};
pub use replies::{ReplyKind, StoredReply, TweetRef};
pub use rollover::rollover_if_needed;
pub use schema::CURRENT_SCHEMA_VERSION;
pub use service::{StateHandle, StateService};
pub use state::{
    AppSnapshot, CounterKind, DailyCounts, DaySnapshot, HistoryMap, Provider, State, Targets,
};
