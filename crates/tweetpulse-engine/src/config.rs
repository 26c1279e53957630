//! Engine configuration.
//!
//! Read from the `[engine]` table of a TOML file (by convention
//! `config/default.toml` at the workspace root). A missing file or missing table means defaults;
//! a file that exists but does not parse is an error.
//!
//! ```toml
//! [engine]
//! database_path = "data/tweetpulse.db"
//! bus_capacity = 64
//! service_queue = 64
//! history_retention_days = 365
//!
//! [engine.default_targets]
//! tweets = 5
//! replies = 50
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{EngineError, EngineResult};
use crate::state::Targets;

/// Settings for [`StateEngine`](crate::StateEngine) and its service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// SQLite file backing the key-value store.
    pub database_path: PathBuf,
    /// Capacity of the change notification channel.
    pub bus_capacity: usize,
    /// Capacity of the state service command queue, used by
    /// [`StateService::from_config`](crate::StateService::from_config).
    pub service_queue: usize,
    /// Archived days older than this are pruned on rollover. Unset keeps
    /// history forever.
    pub history_retention_days: Option<u32>,
    /// Targets seeded into a fresh state.
    pub default_targets: Targets,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("data/tweetpulse.db"),
            bus_capacity: 64,
            service_queue: 64,
            history_retention_days: None,
            default_targets: Targets::default(),
        }
    }
}

#[derive(Deserialize)]
struct ConfigFile {
    #[serde(default)]
    engine: Option<EngineConfig>,
}

impl EngineConfig {
    /// Load the `[engine]` table from `path`.
    pub fn load(path: impl AsRef<Path>) -> EngineResult<Self> {
        let path = path.as_ref();
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no config file, using defaults");
                return Ok(Self::default());
            }
            Err(err) => {
                return Err(EngineError::Config(format!(
                    "cannot read {}: {err}",
                    path.display()
                )));
            }
        };
        Self::from_toml_str(&content)
    }

    /// Parse a TOML document.
    pub fn from_toml_str(content: &str) -> EngineResult<Self> {
        let file: ConfigFile =
            toml::from_str(content).map_err(|e| EngineError::Config(e.to_string()))?;
        let config = file.engine.unwrap_or_default();
        config.validate()?;
        Ok(config)
    }

    /// Like [`load`](Self::load) but falls back to defaults on any error.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        Self::load(path).unwrap_or_else(|err| {
            warn!(%err, "invalid engine configuration, using defaults");
            Self::default()
        })
    }

    fn validate(&self) -> EngineResult<()> {
        if !self.default_targets.is_valid() {
            return Err(EngineError::Config(
                "default_targets must be greater than zero".into(),
            ));
        }
        if self.bus_capacity == 0 || self.service_queue == 0 {
            return Err(EngineError::Config(
                "bus_capacity and service_queue must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}
