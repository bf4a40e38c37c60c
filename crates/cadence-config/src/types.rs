//! Configuration types mapping to the TOML schema.
//!
//! ```toml
//! [store]          # entity store location
//! [scheduler]      # timer dispatcher settings
//! [runner]         # code runner settings
//! [logging]        # log file location and level
//! ```

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{ConfigError, Result};

// ─────────────────────────────────────────────────────────────────────────────
// Top-level Config
// ─────────────────────────────────────────────────────────────────────────────

/// Root configuration structure.
///
/// All sections are optional so that partial configs (e.g., project-local
/// overrides) can be loaded and merged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CadenceConfig {
    /// Entity store configuration.
    pub store: Option<StoreSection>,

    /// Timer dispatcher configuration.
    pub scheduler: Option<SchedulerSection>,

    /// Code runner configuration.
    pub runner: Option<RunnerSection>,

    /// Log output configuration.
    pub logging: Option<LoggingSection>,
}

impl CadenceConfig {
    /// Create an empty config.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        Ok(toml::from_str(toml_str)?)
    }

    /// Serialize to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Merge another config on top of this one (other takes priority).
    pub fn merge(&mut self, other: CadenceConfig) {
        if other.store.is_some() {
            self.store = other.store;
        }
        if other.scheduler.is_some() {
            self.scheduler = other.scheduler;
        }
        if other.runner.is_some() {
            self.runner = other.runner;
        }
        if other.logging.is_some() {
            self.logging = other.logging;
        }
    }

    /// Effective store section (defaults when absent).
    pub fn store(&self) -> StoreSection {
        self.store.clone().unwrap_or_default()
    }

    /// Effective scheduler section (defaults when absent).
    pub fn scheduler(&self) -> SchedulerSection {
        self.scheduler.clone().unwrap_or_default()
    }

    /// Effective runner section (defaults when absent).
    pub fn runner(&self) -> RunnerSection {
        self.runner.clone().unwrap_or_default()
    }

    /// Effective logging section (defaults when absent).
    pub fn logging(&self) -> LoggingSection {
        self.logging.clone().unwrap_or_default()
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        let scheduler = self.scheduler();
        positive("scheduler.tick_interval_secs", scheduler.tick_interval_secs)?;
        positive("scheduler.async_timeout_secs", scheduler.async_timeout_secs)?;
        positive("runner.sync_timeout_secs", self.runner().sync_timeout_secs)?;
        Ok(())
    }
}

fn positive(field: &'static str, secs: u64) -> Result<()> {
    if secs == 0 {
        return Err(ConfigError::InvalidValue {
            field,
            reason: "must be at least 1 second".to_string(),
        });
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Store
// ─────────────────────────────────────────────────────────────────────────────

/// Entity store configuration.
///
/// ```toml
/// [store]
/// db_path = "/var/lib/cadence/cadence.db"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSection {
    /// Path to the SQLite database. Defaults to `<data dir>/cadence.db`.
    pub db_path: Option<PathBuf>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Scheduler
// ─────────────────────────────────────────────────────────────────────────────

/// Default seconds between dispatcher ticks.
pub const DEFAULT_TICK_INTERVAL_SECS: u64 = 5;

/// Default seconds an async step may wait for its completion.
pub const DEFAULT_ASYNC_TIMEOUT_SECS: u64 = 3600;

/// Timer dispatcher configuration.
///
/// ```toml
/// [scheduler]
/// tick_interval_secs = 5
/// async_timeout_secs = 3600
/// autostart = true
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSection {
    /// Seconds between dispatcher ticks.
    pub tick_interval_secs: u64,
    /// Maximum wait for an async completion before it is failed with a timeout.
    pub async_timeout_secs: u64,
    /// Start the dispatcher when the task manager initializes.
    pub autostart: bool,
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            tick_interval_secs: DEFAULT_TICK_INTERVAL_SECS,
            async_timeout_secs: DEFAULT_ASYNC_TIMEOUT_SECS,
            autostart: true,
        }
    }
}

impl SchedulerSection {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }

    pub fn async_timeout(&self) -> Duration {
        Duration::from_secs(self.async_timeout_secs)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Runner
// ─────────────────────────────────────────────────────────────────────────────

/// Default execution budget for synchronous calls.
pub const DEFAULT_SYNC_TIMEOUT_SECS: u64 = 30;

/// Code runner configuration.
///
/// ```toml
/// [runner]
/// shell = "/bin/sh"
/// sync_timeout_secs = 30
/// working_dir = "/srv/cadence"
///
/// [runner.env]
/// RUST_LOG = "info"
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerSection {
    /// Shell used to run codex payloads. Defaults to `$SHELL`, then `/bin/sh`.
    pub shell: Option<String>,
    /// Budget for a synchronous invocation.
    pub sync_timeout_secs: u64,
    /// Working directory for payload processes.
    pub working_dir: Option<PathBuf>,
    /// Extra environment variables passed to payload processes.
    pub env: BTreeMap<String, String>,
}

impl Default for RunnerSection {
    fn default() -> Self {
        Self {
            shell: None,
            sync_timeout_secs: DEFAULT_SYNC_TIMEOUT_SECS,
            working_dir: None,
            env: BTreeMap::new(),
        }
    }
}

impl RunnerSection {
    pub fn sync_timeout(&self) -> Duration {
        Duration::from_secs(self.sync_timeout_secs)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Logging
// ─────────────────────────────────────────────────────────────────────────────

/// Log output configuration.
///
/// ```toml
/// [logging]
/// dir = "/var/log/cadence"
/// level = "info"
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Directory for the rolling JSON log file. Defaults to `<config dir>/logs`.
    pub dir: Option<PathBuf>,
    /// Console filter directive used when `-v` is not given.
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            dir: None,
            level: "info".to_string(),
        }
    }
}
