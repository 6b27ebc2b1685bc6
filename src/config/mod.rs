//! Configuration for harmonic-bus.
//!
//! A single [`BusConfig`] covers the runtime loop, scheduler tuning, the event
//! log, persistence and log output. Every field has a default, so a config
//! file only needs the values it changes.
//!
//! # App Data Location
//!
//! - **Linux**: `~/.local/share/dev.harmonic-bus/`
//! - **macOS**: `~/Library/Application Support/dev.harmonic-bus/`
//! - **Windows**: `%APPDATA%\dev.harmonic-bus\`
//!
//! # Files
//!
//! - `config.toml` - default config location for the binary
//! - `store/` - default [`FileStore`](crate::store::FileStore) directory
//!
//! # Example
//!
//! ```toml
//! name = "assistant"
//!
//! [runtime]
//! idle_interval_ms = 5
//! tick_timeout_ms = 2000
//!
//! [scheduler]
//! intent_tags = ["lang"]
//!
//! [scheduler.weights]
//! demand = 0.6
//!
//! [persistence]
//! debounce_ms = 100
//! ```

use crate::bus::scheduler::{
    Scheduler, Weights, DEFAULT_DEMAND_SCALE, DEFAULT_FRESHNESS_HORIZON_SECS,
};
use crate::error::{BusError, Result};
use crate::store::DEFAULT_NAMESPACE;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application identifier for data directories
pub const APP_ID: &str = "dev.harmonic-bus";

/// Default config filename inside the app data directory
pub const CONFIG_FILE: &str = "config.toml";

/// Default store directory name inside the app data directory
pub const STORE_DIR: &str = "store";

/// Get the application data directory path
pub fn app_data_dir() -> Option<PathBuf> {
    dirs_next::data_dir().map(|p| p.join(APP_ID))
}

/// Ensure the app data directory exists
pub fn ensure_app_data_dir() -> Result<PathBuf> {
    let dir = app_data_dir().ok_or_else(|| {
        BusError::Config("Could not determine app data directory".to_string())
    })?;

    if !dir.exists() {
        std::fs::create_dir_all(&dir).map_err(|e| {
            BusError::Config(format!("Failed to create app data directory: {}", e))
        })?;
    }

    Ok(dir)
}

/// Get the path to the default config file
pub fn default_config_path() -> Option<PathBuf> {
    app_data_dir().map(|p| p.join(CONFIG_FILE))
}

/// Run loop timing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Pause between consecutive ticks while work is available. 0 = none.
    pub tick_interval_ms: u64,
    /// First idle wait when no node is ready.
    pub idle_interval_ms: u64,
    /// Idle waits double up to this ceiling.
    pub max_idle_interval_ms: u64,
    /// Per-tick deadline. A tick that overruns counts as an error.
    pub tick_timeout_ms: Option<u64>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 0,
            idle_interval_ms: 10,
            max_idle_interval_ms: 250,
            tick_timeout_ms: None,
        }
    }
}

impl RuntimeConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn idle_interval(&self) -> Duration {
        Duration::from_millis(self.idle_interval_ms.max(1))
    }

    pub fn max_idle_interval(&self) -> Duration {
        Duration::from_millis(self.max_idle_interval_ms.max(self.idle_interval_ms).max(1))
    }

    pub fn tick_timeout(&self) -> Option<Duration> {
        self.tick_timeout_ms.map(Duration::from_millis)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Queue length at which demand reaches ~0.76.
    pub demand_scale: f64,
    pub freshness_horizon_secs: f64,
    /// Initial intent tags.
    pub intent_tags: Vec<String>,
    pub weights: Weights,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            demand_scale: DEFAULT_DEMAND_SCALE,
            freshness_horizon_secs: DEFAULT_FRESHNESS_HORIZON_SECS,
            intent_tags: Vec::new(),
            weights: Weights::default(),
        }
    }
}

impl SchedulerConfig {
    pub fn build(&self) -> Scheduler {
        Scheduler::new(self.weights)
            .with_scales(self.demand_scale, self.freshness_horizon_secs)
            .with_intent_tags(self.intent_tags.iter().cloned())
    }
}

/// Event log sizing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Entries kept in memory.
    pub capacity: usize,
    /// Most recent entries included in a snapshot.
    pub snapshot_tail: usize,
    /// Most recent entries written to the durable store.
    pub persist_tail: usize,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            capacity: 1000,
            snapshot_tail: 200,
            persist_tail: 500,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    /// Key prefix in the durable store.
    pub namespace: String,
    /// Store directory. Defaults to `<app data>/store`.
    pub directory: Option<PathBuf>,
    /// Writes are coalesced within this window.
    pub debounce_ms: u64,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            directory: None,
            debounce_ms: 250,
        }
    }
}

impl PersistenceConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    /// Configured directory, or the app data default.
    pub fn resolve_directory(&self) -> Result<PathBuf> {
        match &self.directory {
            Some(dir) => Ok(dir.clone()),
            None => Ok(ensure_app_data_dir()?.join(STORE_DIR)),
        }
    }
}

/// `tracing` output settings used by the binary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Directory for daily-rolling log files. Console only when unset.
    pub directory: Option<PathBuf>,
    /// `EnvFilter` directive used when `RUST_LOG` is not set.
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: None,
            filter: "info,harmonic_bus=debug".to_string(),
        }
    }
}

/// Complete orchestrator configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Name reported in snapshots.
    pub name: String,
    pub runtime: RuntimeConfig,
    pub scheduler: SchedulerConfig,
    pub log: LogConfig,
    pub persistence: PersistenceConfig,
    pub logging: LoggingConfig,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            name: "harmonic-bus".to_string(),
            runtime: RuntimeConfig::default(),
            scheduler: SchedulerConfig::default(),
            log: LogConfig::default(),
            persistence: PersistenceConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

fn is_json(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("json"))
        .unwrap_or(false)
}

impl BusConfig {
    /// Load from a `.json` file, or TOML for any other extension.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            BusError::Config(format!("Failed to read config {:?}: {}", path, e))
        })?;

        if is_json(path) {
            serde_json::from_str(&content).map_err(|e| {
                BusError::Config(format!("Failed to parse config {:?}: {}", path, e))
            })
        } else {
            toml::from_str(&content).map_err(|e| {
                BusError::Config(format!("Failed to parse config {:?}: {}", path, e))
            })
        }
    }

    /// Load a config file, returning defaults if it is missing or invalid
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        if !path.exists() {
            return Self::default();
        }
        Self::load(path).unwrap_or_else(|e| {
            tracing::warn!("Failed to load config, using defaults: {}", e);
            Self::default()
        })
    }

    /// Save as JSON or TOML, by extension.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                BusError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        let content = if is_json(path) {
            serde_json::to_string_pretty(self)
                .map_err(|e| BusError::Config(format!("Failed to serialize config: {}", e)))?
        } else {
            toml::to_string_pretty(self)
                .map_err(|e| BusError::Config(format!("Failed to serialize config: {}", e)))?
        };

        std::fs::write(path, content).map_err(|e| {
            BusError::Config(format!("Failed to write config {:?}: {}", path, e))
        })
    }
}
