//! Runtime settings.
//!
//! Settings are layered: built-in defaults, then an optional TOML file, then
//! environment variables such as `MESHTOPO__WINDOW__SESSION_GAP_SECONDS=120`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, Environment, File};
use meshtopo_model::{SnapshotCodec, SnapshotPolicy, TopologyConfig};
use serde::Deserialize;

use crate::error::SettingsError;

/// Prefix for environment overrides.
pub const ENV_PREFIX: &str = "MESHTOPO";

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub window: WindowSettings,
    pub topology: TopologySettings,
    pub store: StoreSettings,
    pub ticker: TickerSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct WindowSettings {
    pub session_gap_seconds: u64,
    pub trace_idle_timeout_seconds: u64,
    pub passthrough_buffer: usize,
}

impl Default for WindowSettings {
    fn default() -> Self {
        Self {
            session_gap_seconds: 300,
            trace_idle_timeout_seconds: 60,
            passthrough_buffer: 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TopologySettings {
    /// Operations starting with this are left out of the graph.
    pub ignored_operation_name: Option<String>,
    pub default_runtime: String,
    pub default_namespace: String,
}

impl Default for TopologySettings {
    fn default() -> Self {
        Self {
            ignored_operation_name: None,
            default_runtime: "default".to_string(),
            default_namespace: "default".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyKind {
    #[default]
    Inline,
    Periodic,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    pub path: PathBuf,
    pub codec: SnapshotCodec,
    pub policy: PolicyKind,
    /// Only used by the periodic policy.
    pub interval_seconds: u64,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            path: PathBuf::from("meshtopo-model.json"),
            codec: SnapshotCodec::Json,
            policy: PolicyKind::Inline,
            interval_seconds: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TickerSettings {
    pub interval_millis: u64,
}

impl Default for TickerSettings {
    fn default() -> Self {
        Self {
            interval_millis: 1000,
        }
    }
}

impl Settings {
    /// Load settings from the optional file and the `MESHTOPO` environment.
    pub fn load(path: Option<&Path>) -> Result<Self, SettingsError> {
        Self::load_with_prefix(path, ENV_PREFIX)
    }

    fn load_with_prefix(path: Option<&Path>, prefix: &str) -> Result<Self, SettingsError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path));
        }
        let settings: Settings = builder
            .add_source(
                Environment::with_prefix(prefix)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.window.session_gap_seconds == 0 {
            return Err(invalid("window.session_gap_seconds", "must be greater than zero"));
        }
        if self.window.trace_idle_timeout_seconds == 0 {
            return Err(invalid(
                "window.trace_idle_timeout_seconds",
                "must be greater than zero",
            ));
        }
        if self.window.passthrough_buffer == 0 {
            return Err(invalid("window.passthrough_buffer", "must be greater than zero"));
        }
        if self.topology.default_runtime.is_empty() {
            return Err(invalid("topology.default_runtime", "must not be empty"));
        }
        if self.topology.default_namespace.is_empty() {
            return Err(invalid("topology.default_namespace", "must not be empty"));
        }
        if self.store.policy == PolicyKind::Periodic && self.store.interval_seconds == 0 {
            return Err(invalid(
                "store.interval_seconds",
                "must be greater than zero for the periodic policy",
            ));
        }
        if self.ticker.interval_millis == 0 {
            return Err(invalid("ticker.interval_millis", "must be greater than zero"));
        }
        Ok(())
    }

    pub fn session_gap(&self) -> Duration {
        Duration::from_secs(self.window.session_gap_seconds)
    }

    pub fn trace_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.window.trace_idle_timeout_seconds)
    }

    pub fn ticker_interval(&self) -> Duration {
        Duration::from_millis(self.ticker.interval_millis)
    }

    pub fn topology_config(&self) -> TopologyConfig {
        TopologyConfig {
            ignored_operation_prefix: self
                .topology
                .ignored_operation_name
                .clone()
                .filter(|name| !name.is_empty()),
            default_runtime: self.topology.default_runtime.clone(),
            default_namespace: self.topology.default_namespace.clone(),
        }
    }

    pub fn snapshot_policy(&self) -> SnapshotPolicy {
        match self.store.policy {
            PolicyKind::Inline => SnapshotPolicy::Inline,
            PolicyKind::Periodic => SnapshotPolicy::Periodic {
                interval: Duration::from_secs(self.store.interval_seconds),
            },
        }
    }
}

fn invalid(key: &'static str, reason: &str) -> SettingsError {
    SettingsError::Invalid {
        key,
        reason: reason.to_string(),
    }
}
