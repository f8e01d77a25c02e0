//! Supervisor Settings
//!
//! Loaded from an optional TOML file plus `CAN_SUPERVISOR_*` environment
//! overrides; every knob has a default so a bare start works.

use adapter_watch::WatcherConfig;
use frame_stats::EngineConfig;
use serde::Deserialize;
use slcan_bridge::{BitrateChoice, InterfaceConfig};
use std::time::Duration;

/// Top-level configuration for the supervisor daemon
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SupervisorSettings {
    /// Interface bring-up parameters; the bit-rate inside is only the
    /// default and is overridden per activation request
    pub interface: InterfaceConfig,
    /// Device watcher parameters
    pub watcher: WatcherConfig,
    /// Aggregation engine parameters
    pub aggregation: EngineConfig,
    /// Health poll period, milliseconds
    pub health_poll_ms: u64,
    /// Blocking receive timeout for the frame reader, milliseconds
    pub read_timeout_ms: u64,
    /// Backoff before bus-off / read-fault recovery, milliseconds
    pub recovery_backoff_ms: u64,
    /// Period of the changed-flag decay sweep, milliseconds
    pub decay_tick_ms: u64,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            interface: InterfaceConfig::default(),
            watcher: WatcherConfig::default(),
            aggregation: EngineConfig::default(),
            health_poll_ms: 1000,
            read_timeout_ms: 200,
            recovery_backoff_ms: 1000,
            decay_tick_ms: 200,
        }
    }
}

impl SupervisorSettings {
    /// Load settings, layering file (when present) under environment
    /// overrides
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();
        builder = match path {
            Some(path) => builder.add_source(config::File::with_name(path)),
            None => builder.add_source(config::File::with_name("can-supervisor").required(false)),
        };
        builder
            .add_source(config::Environment::with_prefix("CAN_SUPERVISOR").separator("__"))
            .build()?
            .try_deserialize()
    }

    /// Interface config for one activation request
    pub fn interface_config(&self, bitrate: BitrateChoice) -> InterfaceConfig {
        InterfaceConfig {
            bitrate,
            ..self.interface.clone()
        }
    }

    pub fn health_poll(&self) -> Duration {
        Duration::from_millis(self.health_poll_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn recovery_backoff(&self) -> Duration {
        Duration::from_millis(self.recovery_backoff_ms)
    }

    pub fn decay_tick(&self) -> Duration {
        Duration::from_millis(self.decay_tick_ms)
    }
}
