//! Defines all configuration structures for the pulse hub.
//!
//! These structs are deserialized with `serde` from a layered `config`
//! source: an optional TOML file overridden by `PULSE_*` environment
//! variables (nested keys separated by `__`, e.g.
//! `PULSE_ALERT__THRESHOLD=120`). Every field has a default, so an empty
//! configuration is valid and matches the reference deployment.

use crate::common::Bpm;
use anyhow::Context;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Environment variable prefix for overrides.
pub const ENV_PREFIX: &str = "PULSE";

/// The top-level configuration for the pulse hub and its server.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PulseConfig {
    pub server: ServerConfig,
    pub source: SourceConfig,
    pub alert: AlertConfig,
    /// People who may receive high-BPM alerts.
    pub recipients: Vec<RecipientConfig>,
}

/// HTTP listener settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Socket address the HTTP server binds to.
    pub bind: String,
    /// Per-stream buffer of undelivered samples before a client counts as lagging.
    pub stream_buffer: usize,
    /// Interval between SSE keep-alive comments.
    pub keep_alive_secs: u64,
}

/// Where samples come from and what the latest value starts as.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Serial device to read `BPM: <n>` lines from. When absent or empty
    /// the simulator runs straight away.
    pub serial_path: Option<String>,
    /// Value the latest-value store holds before any sample arrives.
    /// `0` leaves the store empty.
    pub initial_bpm: Option<Bpm>,
    /// Value used when a sensor line matches but its number is unusable.
    pub fallback_bpm: Bpm,
    pub simulator: SimulatorConfig,
}

/// Random-walk simulator parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    pub interval_ms: u64,
    /// Largest absolute change applied per step.
    pub max_step: u32,
    pub min_bpm: Bpm,
    pub max_bpm: Bpm,
}

/// Threshold alerting parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    /// Samples strictly above this value are considered high.
    pub threshold: Bpm,
    /// Minimum time between two dispatched alerts for one recipient.
    pub cooldown_secs: u64,
    /// Sender address stamped on outgoing alert messages.
    pub sender: String,
}

/// A person who can be resolved when dispatching alerts.
#[derive(Debug, Clone, Deserialize)]
pub struct RecipientConfig {
    pub email: String,
    pub name: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:3001".to_string(),
            stream_buffer: 32,
            keep_alive_secs: 15,
        }
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            serial_path: None,
            initial_bpm: Some(Bpm(75)),
            fallback_bpm: Bpm(75),
            simulator: SimulatorConfig::default(),
        }
    }
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            interval_ms: 3000,
            max_step: 2,
            min_bpm: Bpm(60),
            max_bpm: Bpm(110),
        }
    }
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            threshold: Bpm(100),
            cooldown_secs: 60 * 60,
            sender: "alerts@momcare.local".to_string(),
        }
    }
}

impl SimulatorConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(1))
    }
}

impl SourceConfig {
    /// The configured serial device, if any.
    pub fn serial_device(&self) -> Option<&str> {
        self.serial_path
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
    }

    /// The value the store starts with, if any.
    pub fn initial_latest(&self) -> Option<Bpm> {
        self.initial_bpm.filter(|b| b.0 > 0)
    }
}

impl AlertConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }
}

impl ServerConfig {
    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs.max(1))
    }
}

impl PulseConfig {
    /// Loads the configuration from an optional TOML file plus environment overrides.
    ///
    /// A missing file is not an error; a malformed one is.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(false));
        }
        let settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("failed to assemble configuration sources")?;
        settings
            .try_deserialize()
            .context("failed to deserialize pulse configuration")
    }

    /// Parses a configuration from TOML text, without environment overrides.
    pub fn from_toml_str(text: &str) -> anyhow::Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from_str(text, config::FileFormat::Toml))
            .build()
            .context("failed to parse configuration text")?;
        settings
            .try_deserialize()
            .context("failed to deserialize pulse configuration")
    }
}
