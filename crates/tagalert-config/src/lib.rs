//! Shared configuration for tagalert tools.
//!
//! TOML file at the platform config path, `TAGALERT_*` environment
//! overrides, sensor profiles, and translation to
//! `tagalert_core::EngineConfig`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use tagalert_core::model::MIN_CLOUD_UNSEEN_SECS;
use tagalert_core::{EngineConfig, SensorFacts, SensorId};

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

fn invalid(field: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        field: field.into(),
        reason: reason.into(),
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub defaults: Defaults,

    #[serde(default)]
    pub engine: EngineSection,

    #[serde(default)]
    pub storage: Storage,

    /// Known sensors, attached by the tools at startup.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sensors: Vec<SensorProfile>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Defaults {
    #[serde(default = "default_output")]
    pub output: String,

    #[serde(default = "default_color")]
    pub color: String,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            output: default_output(),
            color: default_color(),
        }
    }
}

fn default_output() -> String {
    "table".into()
}
fn default_color() -> String {
    "auto".into()
}

/// `[engine]` tuning.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct EngineSection {
    #[serde(default = "default_mute_sweep_secs")]
    pub mute_sweep_secs: u64,

    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    #[serde(default = "default_cloud_unseen_secs")]
    pub cloud_unseen_default_secs: u32,

    /// Whether the account session starts authorized.
    #[serde(default = "default_true")]
    pub authorized: bool,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            mute_sweep_secs: default_mute_sweep_secs(),
            debounce_ms: default_debounce_ms(),
            cloud_unseen_default_secs: default_cloud_unseen_secs(),
            authorized: true,
        }
    }
}

fn default_mute_sweep_secs() -> u64 {
    5
}
fn default_debounce_ms() -> u64 {
    300
}
fn default_cloud_unseen_secs() -> u32 {
    tagalert_core::model::DEFAULT_CLOUD_UNSEEN_SECS
}
fn default_true() -> bool {
    true
}

impl EngineSection {
    /// Validate and convert into the core's runtime settings.
    pub fn to_engine_config(&self) -> Result<EngineConfig, ConfigError> {
        if self.mute_sweep_secs == 0 {
            return Err(invalid("engine.mute_sweep_secs", "must be at least 1"));
        }
        if self.cloud_unseen_default_secs < MIN_CLOUD_UNSEEN_SECS {
            return Err(invalid(
                "engine.cloud_unseen_default_secs",
                format!("must be at least {MIN_CLOUD_UNSEEN_SECS}"),
            ));
        }
        Ok(EngineConfig {
            mute_sweep_period: Duration::from_secs(self.mute_sweep_secs),
            debounce_delay: Duration::from_millis(self.debounce_ms),
            cloud_unseen_default_secs: self.cloud_unseen_default_secs,
            authorized: self.authorized,
        })
    }
}

/// `[storage]`: where rules are persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Storage {
    /// JSON rule document. Defaults to the platform data directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rules_path: Option<PathBuf>,
}

impl Storage {
    pub fn resolved_rules_path(&self) -> PathBuf {
        self.rules_path.clone().unwrap_or_else(default_rules_path)
    }
}

/// A `[[sensors]]` entry.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct SensorProfile {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mac: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub luid: Option<String>,

    /// Claimed in the cloud and relayed through it.
    #[serde(default)]
    pub cloud: bool,
}

impl SensorProfile {
    pub fn sensor_id(&self) -> Result<SensorId, ConfigError> {
        let id = match (&self.mac, &self.luid) {
            (Some(mac), Some(luid)) => SensorId::from_mac(mac).with_luid(luid.as_str()),
            (Some(mac), None) => SensorId::from_mac(mac),
            (None, Some(luid)) => SensorId::from_luid(luid.as_str()),
            (None, None) => {
                return Err(invalid(
                    "sensors.mac",
                    format!("sensor '{}' needs a mac or luid", self.name),
                ));
            }
        };
        Ok(id)
    }

    pub fn facts(&self) -> SensorFacts {
        SensorFacts {
            cloud_backed: self.cloud,
            ..SensorFacts::default()
        }
    }
}

impl Config {
    pub fn sensor(&self, name: &str) -> Option<&SensorProfile> {
        self.sensors.iter().find(|s| s.name == name)
    }
}

// ── Config file path ────────────────────────────────────────────────

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("org", "tagalert", "tagalert")
}

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    project_dirs().map_or_else(
        || dirs_fallback().join("config.toml"),
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

/// Default location of the JSON rule document.
pub fn default_rules_path() -> PathBuf {
    project_dirs().map_or_else(
        || dirs_fallback().join("rules.json"),
        |dirs| dirs.data_dir().join("rules.json"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("tagalert");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Defaults, then the TOML file at `path`, then `TAGALERT_*` variables.
/// Nested keys use a double underscore: `TAGALERT_ENGINE__DEBOUNCE_MS`.
pub fn figment_for(path: &Path) -> Figment {
    Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("TAGALERT_").split("__"))
}

/// Load the full Config from the canonical file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let config: Config = figment_for(path).extract()?;
    Ok(config)
}

/// Load config, returning a default if it cannot be read.
pub fn load_config_or_default() -> Config {
    load_config().unwrap_or_default()
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<PathBuf, ConfigError> {
    let path = config_path();
    save_config_to(cfg, &path)?;
    Ok(path)
}

pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}
