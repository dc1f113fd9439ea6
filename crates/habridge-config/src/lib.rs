//! Runtime configuration for habridge.
//!
//! A TOML file under the platform config directory, layered with
//! `HABRIDGE_*` environment overrides, and translated into
//! `habridge_core::BridgeConfig`. The persisted settings the portal edits
//! (host, token, selection) live in a separate file, see [`FileSettings`].

mod file_settings;

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use habridge_core::{BridgeConfig, TlsMode};

pub use file_settings::FileSettings;

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

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

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub bridge: BridgeSection,

    #[serde(default)]
    pub portal: PortalSection,

    /// Where the persisted settings live. Defaults to the platform data
    /// directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings_path: Option<PathBuf>,
}

/// Runtime tuning, in plain integers so the file stays readable.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct BridgeSection {
    #[serde(default = "default_fetch_delay_ms")]
    pub fetch_delay_ms: u64,

    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    /// Skip certificate verification (self-signed Home Assistant installs).
    #[serde(default)]
    pub accept_invalid_certs: bool,
}

impl Default for BridgeSection {
    fn default() -> Self {
        Self {
            fetch_delay_ms: default_fetch_delay_ms(),
            lock_timeout_ms: default_lock_timeout_ms(),
            request_timeout_secs: default_request_timeout_secs(),
            tick_interval_ms: default_tick_interval_ms(),
            accept_invalid_certs: false,
        }
    }
}

fn default_fetch_delay_ms() -> u64 {
    100
}
fn default_lock_timeout_ms() -> u64 {
    500
}
fn default_request_timeout_secs() -> u64 {
    10
}
fn default_tick_interval_ms() -> u64 {
    100
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct PortalSection {
    /// Announced to the renderer when setup or selection is missing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl Config {
    /// Validate and translate into the core runtime configuration.
    pub fn to_bridge_config(&self) -> Result<BridgeConfig, ConfigError> {
        let bridge = &self.bridge;
        if bridge.request_timeout_secs == 0 {
            return Err(ConfigError::Validation {
                field: "bridge.request_timeout_secs".into(),
                reason: "must be at least 1".into(),
            });
        }
        if bridge.lock_timeout_ms == 0 {
            return Err(ConfigError::Validation {
                field: "bridge.lock_timeout_ms".into(),
                reason: "must be at least 1".into(),
            });
        }
        if bridge.tick_interval_ms == 0 {
            return Err(ConfigError::Validation {
                field: "bridge.tick_interval_ms".into(),
                reason: "must be at least 1".into(),
            });
        }

        let tls = if bridge.accept_invalid_certs {
            TlsMode::DangerAcceptInvalid
        } else {
            TlsMode::System
        };

        Ok(BridgeConfig {
            fetch_delay: Duration::from_millis(bridge.fetch_delay_ms),
            lock_timeout: Duration::from_millis(bridge.lock_timeout_ms),
            request_timeout: Duration::from_secs(bridge.request_timeout_secs),
            tick_interval: Duration::from_millis(bridge.tick_interval_ms),
            tls,
            portal_url: self.portal.url.clone().filter(|url| !url.trim().is_empty()),
        })
    }

    /// Settings file location: the configured path, else the platform
    /// data directory.
    pub fn resolved_settings_path(&self) -> PathBuf {
        self.settings_path
            .clone()
            .unwrap_or_else(default_settings_path)
    }
}

// ── Paths ───────────────────────────────────────────────────────────

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("io", "habridge", "habridge")
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("habridge");
    p
}

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    project_dirs().map_or_else(
        || dirs_fallback().join("config.toml"),
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

pub fn default_settings_path() -> PathBuf {
    project_dirs().map_or_else(
        || dirs_fallback().join("settings.toml"),
        |dirs| dirs.data_dir().join("settings.toml"),
    )
}

// ── Loading and saving ──────────────────────────────────────────────

/// Load from the canonical path plus environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load from `path` plus environment. A missing file yields defaults.
///
/// Environment keys nest on a double underscore:
/// `HABRIDGE_BRIDGE__FETCH_DELAY_MS=250`, `HABRIDGE_PORTAL__URL=...`.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("HABRIDGE_").split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

/// Serialize config to TOML and write it to `path`.
pub fn save_config(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}
