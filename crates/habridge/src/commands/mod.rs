//! Subcommand handlers and the context they share.

pub mod config_cmd;
pub mod entities;
pub mod run;

use std::path::PathBuf;
use std::sync::Arc;

use habridge_config::{Config, FileSettings, config_path, load_config_from};
use habridge_core::{BridgeConfig, Credentials, Settings, TlsMode};

use crate::cli::GlobalOpts;
use crate::error::CliError;

/// Loaded runtime config plus the persisted settings it points at.
pub struct Context {
    pub config: Config,
    pub config_path: PathBuf,
    pub settings_path: PathBuf,
    pub settings: Settings,
    insecure: bool,
}

impl Context {
    pub fn load(global: &GlobalOpts) -> Result<Self, CliError> {
        let config_path = global.config.clone().unwrap_or_else(config_path);
        let config = load_config_from(&config_path)?;
        let settings_path = global
            .settings
            .clone()
            .unwrap_or_else(|| config.resolved_settings_path());
        let backend = FileSettings::open(&settings_path)?;
        tracing::debug!(
            config = %config_path.display(),
            settings = %settings_path.display(),
            "configuration loaded"
        );

        Ok(Self {
            config,
            config_path,
            settings_path,
            settings: Settings::new(Arc::new(backend)),
            insecure: global.insecure,
        })
    }

    /// Runtime tuning with command-line overrides applied.
    pub fn bridge_config(&self) -> Result<BridgeConfig, CliError> {
        let mut bridge = self.config.to_bridge_config()?;
        if self.insecure {
            bridge.tls = TlsMode::DangerAcceptInvalid;
        }
        Ok(bridge)
    }

    /// Credentials from the settings, or a diagnostic naming the missing
    /// piece.
    pub fn credentials(&self) -> Result<Credentials, CliError> {
        if !self.settings.has_host() {
            return Err(self.not_configured("Home Assistant host", "habridge config set-host <host>"));
        }
        if !self.settings.has_api_key() {
            return Err(self.not_configured("Access token", "habridge config set-token"));
        }
        Ok(self.settings.credentials()?)
    }

    fn not_configured(&self, what: &str, fix: &str) -> CliError {
        CliError::NotConfigured {
            what: what.into(),
            fix: fix.into(),
            path: self.settings_path.display().to_string(),
        }
    }
}
