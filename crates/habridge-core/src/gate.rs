// ── Readiness gate ──
//
// The configuration portal decides whether the bridge may start syncing.
// The orchestrator only asks the two gate predicates and listens for
// change notifications; how the portal collects credentials is outside the
// core.

use std::sync::Mutex;

use tracing::{debug, warn};

use crate::error::CoreError;
use crate::settings::Settings;

/// Callback fired after the portal has saved new settings.
pub type ChangeCallback = Box<dyn Fn() + Send + Sync>;

pub trait ConfigurationGate: Send + Sync {
    /// Credentials (host and access token) are present.
    fn has_valid_setup(&self) -> bool;

    /// An entity selection is present.
    fn has_valid_config(&self) -> bool;

    /// Where the user can fix the configuration.
    fn portal_url(&self) -> String;

    /// Register a change listener. May be called more than once; every
    /// registered callback fires on each change.
    fn on_configuration_changed(&self, callback: ChangeCallback);

    /// Bring the portal up. Called when the network becomes available.
    fn start(&self) -> Result<(), CoreError> {
        Ok(())
    }

    /// Serve pending portal work. Called on every orchestrator tick.
    fn service_pending(&self) {}
}

// ── SettingsGate ────────────────────────────────────────────────────

/// Gate backed by persisted [`Settings`].
///
/// Whoever edits the settings calls [`notify_changed`](Self::notify_changed)
/// afterwards.
pub struct SettingsGate {
    settings: Settings,
    portal_url: String,
    callbacks: Mutex<Vec<ChangeCallback>>,
}

impl SettingsGate {
    pub fn new(settings: Settings, portal_url: impl Into<String>) -> Self {
        Self {
            settings,
            portal_url: portal_url.into(),
            callbacks: Mutex::new(Vec::new()),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Re-read the backing store and fire every change callback.
    pub fn notify_changed(&self) {
        if let Err(e) = self.settings.load() {
            warn!(error = %e, "reloading settings failed");
        }
        match self.callbacks.lock() {
            Ok(callbacks) => {
                debug!(listeners = callbacks.len(), "configuration changed");
                for callback in callbacks.iter() {
                    callback();
                }
            }
            Err(_) => warn!("gate callback registry poisoned"),
        }
    }
}

impl ConfigurationGate for SettingsGate {
    fn has_valid_setup(&self) -> bool {
        self.settings.has_api_key() && self.settings.has_host()
    }

    fn has_valid_config(&self) -> bool {
        self.settings.has_selection()
    }

    fn portal_url(&self) -> String {
        self.portal_url.clone()
    }

    fn on_configuration_changed(&self, callback: ChangeCallback) {
        match self.callbacks.lock() {
            Ok(mut callbacks) => callbacks.push(callback),
            Err(_) => warn!("gate callback registry poisoned"),
        }
    }
}
