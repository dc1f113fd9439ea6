// ── Persisted settings ──
//
// `Persistence` is the string-keyed store the configuration portal writes
// to. `Settings` is the typed view the core reads: credentials, port and
// the entity selection. The core never writes settings on its own; the
// portal (or the `config` CLI) does.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use secrecy::SecretString;
use strum::{AsRefStr, Display, EnumIter, EnumString, IntoStaticStr};
use tracing::warn;

use crate::config::{Credentials, DEFAULT_PORT};
use crate::error::CoreError;
use crate::model::{SelectedEntity, decode_selection, encode_selection};

/// Keys understood by every [`Persistence`] backend.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display, EnumString, EnumIter,
    AsRefStr, IntoStaticStr,
)]
#[strum(serialize_all = "snake_case")]
pub enum SettingKey {
    HaApiKey,
    HaHost,
    HaPort,
    HaEntities,
}

/// String-keyed settings storage.
///
/// Implementations use interior mutability; the bridge shares one backend
/// between the orchestrator and the portal.
pub trait Persistence: Send + Sync {
    /// (Re)load from the backing medium.
    fn load(&self) -> Result<(), CoreError>;

    fn get(&self, key: SettingKey) -> Result<Option<String>, CoreError>;

    fn set(&self, key: SettingKey, value: &str) -> Result<(), CoreError>;

    /// Clear every key in one step.
    fn reset(&self) -> Result<(), CoreError>;
}

// ── MemoryPersistence ───────────────────────────────────────────────

/// In-process backend for tests and ephemeral runs.
#[derive(Debug, Default)]
pub struct MemoryPersistence {
    values: RwLock<BTreeMap<SettingKey, String>>,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_values<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = (SettingKey, V)>,
        V: Into<String>,
    {
        let map = values.into_iter().map(|(k, v)| (k, v.into())).collect();
        Self {
            values: RwLock::new(map),
        }
    }
}

fn poisoned() -> CoreError {
    CoreError::Persistence {
        message: "settings lock poisoned".into(),
    }
}

impl Persistence for MemoryPersistence {
    fn load(&self) -> Result<(), CoreError> {
        Ok(())
    }

    fn get(&self, key: SettingKey) -> Result<Option<String>, CoreError> {
        let values = self.values.read().map_err(|_| poisoned())?;
        Ok(values.get(&key).cloned())
    }

    fn set(&self, key: SettingKey, value: &str) -> Result<(), CoreError> {
        let mut values = self.values.write().map_err(|_| poisoned())?;
        values.insert(key, value.to_owned());
        Ok(())
    }

    fn reset(&self) -> Result<(), CoreError> {
        self.values.write().map_err(|_| poisoned())?.clear();
        Ok(())
    }
}

// ── Settings ────────────────────────────────────────────────────────

/// Typed accessor over a [`Persistence`] backend.
#[derive(Clone)]
pub struct Settings {
    backend: Arc<dyn Persistence>,
}

impl std::fmt::Debug for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Settings").finish_non_exhaustive()
    }
}

impl Settings {
    pub fn new(backend: Arc<dyn Persistence>) -> Self {
        Self { backend }
    }

    pub fn load(&self) -> Result<(), CoreError> {
        self.backend.load()
    }

    /// Non-blank value for `key`. Read failures are logged and treated as
    /// absent.
    fn value(&self, key: SettingKey) -> Option<String> {
        match self.backend.get(key) {
            Ok(value) => value.filter(|v| !v.trim().is_empty()),
            Err(e) => {
                warn!(key = %key, error = %e, "settings read failed");
                None
            }
        }
    }

    pub fn api_key(&self) -> Option<SecretString> {
        self.value(SettingKey::HaApiKey).map(SecretString::from)
    }

    pub fn host(&self) -> Option<String> {
        self.value(SettingKey::HaHost)
    }

    /// Configured port, or 8123 when unset or unparseable.
    pub fn port(&self) -> u16 {
        match self.value(SettingKey::HaPort) {
            Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
                warn!(port = %raw, "invalid port in settings, using default");
                DEFAULT_PORT
            }),
            None => DEFAULT_PORT,
        }
    }

    /// Raw persisted selection JSON, if any.
    pub fn raw_selection(&self) -> Option<String> {
        self.value(SettingKey::HaEntities)
    }

    /// Decoded selection; empty when none is stored.
    pub fn selection(&self) -> Result<Vec<SelectedEntity>, CoreError> {
        self.raw_selection()
            .map_or_else(|| Ok(Vec::new()), |raw| decode_selection(&raw))
    }

    pub fn has_api_key(&self) -> bool {
        self.value(SettingKey::HaApiKey).is_some()
    }

    pub fn has_host(&self) -> bool {
        self.value(SettingKey::HaHost).is_some()
    }

    pub fn has_selection(&self) -> bool {
        self.raw_selection().is_some()
    }

    /// Credentials for the REST and realtime clients.
    pub fn credentials(&self) -> Result<Credentials, CoreError> {
        let host = self.host().ok_or_else(|| CoreError::Configuration {
            message: "Home Assistant host is not set".into(),
        })?;
        let token = self.api_key().ok_or_else(|| CoreError::Configuration {
            message: "access token is not set".into(),
        })?;
        Ok(Credentials::new(host, self.port(), token))
    }

    // ── Writers (portal side) ────────────────────────────────────────

    pub fn set_host(&self, host: &str) -> Result<(), CoreError> {
        self.backend.set(SettingKey::HaHost, host.trim())
    }

    pub fn set_port(&self, port: u16) -> Result<(), CoreError> {
        self.backend.set(SettingKey::HaPort, &port.to_string())
    }

    pub fn set_api_key(&self, token: &str) -> Result<(), CoreError> {
        self.backend.set(SettingKey::HaApiKey, token.trim())
    }

    pub fn set_selection(&self, selection: &[SelectedEntity]) -> Result<(), CoreError> {
        self.backend
            .set(SettingKey::HaEntities, &encode_selection(selection)?)
    }

    pub fn reset(&self) -> Result<(), CoreError> {
        self.backend.reset()
    }
}
