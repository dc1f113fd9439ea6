// ── File-backed settings ──
//
// The persisted portal settings as a flat TOML table:
//
//   ha_host = "192.168.1.10"
//   ha_port = "8123"
//   ha_api_key = "eyJ..."
//   ha_entities = '[{"entity_id":"light.kitchen"}]'
//
// Values are cached in memory; `load` re-reads the file and every write
// rewrites it whole.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::RwLock;

use tracing::{debug, warn};

use habridge_core::{CoreError, Persistence, SettingKey};

use crate::ConfigError;

pub struct FileSettings {
    path: PathBuf,
    values: RwLock<BTreeMap<SettingKey, String>>,
}

impl std::fmt::Debug for FileSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileSettings")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl FileSettings {
    /// Open the settings file at `path`, reading it if it exists.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let values = read_file(&path)?;
        Ok(Self {
            path,
            values: RwLock::new(values),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_file(&self, values: &BTreeMap<SettingKey, String>) -> Result<(), ConfigError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let table: BTreeMap<&str, &str> = values
            .iter()
            .map(|(key, value)| (key.as_ref(), value.as_str()))
            .collect();
        std::fs::write(&self.path, toml::to_string_pretty(&table)?)?;
        debug!(path = %self.path.display(), keys = values.len(), "settings written");
        Ok(())
    }
}

fn read_file(path: &Path) -> Result<BTreeMap<SettingKey, String>, ConfigError> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
        Err(e) => return Err(e.into()),
    };
    let table: toml::Table = raw.parse().map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;

    let mut values = BTreeMap::new();
    for (name, value) in table {
        let Ok(key) = SettingKey::from_str(&name) else {
            warn!(key = %name, "ignoring unknown settings key");
            continue;
        };
        let value = match value {
            toml::Value::String(s) => s,
            other => other.to_string(),
        };
        values.insert(key, value);
    }
    Ok(values)
}

fn storage_error(err: impl std::fmt::Display) -> CoreError {
    CoreError::Persistence {
        message: err.to_string(),
    }
}

impl Persistence for FileSettings {
    fn load(&self) -> Result<(), CoreError> {
        let fresh = read_file(&self.path).map_err(storage_error)?;
        *self.values.write().map_err(storage_error)? = fresh;
        Ok(())
    }

    fn get(&self, key: SettingKey) -> Result<Option<String>, CoreError> {
        let values = self.values.read().map_err(storage_error)?;
        Ok(values.get(&key).cloned())
    }

    fn set(&self, key: SettingKey, value: &str) -> Result<(), CoreError> {
        let mut values = self.values.write().map_err(storage_error)?;
        values.insert(key, value.to_owned());
        self.write_file(&values).map_err(storage_error)
    }

    fn reset(&self) -> Result<(), CoreError> {
        let mut values = self.values.write().map_err(storage_error)?;
        values.clear();
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(storage_error(e)),
        }
    }
}
