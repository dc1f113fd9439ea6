// ── Core identity types ──
//
// `Domain` and `EntityId` are the foundation of every cache key, command
// and protocol filter. The domain is derived once, when the id is parsed,
// so dispatch never re-scans the string prefix.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use strum::{AsRefStr, Display, EnumIter, EnumString, IntoStaticStr};

use crate::error::CoreError;

// ── Domain ──────────────────────────────────────────────────────────

/// The fixed allow-list of entity domains the bridge handles.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display, EnumString, EnumIter,
    AsRefStr, IntoStaticStr, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    Light,
    Switch,
    Climate,
    Cover,
    Sensor,
    Weather,
}

impl Domain {
    /// Domains that accept service calls. Sensors and weather are read-only.
    pub fn is_controllable(self) -> bool {
        matches!(self, Self::Light | Self::Switch | Self::Climate | Self::Cover)
    }
}

// ── EntityId ────────────────────────────────────────────────────────

/// Validated `{domain}.{object_id}` identifier.
///
/// Construction fails for anything outside the [`Domain`] allow-list, so
/// holding an `EntityId` is proof the bridge may act on it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityId {
    raw: String,
    domain: Domain,
}

impl EntityId {
    pub fn parse(raw: &str) -> Result<Self, CoreError> {
        let invalid = |reason: &str| CoreError::InvalidEntityId {
            id: raw.to_owned(),
            reason: reason.to_owned(),
        };

        let (prefix, object_id) = raw.split_once('.').ok_or_else(|| invalid("missing domain prefix"))?;
        if object_id.is_empty() {
            return Err(invalid("empty object id"));
        }
        if raw.contains(char::is_whitespace) || raw.contains('|') {
            return Err(invalid("contains whitespace or '|'"));
        }
        let domain = Domain::from_str(prefix).map_err(|_| invalid("domain not in allow-list"))?;

        Ok(Self {
            raw: raw.to_owned(),
            domain,
        })
    }

    pub fn domain(&self) -> Domain {
        self.domain
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// The part after the domain prefix (`kitchen` in `light.kitchen`).
    pub fn object_id(&self) -> &str {
        self.raw
            .split_once('.')
            .map_or(self.raw.as_str(), |(_, object_id)| object_id)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for EntityId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl AsRef<str> for EntityId {
    fn as_ref(&self) -> &str {
        &self.raw
    }
}

impl Serialize for EntityId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.raw)
    }
}

impl<'de> Deserialize<'de> for EntityId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}
