// ── Entity snapshots ──
//
// An `EntitySnapshot` is the last known state document for one entity.
// Snapshots are immutable once built: every update produces a new one
// that replaces the old wholesale.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::entity_id::{Domain, EntityId};
use crate::error::CoreError;

/// Last known remote state of one entity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntitySnapshot {
    pub id: EntityId,
    pub domain: Domain,
    /// Short state string: `"on"`, `"off"`, `"21.5"`, `"unavailable"`, ...
    pub state: String,
    /// Domain-specific payload, uninterpreted beyond field lookups.
    pub attributes: Map<String, Value>,
    pub friendly_name: Option<String>,
    pub last_changed: Option<DateTime<Utc>>,
    pub last_updated: Option<DateTime<Utc>>,
}

/// Wire shape of a Home Assistant state object.
#[derive(Debug, Deserialize)]
struct StateDocument {
    #[serde(default)]
    state: Option<Value>,
    #[serde(default)]
    attributes: Option<Map<String, Value>>,
    #[serde(default)]
    last_changed: Option<DateTime<Utc>>,
    #[serde(default)]
    last_updated: Option<DateTime<Utc>>,
}

impl EntitySnapshot {
    /// Parse a raw state document for `id`.
    ///
    /// The key is authoritative: an `entity_id` inside the document is not
    /// consulted. Non-string states (some integrations send numbers) are
    /// kept in their JSON text form.
    pub fn parse(id: &EntityId, raw: &str) -> Result<Self, CoreError> {
        let value: Value = serde_json::from_str(raw)?;
        Self::from_value(id, value)
    }

    /// Build from an already-decoded JSON value. Anything but an object is
    /// rejected; serde would otherwise accept a sequence for the struct.
    pub fn from_value(id: &EntityId, value: Value) -> Result<Self, CoreError> {
        if !value.is_object() {
            return Err(CoreError::Parse {
                message: format!("state document for {id} is not a JSON object"),
            });
        }
        let doc: StateDocument = serde_json::from_value(value)?;
        Ok(Self::from_document(id, doc))
    }

    fn from_document(id: &EntityId, doc: StateDocument) -> Self {
        let state = match doc.state {
            Some(Value::String(s)) => s,
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        };
        let attributes = doc.attributes.unwrap_or_default();
        let friendly_name = attributes
            .get("friendly_name")
            .and_then(Value::as_str)
            .map(str::to_owned);

        Self {
            id: id.clone(),
            domain: id.domain(),
            state,
            attributes,
            friendly_name,
            last_changed: doc.last_changed,
            last_updated: doc.last_updated,
        }
    }

    /// Display label, falling back to the entity id.
    pub fn display_name(&self) -> &str {
        self.friendly_name.as_deref().unwrap_or(self.id.as_str())
    }

    pub fn attribute(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }

    pub fn is_on(&self) -> bool {
        self.state == "on"
    }

    /// `attributes.temperature` for climate entities (target setpoint).
    pub fn target_temperature(&self) -> Option<f64> {
        self.attribute("temperature").and_then(Value::as_f64)
    }

    /// `attributes.current_temperature` for climate entities.
    pub fn current_temperature(&self) -> Option<f64> {
        self.attribute("current_temperature").and_then(Value::as_f64)
    }
}

// ── Selection ───────────────────────────────────────────────────────

/// One entry of the persisted entity selection.
///
/// Stored as a JSON array of `{entity_id, friendly_name, state}`; `state`
/// is whatever the portal saw at selection time and is informational only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectedEntity {
    pub entity_id: EntityId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub friendly_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
}

impl SelectedEntity {
    pub fn new(entity_id: EntityId, friendly_name: impl Into<String>) -> Self {
        Self {
            entity_id,
            friendly_name: Some(friendly_name.into()),
            state: None,
        }
    }

    pub fn display_name(&self) -> &str {
        self.friendly_name
            .as_deref()
            .filter(|name| !name.is_empty())
            .unwrap_or(self.entity_id.as_str())
    }
}

/// Decode a persisted selection.
///
/// Entries whose id falls outside the allow-list are skipped with a
/// warning rather than failing the whole selection.
pub fn decode_selection(json: &str) -> Result<Vec<SelectedEntity>, CoreError> {
    let entries: Vec<Value> = serde_json::from_str(json)?;
    let mut selection = Vec::with_capacity(entries.len());
    for entry in entries {
        match serde_json::from_value::<SelectedEntity>(entry) {
            Ok(selected) => {
                if selection
                    .iter()
                    .all(|s: &SelectedEntity| s.entity_id != selected.entity_id)
                {
                    selection.push(selected);
                }
            }
            Err(e) => tracing::warn!(error = %e, "skipping unusable selection entry"),
        }
    }
    Ok(selection)
}

pub fn encode_selection(selection: &[SelectedEntity]) -> Result<String, CoreError> {
    Ok(serde_json::to_string(selection)?)
}
