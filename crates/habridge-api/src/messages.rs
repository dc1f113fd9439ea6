//! Wire types for the Home Assistant realtime (WebSocket) protocol.
//!
//! Only the subset the bridge speaks is modelled: the auth handshake,
//! `subscribe_events`, command results and `event` frames. Anything else
//! the server sends deserializes to [`ServerMessage::Other`].

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;

/// Event category the bridge subscribes to.
pub const STATE_CHANGED: &str = "state_changed";

// ── Client → server ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Auth {
        #[serde(serialize_with = "expose_token")]
        access_token: SecretString,
    },
    SubscribeEvents {
        id: u64,
        event_type: String,
    },
}

impl ClientMessage {
    pub fn auth(access_token: SecretString) -> Self {
        Self::Auth { access_token }
    }

    pub fn subscribe_state_changed(id: u64) -> Self {
        Self::SubscribeEvents {
            id,
            event_type: STATE_CHANGED.into(),
        }
    }

    /// Serialize into a text frame.
    pub fn to_frame(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

fn expose_token<S: Serializer>(token: &SecretString, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(token.expose_secret())
}

// ── Server → client ──────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    AuthRequired {
        #[serde(default)]
        ha_version: Option<String>,
    },
    AuthOk {
        #[serde(default)]
        ha_version: Option<String>,
    },
    AuthInvalid {
        #[serde(default)]
        message: Option<String>,
    },
    Result {
        #[serde(default)]
        id: Option<u64>,
        #[serde(default)]
        success: bool,
        #[serde(default)]
        error: Option<ResultError>,
    },
    Event {
        #[serde(default)]
        id: Option<u64>,
        event: EventBody,
    },
    #[serde(other)]
    Other,
}

impl ServerMessage {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResultError {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventBody {
    #[serde(default)]
    pub event_type: Option<String>,
    pub data: StateChangedData,
}

/// Payload of a `state_changed` event.
///
/// `new_state` is `None` when the entity was removed upstream.
#[derive(Debug, Clone, Deserialize)]
pub struct StateChangedData {
    #[serde(default)]
    pub entity_id: String,
    #[serde(default)]
    pub new_state: Option<Value>,
    #[serde(default)]
    pub old_state: Option<Value>,
}
