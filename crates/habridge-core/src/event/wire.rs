// ── Numeric channel encoding ──
//
// Platform and application events share one transport channel on the
// device. Application codes are shifted up by `APP_EVENT_OFFSET`; anything
// below it is a platform event. The string payload is bounded to
// `MAX_PAYLOAD_LEN` bytes, and climate intents pack `"id|parameter"`.
// Payloads that identify something are never cut; encoding them fails
// instead. Only free-text error messages are shortened.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{AppEvent, Intent, PlatformEvent};
use crate::model::EntityId;

/// Application codes start here on the shared channel.
pub const APP_EVENT_OFFSET: u16 = 100;

/// Payload capacity in bytes (a 128-byte buffer with a terminator on the
/// device side).
pub const MAX_PAYLOAD_LEN: usize = 127;

const PARAM_SEPARATOR: char = '|';

/// Application event codes before the offset is applied.
pub mod app_code {
    pub const CONFIG_SET: u16 = 3;
    pub const DISPLAY_BOOTSTRAP: u16 = 4;

    pub const SHOW_CONFIG_NEEDED: u16 = 10;

    pub const HTTP_API_SUCCESS: u16 = 21;
    pub const HTTP_API_ERROR: u16 = 22;
    pub const ENTITY_UPDATED: u16 = 23;

    pub const FETCH_ENTITY_STATUS: u16 = 40;
    pub const CALL_SWITCH_ON: u16 = 41;
    pub const CALL_SWITCH_OFF: u16 = 42;
    pub const CALL_LIGHT_ON: u16 = 43;
    pub const CALL_LIGHT_OFF: u16 = 44;
    pub const CALL_COVER_OPEN: u16 = 45;
    pub const CALL_COVER_CLOSE: u16 = 46;
    pub const CALL_COVER_STOP: u16 = 47;
    pub const CALL_CLIMATE_SET_MODE: u16 = 48;
    pub const CALL_CLIMATE_SET_TEMPERATURE: u16 = 49;
    pub const CALL_ALL_LIGHTS_OFF: u16 = 50;
    pub const CALL_ALL_COVERS_DOWN: u16 = 51;
    pub const CALL_ALL_SWITCHES_OFF: u16 = 52;
}

/// Platform event codes (always below the offset).
pub mod platform_code {
    pub const NETWORK_CONNECTED: u16 = 1;
    pub const NETWORK_LOST: u16 = 2;
    pub const CONFIGURATION_CHANGED: u16 = 3;
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WireError {
    #[error("code {0} is a platform event, not an application event")]
    NotAppEvent(u16),

    #[error("code {0} is an application event, not a platform event")]
    NotPlatformEvent(u16),

    #[error("unknown event code {0}")]
    UnknownCode(u16),

    #[error("bad payload for code {code}: {message}")]
    BadPayload { code: u16, message: String },

    #[error("payload for code {code} is {len} bytes, the channel carries at most 127")]
    PayloadTooLong { code: u16, len: usize },
}

/// One message on the shared channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireEvent {
    pub code: u16,
    pub value: i32,
    pub payload: String,
}

impl WireEvent {
    /// Build an event, truncating `payload` to the channel capacity. For
    /// free text only; see [`exact`](Self::exact).
    pub fn new(code: u16, value: i32, payload: &str) -> Self {
        Self {
            code,
            value,
            payload: truncate_payload(payload).to_owned(),
        }
    }

    /// Build an event whose payload must arrive intact.
    pub fn exact(code: u16, value: i32, payload: &str) -> Result<Self, WireError> {
        if payload.len() > MAX_PAYLOAD_LEN {
            return Err(WireError::PayloadTooLong {
                code,
                len: payload.len(),
            });
        }
        Ok(Self {
            code,
            value,
            payload: payload.to_owned(),
        })
    }

    /// Application event with the offset applied to `app_code`.
    pub fn app(app_code: u16, value: i32, payload: &str) -> Result<Self, WireError> {
        Self::exact(app_code.saturating_add(APP_EVENT_OFFSET), value, payload)
    }

    pub fn is_app_event(&self) -> bool {
        is_app_code(self.code)
    }

    /// Code with the offset removed, or `None` for platform events.
    pub fn app_code(&self) -> Option<u16> {
        self.code.checked_sub(APP_EVENT_OFFSET)
    }

    fn split_param(&self, code: u16) -> Result<(EntityId, &str), WireError> {
        let (id, param) = self
            .payload
            .split_once(PARAM_SEPARATOR)
            .ok_or_else(|| bad_payload(code, "expected 'id|parameter'"))?;
        Ok((parse_id(code, id)?, param))
    }

    fn entity(&self, code: u16) -> Result<EntityId, WireError> {
        parse_id(code, &self.payload)
    }
}

pub fn is_app_code(code: u16) -> bool {
    code >= APP_EVENT_OFFSET
}

fn truncate_payload(payload: &str) -> &str {
    if payload.len() <= MAX_PAYLOAD_LEN {
        return payload;
    }
    let mut end = MAX_PAYLOAD_LEN;
    while !payload.is_char_boundary(end) {
        end -= 1;
    }
    &payload[..end]
}

fn parse_id(code: u16, raw: &str) -> Result<EntityId, WireError> {
    EntityId::parse(raw).map_err(|e| bad_payload(code, &e.to_string()))
}

fn bad_payload(code: u16, message: &str) -> WireError {
    WireError::BadPayload {
        code,
        message: message.to_owned(),
    }
}

// ── AppEvent ────────────────────────────────────────────────────────

impl TryFrom<&AppEvent> for WireEvent {
    type Error = WireError;

    fn try_from(event: &AppEvent) -> Result<Self, Self::Error> {
        use app_code as c;
        match event {
            AppEvent::Bootstrap => Self::app(c::DISPLAY_BOOTSTRAP, 0, ""),
            AppEvent::ShowConfigNeeded { url } => Self::app(c::SHOW_CONFIG_NEEDED, 0, url),
            AppEvent::ConfigSet => Self::app(c::CONFIG_SET, 0, ""),
            AppEvent::EntityUpdated { id } => Self::app(c::ENTITY_UPDATED, 0, id.as_str()),
            AppEvent::ApiSuccess => Self::app(c::HTTP_API_SUCCESS, 0, ""),
            AppEvent::ApiError { message, code } => Ok(Self::new(
                c::HTTP_API_ERROR.saturating_add(APP_EVENT_OFFSET),
                *code,
                message,
            )),
        }
    }
}

impl TryFrom<&WireEvent> for AppEvent {
    type Error = WireError;

    fn try_from(wire: &WireEvent) -> Result<Self, Self::Error> {
        use app_code as c;
        let code = wire.app_code().ok_or(WireError::NotAppEvent(wire.code))?;
        let event = match code {
            c::DISPLAY_BOOTSTRAP => Self::Bootstrap,
            c::SHOW_CONFIG_NEEDED => Self::ShowConfigNeeded {
                url: wire.payload.clone(),
            },
            c::CONFIG_SET => Self::ConfigSet,
            c::ENTITY_UPDATED => Self::EntityUpdated {
                id: wire.entity(code)?,
            },
            c::HTTP_API_SUCCESS => Self::ApiSuccess,
            c::HTTP_API_ERROR => Self::ApiError {
                message: wire.payload.clone(),
                code: wire.value,
            },
            _ => return Err(WireError::UnknownCode(wire.code)),
        };
        Ok(event)
    }
}

// ── Intent ──────────────────────────────────────────────────────────

impl TryFrom<&Intent> for WireEvent {
    type Error = WireError;

    fn try_from(intent: &Intent) -> Result<Self, Self::Error> {
        use app_code as c;
        let single = |code: u16, id: &EntityId| Self::app(code, 0, id.as_str());
        match intent {
            Intent::FetchEntityStatus { id } => single(c::FETCH_ENTITY_STATUS, id),
            Intent::SwitchOn { id } => single(c::CALL_SWITCH_ON, id),
            Intent::SwitchOff { id } => single(c::CALL_SWITCH_OFF, id),
            Intent::LightOn { id } => single(c::CALL_LIGHT_ON, id),
            Intent::LightOff { id } => single(c::CALL_LIGHT_OFF, id),
            Intent::CoverOpen { id } => single(c::CALL_COVER_OPEN, id),
            Intent::CoverClose { id } => single(c::CALL_COVER_CLOSE, id),
            Intent::CoverStop { id } => single(c::CALL_COVER_STOP, id),
            Intent::ClimateSetMode { id, mode } => Self::app(
                c::CALL_CLIMATE_SET_MODE,
                0,
                &format!("{id}{PARAM_SEPARATOR}{mode}"),
            ),
            Intent::ClimateSetTemperature { id, temperature } => Self::app(
                c::CALL_CLIMATE_SET_TEMPERATURE,
                0,
                &format!("{id}{PARAM_SEPARATOR}{temperature}"),
            ),
            Intent::AllLightsOff => Self::app(c::CALL_ALL_LIGHTS_OFF, 0, ""),
            Intent::AllCoversDown => Self::app(c::CALL_ALL_COVERS_DOWN, 0, ""),
            Intent::AllSwitchesOff => Self::app(c::CALL_ALL_SWITCHES_OFF, 0, ""),
        }
    }
}

impl TryFrom<&WireEvent> for Intent {
    type Error = WireError;

    fn try_from(wire: &WireEvent) -> Result<Self, Self::Error> {
        use app_code as c;
        let code = wire.app_code().ok_or(WireError::NotAppEvent(wire.code))?;
        let intent = match code {
            c::FETCH_ENTITY_STATUS => Self::FetchEntityStatus {
                id: wire.entity(code)?,
            },
            c::CALL_SWITCH_ON => Self::SwitchOn {
                id: wire.entity(code)?,
            },
            c::CALL_SWITCH_OFF => Self::SwitchOff {
                id: wire.entity(code)?,
            },
            c::CALL_LIGHT_ON => Self::LightOn {
                id: wire.entity(code)?,
            },
            c::CALL_LIGHT_OFF => Self::LightOff {
                id: wire.entity(code)?,
            },
            c::CALL_COVER_OPEN => Self::CoverOpen {
                id: wire.entity(code)?,
            },
            c::CALL_COVER_CLOSE => Self::CoverClose {
                id: wire.entity(code)?,
            },
            c::CALL_COVER_STOP => Self::CoverStop {
                id: wire.entity(code)?,
            },
            c::CALL_CLIMATE_SET_MODE => {
                let (id, mode) = wire.split_param(code)?;
                if mode.is_empty() {
                    return Err(bad_payload(code, "empty hvac mode"));
                }
                Self::ClimateSetMode {
                    id,
                    mode: mode.to_owned(),
                }
            }
            c::CALL_CLIMATE_SET_TEMPERATURE => {
                let (id, raw) = wire.split_param(code)?;
                let temperature = raw
                    .parse::<f64>()
                    .ok()
                    .filter(|t| t.is_finite())
                    .ok_or_else(|| bad_payload(code, "temperature is not a number"))?;
                Self::ClimateSetTemperature { id, temperature }
            }
            c::CALL_ALL_LIGHTS_OFF => Self::AllLightsOff,
            c::CALL_ALL_COVERS_DOWN => Self::AllCoversDown,
            c::CALL_ALL_SWITCHES_OFF => Self::AllSwitchesOff,
            _ => return Err(WireError::UnknownCode(wire.code)),
        };
        Ok(intent)
    }
}

// ── PlatformEvent ───────────────────────────────────────────────────

impl TryFrom<&PlatformEvent> for WireEvent {
    type Error = WireError;

    fn try_from(event: &PlatformEvent) -> Result<Self, Self::Error> {
        use platform_code as p;
        match event {
            PlatformEvent::NetworkConnected => Self::exact(p::NETWORK_CONNECTED, 0, ""),
            PlatformEvent::NetworkLost => Self::exact(p::NETWORK_LOST, 0, ""),
            PlatformEvent::ConfigurationChanged => Self::exact(p::CONFIGURATION_CHANGED, 0, ""),
            PlatformEvent::App(intent) => Self::try_from(intent),
        }
    }
}

/// Route a channel message: codes at or above the offset decode as
/// intents, the rest as platform signals.
impl TryFrom<&WireEvent> for PlatformEvent {
    type Error = WireError;

    fn try_from(wire: &WireEvent) -> Result<Self, Self::Error> {
        use platform_code as p;
        if wire.is_app_event() {
            return Intent::try_from(wire).map(Self::App);
        }
        match wire.code {
            p::NETWORK_CONNECTED => Ok(Self::NetworkConnected),
            p::NETWORK_LOST => Ok(Self::NetworkLost),
            p::CONFIGURATION_CHANGED => Ok(Self::ConfigurationChanged),
            other => Err(WireError::UnknownCode(other)),
        }
    }
}
