// ── Cross-boundary events ──
//
// Typed messages between the orchestrator and the renderer. `AppEvent`
// flows outward, `Intent` flows inward, and `PlatformEvent` is the single
// ingress into the orchestrator. The numeric channel encoding lives in
// `wire`.

pub mod wire;

use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use strum::{AsRefStr, IntoStaticStr};

use crate::error::CoreError;
use crate::model::{Domain, EntityId};

pub use wire::{APP_EVENT_OFFSET, WireEvent};

// ── AppEvent ────────────────────────────────────────────────────────

/// Core → renderer notification.
#[derive(Debug, Clone, PartialEq, Serialize, IntoStaticStr)]
#[serde(tag = "kind", rename_all = "snake_case")]
#[strum(serialize_all = "kebab-case")]
pub enum AppEvent {
    Bootstrap,
    ShowConfigNeeded { url: String },
    ConfigSet,
    EntityUpdated { id: EntityId },
    ApiSuccess,
    ApiError { message: String, code: i32 },
}

impl AppEvent {
    pub fn kind(&self) -> &'static str {
        self.into()
    }

    pub(crate) fn api_error(message: impl Into<String>, code: i32) -> Self {
        Self::ApiError {
            message: message.into(),
            code,
        }
    }
}

impl fmt::Display for AppEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ShowConfigNeeded { url } => write!(f, "{} {url}", self.kind()),
            Self::EntityUpdated { id } => write!(f, "{} {id}", self.kind()),
            Self::ApiError { message, code } => write!(f, "{} [{code}] {message}", self.kind()),
            _ => f.write_str(self.kind()),
        }
    }
}

// ── Intent ──────────────────────────────────────────────────────────

/// Renderer → core request.
#[derive(Debug, Clone, PartialEq, Serialize, AsRefStr)]
#[serde(tag = "kind", rename_all = "snake_case")]
#[strum(serialize_all = "kebab-case")]
pub enum Intent {
    FetchEntityStatus { id: EntityId },
    SwitchOn { id: EntityId },
    SwitchOff { id: EntityId },
    LightOn { id: EntityId },
    LightOff { id: EntityId },
    CoverOpen { id: EntityId },
    CoverClose { id: EntityId },
    CoverStop { id: EntityId },
    ClimateSetMode { id: EntityId, mode: String },
    ClimateSetTemperature { id: EntityId, temperature: f64 },
    AllLightsOff,
    AllCoversDown,
    AllSwitchesOff,
}

impl Intent {
    /// Target entity, if the intent addresses exactly one.
    pub fn entity_id(&self) -> Option<&EntityId> {
        match self {
            Self::FetchEntityStatus { id }
            | Self::SwitchOn { id }
            | Self::SwitchOff { id }
            | Self::LightOn { id }
            | Self::LightOff { id }
            | Self::CoverOpen { id }
            | Self::CoverClose { id }
            | Self::CoverStop { id }
            | Self::ClimateSetMode { id, .. }
            | Self::ClimateSetTemperature { id, .. } => Some(id),
            Self::AllLightsOff | Self::AllCoversDown | Self::AllSwitchesOff => None,
        }
    }

    /// Domain the targeted entity must belong to. `FetchEntityStatus`
    /// accepts any allowed domain.
    pub fn required_domain(&self) -> Option<Domain> {
        match self {
            Self::SwitchOn { .. } | Self::SwitchOff { .. } | Self::AllSwitchesOff => {
                Some(Domain::Switch)
            }
            Self::LightOn { .. } | Self::LightOff { .. } | Self::AllLightsOff => Some(Domain::Light),
            Self::CoverOpen { .. }
            | Self::CoverClose { .. }
            | Self::CoverStop { .. }
            | Self::AllCoversDown => Some(Domain::Cover),
            Self::ClimateSetMode { .. } | Self::ClimateSetTemperature { .. } => {
                Some(Domain::Climate)
            }
            Self::FetchEntityStatus { .. } => None,
        }
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = self.as_ref();
        match self {
            Self::ClimateSetMode { id, mode } => write!(f, "{kind} {id} {mode}"),
            Self::ClimateSetTemperature { id, temperature } => {
                write!(f, "{kind} {id} {temperature}")
            }
            _ => match self.entity_id() {
                Some(id) => write!(f, "{kind} {id}"),
                None => f.write_str(kind),
            },
        }
    }
}

/// Parses the console form produced by `Display`: `light-on light.kitchen`,
/// `climate-set-temperature climate.lounge 21.5`, `all-lights-off`.
impl FromStr for Intent {
    type Err = CoreError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut parts = line.split_whitespace();
        let kind = parts.next().ok_or_else(|| parse_error("empty intent"))?;
        let intent = match kind {
            "fetch-entity-status" | "fetch" => Self::FetchEntityStatus {
                id: next_entity(&mut parts, kind)?,
            },
            "switch-on" => Self::SwitchOn { id: next_entity(&mut parts, kind)? },
            "switch-off" => Self::SwitchOff { id: next_entity(&mut parts, kind)? },
            "light-on" => Self::LightOn { id: next_entity(&mut parts, kind)? },
            "light-off" => Self::LightOff { id: next_entity(&mut parts, kind)? },
            "cover-open" => Self::CoverOpen { id: next_entity(&mut parts, kind)? },
            "cover-close" => Self::CoverClose { id: next_entity(&mut parts, kind)? },
            "cover-stop" => Self::CoverStop { id: next_entity(&mut parts, kind)? },
            "climate-set-mode" => {
                let id = next_entity(&mut parts, kind)?;
                let mode = parts
                    .next()
                    .ok_or_else(|| parse_error("'climate-set-mode' needs a mode"))?;
                Self::ClimateSetMode {
                    id,
                    mode: mode.to_owned(),
                }
            }
            "climate-set-temperature" => {
                let id = next_entity(&mut parts, kind)?;
                let temperature = parts
                    .next()
                    .and_then(|t| t.parse::<f64>().ok())
                    .filter(|t| t.is_finite())
                    .ok_or_else(|| parse_error("'climate-set-temperature' needs a number"))?;
                Self::ClimateSetTemperature { id, temperature }
            }
            "all-lights-off" => Self::AllLightsOff,
            "all-covers-down" => Self::AllCoversDown,
            "all-switches-off" => Self::AllSwitchesOff,
            other => return Err(parse_error(&format!("unknown intent '{other}'"))),
        };
        Ok(intent)
    }
}

fn next_entity<'a>(
    parts: &mut impl Iterator<Item = &'a str>,
    kind: &str,
) -> Result<EntityId, CoreError> {
    let raw = parts
        .next()
        .ok_or_else(|| parse_error(&format!("'{kind}' needs an entity id")))?;
    EntityId::parse(raw)
}

fn parse_error(message: &str) -> CoreError {
    CoreError::Parse {
        message: message.to_owned(),
    }
}

// ── PlatformEvent ───────────────────────────────────────────────────

/// Everything the orchestrator reacts to from the outside world.
#[derive(Debug, Clone, PartialEq)]
pub enum PlatformEvent {
    NetworkConnected,
    NetworkLost,
    ConfigurationChanged,
    App(Intent),
}

impl From<Intent> for PlatformEvent {
    fn from(intent: Intent) -> Self {
        Self::App(intent)
    }
}
