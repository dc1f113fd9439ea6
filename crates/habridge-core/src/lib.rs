//! Sync engine between a device and a Home Assistant server.
//!
//! - **[`Orchestrator`]**: readiness state machine. Gates all
//!   synchronization behind the [`ConfigurationGate`], builds the services
//!   once configuration is valid, and translates connectivity, configuration
//!   and renderer events into [`AppEvent`]s.
//!
//! - **[`ProtocolClient`]**: realtime subscription over the Home Assistant
//!   WebSocket API. The handshake lives in the sans-io [`ProtocolSession`].
//!
//! - **[`EntityStore`]**: last-known snapshot per entity, shared between
//!   the sync path (writers) and the renderer ([`StoreReader`]).
//!
//! - **[`CommandService`]**: outbound REST calls and the bulk fetch of the
//!   entity selection.
//!
//! The numeric channel encoding used on the device is kept in
//! [`event::wire`].

pub mod command;
pub mod config;
pub mod error;
pub mod event;
pub mod gate;
pub mod indicator;
pub mod model;
pub mod orchestrator;
pub mod protocol;
pub mod settings;
pub mod store;

// ── Primary re-exports ──────────────────────────────────────────────
pub use command::{CommandError, CommandService, FetchSummary, fetch_entity_list, selectable_entities};
pub use config::{BridgeConfig, Credentials, DEFAULT_PORT};
pub use error::CoreError;
pub use event::{AppEvent, Intent, PlatformEvent, WireEvent};
pub use gate::{ChangeCallback, ConfigurationGate, SettingsGate};
pub use indicator::{Feedback, Indicator, LogIndicator};
pub use model::{Domain, EntityId, EntitySnapshot, SelectedEntity};
pub use orchestrator::{Orchestrator, PlatformSender, ReadinessState};
pub use protocol::{ProtocolClient, ProtocolEvent, ProtocolSession, ProtocolTarget, SessionPhase};
pub use settings::{MemoryPersistence, Persistence, SettingKey, Settings};
pub use store::{EntityStore, StoreError, StoreReader};

// Transport types consumers need to configure the bridge.
pub use habridge_api::{ReconnectConfig, RemoteState, TlsMode};
