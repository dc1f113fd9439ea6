// habridge-api: Async Rust client for the Home Assistant REST and WebSocket APIs

pub mod error;
pub mod messages;
pub mod rest;
pub mod transport;
pub mod websocket;

pub use error::Error;
pub use messages::{ClientMessage, ServerMessage, StateChangedData};
pub use rest::{HassClient, RemoteState};
pub use transport::{TlsMode, TransportConfig};
pub use websocket::{FrameSender, ReconnectConfig, TransportEvent, WebSocketHandle};
