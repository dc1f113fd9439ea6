// ── Outbound REST actions ──
//
// `CommandService` turns intents into single REST calls and performs the
// bulk fetch of the selection. Every failure is absorbed here: callers
// only see a `bool`, the user sees indicator feedback.

mod service;

use thiserror::Error;

use crate::store::StoreError;

pub use service::{CommandService, FetchSummary, fetch_entity_list, selectable_entities};

/// Why a command or fetch did not succeed.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("Home Assistant unreachable: {reason}")]
    TransportUnavailable { reason: String },

    #[error("Home Assistant rejected the request (HTTP {status})")]
    RemoteRejected { status: u16 },

    #[error("malformed response: {message}")]
    MalformedResponse { message: String },

    #[error("refused: {reason}")]
    Refused { reason: String },

    #[error(transparent)]
    Store(StoreError),
}

impl From<habridge_api::Error> for CommandError {
    fn from(err: habridge_api::Error) -> Self {
        use habridge_api::Error as Api;
        match err {
            Api::RemoteRejected { status, .. } => Self::RemoteRejected { status },
            Api::Authentication { .. } => Self::RemoteRejected { status: 401 },
            Api::Deserialization { message, .. } => Self::MalformedResponse { message },
            Api::Transport(e) => match e.status() {
                Some(status) => Self::RemoteRejected {
                    status: status.as_u16(),
                },
                None => Self::TransportUnavailable {
                    reason: e.to_string(),
                },
            },
            other @ (Api::InvalidUrl(_) | Api::Tls(_) | Api::WebSocketConnect(_)) => {
                Self::TransportUnavailable {
                    reason: other.to_string(),
                }
            }
        }
    }
}

impl From<StoreError> for CommandError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Parse { message, .. } => Self::MalformedResponse { message },
            busy @ StoreError::Busy { .. } => Self::Store(busy),
        }
    }
}

impl CommandError {
    /// HTTP status when the server answered.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::RemoteRejected { status } => Some(*status),
            _ => None,
        }
    }
}
