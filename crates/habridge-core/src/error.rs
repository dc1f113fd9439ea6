// ── Core error types ──
//
// User-facing errors from habridge-core. Consumers never see HTTP status
// codes or JSON parse failures directly: the `From<habridge_api::Error>`
// impl folds transport-layer errors into the bridge's own taxonomy.
// Only `Configuration` and `Connectivity` are allowed to move the
// readiness state machine; everything else is absorbed at the boundary.

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Readiness ────────────────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Cannot reach Home Assistant: {reason}")]
    Connectivity { reason: String },

    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    // ── Data ─────────────────────────────────────────────────────────
    #[error("Malformed document: {message}")]
    Parse { message: String },

    #[error("Invalid entity id '{id}': {reason}")]
    InvalidEntityId { id: String, reason: String },

    #[error("Entity store busy: lock not acquired within {timeout_ms}ms")]
    StoreBusy { timeout_ms: u64 },

    // ── Operations ───────────────────────────────────────────────────
    #[error("Command failed: {message}")]
    CommandFailure {
        message: String,
        /// HTTP status code, if the server answered at all.
        status: Option<u16>,
    },

    #[error("Settings storage error: {message}")]
    Persistence { message: String },

    // ── Internal ─────────────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<habridge_api::Error> for CoreError {
    fn from(err: habridge_api::Error) -> Self {
        match err {
            habridge_api::Error::Authentication { message } => {
                CoreError::Authentication { message }
            }
            habridge_api::Error::Transport(ref e) => {
                if e.is_connect() || e.is_timeout() {
                    CoreError::Connectivity {
                        reason: e.to_string(),
                    }
                } else {
                    CoreError::CommandFailure {
                        message: e.to_string(),
                        status: e.status().map(|s| s.as_u16()),
                    }
                }
            }
            habridge_api::Error::InvalidUrl(e) => CoreError::Configuration {
                message: format!("Invalid URL: {e}"),
            },
            habridge_api::Error::Tls(msg) => CoreError::Configuration {
                message: format!("TLS error: {msg}"),
            },
            habridge_api::Error::RemoteRejected { status, .. } => CoreError::CommandFailure {
                message: format!("remote rejected request (HTTP {status})"),
                status: Some(status),
            },
            habridge_api::Error::WebSocketConnect(reason) => CoreError::Connectivity {
                reason: format!("WebSocket connection failed: {reason}"),
            },
            habridge_api::Error::Deserialization { message, body: _ } => {
                CoreError::Parse { message }
            }
        }
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::Parse {
            message: err.to_string(),
        }
    }
}
