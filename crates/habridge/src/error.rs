//! CLI error types with miette diagnostics.
//!
//! Maps core and config errors into user-facing errors with actionable
//! help text.

use miette::Diagnostic;
use thiserror::Error;

use habridge_config::ConfigError;
use habridge_core::CoreError;

pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const NOT_CONFIGURED: i32 = 4;
    pub const CONNECTION: i32 = 7;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────
    #[error("Could not reach Home Assistant")]
    #[diagnostic(
        code(habridge::connection_failed),
        help(
            "Check that the server is running and reachable.\n\
             Reason: {reason}\n\
             Current host: habridge config show"
        )
    )]
    ConnectionFailed { reason: String },

    #[error("Home Assistant rejected the request ({message})")]
    #[diagnostic(code(habridge::remote_error))]
    Remote { message: String },

    // ── Authentication ───────────────────────────────────────────────
    #[error("Authentication failed")]
    #[diagnostic(
        code(habridge::auth_failed),
        help(
            "Create a long-lived access token under your Home Assistant profile\n\
             and store it with: habridge config set-token"
        )
    )]
    AuthFailed { message: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error("{what} is not configured")]
    #[diagnostic(
        code(habridge::not_configured),
        help("Run: {fix}\nSettings file: {path}")
    )]
    NotConfigured {
        what: String,
        fix: String,
        path: String,
    },

    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(habridge::validation))]
    Validation { field: String, reason: String },

    #[error(transparent)]
    #[diagnostic(code(habridge::config))]
    Config(#[from] ConfigError),

    #[error("Settings storage failed: {message}")]
    #[diagnostic(code(habridge::settings))]
    Settings { message: String },

    #[error("{0}")]
    #[diagnostic(code(habridge::internal))]
    Internal(String),

    // ── IO / Serialization ───────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Invalid JSON: {0}")]
    #[diagnostic(code(habridge::json))]
    Json(#[from] serde_json::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. } => exit_code::CONNECTION,
            Self::AuthFailed { .. } => exit_code::AUTH,
            Self::NotConfigured { .. } => exit_code::NOT_CONFIGURED,
            Self::Validation { .. } => exit_code::USAGE,
            _ => exit_code::GENERAL,
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Connectivity { reason } => Self::ConnectionFailed { reason },
            CoreError::Authentication { message } => Self::AuthFailed { message },
            CoreError::Configuration { message } => Self::Validation {
                field: "settings".into(),
                reason: message,
            },
            CoreError::InvalidEntityId { id, reason } => Self::Validation {
                field: format!("entity id '{id}'"),
                reason,
            },
            CoreError::CommandFailure { message, .. } | CoreError::Parse { message } => {
                Self::Remote { message }
            }
            CoreError::Persistence { message } => Self::Settings { message },
            CoreError::StoreBusy { timeout_ms } => {
                Self::Internal(format!("entity store busy for {timeout_ms}ms"))
            }
            CoreError::Internal(message) => Self::Internal(message),
        }
    }
}
