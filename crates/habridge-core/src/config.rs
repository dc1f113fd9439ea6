// ── Runtime bridge configuration ──
//
// These types describe how the bridge talks to Home Assistant. They carry
// credential data and tuning, but never touch disk: the binary builds a
// `BridgeConfig` from `habridge-config` and hands it in.

use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use url::Url;

use habridge_api::{TlsMode, TransportConfig};

use crate::error::CoreError;
use crate::store::DEFAULT_LOCK_TIMEOUT;

/// Home Assistant's default HTTP port.
pub const DEFAULT_PORT: u16 = 8123;

/// Connection credentials as persisted by the configuration portal.
#[derive(Debug, Clone)]
pub struct Credentials {
    /// Bare host (`192.168.1.10`, `ha.local`) or a full base URL.
    pub host: String,
    pub port: u16,
    /// Long-lived access token.
    pub token: SecretString,
}

impl Credentials {
    pub fn new(host: impl Into<String>, port: u16, token: SecretString) -> Self {
        Self {
            host: host.into(),
            port,
            token,
        }
    }

    /// REST base URL. A host that already carries a scheme is used as-is;
    /// a bare host becomes `http://{host}:{port}`.
    pub fn base_url(&self) -> Result<Url, CoreError> {
        let host = self.host.trim();
        if host.is_empty() {
            return Err(CoreError::Configuration {
                message: "Home Assistant host is empty".into(),
            });
        }
        if self.token.expose_secret().trim().is_empty() {
            return Err(CoreError::Configuration {
                message: "access token is empty".into(),
            });
        }

        let raw = if host.contains("://") {
            host.to_owned()
        } else {
            format!("http://{host}:{}", self.port)
        };
        Url::parse(&raw).map_err(|e| CoreError::Configuration {
            message: format!("invalid Home Assistant address '{raw}': {e}"),
        })
    }
}

/// Tuning for the bridge runtime.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Pause between successive fetches of the bulk refresh.
    pub fetch_delay: Duration,
    /// Bound on entity store lock acquisition.
    pub lock_timeout: Duration,
    /// HTTP and WebSocket handshake timeout.
    pub request_timeout: Duration,
    /// Period of the orchestrator tick (portal servicing).
    pub tick_interval: Duration,
    pub tls: TlsMode,
    /// Portal URL announced in `ShowConfigNeeded` when the gate has none.
    pub portal_url: Option<String>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            fetch_delay: Duration::from_millis(100),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            request_timeout: Duration::from_secs(10),
            tick_interval: Duration::from_millis(100),
            tls: TlsMode::System,
            portal_url: None,
        }
    }
}

impl BridgeConfig {
    pub fn transport(&self) -> TransportConfig {
        TransportConfig {
            tls: self.tls,
            timeout: self.request_timeout,
        }
    }
}
