// Home Assistant REST client
//
// Wraps `reqwest::Client` with URL construction and status handling for
// the three REST endpoints the bridge needs. Bodies come back raw: the
// entity cache owns parsing, so a malformed document never half-applies.

use serde::Deserialize;
use serde_json::Value;
use secrecy::SecretString;
use tracing::debug;
use url::Url;

use crate::error::Error;
use crate::transport::TransportConfig;

/// One element of `GET /api/states`.
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteState {
    pub entity_id: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub attributes: serde_json::Map<String, Value>,
}

impl RemoteState {
    /// `attributes.friendly_name`, if the server sent one.
    pub fn friendly_name(&self) -> Option<&str> {
        self.attributes.get("friendly_name").and_then(Value::as_str)
    }
}

/// Raw HTTP client for the Home Assistant REST API.
///
/// Every request carries the bearer token configured at construction.
/// Only HTTP 200 counts as success; anything else surfaces as
/// [`Error::RemoteRejected`] (or [`Error::Authentication`] for 401).
#[derive(Debug, Clone)]
pub struct HassClient {
    http: reqwest::Client,
    base_url: Url,
}

impl HassClient {
    /// Create a client for `base_url` (e.g. `http://homeassistant.local:8123`).
    pub fn new(
        base_url: Url,
        token: &SecretString,
        transport: &TransportConfig,
    ) -> Result<Self, Error> {
        let http = transport.build_client_with_token(token)?;
        Ok(Self { http, base_url })
    }

    /// Create a client around a pre-built `reqwest::Client`.
    pub fn with_client(http: reqwest::Client, base_url: Url) -> Self {
        Self { http, base_url }
    }

    /// The server base URL.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    // ── URL builders ─────────────────────────────────────────────────

    /// `{base}/api/{path}`
    pub(crate) fn api_url(&self, path: &str) -> Result<Url, Error> {
        let full = format!("{}/api/{}", self.base_url.as_str().trim_end_matches('/'), path);
        Ok(Url::parse(&full)?)
    }

    /// Realtime endpoint derived from the REST base: `ws(s)://{host}/api/websocket`.
    pub fn websocket_url(&self) -> Result<Url, Error> {
        let mut url = self.api_url("websocket")?;
        let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
        url.set_scheme(scheme)
            .map_err(|()| Error::WebSocketConnect(format!("cannot derive {scheme} URL from {url}")))?;
        Ok(url)
    }

    // ── Endpoints ────────────────────────────────────────────────────

    /// `GET /api/states/{entity_id}`, returning the raw state document.
    pub async fn get_state(&self, entity_id: &str) -> Result<String, Error> {
        let url = self.api_url(&format!("states/{entity_id}"))?;
        debug!("GET {}", url);

        let resp = self.http.get(url).send().await?;
        Self::ok_body(resp).await
    }

    /// `GET /api/states`, every entity the server knows about.
    pub async fn list_states(&self) -> Result<Vec<RemoteState>, Error> {
        let url = self.api_url("states")?;
        debug!("GET {}", url);

        let resp = self.http.get(url).send().await?;
        let body = Self::ok_body(resp).await?;
        serde_json::from_str(&body).map_err(|e| Error::Deserialization {
            message: e.to_string(),
            body,
        })
    }

    /// `POST /api/services/{domain}/{service}` with a JSON body.
    pub async fn call_service(&self, domain: &str, service: &str, body: &Value) -> Result<(), Error> {
        let url = self.api_url(&format!("services/{domain}/{service}"))?;
        debug!("POST {}", url);

        let resp = self.http.post(url).json(body).send().await?;
        Self::ok_body(resp).await.map(|_| ())
    }

    // ── Response handling ────────────────────────────────────────────

    async fn ok_body(resp: reqwest::Response) -> Result<String, Error> {
        let status = resp.status();

        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(Error::Authentication {
                message: "access token rejected".into(),
            });
        }

        let body = resp.text().await?;
        if status == reqwest::StatusCode::OK {
            Ok(body)
        } else {
            Err(Error::RemoteRejected {
                status: status.as_u16(),
                body,
            })
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn client(base: &str) -> HassClient {
        HassClient::with_client(reqwest::Client::new(), Url::parse(base).unwrap())
    }

    #[test]
    fn api_url_joins_without_double_slash() {
        let c = client("http://ha.local:8123/");
        let url = c.api_url("states/light.kitchen").unwrap();
        assert_eq!(url.as_str(), "http://ha.local:8123/api/states/light.kitchen");
    }

    #[test]
    fn websocket_url_follows_scheme() {
        let plain = client("http://ha.local:8123");
        assert_eq!(
            plain.websocket_url().unwrap().as_str(),
            "ws://ha.local:8123/api/websocket"
        );

        let secure = client("https://ha.example.com");
        assert_eq!(
            secure.websocket_url().unwrap().as_str(),
            "wss://ha.example.com/api/websocket"
        );
    }

    #[test]
    fn remote_state_friendly_name() {
        let state: RemoteState = serde_json::from_value(serde_json::json!({
            "entity_id": "light.kitchen",
            "state": "on",
            "attributes": { "friendly_name": "Kitchen" }
        }))
        .unwrap();
        assert_eq!(state.friendly_name(), Some("Kitchen"));
    }
}
