// ── Realtime protocol session ──
//
// Sans-io state machine for one logical subscription. The driver feeds it
// connection lifecycle changes and inbound text frames; it answers with
// the frame to send, if any. Store writes and owner notifications happen
// here so the driver stays a thin pump.

use std::collections::HashSet;
use std::sync::Arc;

use secrecy::SecretString;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use habridge_api::messages::EventBody;
use habridge_api::{ClientMessage, ServerMessage};

use crate::model::{EntityId, EntitySnapshot};
use crate::store::EntityStore;

/// Where the session stands on the current connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// No transport connection.
    Disconnected,
    /// Connected; waiting for the server's `auth_required`.
    Connecting,
    /// Credentials sent; waiting for `auth_ok` or `auth_invalid`.
    AuthPending,
    /// Authenticated and `subscribe_events` sent.
    Subscribed,
}

/// Notifications for the session's owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolEvent {
    /// A snapshot for `id` was written to the store.
    StateChanged { id: EntityId },
    Subscribed,
    AuthenticationFailed { message: String },
    TransportError { reason: String },
}

pub struct ProtocolSession {
    token: SecretString,
    /// The only ids whose updates are cached and announced.
    selection: HashSet<EntityId>,
    store: Arc<EntityStore>,
    notify: mpsc::UnboundedSender<ProtocolEvent>,
    phase: SessionPhase,
    /// Next request id on this connection. Starts at 1.
    next_id: u64,
    auth_sent: bool,
    auth_rejected: bool,
}

impl ProtocolSession {
    pub fn new(
        token: SecretString,
        selection: HashSet<EntityId>,
        store: Arc<EntityStore>,
        notify: mpsc::UnboundedSender<ProtocolEvent>,
    ) -> Self {
        Self {
            token,
            selection,
            store,
            notify,
            phase: SessionPhase::Disconnected,
            next_id: 1,
            auth_sent: false,
            auth_rejected: false,
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// A fresh transport connection is up. Nothing is sent until the
    /// server asks for credentials.
    pub fn connection_opened(&mut self) {
        debug!("realtime connection opened");
        self.reset_connection();
        self.phase = SessionPhase::Connecting;
    }

    /// The transport connection ended. The next connection starts a new
    /// handshake.
    pub fn connection_closed(&mut self) {
        if self.phase != SessionPhase::Disconnected {
            debug!(phase = ?self.phase, "realtime connection closed");
        }
        self.reset_connection();
    }

    pub fn transport_error(&mut self, reason: String) {
        warn!(%reason, "realtime transport error");
        self.send(ProtocolEvent::TransportError { reason });
    }

    fn reset_connection(&mut self) {
        self.phase = SessionPhase::Disconnected;
        self.next_id = 1;
        self.auth_sent = false;
        self.auth_rejected = false;
    }

    fn send(&self, event: ProtocolEvent) {
        if self.notify.send(event).is_err() {
            trace!("protocol owner gone, notification dropped");
        }
    }

    fn take_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Handle one inbound text frame, returning the reply to send.
    pub async fn handle_text(&mut self, text: &str) -> Option<ClientMessage> {
        let message = match ServerMessage::parse(text) {
            Ok(message) => message,
            Err(e) => {
                debug!(error = %e, "unparseable realtime frame dropped");
                return None;
            }
        };

        match message {
            ServerMessage::AuthRequired { ha_version } => self.on_auth_required(ha_version),
            ServerMessage::AuthOk { ha_version } => self.on_auth_ok(ha_version),
            ServerMessage::AuthInvalid { message } => {
                self.on_auth_invalid(message);
                None
            }
            ServerMessage::Result { id, success, error } => {
                if success {
                    debug!(id = ?id, "request acknowledged");
                } else {
                    let detail = error.and_then(|e| e.message).unwrap_or_default();
                    warn!(id = ?id, error = %detail, "request rejected by server");
                }
                None
            }
            ServerMessage::Event { event, .. } => {
                self.on_event(event).await;
                None
            }
            ServerMessage::Other => None,
        }
    }

    fn on_auth_required(&mut self, ha_version: Option<String>) -> Option<ClientMessage> {
        if self.phase == SessionPhase::Disconnected {
            debug!("auth_required without a connection, ignored");
            return None;
        }
        if self.auth_sent || self.auth_rejected {
            debug!("repeated auth_required on this connection, ignored");
            return None;
        }
        debug!(ha_version = ?ha_version, "server requested authentication");
        self.auth_sent = true;
        self.phase = SessionPhase::AuthPending;
        Some(ClientMessage::auth(self.token.clone()))
    }

    fn on_auth_ok(&mut self, ha_version: Option<String>) -> Option<ClientMessage> {
        if self.phase != SessionPhase::AuthPending {
            debug!(phase = ?self.phase, "unexpected auth_ok, ignored");
            return None;
        }
        let id = self.take_id();
        self.phase = SessionPhase::Subscribed;
        info!(ha_version = ?ha_version, id, "authenticated, subscribing to state changes");
        self.send(ProtocolEvent::Subscribed);
        Some(ClientMessage::subscribe_state_changed(id))
    }

    fn on_auth_invalid(&mut self, message: Option<String>) {
        let message = message.unwrap_or_else(|| "access token rejected".into());
        warn!(%message, "realtime authentication rejected");
        self.auth_rejected = true;
        self.phase = SessionPhase::Connecting;
        self.send(ProtocolEvent::AuthenticationFailed { message });
    }

    async fn on_event(&mut self, event: EventBody) {
        if self.phase != SessionPhase::Subscribed {
            trace!("event before subscription, ignored");
            return;
        }
        let data = event.data;

        let Ok(id) = EntityId::parse(&data.entity_id) else {
            trace!(entity_id = %data.entity_id, "event for unsupported entity dropped");
            return;
        };
        if !self.selection.contains(&id) {
            trace!(entity_id = %id, "event for unselected entity dropped");
            return;
        }
        let Some(new_state) = data.new_state else {
            debug!(entity_id = %id, "entity removed upstream, cached snapshot kept");
            return;
        };

        let snapshot = match EntitySnapshot::from_value(&id, new_state) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(entity_id = %id, error = %e, "malformed new_state dropped");
                return;
            }
        };

        match self.store.insert(snapshot).await {
            Ok(stored) => {
                trace!(entity_id = %id, state = %stored.state, "state_changed applied");
                self.send(ProtocolEvent::StateChanged { id });
            }
            Err(e) => warn!(entity_id = %id, error = %e, "state_changed not stored"),
        }
    }
}
