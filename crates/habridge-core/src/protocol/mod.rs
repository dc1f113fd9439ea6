// ── Realtime subscription ──
//
// `ProtocolClient` owns a background task that pumps the api-level
// WebSocket transport through a `ProtocolSession`. Reconnects are the
// transport's business; every new connection gets a fresh handshake.

mod session;

use std::collections::HashSet;
use std::sync::Arc;

use secrecy::SecretString;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use habridge_api::{ReconnectConfig, TlsMode, TransportEvent, WebSocketHandle};

use crate::model::EntityId;
use crate::store::EntityStore;

pub use session::{ProtocolEvent, ProtocolSession, SessionPhase};

/// Where and as whom to subscribe, and which entities matter.
pub struct ProtocolTarget {
    pub ws_url: Url,
    pub token: SecretString,
    pub tls: TlsMode,
    pub selection: HashSet<EntityId>,
}

/// Handle to the running realtime subscription.
///
/// Dropping the handle stops the background task.
pub struct ProtocolClient {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl ProtocolClient {
    /// Connect to `target.ws_url` and start feeding `store`. Notifications
    /// go to `notify`; the task stops when `parent` is cancelled.
    pub fn spawn(
        target: ProtocolTarget,
        store: Arc<EntityStore>,
        notify: mpsc::UnboundedSender<ProtocolEvent>,
        reconnect: ReconnectConfig,
        parent: &CancellationToken,
    ) -> Self {
        let cancel = parent.child_token();
        let ProtocolTarget {
            ws_url,
            token,
            tls,
            selection,
        } = target;
        info!(url = %ws_url, entities = selection.len(), "starting realtime subscription");

        let handle = WebSocketHandle::connect_with_tls(ws_url, tls, reconnect, cancel.child_token());
        let session = ProtocolSession::new(token, selection, store, notify);
        let task = tokio::spawn(drive(handle, session, cancel.clone()));

        Self {
            cancel,
            task: Some(task),
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Stop the subscription and wait for the task to wind down.
    pub async fn stop(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "realtime task ended abnormally");
            }
        }
    }
}

impl Drop for ProtocolClient {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn drive(mut handle: WebSocketHandle, mut session: ProtocolSession, cancel: CancellationToken) {
    let frames = handle.frames();

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            event = handle.recv() => {
                let Some(event) = event else {
                    debug!("realtime transport exited");
                    break;
                };
                match event {
                    TransportEvent::Connected => session.connection_opened(),
                    TransportEvent::Disconnected => session.connection_closed(),
                    TransportEvent::Error(reason) => session.transport_error(reason),
                    TransportEvent::Text(text) => {
                        let Some(reply) = session.handle_text(&text).await else {
                            continue;
                        };
                        match reply.to_frame() {
                            Ok(frame) => {
                                if !frames.send(frame) {
                                    warn!("realtime transport closed while replying");
                                    break;
                                }
                            }
                            Err(e) => warn!(error = %e, "failed to encode realtime frame"),
                        }
                    }
                }
            }
        }
    }

    handle.shutdown();
    session.connection_closed();
    debug!("realtime subscription stopped");
}
