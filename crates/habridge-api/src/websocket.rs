//! WebSocket transport with auto-reconnect.
//!
//! Connects to the Home Assistant realtime endpoint and surfaces the raw
//! connection lifecycle (`Connected`, `Text`, `Disconnected`, `Error`)
//! through an ordered [`tokio::sync::mpsc`] channel. Outgoing text frames
//! are queued through [`FrameSender`]. Reconnection uses exponential
//! backoff + jitter; the protocol handshake itself is the caller's job,
//! so every `Connected` starts a fresh session.
//!
//! # Example
//!
//! ```rust,ignore
//! use habridge_api::websocket::{ReconnectConfig, TransportEvent, WebSocketHandle};
//! use tokio_util::sync::CancellationToken;
//! use url::Url;
//!
//! let cancel = CancellationToken::new();
//! let url = Url::parse("ws://homeassistant.local:8123/api/websocket")?;
//! let mut handle = WebSocketHandle::connect(url, ReconnectConfig::default(), cancel.clone());
//!
//! while let Some(event) = handle.recv().await {
//!     if let TransportEvent::Text(text) = event {
//!         println!("{text}");
//!     }
//! }
//! ```

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::Error;
use crate::transport::TlsMode;

// ── Channel capacity ─────────────────────────────────────────────────

const EVENT_CHANNEL_CAPACITY: usize = 1024;

// ── TransportEvent ───────────────────────────────────────────────────

/// Connection lifecycle and inbound frames, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A new connection is up. Nothing has been sent on it yet.
    Connected,
    /// An inbound text frame.
    Text(String),
    /// The current connection ended (close frame, stream end or error).
    Disconnected,
    /// A connection attempt or an established connection failed.
    Error(String),
}

// ── ReconnectConfig ──────────────────────────────────────────────────

/// Exponential backoff configuration for WebSocket reconnection.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt. Default: 1s.
    pub initial_delay: Duration,

    /// Upper bound on backoff delay. Default: 30s.
    pub max_delay: Duration,

    /// Maximum reconnection attempts before giving up.
    /// `None` means retry forever.
    pub max_retries: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_retries: None,
        }
    }
}

// ── FrameSender ──────────────────────────────────────────────────────

/// Cloneable handle for queueing outbound text frames.
///
/// Frames queued while no connection is up are discarded when the next
/// connection opens, so a stale handshake never leaks onto a new socket.
#[derive(Debug, Clone)]
pub struct FrameSender {
    tx: mpsc::UnboundedSender<String>,
}

impl FrameSender {
    /// Queue a text frame. Returns `false` if the transport has shut down.
    pub fn send(&self, frame: String) -> bool {
        self.tx.send(frame).is_ok()
    }
}

// ── WebSocketHandle ──────────────────────────────────────────────────

/// Handle to a running WebSocket transport.
///
/// Owns the inbound event receiver. Call [`shutdown`](Self::shutdown) or
/// cancel the token to tear down the background task.
pub struct WebSocketHandle {
    event_rx: mpsc::Receiver<TransportEvent>,
    frames: FrameSender,
    cancel: CancellationToken,
}

impl WebSocketHandle {
    /// Spawn the connect/reconnect loop and return immediately.
    pub fn connect(ws_url: Url, reconnect: ReconnectConfig, cancel: CancellationToken) -> Self {
        Self::connect_with_tls(ws_url, TlsMode::System, reconnect, cancel)
    }

    /// Like [`connect`](Self::connect), verifying `wss://` certificates
    /// according to `tls`.
    pub fn connect_with_tls(
        ws_url: Url,
        tls: TlsMode,
        reconnect: ReconnectConfig,
        cancel: CancellationToken,
    ) -> Self {
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (frame_tx, frame_rx) = mpsc::unbounded_channel();

        let task_cancel = cancel.clone();
        tokio::spawn(async move {
            let connector = match tls.websocket_connector() {
                Ok(connector) => connector,
                Err(e) => {
                    tracing::error!(error = %e, "realtime TLS setup failed");
                    let _ = event_tx.send(TransportEvent::Error(e.to_string())).await;
                    return;
                }
            };
            let endpoint = Endpoint { url: ws_url, connector };
            ws_loop(endpoint, event_tx, frame_rx, reconnect, task_cancel).await;
        });

        Self {
            event_rx,
            frames: FrameSender { tx: frame_tx },
            cancel,
        }
    }

    /// Next transport event, or `None` once the background task has exited.
    pub async fn recv(&mut self) -> Option<TransportEvent> {
        self.event_rx.recv().await
    }

    /// Handle for queueing outbound frames.
    pub fn frames(&self) -> FrameSender {
        self.frames.clone()
    }

    /// Signal the background task to shut down gracefully.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

// ── Background reconnection loop ─────────────────────────────────────

/// Connect, pump until the connection drops, back off, repeat. Exits on
/// cancellation, when the event receiver is gone, or once the retry
/// budget is spent.
async fn ws_loop(
    endpoint: Endpoint,
    event_tx: mpsc::Sender<TransportEvent>,
    mut frame_rx: mpsc::UnboundedReceiver<String>,
    reconnect: ReconnectConfig,
    cancel: CancellationToken,
) {
    let mut backoff = Backoff::new(reconnect);

    while !cancel.is_cancelled() {
        let outcome = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            outcome = connect_and_pump(&endpoint, &event_tx, &mut frame_rx, &cancel) => outcome,
        };

        let error = match outcome {
            Ok(()) => {
                tracing::debug!(url = %endpoint.url, "realtime connection closed, reconnecting");
                backoff.reset();
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    () = tokio::time::sleep(backoff.config.initial_delay) => {}
                }
                continue;
            }
            Err(e) => e,
        };

        tracing::warn!(url = %endpoint.url, error = %error, attempt = backoff.attempt, "realtime connection failed");
        if event_tx
            .send(TransportEvent::Error(error.to_string()))
            .await
            .is_err()
        {
            break;
        }

        let Some(delay) = backoff.next_delay() else {
            tracing::error!(attempts = backoff.attempt, "realtime reconnect budget exhausted");
            break;
        };
        tracing::debug!(delay = ?delay, "reconnect scheduled");

        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(delay) => {}
        }
    }

    tracing::debug!("realtime transport stopped");
}

/// Where to connect and how to wrap `wss://` streams.
struct Endpoint {
    url: Url,
    connector: Option<tokio_tungstenite::Connector>,
}

// ── Single connection lifecycle ──────────────────────────────────────

/// Establish one connection, then shuttle frames until it drops.
///
/// Emits `Connected` once the upgrade succeeds and `Disconnected` when
/// the connection ends for any reason after that.
async fn connect_and_pump(
    endpoint: &Endpoint,
    event_tx: &mpsc::Sender<TransportEvent>,
    frame_rx: &mut mpsc::UnboundedReceiver<String>,
    cancel: &CancellationToken,
) -> Result<(), Error> {
    tracing::info!(url = %endpoint.url, "opening realtime connection");

    let (stream, _) = tokio_tungstenite::connect_async_tls_with_config(
        endpoint.url.as_str(),
        None,
        false,
        endpoint.connector.clone(),
    )
    .await
    .map_err(|e| Error::WebSocketConnect(e.to_string()))?;

    // Drop anything queued for a previous connection.
    while frame_rx.try_recv().is_ok() {}

    if event_tx.send(TransportEvent::Connected).await.is_err() {
        cancel.cancel();
        return Ok(());
    }

    let result = pump(stream, event_tx, frame_rx, cancel).await;
    let _ = event_tx.send(TransportEvent::Disconnected).await;
    result
}

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// What the pump does after one inbound frame.
enum Inbound {
    Continue,
    Closed,
}

async fn pump(
    stream: WsStream,
    event_tx: &mpsc::Sender<TransportEvent>,
    frame_rx: &mut mpsc::UnboundedReceiver<String>,
    cancel: &CancellationToken,
) -> Result<(), Error> {
    let (mut sink, mut source) = stream.split();

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                let _ = sink.send(Message::Close(None)).await;
                return Ok(());
            }
            outgoing = frame_rx.recv() => {
                let Some(text) = outgoing else {
                    // Every FrameSender is gone.
                    cancel.cancel();
                    return Ok(());
                };
                sink.send(Message::text(text))
                    .await
                    .map_err(|e| Error::WebSocketConnect(e.to_string()))?;
            }
            incoming = source.next() => {
                let message = incoming
                    .transpose()
                    .map_err(|e| Error::WebSocketConnect(e.to_string()))?;
                match forward(message, event_tx).await {
                    Inbound::Continue => {}
                    Inbound::Closed => return Ok(()),
                }
            }
        }
    }
}

/// Hand one inbound message to the event channel. `None` is end of stream.
async fn forward(message: Option<Message>, event_tx: &mpsc::Sender<TransportEvent>) -> Inbound {
    match message {
        Some(Message::Text(text)) => {
            let delivered = event_tx
                .send(TransportEvent::Text(text.as_str().to_owned()))
                .await
                .is_ok();
            if delivered { Inbound::Continue } else { Inbound::Closed }
        }
        Some(Message::Close(reason)) => {
            match reason {
                Some(frame) => tracing::info!(code = %frame.code, reason = %frame.reason, "server closed realtime connection"),
                None => tracing::info!("server closed realtime connection"),
            }
            Inbound::Closed
        }
        None => {
            tracing::info!("realtime stream ended");
            Inbound::Closed
        }
        // Pongs are answered by tungstenite; binary frames carry nothing for us.
        Some(_) => Inbound::Continue,
    }
}

// ── Backoff ──────────────────────────────────────────────────────────

/// Retry schedule: `initial * 2^attempt`, capped at `max_delay`, spread
/// by up to a quarter either way so devices on one server drift apart.
struct Backoff {
    config: ReconnectConfig,
    attempt: u32,
}

impl Backoff {
    fn new(config: ReconnectConfig) -> Self {
        Self { config, attempt: 0 }
    }

    fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Delay before the next attempt, or `None` when retries are used up.
    fn next_delay(&mut self) -> Option<Duration> {
        if self.config.max_retries.is_some_and(|max| self.attempt >= max) {
            return None;
        }
        let delay = delay_for(self.attempt, &self.config);
        self.attempt = self.attempt.saturating_add(1);
        Some(delay)
    }
}

fn delay_for(attempt: u32, config: &ReconnectConfig) -> Duration {
    let doublings = attempt.min(20);
    let factor = 1_u32 << doublings;
    let base = config
        .initial_delay
        .checked_mul(factor)
        .unwrap_or(config.max_delay)
        .min(config.max_delay);

    // Deterministic spread in [0.75, 1.25) keyed on the attempt number.
    let spread_permille = 750 + (attempt.wrapping_mul(2_654_435_761) >> 16) % 500;
    base.saturating_mul(spread_permille) / 1000
}

// ── Tests ────────────────────────────────────────────────────────────
