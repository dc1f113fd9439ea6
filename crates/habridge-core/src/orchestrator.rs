// ── Readiness state machine ──
//
// The orchestrator owns the bridge lifecycle. It is driven from a single
// foreground task: platform events, gate notifications and protocol
// notifications all arrive through its inbox, so state is only ever
// mutated here. Outbound events go to a broadcast channel and the current
// state is published through a watch channel.

use std::sync::Arc;
use std::time::Duration;

use secrecy::SecretString;
use serde::Serialize;
use strum::Display;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use habridge_api::ReconnectConfig;

use crate::command::CommandService;
use crate::config::BridgeConfig;
use crate::error::CoreError;
use crate::event::{AppEvent, Intent, PlatformEvent};
use crate::gate::ConfigurationGate;
use crate::indicator::Indicator;
use crate::protocol::{ProtocolClient, ProtocolEvent, ProtocolTarget};
use crate::settings::Settings;
use crate::store::{EntityStore, StoreReader};

const EVENT_CHANNEL_SIZE: usize = 256;

/// Code carried by the `ApiError` emitted on entering `Error`.
pub const APP_ERROR_CODE: i32 = -1;
/// Code carried by the `ApiError` emitted when realtime auth is rejected.
pub const AUTH_ERROR_CODE: i32 = 401;

// ── ReadinessState ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ReadinessState {
    Initializing,
    NetworkReady,
    NetworkLost,
    SetupNeeded,
    ConfigNeeded,
    Ready,
    Error,
}

/// Sender half of the orchestrator inbox, for the network layer and the
/// renderer.
pub type PlatformSender = mpsc::UnboundedSender<PlatformEvent>;

// ── Orchestrator ────────────────────────────────────────────────────

pub struct Orchestrator {
    config: BridgeConfig,
    settings: Settings,
    gate: Arc<dyn ConfigurationGate>,
    indicator: Arc<dyn Indicator>,
    store: Arc<EntityStore>,
    reconnect: ReconnectConfig,

    state: watch::Sender<ReadinessState>,
    previous: ReadinessState,
    events: broadcast::Sender<AppEvent>,

    inbox_tx: PlatformSender,
    inbox_rx: mpsc::UnboundedReceiver<PlatformEvent>,
    protocol_tx: mpsc::UnboundedSender<ProtocolEvent>,
    protocol_rx: mpsc::UnboundedReceiver<ProtocolEvent>,

    /// Present only while the selection is being served.
    commands: Option<CommandService>,
    protocol: Option<ProtocolClient>,
    token: Option<SecretString>,

    portal_started: bool,
    gate_registered: bool,
    cancel: CancellationToken,
}

impl Orchestrator {
    pub fn new(
        config: BridgeConfig,
        settings: Settings,
        gate: Arc<dyn ConfigurationGate>,
        indicator: Arc<dyn Indicator>,
    ) -> Self {
        let store = Arc::new(EntityStore::new(config.lock_timeout));
        let (state, _) = watch::channel(ReadinessState::Initializing);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        let (protocol_tx, protocol_rx) = mpsc::unbounded_channel();

        Self {
            config,
            settings,
            gate,
            indicator,
            store,
            reconnect: ReconnectConfig::default(),
            state,
            previous: ReadinessState::Initializing,
            events,
            inbox_tx,
            inbox_rx,
            protocol_tx,
            protocol_rx,
            commands: None,
            protocol: None,
            token: None,
            portal_started: false,
            gate_registered: false,
            cancel: CancellationToken::new(),
        }
    }

    /// Override the realtime transport's reconnect policy.
    pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    // ── Observers ────────────────────────────────────────────────────

    pub fn current_state(&self) -> ReadinessState {
        *self.state.borrow()
    }

    /// State before the last transition.
    pub fn previous_state(&self) -> ReadinessState {
        self.previous
    }

    pub fn state(&self) -> watch::Receiver<ReadinessState> {
        self.state.subscribe()
    }

    pub fn events(&self) -> broadcast::Receiver<AppEvent> {
        self.events.subscribe()
    }

    pub fn sender(&self) -> PlatformSender {
        self.inbox_tx.clone()
    }

    pub fn store(&self) -> Arc<EntityStore> {
        Arc::clone(&self.store)
    }

    pub fn reader(&self) -> StoreReader {
        self.store.reader()
    }

    pub fn has_command_service(&self) -> bool {
        self.commands.is_some()
    }

    pub fn is_subscribed(&self) -> bool {
        self.protocol.as_ref().is_some_and(ProtocolClient::is_running)
    }

    // ── Public contract ──────────────────────────────────────────────

    /// One-time bootstrap: load persisted settings and announce the
    /// renderer bootstrap.
    pub fn initialize(&mut self) -> Result<(), CoreError> {
        info!("initializing bridge");
        if let Err(e) = self.settings.load() {
            error!(error = %e, "failed to load persisted settings");
            self.set_state(ReadinessState::Error);
            return Err(e);
        }
        self.emit(AppEvent::Bootstrap);
        Ok(())
    }

    /// Single ingress for connectivity signals, configuration changes and
    /// renderer intents.
    pub async fn handle_platform_event(&mut self, event: PlatformEvent) {
        trace!(?event, state = %self.current_state(), "platform event");
        match event {
            PlatformEvent::NetworkConnected => match self.current_state() {
                ReadinessState::Initializing
                | ReadinessState::NetworkLost
                | ReadinessState::Error => self.transition(ReadinessState::NetworkReady).await,
                state => debug!(%state, "network connected, nothing to do"),
            },
            PlatformEvent::NetworkLost => {
                self.teardown();
                self.transition(ReadinessState::NetworkLost).await;
            }
            PlatformEvent::ConfigurationChanged => self.on_configuration_changed().await,
            PlatformEvent::App(intent) => {
                self.handle_intent(&intent).await;
            }
        }
    }

    /// Periodic hook: lets the configuration portal serve pending work.
    pub fn tick(&self) {
        self.gate.service_pending();
    }

    /// Drive the orchestrator until `cancel` fires. Inbox events queued
    /// before cancellation are still handled.
    pub async fn run(&mut self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.tick_period());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                Some(event) = self.inbox_rx.recv() => self.handle_platform_event(event).await,
                Some(event) = self.protocol_rx.recv() => self.handle_protocol_event(event),
                () = cancel.cancelled() => break,
                _ = ticker.tick() => self.tick(),
            }
        }

        self.shutdown();
    }

    /// Handle everything already queued in the inbox without waiting.
    pub async fn process_pending(&mut self) {
        loop {
            if let Ok(event) = self.inbox_rx.try_recv() {
                self.handle_platform_event(event).await;
            } else if let Ok(event) = self.protocol_rx.try_recv() {
                self.handle_protocol_event(event);
            } else {
                break;
            }
        }
    }

    /// Stop background work. The orchestrator can still be inspected.
    pub fn shutdown(&mut self) {
        self.teardown();
        self.cancel.cancel();
        info!("bridge stopped");
    }

    fn tick_period(&self) -> Duration {
        if self.config.tick_interval.is_zero() {
            Duration::from_millis(100)
        } else {
            self.config.tick_interval
        }
    }

    // ── Transitions ──────────────────────────────────────────────────

    async fn transition(&mut self, target: ReadinessState) {
        if self.set_state(target) && target == ReadinessState::NetworkReady {
            self.enter_network_ready().await;
        }
    }

    /// Switch state and run the synchronous entry action. Returns `false`
    /// when `target` is already current.
    fn set_state(&mut self, target: ReadinessState) -> bool {
        let current = self.current_state();
        if current == target {
            return false;
        }
        self.previous = current;
        self.state.send_replace(target);
        info!(from = %current, to = %target, "state change");

        match target {
            ReadinessState::Initializing => debug!("waiting for network"),
            ReadinessState::NetworkReady => debug!("network ready, validating configuration"),
            ReadinessState::NetworkLost => warn!("network lost, synchronization suspended"),
            ReadinessState::SetupNeeded | ReadinessState::ConfigNeeded => {
                let url = self.portal_url();
                self.emit(AppEvent::ShowConfigNeeded { url });
            }
            ReadinessState::Ready => {
                self.emit(AppEvent::ConfigSet);
                self.start_protocol();
            }
            ReadinessState::Error => {
                self.emit(AppEvent::api_error("App error", APP_ERROR_CODE));
            }
        }
        true
    }

    async fn enter_network_ready(&mut self) {
        if !self.portal_started {
            if let Err(e) = self.gate.start() {
                error!(error = %e, "configuration portal failed to start");
                self.set_state(ReadinessState::Error);
                return;
            }
            self.portal_started = true;
        }
        self.register_gate_callback();

        let next = self.evaluate_gate().await;
        self.set_state(next);
    }

    fn register_gate_callback(&mut self) {
        if self.gate_registered {
            return;
        }
        let inbox = self.inbox_tx.clone();
        self.gate.on_configuration_changed(Box::new(move || {
            if inbox.send(PlatformEvent::ConfigurationChanged).is_err() {
                trace!("orchestrator gone, configuration change dropped");
            }
        }));
        self.gate_registered = true;
    }

    /// Gate predicates first; only a fully configured bridge builds
    /// services and fetches.
    async fn evaluate_gate(&mut self) -> ReadinessState {
        if !self.gate.has_valid_setup() {
            self.teardown();
            return ReadinessState::SetupNeeded;
        }
        if !self.gate.has_valid_config() {
            self.teardown();
            return ReadinessState::ConfigNeeded;
        }
        match self.start_services().await {
            Ok(()) => ReadinessState::Ready,
            Err(e) => {
                error!(error = %e, "could not bring services up");
                ReadinessState::Error
            }
        }
    }

    async fn on_configuration_changed(&mut self) {
        let state = self.current_state();
        if matches!(
            state,
            ReadinessState::Initializing | ReadinessState::NetworkLost
        ) {
            debug!(%state, "configuration changed before network is up, deferred");
            return;
        }
        info!("configuration changed, re-evaluating");

        let next = self.evaluate_gate().await;
        if next == ReadinessState::Ready && state == ReadinessState::Ready {
            // Services were rebuilt under the old state.
            self.start_protocol();
            self.emit(AppEvent::ConfigSet);
        } else {
            self.set_state(next);
        }
    }

    // ── Services ─────────────────────────────────────────────────────

    /// Build the command service from current settings and run the bulk
    /// fetch. Fails when the service cannot be built, the selection cannot
    /// be decoded, or every fetch fails.
    async fn start_services(&mut self) -> Result<(), CoreError> {
        self.teardown();

        let credentials = self.settings.credentials()?;
        let selection = self.settings.selection()?;
        let service = CommandService::new(
            &credentials,
            &self.config,
            selection,
            Arc::clone(&self.store),
            Arc::clone(&self.indicator),
        )?;

        let summary = service.fetch_selected().await;
        if summary.all_failed() {
            return Err(CoreError::Connectivity {
                reason: format!("none of {} selected entities could be fetched", summary.requested),
            });
        }
        if !summary.failed.is_empty() {
            warn!(failed = ?summary.failed, "some selected entities could not be fetched");
        }

        self.token = Some(credentials.token);
        self.commands = Some(service);
        Ok(())
    }

    fn start_protocol(&mut self) {
        drop(self.protocol.take());
        let (Some(commands), Some(token)) = (&self.commands, &self.token) else {
            warn!("ready without services, realtime subscription not started");
            return;
        };
        let ws_url = match commands.client().websocket_url() {
            Ok(url) => url,
            Err(e) => {
                warn!(error = %e, "cannot derive realtime URL");
                return;
            }
        };
        let target = ProtocolTarget {
            ws_url,
            token: token.clone(),
            tls: self.config.tls,
            selection: commands
                .selection()
                .iter()
                .map(|selected| selected.entity_id.clone())
                .collect(),
        };
        self.protocol = Some(ProtocolClient::spawn(
            target,
            Arc::clone(&self.store),
            self.protocol_tx.clone(),
            self.reconnect.clone(),
            &self.cancel,
        ));
    }

    fn teardown(&mut self) {
        if self.protocol.take().is_some() {
            debug!("realtime subscription stopped");
        }
        if self.commands.take().is_some() {
            debug!("command service dropped");
        }
        self.token = None;
    }

    // ── Inbound handling ─────────────────────────────────────────────

    /// Dispatch one renderer intent. Returns whether it succeeded.
    async fn handle_intent(&mut self, intent: &Intent) -> bool {
        let state = self.current_state();
        let Some(commands) = self.commands.as_ref().filter(|_| state == ReadinessState::Ready)
        else {
            warn!(%intent, %state, "intent dropped, bridge not ready");
            return false;
        };

        debug!(%intent, "executing intent");
        let ok = commands.execute(intent).await;
        if ok {
            match intent {
                Intent::FetchEntityStatus { id } => {
                    self.emit(AppEvent::EntityUpdated { id: id.clone() });
                }
                _ => self.emit(AppEvent::ApiSuccess),
            }
        }
        ok
    }

    fn handle_protocol_event(&mut self, event: ProtocolEvent) {
        match event {
            ProtocolEvent::StateChanged { id } => self.emit(AppEvent::EntityUpdated { id }),
            ProtocolEvent::Subscribed => info!("realtime subscription active"),
            ProtocolEvent::AuthenticationFailed { message } => {
                warn!(%message, "realtime authentication failed");
                self.emit(AppEvent::api_error("Authentication failed", AUTH_ERROR_CODE));
            }
            ProtocolEvent::TransportError { reason } => {
                debug!(%reason, "realtime transport error");
            }
        }
    }

    fn portal_url(&self) -> String {
        let url = self.gate.portal_url();
        if url.is_empty() {
            self.config.portal_url.clone().unwrap_or_default()
        } else {
            url
        }
    }

    fn emit(&self, event: AppEvent) {
        debug!(event = %event, "app event");
        if self.events.send(event).is_err() {
            trace!("no renderer subscribed");
        }
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
