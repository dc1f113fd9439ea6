#![allow(clippy::unwrap_used)]
// Lifecycle tests for the readiness state machine, against a mocked Home
// Assistant REST API.

mod common;

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::json;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_json, header, method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

use habridge_core::{
    AppEvent, BridgeConfig, CoreError, EntityId, Intent, LogIndicator, MemoryPersistence,
    Orchestrator, Persistence, PlatformEvent, ReadinessState, ReconnectConfig, SelectedEntity,
    SettingKey, Settings, SettingsGate,
};

const PORTAL: &str = "http://192.168.4.1/";

// ── Helpers ─────────────────────────────────────────────────────────

fn id(raw: &str) -> EntityId {
    EntityId::parse(raw).unwrap()
}

fn selection_json(ids: &[&str]) -> String {
    let entries: Vec<_> = ids.iter().map(|raw| json!({ "entity_id": raw })).collect();
    serde_json::to_string(&entries).unwrap()
}

fn configured(host: &str, ids: &[&str]) -> Settings {
    Settings::new(Arc::new(MemoryPersistence::with_values([
        (SettingKey::HaHost, host.to_owned()),
        (SettingKey::HaApiKey, common::TOKEN.to_owned()),
        (SettingKey::HaEntities, selection_json(ids)),
    ])))
}

fn setup_only(host: &str) -> Settings {
    Settings::new(Arc::new(MemoryPersistence::with_values([
        (SettingKey::HaHost, host.to_owned()),
        (SettingKey::HaApiKey, common::TOKEN.to_owned()),
    ])))
}

fn bridge(settings: Settings) -> (Orchestrator, Arc<SettingsGate>) {
    let gate = Arc::new(SettingsGate::new(settings.clone(), PORTAL));
    let config = BridgeConfig {
        fetch_delay: Duration::ZERO,
        ..BridgeConfig::default()
    };
    let orchestrator = Orchestrator::new(config, settings, gate.clone(), Arc::new(LogIndicator))
        .with_reconnect(ReconnectConfig {
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(10),
            max_retries: Some(0),
        });
    (orchestrator, gate)
}

fn drain(rx: &mut broadcast::Receiver<AppEvent>) -> Vec<AppEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn kitchen_doc(state: &str) -> serde_json::Value {
    json!({
        "entity_id": "light.kitchen",
        "state": state,
        "attributes": { "friendly_name": "Kitchen" },
        "last_changed": "2026-10-19T08:00:00+00:00",
        "last_updated": "2026-10-19T08:00:00+00:00"
    })
}

async fn mount_kitchen(server: &MockServer, expected_calls: u64) {
    Mock::given(method("GET"))
        .and(path("/api/states/light.kitchen"))
        .and(header("authorization", format!("Bearer {}", common::TOKEN).as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(kitchen_doc("on")))
        .expect(expected_calls)
        .mount(server)
        .await;
}

/// Bring a bridge to `Ready` against `server`, returning it with its
/// event receiver (already drained).
async fn ready_bridge(
    server: &MockServer,
) -> (Orchestrator, Arc<SettingsGate>, broadcast::Receiver<AppEvent>) {
    let (mut bridge, gate) = bridge(configured(&server.uri(), &["light.kitchen"]));
    let mut events = bridge.events();
    bridge.initialize().unwrap();
    bridge.handle_platform_event(PlatformEvent::NetworkConnected).await;
    assert_eq!(bridge.current_state(), ReadinessState::Ready);
    drain(&mut events);
    (bridge, gate, events)
}

// ── Gate evaluation ─────────────────────────────────────────────────

#[tokio::test]
async fn missing_credentials_ask_for_setup() {
    let (mut bridge, _gate) = bridge(Settings::new(Arc::new(MemoryPersistence::new())));
    let mut events = bridge.events();

    bridge.initialize().unwrap();
    assert_eq!(bridge.current_state(), ReadinessState::Initializing);

    bridge.handle_platform_event(PlatformEvent::NetworkConnected).await;

    assert_eq!(bridge.current_state(), ReadinessState::SetupNeeded);
    assert_eq!(bridge.previous_state(), ReadinessState::NetworkReady);
    assert!(!bridge.has_command_service());
    assert_eq!(
        drain(&mut events),
        vec![
            AppEvent::Bootstrap,
            AppEvent::ShowConfigNeeded { url: PORTAL.into() },
        ]
    );
}

#[tokio::test]
async fn missing_selection_asks_for_config() {
    let (mut bridge, _gate) = bridge(setup_only("http://127.0.0.1:9"));
    let mut events = bridge.events();

    bridge.initialize().unwrap();
    bridge.handle_platform_event(PlatformEvent::NetworkConnected).await;

    assert_eq!(bridge.current_state(), ReadinessState::ConfigNeeded);
    assert_eq!(
        drain(&mut events),
        vec![
            AppEvent::Bootstrap,
            AppEvent::ShowConfigNeeded { url: PORTAL.into() },
        ]
    );
}

#[tokio::test]
async fn successful_fetch_reaches_ready() {
    let server = MockServer::start().await;
    mount_kitchen(&server, 1).await;

    let (mut bridge, _gate) = bridge(configured(&server.uri(), &["light.kitchen"]));
    let mut events = bridge.events();
    bridge.initialize().unwrap();
    bridge.handle_platform_event(PlatformEvent::NetworkConnected).await;

    assert_eq!(bridge.current_state(), ReadinessState::Ready);
    assert!(bridge.has_command_service());
    assert_eq!(
        drain(&mut events),
        vec![AppEvent::Bootstrap, AppEvent::ConfigSet]
    );

    let snapshot = bridge.reader().get(&id("light.kitchen")).await.unwrap().unwrap();
    assert_eq!(snapshot.state, "on");
    assert_eq!(snapshot.display_name(), "Kitchen");
}

#[tokio::test]
async fn empty_selection_is_ready_without_fetching() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path_regex("^/api/states"))
        .respond_with(ResponseTemplate::new(200).set_body_json(kitchen_doc("on")))
        .expect(0)
        .mount(&server)
        .await;

    let (mut bridge, _gate) = bridge(configured(&server.uri(), &[]));
    let mut events = bridge.events();
    bridge.initialize().unwrap();
    bridge.handle_platform_event(PlatformEvent::NetworkConnected).await;

    assert_eq!(bridge.current_state(), ReadinessState::Ready);
    assert!(bridge.has_command_service());
    assert_eq!(
        drain(&mut events),
        vec![AppEvent::Bootstrap, AppEvent::ConfigSet]
    );
    assert!(bridge.reader().list_ids().await.unwrap().is_empty());
}

#[tokio::test]
async fn all_fetches_failing_enters_error_then_recovers() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/states/light.kitchen"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let (mut bridge, _gate) = bridge(configured(&server.uri(), &["light.kitchen"]));
    let mut events = bridge.events();
    bridge.initialize().unwrap();
    bridge.handle_platform_event(PlatformEvent::NetworkConnected).await;

    assert_eq!(bridge.current_state(), ReadinessState::Error);
    assert!(!bridge.has_command_service());
    assert_eq!(
        drain(&mut events),
        vec![
            AppEvent::Bootstrap,
            AppEvent::ApiError {
                message: "App error".into(),
                code: -1,
            },
        ]
    );

    server.reset().await;
    mount_kitchen(&server, 1).await;
    bridge.handle_platform_event(PlatformEvent::NetworkConnected).await;

    assert_eq!(bridge.current_state(), ReadinessState::Ready);
    assert_eq!(drain(&mut events), vec![AppEvent::ConfigSet]);
}

#[tokio::test]
async fn partial_fetch_failure_still_reaches_ready() {
    let server = MockServer::start().await;
    mount_kitchen(&server, 1).await;
    Mock::given(method("GET"))
        .and(path("/api/states/switch.fan"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let (mut bridge, _gate) = bridge(configured(&server.uri(), &["light.kitchen", "switch.fan"]));
    bridge.initialize().unwrap();
    bridge.handle_platform_event(PlatformEvent::NetworkConnected).await;

    assert_eq!(bridge.current_state(), ReadinessState::Ready);
    assert_eq!(bridge.reader().list_ids().await.unwrap(), vec![id("light.kitchen")]);
}

#[tokio::test]
async fn initialize_failure_enters_error() {
    struct Broken;

    impl Persistence for Broken {
        fn load(&self) -> Result<(), CoreError> {
            Err(CoreError::Persistence {
                message: "flash unreadable".into(),
            })
        }
        fn get(&self, _key: SettingKey) -> Result<Option<String>, CoreError> {
            Ok(None)
        }
        fn set(&self, _key: SettingKey, _value: &str) -> Result<(), CoreError> {
            Ok(())
        }
        fn reset(&self) -> Result<(), CoreError> {
            Ok(())
        }
    }

    let (mut bridge, _gate) = bridge(Settings::new(Arc::new(Broken)));
    let mut events = bridge.events();

    assert!(bridge.initialize().is_err());
    assert_eq!(bridge.current_state(), ReadinessState::Error);
    assert_eq!(
        drain(&mut events),
        vec![AppEvent::ApiError {
            message: "App error".into(),
            code: -1,
        }]
    );
}

// ── Connectivity ────────────────────────────────────────────────────

#[tokio::test]
async fn repeated_network_connected_is_ignored_once_ready() {
    let server = MockServer::start().await;
    mount_kitchen(&server, 1).await;

    let (mut bridge, _gate, mut events) = ready_bridge(&server).await;
    bridge.handle_platform_event(PlatformEvent::NetworkConnected).await;
    bridge.handle_platform_event(PlatformEvent::NetworkConnected).await;

    assert_eq!(bridge.current_state(), ReadinessState::Ready);
    assert!(drain(&mut events).is_empty());
}

#[tokio::test]
async fn network_lost_tears_down_and_reconnect_rebuilds() {
    let server = MockServer::start().await;
    mount_kitchen(&server, 2).await;

    let (mut bridge, _gate, mut events) = ready_bridge(&server).await;
    bridge.handle_platform_event(PlatformEvent::NetworkLost).await;

    assert_eq!(bridge.current_state(), ReadinessState::NetworkLost);
    assert!(!bridge.has_command_service());
    assert!(!bridge.is_subscribed());
    assert!(drain(&mut events).is_empty());

    bridge.handle_platform_event(PlatformEvent::NetworkConnected).await;
    assert_eq!(bridge.current_state(), ReadinessState::Ready);
    assert_eq!(drain(&mut events), vec![AppEvent::ConfigSet]);
}

// ── Configuration changes ───────────────────────────────────────────

#[tokio::test]
async fn saving_a_selection_brings_the_bridge_up() {
    let server = MockServer::start().await;
    mount_kitchen(&server, 1).await;

    let (mut bridge, gate) = bridge(setup_only(&server.uri()));
    let mut events = bridge.events();
    bridge.initialize().unwrap();
    bridge.handle_platform_event(PlatformEvent::NetworkConnected).await;
    assert_eq!(bridge.current_state(), ReadinessState::ConfigNeeded);
    drain(&mut events);

    gate.settings()
        .set_selection(&[SelectedEntity::new(id("light.kitchen"), "Kitchen")])
        .unwrap();
    gate.notify_changed();
    bridge.process_pending().await;

    assert_eq!(bridge.current_state(), ReadinessState::Ready);
    assert_eq!(bridge.previous_state(), ReadinessState::ConfigNeeded);
    assert_eq!(drain(&mut events), vec![AppEvent::ConfigSet]);
}

#[tokio::test]
async fn change_while_ready_reannounces_without_state_change() {
    let server = MockServer::start().await;
    mount_kitchen(&server, 2).await;

    let (mut bridge, gate, mut events) = ready_bridge(&server).await;
    let state = bridge.state();

    gate.notify_changed();
    bridge.process_pending().await;

    assert_eq!(bridge.current_state(), ReadinessState::Ready);
    assert_eq!(bridge.previous_state(), ReadinessState::NetworkReady);
    assert!(!state.has_changed().unwrap());
    assert_eq!(drain(&mut events), vec![AppEvent::ConfigSet]);
}

#[tokio::test]
async fn clearing_credentials_falls_back_to_setup() {
    let server = MockServer::start().await;
    mount_kitchen(&server, 1).await;

    let (mut bridge, gate, mut events) = ready_bridge(&server).await;
    gate.settings().reset().unwrap();
    gate.notify_changed();
    bridge.process_pending().await;

    assert_eq!(bridge.current_state(), ReadinessState::SetupNeeded);
    assert!(!bridge.has_command_service());
    assert_eq!(
        drain(&mut events),
        vec![AppEvent::ShowConfigNeeded { url: PORTAL.into() }]
    );
}

#[tokio::test]
async fn change_during_network_loss_is_deferred() {
    let server = MockServer::start().await;
    mount_kitchen(&server, 1).await;

    let (mut bridge, gate, mut events) = ready_bridge(&server).await;
    bridge.handle_platform_event(PlatformEvent::NetworkLost).await;

    gate.notify_changed();
    bridge.process_pending().await;

    assert_eq!(bridge.current_state(), ReadinessState::NetworkLost);
    assert!(drain(&mut events).is_empty());
}

// ── Intents ─────────────────────────────────────────────────────────

#[tokio::test]
async fn intent_before_ready_is_dropped() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(0)
        .mount(&server)
        .await;

    let (mut bridge, _gate) = bridge(setup_only(&server.uri()));
    let mut events = bridge.events();
    bridge.initialize().unwrap();
    bridge.handle_platform_event(PlatformEvent::NetworkConnected).await;
    drain(&mut events);

    bridge
        .handle_platform_event(Intent::LightOn { id: id("light.kitchen") }.into())
        .await;

    assert_eq!(bridge.current_state(), ReadinessState::ConfigNeeded);
    assert!(drain(&mut events).is_empty());
}

#[tokio::test]
async fn intent_when_ready_calls_the_service() {
    let server = MockServer::start().await;
    mount_kitchen(&server, 1).await;
    Mock::given(method("POST"))
        .and(path("/api/services/light/turn_off"))
        .and(body_json(json!({ "entity_id": "light.kitchen" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&server)
        .await;

    let (mut bridge, _gate, mut events) = ready_bridge(&server).await;
    bridge
        .handle_platform_event(Intent::LightOff { id: id("light.kitchen") }.into())
        .await;

    assert_eq!(drain(&mut events), vec![AppEvent::ApiSuccess]);
}

#[tokio::test]
async fn fetch_intent_announces_the_updated_entity() {
    let server = MockServer::start().await;
    mount_kitchen(&server, 2).await;

    let (mut bridge, _gate, mut events) = ready_bridge(&server).await;
    let sender = bridge.sender();
    sender
        .send(Intent::FetchEntityStatus { id: id("light.kitchen") }.into())
        .unwrap();
    bridge.process_pending().await;

    assert_eq!(
        drain(&mut events),
        vec![AppEvent::EntityUpdated { id: id("light.kitchen") }]
    );
}

#[tokio::test]
async fn failed_intent_emits_nothing() {
    let server = MockServer::start().await;
    mount_kitchen(&server, 1).await;
    Mock::given(method("POST"))
        .and(path("/api/services/light/turn_on"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let (mut bridge, _gate, mut events) = ready_bridge(&server).await;
    bridge
        .handle_platform_event(Intent::LightOn { id: id("light.kitchen") }.into())
        .await;

    assert_eq!(bridge.current_state(), ReadinessState::Ready);
    assert!(drain(&mut events).is_empty());
}

// ── Realtime ────────────────────────────────────────────────────────

#[tokio::test]
async fn realtime_update_reaches_the_store_and_renderer() {
    let mut ha = common::FakeHomeAssistant::start(&[("light.kitchen", kitchen_doc("off"))]).await;

    let (mut bridge, _gate) = bridge(configured(&ha.base_url(), &["light.kitchen"]));
    let mut events = bridge.events();
    let reader = bridge.reader();
    bridge.initialize().unwrap();
    bridge.handle_platform_event(PlatformEvent::NetworkConnected).await;
    assert_eq!(bridge.current_state(), ReadinessState::Ready);
    drain(&mut events);

    let cancel = CancellationToken::new();
    let runner = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            bridge.run(cancel).await;
            bridge
        })
    };

    let auth = ha.next_frame().await;
    assert_eq!(auth, json!({ "type": "auth", "access_token": common::TOKEN }));
    let subscribe = ha.next_frame().await;
    assert_eq!(subscribe["id"], 1);
    assert_eq!(subscribe["type"], "subscribe_events");
    assert_eq!(subscribe["event_type"], "state_changed");

    ha.push(&common::state_changed("sensor.hallway", &json!({ "state": "19.5" })));
    ha.push(&common::state_changed("light.kitchen", &kitchen_doc("on")));

    let updated = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let AppEvent::EntityUpdated { id } = events.recv().await.unwrap() {
                break id;
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(updated, id("light.kitchen"));

    let snapshot = reader.get(&id("light.kitchen")).await.unwrap().unwrap();
    assert_eq!(snapshot.state, "on");
    assert!(reader.get(&id("sensor.hallway")).await.unwrap().is_none());

    cancel.cancel();
    let bridge = runner.await.unwrap();
    assert!(!bridge.is_subscribed());
}

#[tokio::test]
async fn realtime_auth_rejection_reports_without_leaving_ready() {
    let mut ha =
        common::FakeHomeAssistant::start_rejecting_realtime(&[("light.kitchen", kitchen_doc("off"))])
            .await;

    let (mut bridge, _gate) = bridge(configured(&ha.base_url(), &["light.kitchen"]));
    let mut events = bridge.events();
    let state = bridge.state();
    bridge.initialize().unwrap();
    bridge.handle_platform_event(PlatformEvent::NetworkConnected).await;
    assert_eq!(bridge.current_state(), ReadinessState::Ready);
    drain(&mut events);

    let cancel = CancellationToken::new();
    let runner = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            bridge.run(cancel).await;
            bridge
        })
    };

    let auth = ha.next_frame().await;
    assert_eq!(auth["type"], "auth");

    let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        event,
        AppEvent::ApiError {
            message: "Authentication failed".into(),
            code: 401
        }
    );
    assert_eq!(*state.borrow(), ReadinessState::Ready);

    cancel.cancel();
    let bridge = runner.await.unwrap();
    assert_eq!(bridge.current_state(), ReadinessState::Ready);
    assert_eq!(bridge.previous_state(), ReadinessState::NetworkReady);
}
