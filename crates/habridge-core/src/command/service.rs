use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use habridge_api::{HassClient, RemoteState, TransportConfig};

use super::CommandError;
use crate::config::{BridgeConfig, Credentials};
use crate::error::CoreError;
use crate::event::Intent;
use crate::indicator::{Feedback, Indicator};
use crate::model::{Domain, EntityId, EntitySnapshot, SelectedEntity};
use crate::store::EntityStore;

/// Outcome of a bulk fetch over the selection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchSummary {
    pub requested: usize,
    pub succeeded: usize,
    pub failed: Vec<EntityId>,
}

impl FetchSummary {
    /// Every requested fetch failed. An empty selection never counts as
    /// a failure.
    pub fn all_failed(&self) -> bool {
        self.requested > 0 && self.succeeded == 0
    }
}

/// Issues REST calls on behalf of the orchestrator.
///
/// Constructed only once the gate is satisfied, so its existence is what
/// makes intents acceptable. It only acts on ids from the selection it was
/// built with.
pub struct CommandService {
    client: HassClient,
    store: Arc<EntityStore>,
    selection: Vec<SelectedEntity>,
    indicator: Arc<dyn Indicator>,
    fetch_delay: Duration,
}

impl CommandService {
    pub fn new(
        credentials: &Credentials,
        config: &BridgeConfig,
        selection: Vec<SelectedEntity>,
        store: Arc<EntityStore>,
        indicator: Arc<dyn Indicator>,
    ) -> Result<Self, CoreError> {
        let base_url = credentials.base_url()?;
        let client = HassClient::new(base_url, &credentials.token, &config.transport())?;
        Ok(Self::with_client(
            client,
            selection,
            store,
            indicator,
            config.fetch_delay,
        ))
    }

    pub fn with_client(
        client: HassClient,
        selection: Vec<SelectedEntity>,
        store: Arc<EntityStore>,
        indicator: Arc<dyn Indicator>,
        fetch_delay: Duration,
    ) -> Self {
        Self {
            client,
            store,
            selection,
            indicator,
            fetch_delay,
        }
    }

    pub fn client(&self) -> &HassClient {
        &self.client
    }

    pub fn selection(&self) -> &[SelectedEntity] {
        &self.selection
    }

    pub fn is_selected(&self, id: &EntityId) -> bool {
        self.selection.iter().any(|s| &s.entity_id == id)
    }

    fn check_selected(&self, id: &EntityId) -> Result<(), CommandError> {
        if self.is_selected(id) {
            Ok(())
        } else {
            Err(CommandError::Refused {
                reason: format!("{id} is not in the entity selection"),
            })
        }
    }

    // ── Service calls ────────────────────────────────────────────────

    /// `POST /api/services/{domain}/{service}`.
    ///
    /// The body is `{"entity_id": id, ...params}`; `{}` when there is
    /// neither. Returns `true` only on HTTP 200. Never retried.
    pub async fn call_service(
        &self,
        domain: Domain,
        service: &str,
        entity_id: Option<&EntityId>,
        params: Map<String, Value>,
    ) -> bool {
        if let Err(e) = self.check_call(domain, entity_id) {
            warn!(%domain, service, error = %e, "service call refused");
            return false;
        }

        self.indicator.set_loading(true);
        let result = self.post_service(domain, service, entity_id, params).await;
        self.indicator.set_loading(false);

        match result {
            Ok(()) => {
                info!(%domain, service, entity_id = ?entity_id.map(EntityId::as_str), "service call succeeded");
                self.indicator.flash(Feedback::Success);
                true
            }
            Err(e) => {
                warn!(%domain, service, entity_id = ?entity_id.map(EntityId::as_str), error = %e, "service call failed");
                self.indicator.flash(Feedback::Failure);
                self.indicator.error_beep();
                false
            }
        }
    }

    fn check_call(&self, domain: Domain, entity_id: Option<&EntityId>) -> Result<(), CommandError> {
        if !domain.is_controllable() {
            return Err(CommandError::Refused {
                reason: format!("{domain} entities are read-only"),
            });
        }
        entity_id.map_or(Ok(()), |id| self.check_target(domain, id))
    }

    fn check_target(&self, domain: Domain, id: &EntityId) -> Result<(), CommandError> {
        if id.domain() != domain {
            return Err(CommandError::Refused {
                reason: format!("{id} is not a {domain} entity"),
            });
        }
        self.check_selected(id)
    }

    async fn post_service(
        &self,
        domain: Domain,
        service: &str,
        entity_id: Option<&EntityId>,
        params: Map<String, Value>,
    ) -> Result<(), CommandError> {
        let body = service_body(entity_id, params);
        self.client
            .call_service(domain.as_ref(), service, &body)
            .await?;
        Ok(())
    }

    // ── Fetches ──────────────────────────────────────────────────────

    /// `GET /api/states/{id}`; on 200 the body replaces the cached snapshot.
    pub async fn fetch_entity_status(&self, id: &EntityId) -> bool {
        match self.try_fetch(id).await {
            Ok(snapshot) => {
                debug!(entity_id = %id, state = %snapshot.state, "entity fetched");
                true
            }
            Err(e) => {
                warn!(entity_id = %id, error = %e, "entity fetch failed");
                false
            }
        }
    }

    async fn try_fetch(&self, id: &EntityId) -> Result<Arc<EntitySnapshot>, CommandError> {
        self.check_selected(id)?;

        self.indicator.set_loading(true);
        let body = self.client.get_state(id.as_str()).await;
        self.indicator.set_loading(false);

        Ok(self.store.set(id, &body?).await?)
    }

    /// Fetch every selected entity in order, pausing `fetch_delay` between
    /// requests.
    pub async fn fetch_selected(&self) -> FetchSummary {
        let mut summary = FetchSummary {
            requested: self.selection.len(),
            ..FetchSummary::default()
        };

        for (n, selected) in self.selection.iter().enumerate() {
            if n > 0 && !self.fetch_delay.is_zero() {
                tokio::time::sleep(self.fetch_delay).await;
            }
            if self.fetch_entity_status(&selected.entity_id).await {
                summary.succeeded += 1;
            } else {
                summary.failed.push(selected.entity_id.clone());
            }
        }

        info!(
            requested = summary.requested,
            succeeded = summary.succeeded,
            failed = summary.failed.len(),
            "bulk fetch complete"
        );
        summary
    }

    // ── Intents ──────────────────────────────────────────────────────

    /// Run one renderer intent.
    pub async fn execute(&self, intent: &Intent) -> bool {
        if let (Some(required), Some(id)) = (intent.required_domain(), intent.entity_id()) {
            if id.domain() != required {
                warn!(%intent, %required, "intent targets the wrong domain, refused");
                return false;
            }
        }
        match intent {
            Intent::FetchEntityStatus { id } => self.fetch_entity_status(id).await,
            Intent::SwitchOn { id } => self.switch_on(id).await,
            Intent::SwitchOff { id } => self.switch_off(id).await,
            Intent::LightOn { id } => self.light_on(id).await,
            Intent::LightOff { id } => self.light_off(id).await,
            Intent::CoverOpen { id } => self.cover_open(id).await,
            Intent::CoverClose { id } => self.cover_close(id).await,
            Intent::CoverStop { id } => self.cover_stop(id).await,
            Intent::ClimateSetMode { id, mode } => self.climate_set_mode(id, mode).await,
            Intent::ClimateSetTemperature { id, temperature } => {
                self.climate_set_temperature(id, *temperature).await
            }
            Intent::AllLightsOff => self.all_lights_off().await,
            Intent::AllCoversDown => self.all_covers_down().await,
            Intent::AllSwitchesOff => self.all_switches_off().await,
        }
    }

    async fn simple(&self, domain: Domain, service: &str, id: &EntityId) -> bool {
        self.call_service(domain, service, Some(id), Map::new()).await
    }

    pub async fn switch_on(&self, id: &EntityId) -> bool {
        self.simple(Domain::Switch, "turn_on", id).await
    }

    pub async fn switch_off(&self, id: &EntityId) -> bool {
        self.simple(Domain::Switch, "turn_off", id).await
    }

    pub async fn light_on(&self, id: &EntityId) -> bool {
        self.simple(Domain::Light, "turn_on", id).await
    }

    pub async fn light_off(&self, id: &EntityId) -> bool {
        self.simple(Domain::Light, "turn_off", id).await
    }

    pub async fn cover_open(&self, id: &EntityId) -> bool {
        self.simple(Domain::Cover, "open_cover", id).await
    }

    pub async fn cover_close(&self, id: &EntityId) -> bool {
        self.simple(Domain::Cover, "close_cover", id).await
    }

    pub async fn cover_stop(&self, id: &EntityId) -> bool {
        self.simple(Domain::Cover, "stop_cover", id).await
    }

    pub async fn climate_set_mode(&self, id: &EntityId, mode: &str) -> bool {
        let mut params = Map::new();
        params.insert("hvac_mode".into(), Value::from(mode));
        self.call_service(Domain::Climate, "set_hvac_mode", Some(id), params)
            .await
    }

    pub async fn climate_set_temperature(&self, id: &EntityId, temperature: f64) -> bool {
        let mut params = Map::new();
        params.insert("temperature".into(), Value::from(temperature));
        self.call_service(Domain::Climate, "set_temperature", Some(id), params)
            .await
    }

    pub async fn all_lights_off(&self) -> bool {
        self.bulk(Domain::Light, "turn_off").await
    }

    pub async fn all_covers_down(&self) -> bool {
        self.bulk(Domain::Cover, "close_cover").await
    }

    pub async fn all_switches_off(&self) -> bool {
        self.bulk(Domain::Switch, "turn_off").await
    }

    /// Apply `service` to every selected entity of `domain`, one call each.
    async fn bulk(&self, domain: Domain, service: &str) -> bool {
        let targets: Vec<&EntityId> = self
            .selection
            .iter()
            .map(|s| &s.entity_id)
            .filter(|id| id.domain() == domain)
            .collect();

        if targets.is_empty() {
            debug!(%domain, service, "no selected entities for bulk call");
            return true;
        }

        let mut all_ok = true;
        for (n, id) in targets.into_iter().enumerate() {
            if n > 0 && !self.fetch_delay.is_zero() {
                tokio::time::sleep(self.fetch_delay).await;
            }
            all_ok &= self.simple(domain, service, id).await;
        }
        all_ok
    }
}

fn service_body(entity_id: Option<&EntityId>, params: Map<String, Value>) -> Value {
    let mut body = Map::new();
    if let Some(id) = entity_id {
        body.insert("entity_id".into(), Value::from(id.as_str()));
    }
    body.extend(params);
    Value::Object(body)
}

// ── Portal helpers ──────────────────────────────────────────────────

/// `GET /api/states` with the given credentials, independent of any
/// running service. Used by the portal to build the selection UI.
pub async fn fetch_entity_list(
    credentials: &Credentials,
    transport: &TransportConfig,
) -> Result<Vec<RemoteState>, CoreError> {
    let client = HassClient::new(credentials.base_url()?, &credentials.token, transport)?;
    Ok(client.list_states().await?)
}

/// The allow-listed subset of a remote listing, in a shape ready to be
/// persisted as a selection.
pub fn selectable_entities(states: &[RemoteState]) -> Vec<SelectedEntity> {
    states
        .iter()
        .filter_map(|remote| {
            let id = EntityId::parse(&remote.entity_id).ok()?;
            Some(SelectedEntity {
                entity_id: id,
                friendly_name: remote.friendly_name().map(str::to_owned),
                state: Some(remote.state.clone()),
            })
        })
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    fn id(raw: &str) -> EntityId {
        EntityId::parse(raw).unwrap()
    }

    #[test]
    fn body_is_empty_object_without_target() {
        assert_eq!(service_body(None, Map::new()), json!({}));
    }

    #[test]
    fn body_merges_params_after_entity() {
        let mut params = Map::new();
        params.insert("temperature".into(), json!(21.5));
        assert_eq!(
            service_body(Some(&id("climate.lounge")), params),
            json!({ "entity_id": "climate.lounge", "temperature": 21.5 })
        );
    }

    #[test]
    fn summary_failure_rules() {
        assert!(!FetchSummary::default().all_failed());
        let partial = FetchSummary {
            requested: 2,
            succeeded: 1,
            failed: vec![id("light.a")],
        };
        assert!(!partial.all_failed());
        let total = FetchSummary {
            requested: 1,
            succeeded: 0,
            failed: vec![id("light.a")],
        };
        assert!(total.all_failed());
    }

    #[test]
    fn selectable_filters_allow_list() {
        let states: Vec<RemoteState> = serde_json::from_value(json!([
            { "entity_id": "light.kitchen", "state": "on", "attributes": { "friendly_name": "Kitchen" } },
            { "entity_id": "sun.sun", "state": "above_horizon", "attributes": {} },
            { "entity_id": "sensor.temp", "state": "21", "attributes": {} }
        ]))
        .unwrap();
        let selectable = selectable_entities(&states);
        assert_eq!(selectable.len(), 2);
        assert_eq!(selectable[0].display_name(), "Kitchen");
        assert_eq!(selectable[1].state.as_deref(), Some("21"));
    }
}
