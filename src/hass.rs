use std::sync::Arc;

use async_trait::async_trait;
use futures::{Sink, SinkExt, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::api::{prepare_call, HueApi};
use crate::color::kelvin::kelvin_to_mirek;
use crate::color::{MAX_HUE, MAX_SATURATION};
use crate::config::{ClientConfig, HassConfig};
use crate::events::{HassEventSynchronizer, HassStateChangedEvent, LightEventListener};
use crate::manual::ManualOverrideTracker;
use crate::ratelimit::RateLimiter;
use crate::resource::Resource;
use crate::state::{Capability, ColorMode, LightCapabilities, LightState, PutCall, PutOutcome};
use crate::store::{Collection, ResourceStore};
use crate::transport::{HttpTransport, Transport};
use crate::HueError;

const LIGHT_DOMAINS: [&str; 2] = ["light", "switch"];
const SUBSCRIPTION_ID: u64 = 1;

/// Hub brightness (`0..=255`) on the bridge scale (`1..=254`).
pub fn hass_to_bridge_brightness(value: u16) -> u16 {
    let value = f64::from(value.min(255));
    (value / 255.0 * 253.0).round() as u16 + 1
}

/// Bridge brightness (`1..=254`) on the hub scale. The dimmest bridge level
/// stays 1 instead of collapsing to 0, which the hub treats as off.
pub fn bridge_to_hass_brightness(value: u16) -> u16 {
    let value = f64::from(value.clamp(1, 254) - 1);
    ((value / 253.0 * 255.0).round() as u16).max(1)
}

fn domain(entity_id: &str) -> Option<&str> {
    entity_id.split_once('.').map(|(domain, _)| domain)
}

/// Returns the domain of a controllable entity.
fn light_domain(entity_id: &str) -> crate::Result<&str> {
    domain(entity_id)
        .filter(|domain| LIGHT_DOMAINS.contains(domain))
        .ok_or_else(|| HueError::UnsupportedResourceType {
            id: entity_id.to_string(),
        })
}

/// One hub entity as returned by `/api/states`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HassState {
    pub entity_id: String,
    pub state: String,
    #[serde(default)]
    pub attributes: Map<String, Value>,
}

impl Resource for HassState {
    const KIND: &'static str = "entity";

    fn id(&self) -> &str {
        &self.entity_id
    }

    fn name(&self) -> Option<&str> {
        self.attributes.get("friendly_name")?.as_str()
    }
}

impl HassState {
    pub fn is_on(&self) -> bool {
        self.state == "on"
    }

    pub fn is_unavailable(&self) -> bool {
        self.state == "unavailable"
    }

    fn is_light(&self) -> bool {
        light_domain(&self.entity_id).is_ok()
    }

    /// Light groups are lights listing their members in `entity_id`.
    pub fn is_group(&self) -> bool {
        self.is_light() && self.attributes.get("entity_id").is_some_and(Value::is_array)
    }

    /// Entities listed in the `entity_id` attribute, for groups and scenes.
    pub fn members(&self) -> Vec<String> {
        self.attributes
            .get("entity_id")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect()
    }

    fn attr_f64(&self, key: &str) -> Option<f64> {
        self.attributes.get(key)?.as_f64()
    }

    fn attr_u16(&self, key: &str) -> Option<u16> {
        self.attributes
            .get(key)?
            .as_u64()
            .and_then(|value| u16::try_from(value).ok())
    }

    fn attr_pair(&self, key: &str) -> Option<(f64, f64)> {
        match self.attributes.get(key)?.as_array()?.as_slice() {
            [a, b] => Some((a.as_f64()?, b.as_f64()?)),
            _ => None,
        }
    }

    pub fn capabilities(&self) -> LightCapabilities {
        let mut capabilities = LightCapabilities::default().with_capability(Capability::OnOff);
        if domain(&self.entity_id) != Some("light") {
            return capabilities;
        }
        let modes = self
            .attributes
            .get("supported_color_modes")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(Value::as_str);
        for mode in modes {
            match mode {
                "brightness" | "white" => {
                    capabilities = capabilities.with_capability(Capability::Brightness);
                }
                "color_temp" => {
                    capabilities = capabilities
                        .with_capability(Capability::Brightness)
                        .with_capability(Capability::ColorTemperature);
                }
                "hs" | "xy" | "rgb" | "rgbw" | "rgbww" => {
                    capabilities = capabilities
                        .with_capability(Capability::Brightness)
                        .with_capability(Capability::Color);
                }
                _ => {}
            }
        }

        let min = self
            .attr_u16("min_mireds")
            .or_else(|| self.attr_u16("max_color_temp_kelvin").map(|k| kelvin_to_mirek(k.into())));
        let max = self
            .attr_u16("max_mireds")
            .or_else(|| self.attr_u16("min_color_temp_kelvin").map(|k| kelvin_to_mirek(k.into())));
        if let (Some(min), Some(max)) = (min, max) {
            capabilities = capabilities.with_ct_range(min, max);
        }

        capabilities.effects = self
            .attributes
            .get("effect_list")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect();
        capabilities
    }

    pub fn light_state(&self) -> LightState {
        let color_mode = match self.attributes.get("color_mode").and_then(Value::as_str) {
            Some("color_temp") => Some(ColorMode::Ct),
            Some("hs") => Some(ColorMode::Hs),
            Some("xy" | "rgb" | "rgbw" | "rgbww") => Some(ColorMode::Xy),
            _ => None,
        };
        let color_temperature = self.attr_u16("color_temp").or_else(|| {
            self.attr_u16("color_temp_kelvin")
                .map(|kelvin| kelvin_to_mirek(kelvin.into()))
        });
        let xy = self.attr_pair("xy_color");
        let hs = self.attr_pair("hs_color");
        LightState {
            id: self.entity_id.clone(),
            brightness: self
                .attr_f64("brightness")
                .map(|value| hass_to_bridge_brightness(value.round() as u16)),
            color_temperature,
            x: xy.map(|(x, _)| x),
            y: xy.map(|(_, y)| y),
            hue: hs.map(|(hue, _)| (hue / 360.0 * f64::from(MAX_HUE)).round() as u16),
            sat: hs.map(|(_, sat)| (sat / 100.0 * f64::from(MAX_SATURATION)).round() as u16),
            effect: self
                .attributes
                .get("effect")
                .and_then(Value::as_str)
                .map(str::to_string),
            color_mode,
            on: self.is_on(),
            unavailable: self.is_unavailable(),
            capabilities: self.capabilities(),
        }
    }
}

/// Service call data for a prepared write.
fn service_data(call: &PutCall, domain: &str, turn_off: bool) -> Map<String, Value> {
    let mut data = Map::new();
    data.insert("entity_id".to_string(), Value::String(call.id.clone()));
    if domain != "light" {
        return data;
    }
    if let Some(tenths) = call.transition_time {
        data.insert("transition".to_string(), json!(f64::from(tenths) / 10.0));
    }
    if turn_off {
        return data;
    }
    if let Some(bri) = call.bri {
        data.insert("brightness".to_string(), json!(bridge_to_hass_brightness(bri)));
    }
    if let Some(ct) = call.ct {
        data.insert("color_temp".to_string(), json!(ct));
    }
    if let Some(xy) = call.xy() {
        data.insert("xy_color".to_string(), json!([xy.x, xy.y]));
    }
    if call.hue.is_some() || call.sat.is_some() {
        let hue = f64::from(call.hue.unwrap_or(0)) / f64::from(MAX_HUE) * 360.0;
        let sat = f64::from(call.sat.unwrap_or(MAX_SATURATION)) / f64::from(MAX_SATURATION) * 100.0;
        data.insert("hs_color".to_string(), json!([hue, sat]));
    }
    if let Some(effect) = &call.effect {
        data.insert("effect".to_string(), Value::String(effect.clone()));
    }
    data
}

fn websocket_url(base: &Url) -> crate::Result<Url> {
    let mut url = base.join("/api/websocket")?;
    let scheme = match url.scheme() {
        "https" => "wss",
        _ => "ws",
    };
    url.set_scheme(scheme)
        .map_err(|()| HueError::protocol_err(format!("cannot derive websocket url from {base}")))?;
    Ok(url)
}

#[derive(Debug, Deserialize)]
struct HassWsEvent {
    #[serde(default)]
    event_type: String,
    data: HassStateChangedEvent,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum HassWsIncoming {
    AuthRequired,
    AuthOk,
    AuthInvalid {
        #[serde(default)]
        message: Option<String>,
    },
    Result {
        id: u64,
        success: bool,
        #[serde(default)]
        error: Option<Value>,
    },
    Event {
        event: HassWsEvent,
    },
    #[serde(other)]
    Other,
}

/// Next text message, skipping control frames. `None` once the socket closes.
async fn next_message<S>(socket: &mut S) -> crate::Result<Option<HassWsIncoming>>
where
    S: Stream<Item = Result<Message, WsError>> + Unpin,
{
    while let Some(message) = socket.next().await {
        match message? {
            Message::Text(text) => return Ok(Some(serde_json::from_str(&text)?)),
            Message::Close(_) => return Ok(None),
            _ => {}
        }
    }
    Ok(None)
}

/// Authenticates and subscribes to `state_changed` events.
async fn handshake<S>(socket: &mut S, token: &str) -> crate::Result<()>
where
    S: Stream<Item = Result<Message, WsError>> + Sink<Message, Error = WsError> + Unpin,
{
    loop {
        match next_message(socket).await? {
            Some(HassWsIncoming::AuthRequired) => {
                let auth = json!({"type": "auth", "access_token": token});
                socket.send(Message::text(auth.to_string())).await?;
            }
            Some(HassWsIncoming::AuthOk) => break,
            Some(HassWsIncoming::AuthInvalid { message }) => {
                log::error!("hub rejected the access token: {}", message.unwrap_or_default());
                return Err(HueError::Authentication);
            }
            Some(_) => {}
            None => return Err(HueError::connection_err("websocket closed during authentication")),
        }
    }

    let subscribe = json!({
        "id": SUBSCRIPTION_ID,
        "type": "subscribe_events",
        "event_type": "state_changed",
    });
    socket.send(Message::text(subscribe.to_string())).await?;
    loop {
        match next_message(socket).await? {
            Some(HassWsIncoming::Result { id, success, error }) if id == SUBSCRIPTION_ID => {
                if success {
                    return Ok(());
                }
                return Err(HueError::Api {
                    code: 0,
                    description: format!(
                        "subscribe_events failed: {}",
                        error.unwrap_or(Value::Null)
                    ),
                });
            }
            Some(_) => {}
            None => return Err(HueError::connection_err("websocket closed during subscribe")),
        }
    }
}

/// [`HueApi`] implementation for a Home Assistant hub.
///
/// All entity states are fetched with a single `/api/states` call and cached
/// until [`clear_caches`](HueApi::clear_caches) or an event reconnect.
#[derive(Debug)]
pub struct HassClient {
    transport: Arc<dyn Transport>,
    websocket_url: Option<Url>,
    token: String,
    config: ClientConfig,
    states: ResourceStore<HassState>,
    limiter: RateLimiter,
}

impl HassClient {
    pub fn new(config: &HassConfig) -> crate::Result<Self> {
        let transport = HttpTransport::for_hass(config)?;
        let mut client = Self::with_transport(Arc::new(transport), config.client.clone());
        client.websocket_url = Some(websocket_url(&config.url)?);
        client.token.clone_from(&config.token);
        Ok(client)
    }

    pub fn with_transport(transport: Arc<dyn Transport>, config: ClientConfig) -> Self {
        Self {
            transport,
            websocket_url: None,
            token: String::new(),
            limiter: RateLimiter::new(config.requests_per_second, config.max_burst_seconds),
            config,
            states: ResourceStore::new(),
        }
    }

    pub fn with_rate_limiter(self, limiter: RateLimiter) -> Self {
        Self { limiter, ..self }
    }

    pub fn synchronizer(
        &self,
        tracker: Arc<ManualOverrideTracker>,
        listener: Arc<dyn LightEventListener>,
    ) -> HassEventSynchronizer {
        HassEventSynchronizer::new(tracker, listener)
    }

    async fn fetch_states(&self) -> crate::Result<Vec<HassState>> {
        let value = self.transport.get("/api/states").await?;
        if value.is_null() {
            return Ok(Vec::new());
        }
        let states: Vec<HassState> = serde_json::from_value(value)?;
        log::debug!("fetched {} hub entities", states.len());
        Ok(states)
    }

    async fn states(&self) -> crate::Result<Collection<HassState>> {
        self.states.get_or_load(|| self.fetch_states()).await
    }

    /// Current state of one entity, bypassing the cache.
    async fn fetch_state(&self, entity_id: &str) -> crate::Result<HassState> {
        let value = self.transport.get(&format!("/api/states/{entity_id}")).await?;
        Ok(serde_json::from_value(value)?)
    }

    async fn entity(&self, id: &str) -> crate::Result<HassState> {
        light_domain(id)?;
        self.states()
            .await?
            .get(id)
            .cloned()
            .ok_or_else(|| HueError::not_found(HassState::KIND, id))
    }

    async fn group_members(&self, id: &str) -> crate::Result<Vec<HassState>> {
        let group = self.entity(id).await?;
        if !group.is_group() {
            return Err(HueError::not_found("group", id));
        }
        let states = self.states().await?;
        let members: Vec<HassState> = group
            .members()
            .iter()
            .filter_map(|member| states.get(member).cloned())
            .collect();
        if members.is_empty() {
            return Err(HueError::EmptyResource { id: id.to_string() });
        }
        Ok(members)
    }

    /// Unique id among the entities matching `filter` named `name`.
    async fn id_for_name(
        &self,
        name: &str,
        kind: &'static str,
        filter: impl Fn(&HassState) -> bool,
    ) -> crate::Result<String> {
        let states = self.states().await?;
        let mut ids: Vec<String> = self
            .states
            .ids_for_name(name)
            .await
            .into_iter()
            .filter(|id| states.get(id).is_some_and(&filter))
            .collect();
        ids.sort();
        match ids.len() {
            0 => Err(HueError::not_found(kind, name)),
            1 => Ok(ids.remove(0)),
            _ => Err(HueError::AmbiguousName {
                name: name.to_string(),
                ids,
            }),
        }
    }

    /// Follows the hub's `state_changed` events until `cancel` fires,
    /// reconnecting after failures. Every connect clears the state cache.
    /// Returns early with [`HueError::Authentication`] if the token is
    /// rejected.
    pub async fn run_events(
        &self,
        synchronizer: &HassEventSynchronizer,
        cancel: &CancellationToken,
    ) -> crate::Result<()> {
        let Some(url) = &self.websocket_url else {
            return Err(HueError::protocol_err("client has no websocket endpoint"));
        };
        loop {
            match self.stream_events(url, synchronizer, cancel).await {
                Ok(()) if cancel.is_cancelled() => return Ok(()),
                Ok(()) => log::info!("hub closed the websocket"),
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => log::warn!("hub websocket failed: {err}"),
            }
            tokio::select! {
                () = tokio::time::sleep(self.config.reconnect_delay()) => {}
                () = cancel.cancelled() => return Ok(()),
            }
        }
    }

    async fn stream_events(
        &self,
        url: &Url,
        synchronizer: &HassEventSynchronizer,
        cancel: &CancellationToken,
    ) -> crate::Result<()> {
        let (mut socket, _response) = connect_async(url.as_str()).await?;
        handshake(&mut socket, &self.token).await?;
        log::info!("subscribed to hub state changes");
        self.states.invalidate().await;

        let result = loop {
            let next = tokio::select! {
                next = tokio::time::timeout(self.config.event_read_timeout(), next_message(&mut socket)) => next,
                () = cancel.cancelled() => break Ok(()),
            };
            let Ok(next) = next else {
                break Err(HueError::connection_err("hub websocket idle timeout"));
            };
            match next {
                Ok(Some(HassWsIncoming::Event { event }))
                    if event.event_type == "state_changed" =>
                {
                    synchronizer.on_state_changed(&event.data);
                }
                Ok(Some(_)) => {}
                Ok(None) => break Ok(()),
                // a message we cannot read does not end the stream
                Err(HueError::Json(err)) => log::warn!("ignoring malformed hub message: {err}"),
                Err(err) => break Err(err),
            }
        };
        let _ = socket.close(None).await;
        result
    }
}

#[async_trait]
impl HueApi for HassClient {
    async fn get_light_state(&self, id: &str) -> crate::Result<LightState> {
        Ok(self.entity(id).await?.light_state())
    }

    async fn get_group_states(&self, id: &str) -> crate::Result<Vec<LightState>> {
        Ok(self
            .group_members(id)
            .await?
            .iter()
            .map(HassState::light_state)
            .collect())
    }

    async fn get_group_lights(&self, id: &str) -> crate::Result<Vec<String>> {
        Ok(self
            .group_members(id)
            .await?
            .into_iter()
            .map(|member| member.entity_id)
            .collect())
    }

    async fn get_assigned_groups(&self, light_id: &str) -> crate::Result<Vec<String>> {
        self.entity(light_id).await?;
        let states = self.states().await?;
        let mut groups: Vec<String> = states
            .values()
            .filter(|state| state.is_group() && state.members().iter().any(|m| m == light_id))
            .map(|state| state.entity_id.clone())
            .collect();
        groups.sort();
        Ok(groups)
    }

    async fn get_affected_ids_by_scene(&self, scene_id: &str) -> crate::Result<Vec<String>> {
        if domain(scene_id) != Some("scene") {
            return Err(HueError::UnsupportedResourceType {
                id: scene_id.to_string(),
            });
        }
        let states = self.states().await?;
        let scene = states
            .get(scene_id)
            .ok_or_else(|| HueError::not_found("scene", scene_id))?;
        Ok(scene
            .members()
            .into_iter()
            .filter(|member| light_domain(member).is_ok())
            .collect())
    }

    async fn get_light_name(&self, id: &str) -> crate::Result<String> {
        let entity = self.entity(id).await?;
        Ok(entity.name().unwrap_or(&entity.entity_id).to_string())
    }

    async fn get_group_name(&self, id: &str) -> crate::Result<String> {
        let entity = self.entity(id).await?;
        if !entity.is_group() {
            return Err(HueError::not_found("group", id));
        }
        Ok(entity.name().unwrap_or(&entity.entity_id).to_string())
    }

    async fn get_scene_name(&self, id: &str) -> crate::Result<String> {
        if domain(id) != Some("scene") {
            return Err(HueError::UnsupportedResourceType { id: id.to_string() });
        }
        let states = self.states().await?;
        let scene = states.get(id).ok_or_else(|| HueError::not_found("scene", id))?;
        Ok(scene.name().unwrap_or(&scene.entity_id).to_string())
    }

    async fn get_light_id(&self, name: &str) -> crate::Result<String> {
        self.id_for_name(name, "light", |state| state.is_light() && !state.is_group())
            .await
    }

    async fn get_group_id(&self, name: &str) -> crate::Result<String> {
        self.id_for_name(name, "group", HassState::is_group).await
    }

    async fn get_light_capabilities(&self, id: &str) -> crate::Result<LightCapabilities> {
        Ok(self.entity(id).await?.capabilities())
    }

    async fn get_group_capabilities(&self, id: &str) -> crate::Result<LightCapabilities> {
        let own = self.entity(id).await?.capabilities();
        Ok(self
            .group_members(id)
            .await?
            .iter()
            .fold(own, |acc, member| acc.widen(&member.capabilities())))
    }

    async fn is_light_off(&self, id: &str) -> crate::Result<bool> {
        Ok(self.get_light_state(id).await?.is_off())
    }

    async fn is_group_off(&self, id: &str) -> crate::Result<bool> {
        Ok(self
            .get_group_states(id)
            .await?
            .iter()
            .all(LightState::is_off))
    }

    async fn put_state(&self, call: &PutCall) -> crate::Result<PutOutcome> {
        if call.is_no_op() {
            return Ok(PutOutcome::Applied);
        }
        let entity = self.entity(&call.id).await?;
        let domain = light_domain(&entity.entity_id)?.to_string();
        let capabilities = if entity.is_group() {
            self.get_group_capabilities(&call.id).await?
        } else {
            entity.capabilities()
        };
        let call = prepare_call(call, &capabilities);

        let turn_off = call.on == Some(false);
        if call.on.is_none() && !self.fetch_state(&call.id).await?.is_on() {
            // the hub would switch the light on; report it like the bridge does
            log::debug!("{} is off, ignoring state update", call.id);
            return Ok(PutOutcome::TargetOff);
        }
        let service = if turn_off { "turn_off" } else { "turn_on" };
        let data = Value::Object(service_data(&call, &domain, turn_off));

        let permits = if entity.is_group() {
            self.config.group_request_permits
        } else {
            1
        };
        self.limiter.acquire(permits).await;
        log::debug!("POST {domain}.{service} {data}");
        self.transport
            .post(&format!("/api/services/{domain}/{service}"), &data)
            .await?;
        Ok(PutOutcome::Applied)
    }

    async fn clear_caches(&self) {
        self.states.invalidate().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::FakeTransport;
    use std::collections::VecDeque;
    use std::pin::Pin;
    use std::task::{Context, Poll};

    fn desk() -> Value {
        json!({
            "entity_id": "light.desk",
            "state": "on",
            "attributes": {
                "friendly_name": "Desk",
                "brightness": 128,
                "color_mode": "color_temp",
                "color_temp": 300,
                "xy_color": [0.4599, 0.4106],
                "supported_color_modes": ["color_temp", "xy"],
                "min_mireds": 153,
                "max_mireds": 500,
                "effect_list": ["colorloop"]
            }
        })
    }

    fn shelf() -> Value {
        json!({
            "entity_id": "light.shelf",
            "state": "off",
            "attributes": {
                "friendly_name": "Shelf",
                "supported_color_modes": ["brightness"],
                "brightness": null
            }
        })
    }

    fn hub() -> Arc<FakeTransport> {
        let transport = Arc::new(FakeTransport::new());
        transport
            .on_get(
                "/api/states",
                json!([
                    desk(),
                    shelf(),
                    {"entity_id": "switch.plug", "state": "on", "attributes": {"friendly_name": "Plug"}},
                    {
                        "entity_id": "light.office",
                        "state": "on",
                        "attributes": {
                            "friendly_name": "Office",
                            "entity_id": ["light.desk", "light.shelf"],
                            "supported_color_modes": ["color_temp"]
                        }
                    },
                    {"entity_id": "light.empty", "state": "off", "attributes": {"friendly_name": "Empty", "entity_id": []}},
                    {
                        "entity_id": "scene.relax",
                        "state": "2024-01-01T10:00:00+00:00",
                        "attributes": {"friendly_name": "Relax", "entity_id": ["light.desk", "light.shelf", "media_player.tv"]}
                    },
                    {"entity_id": "sensor.desk", "state": "21.5", "attributes": {"friendly_name": "Desk"}},
                    {"entity_id": "light.lamp_1", "state": "off", "attributes": {"friendly_name": "Lamp"}},
                    {"entity_id": "light.lamp_2", "state": "off", "attributes": {"friendly_name": "Lamp"}}
                ]),
            )
            .on_get("/api/states/light.desk", desk())
            .on_get("/api/states/light.shelf", shelf());
        transport
    }

    fn client(transport: &Arc<FakeTransport>) -> HassClient {
        HassClient::with_transport(transport.clone(), ClientConfig::default())
    }

    #[test]
    fn brightness_edges() {
        assert_eq!(bridge_to_hass_brightness(1), 1);
        assert_eq!(bridge_to_hass_brightness(2), 1);
        assert_eq!(bridge_to_hass_brightness(254), 255);
        assert_eq!(hass_to_bridge_brightness(0), 1);
        assert_eq!(hass_to_bridge_brightness(1), 2);
        assert_eq!(hass_to_bridge_brightness(255), 254);
        for bri in 2..=254 {
            assert_eq!(hass_to_bridge_brightness(bridge_to_hass_brightness(bri)), bri);
        }
    }

    #[tokio::test]
    async fn entity_state_is_mapped() {
        let transport = hub();
        let client = client(&transport);

        let desk = client.get_light_state("light.desk").await.unwrap();
        assert_eq!(desk.brightness, Some(128));
        assert_eq!(desk.color_temperature, Some(300));
        assert_eq!(desk.color_mode, Some(ColorMode::Ct));
        assert!(desk.on && !desk.unavailable);
        assert_eq!(desk.capabilities.ct_min, Some(153));
        assert_eq!(desk.capabilities.ct_max, Some(500));
        assert!(desk.capabilities.is_color_supported());
        assert_eq!(desk.capabilities.effects, vec!["colorloop"]);

        let shelf = client.get_light_state("light.shelf").await.unwrap();
        assert_eq!(shelf.brightness, None);
        assert!(client.is_light_off("light.shelf").await.unwrap());

        let plug = client.get_light_capabilities("switch.plug").await.unwrap();
        assert!(plug.has(Capability::OnOff));
        assert!(!plug.has(Capability::Brightness));
        assert_eq!(transport.gets("/api/states"), 1);
    }

    #[tokio::test]
    async fn unsupported_entities_are_rejected() {
        let transport = hub();
        let client = client(&transport);
        assert!(matches!(
            client.get_light_state("sensor.desk").await,
            Err(HueError::UnsupportedResourceType { .. })
        ));
        assert!(matches!(
            client.get_light_state("no_domain").await,
            Err(HueError::UnsupportedResourceType { .. })
        ));
        assert!(matches!(
            client.get_light_state("light.attic").await,
            Err(HueError::ResourceNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn groups_and_scenes() {
        let transport = hub();
        let client = client(&transport);

        assert_eq!(
            client.get_group_lights("light.office").await.unwrap(),
            vec!["light.desk", "light.shelf"]
        );
        assert_eq!(client.get_group_name("light.office").await.unwrap(), "Office");
        assert!(!client.is_group_off("light.office").await.unwrap());
        assert!(matches!(
            client.get_group_lights("light.empty").await,
            Err(HueError::EmptyResource { .. })
        ));
        assert!(matches!(
            client.get_group_lights("light.desk").await,
            Err(HueError::ResourceNotFound { kind: "group", .. })
        ));
        assert_eq!(
            client.get_assigned_groups("light.shelf").await.unwrap(),
            vec!["light.office"]
        );
        assert_eq!(
            client.get_affected_ids_by_scene("scene.relax").await.unwrap(),
            vec!["light.desk", "light.shelf"]
        );
        assert_eq!(client.get_scene_name("scene.relax").await.unwrap(), "Relax");

        let capabilities = client.get_group_capabilities("light.office").await.unwrap();
        assert!(capabilities.is_color_supported());
        assert_eq!(transport.gets("/api/states"), 1);
    }

    #[tokio::test]
    async fn names_resolve_within_kind() {
        let transport = hub();
        let client = client(&transport);

        assert_eq!(client.get_light_id("Desk").await.unwrap(), "light.desk");
        assert_eq!(client.get_group_id("Office").await.unwrap(), "light.office");
        assert!(matches!(
            client.get_group_id("Desk").await,
            Err(HueError::ResourceNotFound { kind: "group", .. })
        ));
        assert!(matches!(
            client.get_light_id("Lamp").await,
            Err(HueError::AmbiguousName { ids, .. }) if ids == vec!["light.lamp_1", "light.lamp_2"]
        ));
    }

    #[tokio::test]
    async fn writes_become_service_calls() {
        let transport = hub();
        let client = client(&transport);

        let call = PutCall::light("light.desk")
            .with_brightness(2)
            .with_ct(600)
            .with_transition_time(15);
        assert_eq!(client.put_state(&call).await.unwrap(), PutOutcome::Applied);
        client.put_state(&PutCall::light("light.shelf").off()).await.unwrap();
        client
            .put_state(&PutCall::light("switch.plug").on().with_brightness(100))
            .await
            .unwrap();

        assert_eq!(
            transport.writes(),
            vec![
                (
                    "/api/services/light/turn_on".to_string(),
                    json!({"entity_id": "light.desk", "brightness": 1, "color_temp": 500, "transition": 1.5})
                ),
                (
                    "/api/services/light/turn_off".to_string(),
                    json!({"entity_id": "light.shelf"})
                ),
                (
                    "/api/services/switch/turn_on".to_string(),
                    json!({"entity_id": "switch.plug"})
                ),
            ]
        );
    }

    #[tokio::test]
    async fn update_of_off_light_is_soft_ignored() {
        let transport = hub();
        let client = client(&transport);
        let outcome = client
            .put_state(&PutCall::light("light.shelf").with_brightness(100))
            .await
            .unwrap();
        assert_eq!(outcome, PutOutcome::TargetOff);
        assert!(transport.writes().is_empty());
        assert_eq!(transport.gets("/api/states/light.shelf"), 1);
    }

    #[tokio::test]
    async fn unsupported_color_is_dropped_or_converted() {
        let transport = hub();
        let client = client(&transport);
        client
            .put_state(&PutCall::light("light.shelf").on().with_hue_sat(100, 200))
            .await
            .unwrap();
        client
            .put_state(&PutCall::light("light.office").on().with_xy(0.5, 0.4))
            .await
            .unwrap();

        let writes = transport.writes();
        assert_eq!(writes[0].1, json!({"entity_id": "light.shelf"}));
        // the group advertises colour through its members
        assert!(writes[1].1.get("xy_color").is_some());
    }

    #[tokio::test]
    async fn clear_caches_refetches() {
        let transport = hub();
        let client = client(&transport);
        client.get_light_state("light.desk").await.unwrap();
        client.clear_caches().await;
        client.get_light_state("light.desk").await.unwrap();
        assert_eq!(transport.gets("/api/states"), 2);
    }

    #[test]
    fn websocket_url_follows_scheme() {
        let url = websocket_url(&Url::parse("https://hass.example:8123").unwrap()).unwrap();
        assert_eq!(url.as_str(), "wss://hass.example:8123/api/websocket");
        let url = websocket_url(&Url::parse("http://10.0.0.3:8123/").unwrap()).unwrap();
        assert_eq!(url.as_str(), "ws://10.0.0.3:8123/api/websocket");
    }

    /// Scripted websocket: replays `incoming` and records what is sent.
    #[derive(Default)]
    struct Script {
        incoming: VecDeque<Message>,
        sent: Vec<Value>,
    }

    impl Script {
        fn new(messages: &[Value]) -> Self {
            Self {
                incoming: messages.iter().map(|m| Message::text(m.to_string())).collect(),
                sent: Vec::new(),
            }
        }
    }

    impl Stream for Script {
        type Item = Result<Message, WsError>;

        fn poll_next(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
            Poll::Ready(self.get_mut().incoming.pop_front().map(Ok))
        }
    }

    impl Sink<Message> for Script {
        type Error = WsError;

        fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), WsError>> {
            Poll::Ready(Ok(()))
        }

        fn start_send(self: Pin<&mut Self>, item: Message) -> Result<(), WsError> {
            if let Message::Text(text) = item {
                self.get_mut().sent.push(serde_json::from_str(&text).unwrap());
            }
            Ok(())
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), WsError>> {
            Poll::Ready(Ok(()))
        }

        fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), WsError>> {
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn handshake_authenticates_and_subscribes() {
        let mut socket = Script::new(&[
            json!({"type": "auth_required", "ha_version": "2024.1.0"}),
            json!({"type": "auth_ok", "ha_version": "2024.1.0"}),
            json!({"id": 1, "type": "result", "success": true, "result": null}),
            json!({"id": 1, "type": "event", "event": {
                "event_type": "state_changed",
                "data": {
                    "entity_id": "light.desk",
                    "old_state": {"entity_id": "light.desk", "state": "off", "attributes": {}},
                    "new_state": {"entity_id": "light.desk", "state": "on", "attributes": {"brightness": 10}}
                }
            }}),
        ]);
        handshake(&mut socket, "secret").await.unwrap();
        assert_eq!(socket.sent[0], json!({"type": "auth", "access_token": "secret"}));
        assert_eq!(socket.sent[1]["type"], json!("subscribe_events"));
        assert_eq!(socket.sent[1]["event_type"], json!("state_changed"));

        match next_message(&mut socket).await.unwrap() {
            Some(HassWsIncoming::Event { event }) => {
                assert_eq!(event.event_type, "state_changed");
                assert_eq!(event.data.entity_id, "light.desk");
                assert_eq!(event.data.new_state.unwrap().state, "on");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(next_message(&mut socket).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn rejected_token_is_fatal() {
        let mut socket = Script::new(&[
            json!({"type": "auth_required"}),
            json!({"type": "auth_invalid", "message": "Invalid access token or password"}),
        ]);
        let err = handshake(&mut socket, "wrong").await.unwrap_err();
        assert!(matches!(err, HueError::Authentication));
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn closed_socket_during_auth_is_retryable() {
        let mut socket = Script::new(&[json!({"type": "auth_required"})]);
        let err = handshake(&mut socket, "token").await.unwrap_err();
        assert!(matches!(err, HueError::Connection { .. }));
        assert!(!err.is_fatal());
    }
}
