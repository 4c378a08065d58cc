use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::api::{prepare_call, HueApi};
use crate::color::{Gamut, MAX_BRIGHTNESS};
use crate::config::{BridgeConfig, ClientConfig};
use crate::events::{HueEventSynchronizer, LightEventListener};
use crate::manual::ManualOverrideTracker;
use crate::ratelimit::RateLimiter;
use crate::resource::{
    ConnectivityStatus, Device, Group, GroupedLight, Light, Resource, ResourceType, Scene,
    ZigbeeConnectivity,
};
use crate::state::{Capability, LightCapabilities, LightState, PutCall, PutOutcome};
use crate::store::{Collection, ResourceStore};
use crate::transport::{HttpTransport, Transport};
use crate::HueError;

const EVENT_STREAM_PATH: &str = "/eventstream/clip/v2";

/// Bridge error type for "parameter not modifiable, device is off".
const ERROR_TARGET_OFF: usize = 201;
const ERROR_UNAUTHORIZED: usize = 1;

/// Mirrors of the bridge's resource collections, shared between the client
/// and its event synchronizer.
#[derive(Debug, Default)]
pub struct BridgeCache {
    pub lights: ResourceStore<Light>,
    pub grouped_lights: ResourceStore<GroupedLight>,
    pub groups: ResourceStore<Group>,
    pub scenes: ResourceStore<Scene>,
    pub devices: ResourceStore<Device>,
    pub connectivity: ResourceStore<ZigbeeConnectivity>,
}

impl BridgeCache {
    pub async fn patch(&self, rtype: ResourceType, id: &str, partial: &Value) -> bool {
        match rtype {
            ResourceType::Light => self.lights.patch(id, partial).await,
            ResourceType::GroupedLight => self.grouped_lights.patch(id, partial).await,
            ResourceType::Group => self.groups.patch(id, partial).await,
            ResourceType::Scene => self.scenes.patch(id, partial).await,
            ResourceType::Device => self.devices.patch(id, partial).await,
            ResourceType::Connectivity => self.connectivity.patch(id, partial).await,
        }
    }

    pub async fn remove(&self, rtype: ResourceType, id: &str) -> bool {
        match rtype {
            ResourceType::Light => self.lights.remove(id).await,
            ResourceType::GroupedLight => self.grouped_lights.remove(id).await,
            ResourceType::Group => self.groups.remove(id).await,
            ResourceType::Scene => self.scenes.remove(id).await,
            ResourceType::Device => self.devices.remove(id).await,
            ResourceType::Connectivity => self.connectivity.remove(id).await,
        }
    }

    pub async fn invalidate(&self, rtype: ResourceType) {
        match rtype {
            ResourceType::Light => self.lights.invalidate().await,
            ResourceType::GroupedLight => self.grouped_lights.invalidate().await,
            ResourceType::Group => self.groups.invalidate().await,
            ResourceType::Scene => self.scenes.invalidate().await,
            ResourceType::Device => self.devices.invalidate().await,
            ResourceType::Connectivity => self.connectivity.invalidate().await,
        }
    }

    pub async fn invalidate_all(&self) {
        for rtype in [
            ResourceType::Light,
            ResourceType::GroupedLight,
            ResourceType::Group,
            ResourceType::Scene,
            ResourceType::Device,
            ResourceType::Connectivity,
        ] {
            self.invalidate(rtype).await;
        }
    }
}

#[derive(Debug, Deserialize)]
struct BridgeError {
    error: BridgeErrorInner,
}

#[derive(Debug, Deserialize)]
struct BridgeErrorInner {
    r#type: usize,
    #[serde(default)]
    description: String,
}

impl From<BridgeErrorInner> for HueError {
    fn from(error: BridgeErrorInner) -> Self {
        match error.r#type {
            ERROR_UNAUTHORIZED => HueError::Authentication,
            code => HueError::Api {
                code,
                description: error.description,
            },
        }
    }
}

/// First error of a `[{"error": {...}}]` envelope, if the response is one.
fn first_error(value: &Value) -> Option<BridgeErrorInner> {
    value
        .as_array()?
        .iter()
        .find_map(|entry| BridgeError::deserialize(entry).ok())
        .map(|e| e.error)
}

#[derive(Debug, Deserialize)]
struct BridgeErrorV2 {
    description: String,
}

#[derive(Debug, Deserialize)]
struct BridgeResponseV2<T> {
    #[serde(default)]
    errors: Vec<BridgeErrorV2>,
    #[serde(default = "Vec::new")]
    data: Vec<T>,
}

impl<T> BridgeResponseV2<T> {
    fn get(mut self) -> crate::Result<Vec<T>> {
        if let Some(error) = self.errors.pop() {
            Err(HueError::Api {
                code: 0,
                description: error.description,
            })
        } else {
            Ok(self.data)
        }
    }
}

fn parse_collection<T: Resource>(value: Value) -> crate::Result<Vec<T>> {
    if let Some(error) = first_error(&value) {
        return Err(error.into());
    }
    if value.is_null() {
        return Ok(Vec::new());
    }
    serde_json::from_value::<BridgeResponseV2<T>>(value)?.get()
}

/// Body of a legacy `state`/`action` write.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
struct StateCommand {
    #[serde(skip_serializing_if = "Option::is_none")]
    on: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    bri: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ct: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    xy: Option<[f64; 2]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    hue: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sat: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    effect: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    transitiontime: Option<u16>,
}

impl StateCommand {
    fn from_call(call: &PutCall, default_transition_time: u16) -> Self {
        Self {
            on: call.on,
            bri: call.bri.map(|bri| bri.clamp(1, MAX_BRIGHTNESS)),
            ct: call.ct,
            xy: call.xy().map(|xy| [xy.x, xy.y]),
            hue: call.hue,
            sat: call.sat,
            effect: call.effect.clone(),
            transitiontime: call
                .transition_time
                .filter(|&tenths| tenths != default_transition_time),
        }
    }
}

/// Bridge brightness (`1..=254`) for a v2 dimming percentage.
pub fn percent_to_bri(percent: f64) -> u16 {
    (percent.clamp(0.0, 100.0) / 100.0 * 253.0).round() as u16 + 1
}

pub fn light_capabilities(light: &Light) -> LightCapabilities {
    let mut capabilities = LightCapabilities::default().with_capability(Capability::OnOff);
    if light.dimming.is_some() {
        capabilities = capabilities.with_capability(Capability::Brightness);
    }
    if let Some(ct) = &light.color_temperature {
        capabilities = capabilities.with_capability(Capability::ColorTemperature);
        if let Some(schema) = &ct.mirek_schema {
            capabilities = capabilities.with_ct_range(schema.mirek_minimum, schema.mirek_maximum);
        }
    }
    if let Some(color) = &light.color {
        capabilities = capabilities.with_capability(Capability::Color);
        let gamut = color
            .gamut
            .or_else(|| color.gamut_type.as_deref().and_then(Gamut::for_type));
        if let Some(gamut) = gamut {
            capabilities.gamut = Some(gamut);
            capabilities.gamut_type.clone_from(&color.gamut_type);
        }
    }
    if let Some(effects) = &light.effects {
        capabilities.effects = effects
            .effect_values
            .iter()
            .flatten()
            .filter(|effect| *effect != "no_effect")
            .cloned()
            .collect();
    }
    capabilities
}

fn light_state(light: &Light, unavailable: bool) -> LightState {
    let ct = light
        .color_temperature
        .as_ref()
        .filter(|ct| ct.mirek_valid.unwrap_or(ct.mirek.is_some()))
        .and_then(|ct| ct.mirek);
    let xy = light.color.as_ref().and_then(|color| color.xy);
    let color_mode = match (ct, xy) {
        (Some(_), _) => Some(crate::state::ColorMode::Ct),
        (None, Some(_)) => Some(crate::state::ColorMode::Xy),
        (None, None) => None,
    };
    LightState {
        id: light.scheduler_id().to_string(),
        brightness: light.dimming.as_ref().map(|d| percent_to_bri(d.brightness)),
        color_temperature: ct,
        x: xy.map(|xy| xy.x),
        y: xy.map(|xy| xy.y),
        hue: None,
        sat: None,
        effect: light
            .effects
            .as_ref()
            .and_then(|effects| effects.status.clone())
            .filter(|effect| effect != "no_effect"),
        color_mode,
        on: light.on.is_some_and(|on| on.on),
        unavailable,
        capabilities: light_capabilities(light),
    }
}

/// [`HueApi`] implementation for a Hue bridge.
///
/// Reads go through the per-type caches of a [`BridgeCache`], populated from
/// the CLIP v2 collections and kept current by [`run_events`](Self::run_events).
/// Writes use the legacy `state`/`action` endpoints.
#[derive(Debug)]
pub struct HueBridgeClient {
    transport: Arc<dyn Transport>,
    /// Present when talking to a real bridge; needed for the event stream.
    http: Option<HttpTransport>,
    application_key: String,
    config: ClientConfig,
    cache: Arc<BridgeCache>,
    limiter: RateLimiter,
}

impl HueBridgeClient {
    /// Create a client for the bridge described by `config`. This does not
    /// contact the bridge.
    /// ### Example
    /// ```no_run
    /// let config = huesync::BridgeConfig::new("192.168.0.4", "rVV05G0i52vQMMLn6BK3dpr0F3uDiqtDjPLPK2uj");
    /// let client = huesync::HueBridgeClient::new(&config).unwrap();
    /// ```
    pub fn new(config: &BridgeConfig) -> crate::Result<Self> {
        let http = HttpTransport::for_bridge(config)?;
        let mut client = Self::with_transport(
            Arc::new(http.clone()),
            config.application_key.clone(),
            config.client.clone(),
        );
        client.http = Some(http);
        Ok(client)
    }

    pub fn with_transport(
        transport: Arc<dyn Transport>,
        application_key: impl Into<String>,
        config: ClientConfig,
    ) -> Self {
        Self {
            transport,
            http: None,
            application_key: application_key.into(),
            limiter: RateLimiter::new(config.requests_per_second, config.max_burst_seconds),
            config,
            cache: Arc::default(),
        }
    }

    pub fn with_rate_limiter(self, limiter: RateLimiter) -> Self {
        Self { limiter, ..self }
    }

    pub fn cache(&self) -> Arc<BridgeCache> {
        self.cache.clone()
    }

    /// A synchronizer feeding this client's caches.
    pub fn synchronizer(
        &self,
        tracker: Arc<ManualOverrideTracker>,
        listener: Arc<dyn LightEventListener>,
    ) -> HueEventSynchronizer {
        HueEventSynchronizer::new(self.cache.clone(), tracker, listener)
    }

    async fn fetch_all<T: Resource>(&self, rtype: ResourceType) -> crate::Result<Vec<T>> {
        let mut resources = Vec::new();
        for endpoint in rtype.endpoints() {
            let value = self
                .transport
                .get(&format!("/clip/v2/resource/{endpoint}"))
                .await?;
            resources.extend(parse_collection::<T>(value)?);
        }
        log::debug!("fetched {} {} resource(s)", resources.len(), T::KIND);
        Ok(resources)
    }

    async fn lights(&self) -> crate::Result<Collection<Light>> {
        self.cache
            .lights
            .get_or_load(|| self.fetch_all(ResourceType::Light))
            .await
    }

    async fn groups(&self) -> crate::Result<Collection<Group>> {
        self.cache
            .groups
            .get_or_load(|| self.fetch_all(ResourceType::Group))
            .await
    }

    async fn grouped_lights(&self) -> crate::Result<Collection<GroupedLight>> {
        self.cache
            .grouped_lights
            .get_or_load(|| self.fetch_all(ResourceType::GroupedLight))
            .await
    }

    async fn scenes(&self) -> crate::Result<Collection<Scene>> {
        self.cache
            .scenes
            .get_or_load(|| self.fetch_all(ResourceType::Scene))
            .await
    }

    async fn devices(&self) -> crate::Result<Collection<Device>> {
        self.cache
            .devices
            .get_or_load(|| self.fetch_all(ResourceType::Device))
            .await
    }

    async fn connectivity(&self) -> crate::Result<Collection<ZigbeeConnectivity>> {
        self.cache
            .connectivity
            .get_or_load(|| self.fetch_all(ResourceType::Connectivity))
            .await
    }

    /// Finds a resource by current id, falling back to its legacy id.
    async fn lookup<T: Resource>(
        store: &ResourceStore<T>,
        data: &Collection<T>,
        id: &str,
    ) -> Option<T> {
        if let Some(resource) = data.get(id) {
            return Some(resource.clone());
        }
        let current = store.id_for_legacy_id(id).await?;
        data.get(&current).cloned()
    }

    async fn resolve_light(&self, id: &str) -> crate::Result<Light> {
        let lights = self.lights().await?;
        Self::lookup(&self.cache.lights, &lights, id)
            .await
            .ok_or_else(|| HueError::not_found(Light::KIND, id))
    }

    async fn resolve_group(&self, id: &str) -> crate::Result<Group> {
        let groups = self.groups().await?;
        if let Some(group) = Self::lookup(&self.cache.groups, &groups, id).await {
            return Ok(group);
        }
        // a grouped_light id addresses the room or zone owning it
        let grouped_lights = self.grouped_lights().await?;
        grouped_lights
            .get(id)
            .and_then(|grouped| grouped.owner.as_ref())
            .and_then(|owner| groups.get(&owner.rid))
            .cloned()
            .ok_or_else(|| HueError::not_found(Group::KIND, id))
    }

    async fn resolve_scene(&self, id: &str) -> crate::Result<Scene> {
        let scenes = self.scenes().await?;
        Self::lookup(&self.cache.scenes, &scenes, id)
            .await
            .ok_or_else(|| HueError::not_found(Scene::KIND, id))
    }

    /// Member lights of a group, in the order the bridge lists them.
    async fn group_members(&self, group: &Group) -> crate::Result<Vec<Light>> {
        let lights = self.lights().await?;
        let children = group.children.as_deref().unwrap_or_default();
        let devices = if children.iter().any(|child| child.rtype == "device") {
            Some(self.devices().await?)
        } else {
            None
        };

        let mut members: Vec<Light> = Vec::new();
        for child in children {
            let light_ids: Vec<&str> = match child.rtype.as_str() {
                "light" => vec![child.rid.as_str()],
                "device" => devices
                    .as_ref()
                    .and_then(|devices| devices.get(&child.rid))
                    .map(|device| device.get_lights().collect())
                    .unwrap_or_default(),
                _ => Vec::new(),
            };
            for light_id in light_ids {
                match lights.get(light_id) {
                    Some(light) if !members.iter().any(|m| m.id == light.id) => {
                        members.push(light.clone())
                    }
                    Some(_) => {}
                    None => log::debug!("group {} references unknown light {light_id}", group.id),
                }
            }
        }

        if members.is_empty() {
            return Err(HueError::EmptyResource {
                id: group.scheduler_id().to_string(),
            });
        }
        Ok(members)
    }

    /// A light is reachable unless its device reports a connectivity problem.
    async fn is_reachable(&self, light: &Light) -> crate::Result<bool> {
        let Some(owner) = &light.owner else {
            return Ok(true);
        };
        let devices = self.devices().await?;
        let Some(sensor_id) = devices.get(&owner.rid).and_then(Device::connectivity) else {
            return Ok(true);
        };
        let sensors = self.connectivity().await?;
        Ok(sensors
            .get(sensor_id)
            .and_then(|sensor| sensor.status)
            .is_none_or(|status| status == ConnectivityStatus::Connected))
    }

    async fn state_of(&self, light: &Light) -> crate::Result<LightState> {
        let reachable = self.is_reachable(light).await?;
        Ok(light_state(light, !reachable))
    }

    async fn unique_scheduler_id<T: Resource>(
        store: &ResourceStore<T>,
        data: &Collection<T>,
        name: &str,
    ) -> crate::Result<String> {
        let id = store.unique_id_for_name(name).await?;
        data.get(&id)
            .map(|resource| resource.scheduler_id().to_string())
            .ok_or_else(|| HueError::not_found(T::KIND, name))
    }

    fn write_path(
        &self,
        resource_kind: &'static str,
        id_v1: Option<&str>,
        id: &str,
        suffix: &str,
    ) -> crate::Result<String> {
        let id_v1 = id_v1.ok_or_else(|| {
            log::warn!("{resource_kind} {id} has no legacy id and cannot be written");
            HueError::UnsupportedResourceType { id: id.to_string() }
        })?;
        Ok(format!("/api/{}{id_v1}/{suffix}", self.application_key))
    }

    /// Keeps the bridge's event stream open and feeds it to `synchronizer`
    /// until `cancel` fires.
    ///
    /// Lost connections are re-established after the configured delay, and
    /// every (re)connect clears the caches. Returns early with
    /// [`HueError::Authentication`] if the bridge rejects the key.
    pub async fn run_events(
        &self,
        synchronizer: &HueEventSynchronizer,
        cancel: &CancellationToken,
    ) -> crate::Result<()> {
        let Some(http) = &self.http else {
            return Err(HueError::protocol_err("client has no event stream"));
        };
        loop {
            match self.stream_events(http, synchronizer, cancel).await {
                Ok(()) if cancel.is_cancelled() => return Ok(()),
                Ok(()) => log::info!("event stream closed by bridge"),
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => log::warn!("event stream failed: {err}"),
            }
            tokio::select! {
                () = tokio::time::sleep(self.config.reconnect_delay()) => {}
                () = cancel.cancelled() => return Ok(()),
            }
        }
    }

    async fn stream_events(
        &self,
        http: &HttpTransport,
        synchronizer: &HueEventSynchronizer,
        cancel: &CancellationToken,
    ) -> crate::Result<()> {
        let mut source = http.event_source(EVENT_STREAM_PATH)?;
        let result = loop {
            let next = tokio::select! {
                next = tokio::time::timeout(self.config.event_read_timeout(), source.next()) => next,
                () = cancel.cancelled() => break Ok(()),
            };
            let Ok(next) = next else {
                break Err(HueError::connection_err("event stream idle timeout"));
            };
            match next {
                None => break Ok(()),
                Some(Ok(reqwest_eventsource::Event::Open)) => {
                    log::info!("event stream connected");
                    // anything may have changed while disconnected
                    self.cache.invalidate_all().await;
                }
                Some(Ok(reqwest_eventsource::Event::Message(message))) => {
                    log::trace!("event {}", message.data);
                    synchronizer.handle_message(&message.data).await;
                }
                Some(Err(err)) => break Err(event_source_error(err)),
            }
        };
        source.close();
        result
    }
}

fn event_source_error(err: reqwest_eventsource::Error) -> HueError {
    match err {
        reqwest_eventsource::Error::InvalidStatusCode(status, _)
            if matches!(status.as_u16(), 401 | 403) =>
        {
            HueError::Authentication
        }
        reqwest_eventsource::Error::Transport(err) => err.into(),
        other => HueError::connection_err(other.to_string()),
    }
}

#[async_trait]
impl HueApi for HueBridgeClient {
    async fn get_light_state(&self, id: &str) -> crate::Result<LightState> {
        let light = self.resolve_light(id).await?;
        self.state_of(&light).await
    }

    async fn get_group_states(&self, id: &str) -> crate::Result<Vec<LightState>> {
        let group = self.resolve_group(id).await?;
        let mut states = Vec::new();
        for light in self.group_members(&group).await? {
            states.push(self.state_of(&light).await?);
        }
        Ok(states)
    }

    async fn get_group_lights(&self, id: &str) -> crate::Result<Vec<String>> {
        let group = self.resolve_group(id).await?;
        Ok(self
            .group_members(&group)
            .await?
            .iter()
            .map(|light| light.scheduler_id().to_string())
            .collect())
    }

    async fn get_assigned_groups(&self, light_id: &str) -> crate::Result<Vec<String>> {
        let light = self.resolve_light(light_id).await?;
        let device = light.owner.as_ref().map(|owner| owner.rid.as_str());
        let groups = self.groups().await?;
        let mut assigned: Vec<String> = groups
            .values()
            .filter(|group| {
                group.children.iter().flatten().any(|child| {
                    child.rid == light.id || Some(child.rid.as_str()) == device
                })
            })
            .map(|group| group.scheduler_id().to_string())
            .collect();
        assigned.sort();
        Ok(assigned)
    }

    async fn get_affected_ids_by_scene(&self, scene_id: &str) -> crate::Result<Vec<String>> {
        let scene = self.resolve_scene(scene_id).await?;
        let lights = self.lights().await?;
        Ok(scene
            .actions
            .iter()
            .flatten()
            .filter(|action| action.target.rtype == "light")
            .filter_map(|action| lights.get(&action.target.rid))
            .map(|light| light.scheduler_id().to_string())
            .collect())
    }

    async fn get_light_name(&self, id: &str) -> crate::Result<String> {
        let light = self.resolve_light(id).await?;
        Ok(light.name().unwrap_or_default().to_string())
    }

    async fn get_group_name(&self, id: &str) -> crate::Result<String> {
        let group = self.resolve_group(id).await?;
        Ok(group.name().unwrap_or_default().to_string())
    }

    async fn get_scene_name(&self, id: &str) -> crate::Result<String> {
        let scene = self.resolve_scene(id).await?;
        Ok(scene.name().unwrap_or_default().to_string())
    }

    async fn get_light_id(&self, name: &str) -> crate::Result<String> {
        let lights = self.lights().await?;
        Self::unique_scheduler_id(&self.cache.lights, &lights, name).await
    }

    async fn get_group_id(&self, name: &str) -> crate::Result<String> {
        let groups = self.groups().await?;
        Self::unique_scheduler_id(&self.cache.groups, &groups, name).await
    }

    async fn get_light_capabilities(&self, id: &str) -> crate::Result<LightCapabilities> {
        Ok(light_capabilities(&self.resolve_light(id).await?))
    }

    async fn get_group_capabilities(&self, id: &str) -> crate::Result<LightCapabilities> {
        let group = self.resolve_group(id).await?;
        Ok(self
            .group_members(&group)
            .await?
            .iter()
            .fold(LightCapabilities::default(), |acc, light| {
                acc.widen(&light_capabilities(light))
            }))
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
        let (path, capabilities, permits) = if call.group {
            let group = self.resolve_group(&call.id).await?;
            let capabilities = self.get_group_capabilities(&group.id).await?;
            let path = self.write_path(Group::KIND, group.id_v1(), &group.id, "action")?;
            (path, capabilities, self.config.group_request_permits)
        } else {
            let light = self.resolve_light(&call.id).await?;
            let path = self.write_path(Light::KIND, light.id_v1(), &light.id, "state")?;
            (path, light_capabilities(&light), 1)
        };

        let call = prepare_call(call, &capabilities);
        let body = serde_json::to_value(StateCommand::from_call(
            &call,
            self.config.default_transition_time,
        ))?;

        self.limiter.acquire(permits).await;
        log::debug!("PUT {} {body}", call.id);
        let response = self.transport.put(&path, &body).await?;
        match first_error(&response) {
            None => Ok(PutOutcome::Applied),
            Some(error) if error.r#type == ERROR_TARGET_OFF => {
                log::debug!("{} is off, ignoring: {}", call.id, error.description);
                Ok(PutOutcome::TargetOff)
            }
            Some(error) => Err(error.into()),
        }
    }

    async fn clear_caches(&self) {
        self.cache.invalidate_all().await;
    }
}
