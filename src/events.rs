//! Turning backend push events into cache updates and light transitions.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;

use crate::bridge::BridgeCache;
use crate::hass::HassState;
use crate::manual::ManualOverrideTracker;
use crate::resource::{ConnectivityStatus, Resource, ResourceType, SceneStatusActive};

/// Receives the light transitions derived from push events. Every method
/// defaults to doing nothing.
///
/// Ids are scheduler-facing ids. `physical` marks a light that came back
/// because its power was restored, rather than by a command.
pub trait LightEventListener: Send + Sync {
    fn on_light_on(&self, _id: &str, _physical: bool) {}

    fn on_light_off(&self, _id: &str) {}

    fn on_group_on(&self, _id: &str) {}

    fn on_group_off(&self, _id: &str) {}

    fn on_scene_activated(&self, _id: &str) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopListener;

impl LightEventListener for NoopListener {}

#[derive(Debug, Clone, Deserialize)]
pub struct Event {
    #[serde(default)]
    pub data: Vec<Value>,
    pub r#type: EventType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Update,
    Add,
    Delete,
    Error,
    #[serde(other)]
    Unknown,
}

fn scheduler_id<T: Resource>(cached: Option<&T>, payload: &Value, id: &str) -> String {
    cached
        .map(|resource| resource.scheduler_id().to_string())
        .or_else(|| payload.get("id_v1").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| id.to_string())
}

fn notify(
    tracker: &ManualOverrideTracker,
    listener: &dyn LightEventListener,
    id: &str,
    on: bool,
    physical: bool,
    group: bool,
) {
    log::debug!(
        "{id} turned {}{}",
        if on { "on" } else { "off" },
        if physical { " (power restored)" } else { "" }
    );
    if on {
        tracker.on_light_turned_on(id);
    } else {
        tracker.on_light_off(id);
    }
    match (group, on) {
        (false, true) => listener.on_light_on(id, physical),
        (false, false) => listener.on_light_off(id),
        (true, true) => listener.on_group_on(id),
        (true, false) => listener.on_group_off(id),
    }
}

/// Applies bridge events, which carry only the changed fields, to a
/// [`BridgeCache`].
pub struct HueEventSynchronizer {
    cache: Arc<BridgeCache>,
    tracker: Arc<ManualOverrideTracker>,
    listener: Arc<dyn LightEventListener>,
}

impl HueEventSynchronizer {
    pub fn new(
        cache: Arc<BridgeCache>,
        tracker: Arc<ManualOverrideTracker>,
        listener: Arc<dyn LightEventListener>,
    ) -> Self {
        Self {
            cache,
            tracker,
            listener,
        }
    }

    /// Handles one event stream message. Malformed messages are logged and
    /// dropped.
    pub async fn handle_message(&self, message: &str) {
        let events: Vec<Event> = match serde_json::from_str(message) {
            Ok(events) => events,
            Err(err) => {
                log::warn!("ignoring malformed event message: {err}");
                return;
            }
        };
        for event in &events {
            self.handle_event(event).await;
        }
    }

    pub async fn handle_event(&self, event: &Event) {
        for item in &event.data {
            let Some(tag) = item.get("type").and_then(Value::as_str) else {
                log::warn!("ignoring event item without type: {item}");
                continue;
            };
            let Some(rtype) = ResourceType::from_rtype(tag) else {
                log::trace!("ignoring {tag} event");
                continue;
            };
            let Some(id) = item.get("id").and_then(Value::as_str) else {
                log::warn!("ignoring {tag} event without id");
                continue;
            };
            match event.r#type {
                EventType::Update => self.on_modification(rtype, id, item).await,
                EventType::Add => {
                    log::debug!("{tag} {id} added");
                    self.cache.invalidate(rtype).await;
                }
                EventType::Delete => {
                    log::debug!("{tag} {id} deleted");
                    self.cache.remove(rtype, id).await;
                }
                EventType::Error | EventType::Unknown => {
                    log::debug!("ignoring {:?} event for {tag} {id}", event.r#type);
                }
            }
        }
    }

    /// Applies a partial update for one resource.
    ///
    /// A payload that is not an object drops the cached entry and forces the
    /// collection to be fetched again on the next read.
    pub async fn on_modification(&self, rtype: ResourceType, id: &str, payload: &Value) {
        if !payload.is_object() {
            log::warn!("unusable {rtype:?} payload for {id}, dropping it from the cache");
            self.cache.remove(rtype, id).await;
            self.cache.invalidate(rtype).await;
            return;
        }
        match rtype {
            ResourceType::Light => self.on_light_modified(id, payload).await,
            ResourceType::GroupedLight => self.on_grouped_light_modified(id, payload).await,
            ResourceType::Connectivity => self.on_connectivity_modified(id, payload).await,
            ResourceType::Scene => self.on_scene_modified(id, payload).await,
            ResourceType::Group | ResourceType::Device => {
                self.cache.patch(rtype, id, payload).await;
            }
        }
    }

    async fn on_light_modified(&self, id: &str, payload: &Value) {
        let previous = self.cache.lights.get_cached(id).await;
        self.cache.lights.patch(id, payload).await;

        let Some(on) = payload.pointer("/on/on").and_then(Value::as_bool) else {
            return;
        };
        if previous.as_ref().and_then(|light| light.on).is_some_and(|was| was.on == on) {
            return;
        }
        let id = scheduler_id(previous.as_ref(), payload, id);
        notify(&self.tracker, self.listener.as_ref(), &id, on, false, false);
    }

    async fn on_grouped_light_modified(&self, id: &str, payload: &Value) {
        let previous = self.cache.grouped_lights.get_cached(id).await;
        self.cache.grouped_lights.patch(id, payload).await;

        let Some(on) = payload.pointer("/on/on").and_then(Value::as_bool) else {
            return;
        };
        if previous.as_ref().and_then(|group| group.on).is_some_and(|was| was.on == on) {
            return;
        }
        let id = scheduler_id(previous.as_ref(), payload, id);
        notify(&self.tracker, self.listener.as_ref(), &id, on, false, true);
    }

    /// Connectivity changes are physical transitions of every light of the
    /// sensor's device.
    async fn on_connectivity_modified(&self, id: &str, payload: &Value) {
        let previous = self.cache.connectivity.get_cached(id).await;
        self.cache.connectivity.patch(id, payload).await;

        let Some(status) = payload
            .get("status")
            .and_then(|status| ConnectivityStatus::deserialize(status).ok())
        else {
            return;
        };
        let on = match status {
            ConnectivityStatus::Connected => true,
            ConnectivityStatus::ConnectivityIssue | ConnectivityStatus::Disconnected => false,
            ConnectivityStatus::Unknown => return,
        };
        if previous.as_ref().and_then(|sensor| sensor.status) == Some(status) {
            return;
        }

        let device_id = previous
            .and_then(|sensor| sensor.owner)
            .map(|owner| owner.rid)
            .or_else(|| payload.pointer("/owner/rid").and_then(Value::as_str).map(str::to_string));
        let Some(device_id) = device_id else {
            log::debug!("connectivity {id} has no known device");
            return;
        };
        let Some(device) = self.cache.devices.get_cached(&device_id).await else {
            log::debug!("device {device_id} of connectivity {id} not cached");
            return;
        };
        for light_id in device.get_lights() {
            let light = self.cache.lights.get_cached(light_id).await;
            let id = light
                .as_ref()
                .map_or_else(|| light_id.to_string(), |light| light.scheduler_id().to_string());
            notify(&self.tracker, self.listener.as_ref(), &id, on, on, false);
        }
    }

    async fn on_scene_modified(&self, id: &str, payload: &Value) {
        let previous = self.cache.scenes.get_cached(id).await;
        self.cache.scenes.patch(id, payload).await;

        let active = payload
            .pointer("/status/active")
            .and_then(|active| SceneStatusActive::deserialize(active).ok());
        if active.is_some_and(SceneStatusActive::is_active) {
            let id = scheduler_id(previous.as_ref(), payload, id);
            log::debug!("scene {id} activated");
            self.listener.on_scene_activated(&id);
        }
    }
}

const ON: &str = "on";
const OFF: &str = "off";
const UNAVAILABLE: &str = "unavailable";

/// A hub `state_changed` event: the entity's full state before and after.
#[derive(Debug, Clone, Deserialize)]
pub struct HassStateChangedEvent {
    pub entity_id: String,
    pub old_state: Option<HassState>,
    pub new_state: Option<HassState>,
}

/// Derives transitions from hub state snapshots. The hub cache is not touched;
/// it is only refreshed through [`HueApi::clear_caches`](crate::HueApi::clear_caches).
pub struct HassEventSynchronizer {
    tracker: Arc<ManualOverrideTracker>,
    listener: Arc<dyn LightEventListener>,
}

impl HassEventSynchronizer {
    pub fn new(tracker: Arc<ManualOverrideTracker>, listener: Arc<dyn LightEventListener>) -> Self {
        Self { tracker, listener }
    }

    pub fn on_state_changed(&self, event: &HassStateChangedEvent) {
        let id = event.entity_id.as_str();
        let old = event.old_state.as_ref().map(|state| state.state.as_str());
        let new = event.new_state.as_ref().map(|state| state.state.as_str());

        if id.starts_with("scene.") {
            // a scene's state is the time it was last activated
            if let (Some(old), Some(new)) = (old, new) {
                if old != new && old != UNAVAILABLE && new != UNAVAILABLE {
                    log::debug!("scene {id} activated");
                    self.listener.on_scene_activated(id);
                }
            }
            return;
        }

        let group = event
            .new_state
            .as_ref()
            .or(event.old_state.as_ref())
            .is_some_and(HassState::is_group);
        let listener = self.listener.as_ref();
        match (old, new) {
            (Some(OFF), Some(ON)) => notify(&self.tracker, listener, id, true, false, group),
            (Some(UNAVAILABLE), Some(ON)) => notify(&self.tracker, listener, id, true, true, group),
            (Some(ON), Some(OFF) | Some(UNAVAILABLE) | None) => {
                notify(&self.tracker, listener, id, false, false, group)
            }
            _ => {}
        }
    }
}
