use async_trait::async_trait;

use crate::color::{clamp_to, convert::convert};
use crate::state::{ColorMode, LightCapabilities, LightState, PutCall, PutOutcome};

/// The read/write contract schedulers program against, independent of the
/// backend.
///
/// Ids are the scheduler-facing ids of the backend (legacy `/lights/4` ids on
/// a bridge, entity ids on a hub).
#[async_trait]
pub trait HueApi: Send + Sync {
    async fn get_light_state(&self, id: &str) -> crate::Result<LightState>;

    /// States of all lights of a group, in member order.
    async fn get_group_states(&self, id: &str) -> crate::Result<Vec<LightState>>;

    /// Member light ids of a group. Never empty on success.
    async fn get_group_lights(&self, id: &str) -> crate::Result<Vec<String>>;

    /// Ids of all groups containing the light.
    async fn get_assigned_groups(&self, light_id: &str) -> crate::Result<Vec<String>>;

    /// Ids of the lights a scene changes when activated.
    async fn get_affected_ids_by_scene(&self, scene_id: &str) -> crate::Result<Vec<String>>;

    async fn get_light_name(&self, id: &str) -> crate::Result<String>;

    async fn get_group_name(&self, id: &str) -> crate::Result<String>;

    async fn get_scene_name(&self, id: &str) -> crate::Result<String>;

    async fn get_light_id(&self, name: &str) -> crate::Result<String>;

    async fn get_group_id(&self, name: &str) -> crate::Result<String>;

    async fn get_light_capabilities(&self, id: &str) -> crate::Result<LightCapabilities>;

    /// The union of the capabilities of all member lights.
    async fn get_group_capabilities(&self, id: &str) -> crate::Result<LightCapabilities>;

    async fn is_light_off(&self, id: &str) -> crate::Result<bool>;

    /// True if no light of the group is on.
    async fn is_group_off(&self, id: &str) -> crate::Result<bool>;

    /// Sends `call` to the backend, converting its colour to something the
    /// target supports first.
    async fn put_state(&self, call: &PutCall) -> crate::Result<PutOutcome>;

    /// Drops every cached resource; the next read refetches.
    async fn clear_caches(&self);
}

/// Adapts the colour of `call` to what `capabilities` can display.
///
/// Calls in an unsupported mode are converted to XY when the target has
/// colour, to CT when it only has white tones, and lose their colour
/// otherwise. CT is clamped into the supported range and XY into the gamut.
pub(crate) fn prepare_call(call: &PutCall, capabilities: &LightCapabilities) -> PutCall {
    let mut call = call.clone();
    if let Some(mode) = call.color_mode() {
        if !capabilities.supports(mode) {
            let target = if capabilities.is_color_supported() {
                Some(ColorMode::Xy)
            } else if capabilities.is_ct_supported() {
                Some(ColorMode::Ct)
            } else {
                None
            };
            call = match target {
                Some(target) => convert(call, capabilities.gamut.as_ref(), mode, target),
                None => {
                    log::debug!("{} supports no colour, dropping colour fields", call.id);
                    call.without_color()
                }
            };
        }
    }
    if let Some(ct) = call.ct {
        call.ct = Some(capabilities.clamp_ct(ct));
    }
    if let Some(xy) = call.xy() {
        let xy = clamp_to(capabilities.gamut.as_ref(), xy);
        call.x = Some(xy.x);
        call.y = Some(xy.y);
    }
    call
}
