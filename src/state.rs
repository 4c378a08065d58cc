use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::color::{Gamut, XY};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Capability {
    OnOff,
    Brightness,
    Color,
    ColorTemperature,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorMode {
    Ct,
    Xy,
    Hs,
}

/// What a light (or the union of a group's lights) is able to do.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LightCapabilities {
    pub gamut: Option<Gamut>,
    pub gamut_type: Option<String>,
    pub ct_min: Option<u16>,
    pub ct_max: Option<u16>,
    pub capabilities: BTreeSet<Capability>,
    pub effects: Vec<String>,
}

impl LightCapabilities {
    pub fn with_capability(mut self, capability: Capability) -> Self {
        self.capabilities.insert(capability);
        self
    }

    pub fn with_ct_range(self, min: u16, max: u16) -> Self {
        Self {
            ct_min: Some(min),
            ct_max: Some(max),
            ..self
        }
    }

    pub fn with_gamut(self, gamut: Gamut, gamut_type: impl Into<String>) -> Self {
        Self {
            gamut: Some(gamut),
            gamut_type: Some(gamut_type.into()),
            ..self
        }
    }

    pub fn has(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }

    pub fn is_color_supported(&self) -> bool {
        self.has(Capability::Color)
    }

    pub fn is_ct_supported(&self) -> bool {
        self.has(Capability::ColorTemperature)
    }

    pub fn supports(&self, mode: ColorMode) -> bool {
        match mode {
            ColorMode::Ct => self.is_ct_supported(),
            ColorMode::Xy | ColorMode::Hs => self.is_color_supported(),
        }
    }

    /// Clamps a mirek value into the supported range, if one is known.
    pub fn clamp_ct(&self, mirek: u16) -> u16 {
        let mirek = self.ct_min.map_or(mirek, |min| mirek.max(min));
        self.ct_max.map_or(mirek, |max| mirek.min(max))
    }

    /// Widens `self` so that it covers `other` as well.
    ///
    /// Capability sets and effects are unioned, the colour temperature range
    /// extended and the larger gamut kept.
    pub fn widen(mut self, other: &LightCapabilities) -> Self {
        self.capabilities.extend(other.capabilities.iter().copied());
        for effect in &other.effects {
            if !self.effects.contains(effect) {
                self.effects.push(effect.clone());
            }
        }
        self.ct_min = match (self.ct_min, other.ct_min) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        self.ct_max = match (self.ct_max, other.ct_max) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
        if let Some(gamut) = other.gamut {
            if self.gamut.is_none_or(|own| gamut.area() > own.area()) {
                self.gamut = Some(gamut);
                self.gamut_type.clone_from(&other.gamut_type);
            }
        }
        self
    }
}

/// Current state of a single light, normalized to the bridge's value ranges.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LightState {
    pub id: String,
    /// Brightness in `1..=254`.
    pub brightness: Option<u16>,
    pub color_temperature: Option<u16>,
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub hue: Option<u16>,
    pub sat: Option<u16>,
    pub effect: Option<String>,
    pub color_mode: Option<ColorMode>,
    pub on: bool,
    pub unavailable: bool,
    pub capabilities: LightCapabilities,
}

impl LightState {
    pub fn is_off(&self) -> bool {
        !self.on || self.unavailable
    }

    pub fn xy(&self) -> Option<XY> {
        Some(XY::new(self.x?, self.y?))
    }
}

/// A desired state for one light or group.
///
/// Every field but the target is optional; an absent field is left out of the
/// request sent to the backend, which is different from sending zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PutCall {
    pub id: String,
    pub group: bool,
    pub bri: Option<u16>,
    pub ct: Option<u16>,
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub hue: Option<u16>,
    pub sat: Option<u16>,
    pub on: Option<bool>,
    pub effect: Option<String>,
    /// In tenths of a second.
    pub transition_time: Option<u16>,
}

impl PutCall {
    pub fn light(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    pub fn group(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            group: true,
            ..Default::default()
        }
    }

    pub fn on(self) -> Self {
        Self {
            on: Some(true),
            ..self
        }
    }

    pub fn off(self) -> Self {
        Self {
            on: Some(false),
            ..self
        }
    }

    pub fn with_brightness(self, bri: u16) -> Self {
        Self {
            bri: Some(bri),
            ..self
        }
    }

    pub fn with_ct(self, mirek: u16) -> Self {
        Self {
            ct: Some(mirek),
            ..self
        }
    }

    pub fn with_xy(self, x: f64, y: f64) -> Self {
        Self {
            x: Some(x),
            y: Some(y),
            ..self
        }
    }

    pub fn with_hue_sat(self, hue: u16, sat: u16) -> Self {
        Self {
            hue: Some(hue),
            sat: Some(sat),
            ..self
        }
    }

    pub fn with_effect(self, effect: impl Into<String>) -> Self {
        Self {
            effect: Some(effect.into()),
            ..self
        }
    }

    pub fn with_transition_time(self, tenths: u16) -> Self {
        Self {
            transition_time: Some(tenths),
            ..self
        }
    }

    /// Drops every colour field.
    pub fn without_color(self) -> Self {
        Self {
            ct: None,
            x: None,
            y: None,
            hue: None,
            sat: None,
            ..self
        }
    }

    pub fn xy(&self) -> Option<XY> {
        Some(XY::new(self.x?, self.y?))
    }

    /// The colour representation carried by this call, if any.
    pub fn color_mode(&self) -> Option<ColorMode> {
        if self.ct.is_some() {
            Some(ColorMode::Ct)
        } else if self.x.is_some() && self.y.is_some() {
            Some(ColorMode::Xy)
        } else if self.hue.is_some() || self.sat.is_some() {
            Some(ColorMode::Hs)
        } else {
            None
        }
    }

    /// True if sending this call would not change anything.
    pub fn is_no_op(&self) -> bool {
        self.bri.is_none()
            && self.ct.is_none()
            && self.x.is_none()
            && self.y.is_none()
            && self.hue.is_none()
            && self.sat.is_none()
            && self.on.is_none()
            && self.effect.is_none()
            && self.transition_time.is_none()
    }
}

/// Result of a write that reached the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    Applied,
    /// The backend refused the change only because the target is off.
    TargetOff,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_call_is_no_op() {
        assert!(PutCall::light("/lights/1").is_no_op());
        assert!(PutCall::group("/groups/1").is_no_op());
        assert!(!PutCall::light("/lights/1").with_transition_time(0).is_no_op());
        assert!(!PutCall::light("/lights/1").with_brightness(0).is_no_op());
    }

    #[test]
    fn color_mode_detection() {
        assert_eq!(PutCall::light("1").with_ct(300).color_mode(), Some(ColorMode::Ct));
        assert_eq!(PutCall::light("1").with_xy(0.3, 0.3).color_mode(), Some(ColorMode::Xy));
        assert_eq!(PutCall::light("1").with_hue_sat(1, 2).color_mode(), Some(ColorMode::Hs));
        assert_eq!(PutCall::light("1").on().color_mode(), None);
        assert_eq!(
            PutCall::light("1").with_xy(0.3, 0.3).without_color().color_mode(),
            None
        );
    }

    #[test]
    fn widening_never_narrows() {
        let ct_only = LightCapabilities::default()
            .with_capability(Capability::OnOff)
            .with_capability(Capability::ColorTemperature)
            .with_ct_range(153, 454);
        let color = LightCapabilities::default()
            .with_capability(Capability::Color)
            .with_ct_range(200, 500)
            .with_gamut(Gamut::B, "B");
        let wide = LightCapabilities::default().with_gamut(Gamut::C, "C");

        let merged = ct_only.clone().widen(&color).widen(&wide);
        assert_eq!(merged.ct_min, Some(153));
        assert_eq!(merged.ct_max, Some(500));
        assert!(merged.has(Capability::OnOff));
        assert!(merged.has(Capability::Color));
        assert!(merged.has(Capability::ColorTemperature));
        assert_eq!(merged.gamut, Some(Gamut::C));
        assert_eq!(merged.gamut_type.as_deref(), Some("C"));

        // widening by a smaller gamut keeps the larger one
        let merged = merged.widen(&color);
        assert_eq!(merged.gamut, Some(Gamut::C));
    }

    #[test]
    fn ct_is_clamped_to_range() {
        let caps = LightCapabilities::default().with_ct_range(153, 454);
        assert_eq!(caps.clamp_ct(100), 153);
        assert_eq!(caps.clamp_ct(500), 454);
        assert_eq!(caps.clamp_ct(300), 300);
        assert_eq!(LightCapabilities::default().clamp_ct(10), 10);
    }
}
