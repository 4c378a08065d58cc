use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

pub use crate::color::{Gamut, XY};

/// A cacheable resource, identified by `id` and optionally by a legacy id.
pub trait Resource: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {
    /// Human readable type name, used in errors and logs.
    const KIND: &'static str;

    fn id(&self) -> &str;

    fn id_v1(&self) -> Option<&str> {
        None
    }

    fn name(&self) -> Option<&str> {
        None
    }

    /// The id handed out to schedulers: the legacy id when there is one.
    fn scheduler_id(&self) -> &str {
        self.id_v1().unwrap_or_else(|| self.id())
    }
}

/// The resource collections mirrored from the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceType {
    Light,
    GroupedLight,
    /// Rooms and zones.
    Group,
    Scene,
    Device,
    Connectivity,
}

impl ResourceType {
    /// Maps the `type` tag of a bridge resource.
    pub fn from_rtype(rtype: &str) -> Option<Self> {
        match rtype {
            "light" => Some(Self::Light),
            "grouped_light" => Some(Self::GroupedLight),
            "room" | "zone" => Some(Self::Group),
            "scene" => Some(Self::Scene),
            "device" => Some(Self::Device),
            "zigbee_connectivity" => Some(Self::Connectivity),
            _ => None,
        }
    }

    /// Collection endpoints below `/clip/v2/resource`.
    pub fn endpoints(self) -> &'static [&'static str] {
        match self {
            Self::Light => &["light"],
            Self::GroupedLight => &["grouped_light"],
            Self::Group => &["room", "zone"],
            Self::Scene => &["scene"],
            Self::Device => &["device"],
            Self::Connectivity => &["zigbee_connectivity"],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceIdentifier {
    pub rid: String,
    pub rtype: String,
}

type Owner = ResourceIdentifier;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metadata {
    pub name: Option<String>,
    pub archetype: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct On {
    pub on: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dimming {
    pub brightness: f64,
    pub min_dim_level: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColorTemperature {
    pub mirek: Option<u16>,
    pub mirek_valid: Option<bool>,
    pub mirek_schema: Option<MirekSchema>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MirekSchema {
    pub mirek_minimum: u16,
    pub mirek_maximum: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Color {
    pub xy: Option<XY>,
    pub gamut: Option<Gamut>,
    pub gamut_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Effects {
    pub effect: Option<String>,
    pub status: Option<String>,
    pub status_values: Option<Vec<String>>,
    pub effect_values: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Light {
    pub id: String,
    pub id_v1: Option<String>,
    pub owner: Option<Owner>,
    pub metadata: Option<Metadata>,
    pub on: Option<On>,
    pub dimming: Option<Dimming>,
    pub color_temperature: Option<ColorTemperature>,
    pub color: Option<Color>,
    pub effects: Option<Effects>,
}

impl Resource for Light {
    const KIND: &'static str = "light";

    fn id(&self) -> &str {
        &self.id
    }

    fn id_v1(&self) -> Option<&str> {
        self.id_v1.as_deref()
    }

    fn name(&self) -> Option<&str> {
        self.metadata.as_ref()?.name.as_deref()
    }
}

/// A room or a zone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Group {
    pub id: String,
    pub id_v1: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub children: Option<Vec<ResourceIdentifier>>,
    pub services: Option<Vec<ResourceIdentifier>>,
    pub metadata: Option<Metadata>,
}

impl Group {
    /// Id of the grouped_light service controlling all of the group's lights.
    pub fn grouped_light(&self) -> Option<&str> {
        self.services
            .iter()
            .flatten()
            .find(|service| service.rtype == "grouped_light")
            .map(|service| service.rid.as_str())
    }
}

impl Resource for Group {
    const KIND: &'static str = "group";

    fn id(&self) -> &str {
        &self.id
    }

    fn id_v1(&self) -> Option<&str> {
        self.id_v1.as_deref()
    }

    fn name(&self) -> Option<&str> {
        self.metadata.as_ref()?.name.as_deref()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupedLight {
    pub id: String,
    pub id_v1: Option<String>,
    pub owner: Option<Owner>,
    pub on: Option<On>,
    pub dimming: Option<Dimming>,
}

impl Resource for GroupedLight {
    const KIND: &'static str = "grouped_light";

    fn id(&self) -> &str {
        &self.id
    }

    fn id_v1(&self) -> Option<&str> {
        self.id_v1.as_deref()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SceneStatus {
    pub active: Option<SceneStatusActive>,
    pub last_recall: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SceneStatusActive {
    Inactive,
    Static,
    DynamicPalette,
    #[serde(other)]
    Unknown,
}

impl SceneStatusActive {
    pub fn is_active(self) -> bool {
        matches!(self, Self::Static | Self::DynamicPalette)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SceneEffect {
    pub effect: Option<String>,
}

/// The state a scene applies to one of its targets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SceneActionState {
    pub on: Option<On>,
    pub dimming: Option<Dimming>,
    pub color: Option<Color>,
    pub color_temperature: Option<ColorTemperature>,
    pub effects: Option<SceneEffect>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SceneAction {
    pub target: ResourceIdentifier,
    pub action: SceneActionState,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scene {
    pub id: String,
    pub id_v1: Option<String>,
    pub metadata: Option<Metadata>,
    pub group: Option<ResourceIdentifier>,
    pub actions: Option<Vec<SceneAction>>,
    pub status: Option<SceneStatus>,
}

impl Resource for Scene {
    const KIND: &'static str = "scene";

    fn id(&self) -> &str {
        &self.id
    }

    fn id_v1(&self) -> Option<&str> {
        self.id_v1.as_deref()
    }

    fn name(&self) -> Option<&str> {
        self.metadata.as_ref()?.name.as_deref()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductData {
    pub model_id: Option<String>,
    pub manufacturer_name: Option<String>,
    pub product_name: Option<String>,
    pub product_archetype: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub id: String,
    pub id_v1: Option<String>,
    pub product_data: Option<ProductData>,
    pub metadata: Option<Metadata>,
    pub services: Option<Vec<ResourceIdentifier>>,
}

impl Device {
    fn services_of<'a>(&'a self, rtype: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.services
            .iter()
            .flatten()
            .filter(move |service| service.rtype == rtype)
            .map(|service| service.rid.as_str())
    }

    /// Returns the ids of all services of type light associated with this device.
    pub fn get_lights(&self) -> impl Iterator<Item = &str> {
        self.services_of("light")
    }

    pub fn connectivity(&self) -> Option<&str> {
        self.services_of("zigbee_connectivity").next()
    }
}

impl Resource for Device {
    const KIND: &'static str = "device";

    fn id(&self) -> &str {
        &self.id
    }

    fn id_v1(&self) -> Option<&str> {
        self.id_v1.as_deref()
    }

    fn name(&self) -> Option<&str> {
        self.metadata.as_ref()?.name.as_deref()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectivityStatus {
    Connected,
    ConnectivityIssue,
    Disconnected,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZigbeeConnectivity {
    pub id: String,
    pub id_v1: Option<String>,
    pub owner: Option<Owner>,
    pub status: Option<ConnectivityStatus>,
}

impl Resource for ZigbeeConnectivity {
    const KIND: &'static str = "zigbee_connectivity";

    fn id(&self) -> &str {
        &self.id
    }

    fn id_v1(&self) -> Option<&str> {
        self.id_v1.as_deref()
    }
}
