use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

/// Tuning shared by both backends. Every field has a default, so partial
/// documents deserialize.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClientConfig {
    pub request_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    /// An event connection silent for this long is considered dead.
    pub event_read_timeout_ms: u64,
    pub reconnect_delay_ms: u64,
    pub requests_per_second: f64,
    pub max_burst_seconds: f64,
    /// Rate limiter permits charged for a group write; a light write costs one.
    pub group_request_permits: u32,
    /// Transition time (tenths of a second) the bridge applies when none is sent.
    pub default_transition_time: u16,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 5_000,
            connect_timeout_ms: 2_000,
            event_read_timeout_ms: 3_600_000,
            reconnect_delay_ms: 5_000,
            requests_per_second: 10.0,
            max_burst_seconds: 1.0,
            group_request_permits: 10,
            default_transition_time: 4,
        }
    }
}

impl ClientConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn event_read_timeout(&self) -> Duration {
        Duration::from_millis(self.event_read_timeout_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct BridgeConfig {
    /// Host name or IP address of the bridge.
    pub host: String,
    pub application_key: String,
    #[serde(default)]
    pub client: ClientConfig,
}

impl BridgeConfig {
    pub fn new(host: impl Into<String>, application_key: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            application_key: application_key.into(),
            client: ClientConfig::default(),
        }
    }

    pub fn base_url(&self) -> crate::Result<Url> {
        Ok(Url::parse(&format!("https://{}/", self.host))?)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct HassConfig {
    pub url: Url,
    /// Long-lived access token.
    pub token: String,
    #[serde(default)]
    pub client: ClientConfig,
}

impl HassConfig {
    pub fn new(url: Url, token: impl Into<String>) -> Self {
        Self {
            url,
            token: token.into(),
            client: ClientConfig::default(),
        }
    }
}
