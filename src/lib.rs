//! Cached, push-synchronized access to lighting backends.
//!
//! Two backends are supported behind the [`HueApi`] trait: a Philips Hue bridge
//! ([`HueBridgeClient`]) whose resources are mirrored in per-type
//! [`store::ResourceStore`]s and kept fresh by patch events, and a Home Assistant
//! hub ([`HassClient`]) whose state snapshots are cached until explicitly cleared.

pub mod api;
pub mod bridge;
pub mod color;
pub mod config;
pub mod events;
pub mod hass;
pub mod manual;
pub mod patch;
pub mod ratelimit;
pub mod resource;
pub mod state;
pub mod store;
pub mod transport;

#[cfg(test)]
mod testutil;

pub use api::HueApi;
pub use bridge::HueBridgeClient;
pub use config::{BridgeConfig, ClientConfig, HassConfig};
pub use hass::HassClient;
pub use manual::ManualOverrideTracker;
pub use state::{Capability, ColorMode, LightCapabilities, LightState, PutCall, PutOutcome};

/// All errors that can surface from the resource-access layer.
#[derive(Debug, thiserror::Error)]
pub enum HueError {
    /// The backend could not be reached (connection refused, timeout, closed socket).
    #[error("connection to backend failed: {msg}")]
    Connection { msg: String },

    /// The backend rejected our credentials. Never retried.
    #[error("authentication with the backend failed")]
    Authentication,

    #[error("{kind} with id '{id}' not found")]
    ResourceNotFound { kind: &'static str, id: String },

    /// A group was resolved but contains no lights.
    #[error("group '{id}' has no lights")]
    EmptyResource { id: String },

    #[error("name '{name}' matches more than one resource: {ids:?}")]
    AmbiguousName { name: String, ids: Vec<String> },

    #[error("'{id}' does not belong to a supported resource type")]
    UnsupportedResourceType { id: String },

    /// Backend reported an error we do not classify further.
    #[error("backend error {code}: {description}")]
    Api { code: usize, description: String },

    #[error("a protocol error occurred: {msg}")]
    Protocol { msg: String },

    #[error("malformed json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),

    /// A cancellable wait was interrupted.
    #[error("operation cancelled")]
    Cancelled,
}

impl HueError {
    pub fn protocol_err(msg: impl Into<String>) -> Self {
        HueError::Protocol { msg: msg.into() }
    }

    pub fn connection_err(msg: impl Into<String>) -> Self {
        HueError::Connection { msg: msg.into() }
    }

    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        HueError::ResourceNotFound {
            kind,
            id: id.into(),
        }
    }

    /// Errors that must stop an event loop instead of triggering a reconnect.
    pub fn is_fatal(&self) -> bool {
        matches!(self, HueError::Authentication)
    }
}

impl From<reqwest::Error> for HueError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            if status == reqwest::StatusCode::UNAUTHORIZED
                || status == reqwest::StatusCode::FORBIDDEN
            {
                return HueError::Authentication;
            }
            return HueError::Api {
                code: status.as_u16() as usize,
                description: err.to_string(),
            };
        }
        if err.is_decode() {
            return HueError::protocol_err(err.to_string());
        }
        HueError::connection_err(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for HueError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;
        match err {
            WsError::Http(response) if matches!(response.status().as_u16(), 401 | 403) => {
                HueError::Authentication
            }
            other => HueError::connection_err(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, HueError>;

/// Installs `pretty_env_logger` as the global logger.
#[cfg(feature = "logging")]
pub fn init_logging() {
    let _ = pretty_env_logger::try_init();
}
