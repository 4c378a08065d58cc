//! HTTP plumbing shared by both backends.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION};
use reqwest::Method;
use reqwest_eventsource::EventSource;
use serde_json::Value;
use url::Url;

use crate::config::{BridgeConfig, ClientConfig, HassConfig};
use crate::HueError;

/// Request/response exchange with a backend. Paths are absolute paths below
/// the backend's base URL.
#[async_trait]
pub trait Transport: Send + Sync + std::fmt::Debug {
    async fn get(&self, path: &str) -> crate::Result<Value>;

    async fn put(&self, path: &str, body: &Value) -> crate::Result<Value>;

    async fn post(&self, path: &str, body: &Value) -> crate::Result<Value>;
}

/// How requests authenticate.
#[derive(Debug, Clone)]
pub enum Auth {
    /// Hue `hue-application-key` header.
    ApplicationKey(String),
    Bearer(String),
}

/// [`Transport`] over `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    base: Url,
    client: reqwest::Client,
    request_timeout: Duration,
}

// see https://developers.meethue.com/develop/application-design-guidance/using-https/
const HUE_ROOT_CERTIFICATE: &[u8] = b"-----BEGIN CERTIFICATE-----
MIICMjCCAdigAwIBAgIUO7FSLbaxikuXAljzVaurLXWmFw4wCgYIKoZIzj0EAwIw
OTELMAkGA1UEBhMCTkwxFDASBgNVBAoMC1BoaWxpcHMgSHVlMRQwEgYDVQQDDAty
b290LWJyaWRnZTAiGA8yMDE3MDEwMTAwMDAwMFoYDzIwMzgwMTE5MDMxNDA3WjA5
MQswCQYDVQQGEwJOTDEUMBIGA1UECgwLUGhpbGlwcyBIdWUxFDASBgNVBAMMC3Jv
b3QtYnJpZGdlMFkwEwYHKoZIzj0CAQYIKoZIzj0DAQcDQgAEjNw2tx2AplOf9x86
aTdvEcL1FU65QDxziKvBpW9XXSIcibAeQiKxegpq8Exbr9v6LBnYbna2VcaK0G22
jOKkTqOBuTCBtjAPBgNVHRMBAf8EBTADAQH/MA4GA1UdDwEB/wQEAwIBhjAdBgNV
HQ4EFgQUZ2ONTFrDT6o8ItRnKfqWKnHFGmQwdAYDVR0jBG0wa4AUZ2ONTFrDT6o8
ItRnKfqWKnHFGmShPaQ7MDkxCzAJBgNVBAYTAk5MMRQwEgYDVQQKDAtQaGlsaXBz
IEh1ZTEUMBIGA1UEAwwLcm9vdC1icmlkZ2WCFDuxUi22sYpLlwJY81Wrqy11phcO
MAoGCCqGSM49BAMCA0gAMEUCIEBYYEOsa07TH7E5MJnGw557lVkORgit2Rm1h3B2
sFgDAiEA1Fj/C3AN5psFMjo0//mrQebo0eKd3aWRx+pQY08mk48=
-----END CERTIFICATE-----";

fn auth_headers(auth: &Auth) -> crate::Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    let (name, value) = match auth {
        Auth::ApplicationKey(key) => (HeaderName::from_static("hue-application-key"), key.clone()),
        Auth::Bearer(token) => (AUTHORIZATION, format!("Bearer {token}")),
    };
    let mut value = HeaderValue::from_str(&value)
        .map_err(|_| HueError::protocol_err("credentials contain invalid header characters"))?;
    value.set_sensitive(true);
    headers.insert(name, value);
    Ok(headers)
}

fn create_reqwest_client(
    auth: &Auth,
    bridge: bool,
    config: &ClientConfig,
) -> crate::Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder()
        .default_headers(auth_headers(auth)?)
        .connect_timeout(config.connect_timeout())
        .tcp_keepalive(Some(Duration::from_secs(5)));
    if bridge {
        builder = builder
            .add_root_certificate(reqwest::Certificate::from_pem(HUE_ROOT_CERTIFICATE)?)
            // TODO verify the bridge id against the certificate CN instead of accepting any
            .danger_accept_invalid_certs(true);
    }
    Ok(builder.build()?)
}

impl HttpTransport {
    pub fn new(base: Url, auth: Auth, bridge: bool, config: &ClientConfig) -> crate::Result<Self> {
        Ok(Self {
            base,
            client: create_reqwest_client(&auth, bridge, config)?,
            request_timeout: config.request_timeout(),
        })
    }

    pub fn for_bridge(config: &BridgeConfig) -> crate::Result<Self> {
        Self::new(
            config.base_url()?,
            Auth::ApplicationKey(config.application_key.clone()),
            true,
            &config.client,
        )
    }

    pub fn for_hass(config: &HassConfig) -> crate::Result<Self> {
        Self::new(
            config.url.clone(),
            Auth::Bearer(config.token.clone()),
            false,
            &config.client,
        )
    }

    pub fn url(&self, path: &str) -> crate::Result<Url> {
        Ok(self.base.join(path)?)
    }

    async fn send(&self, method: Method, path: &str, body: Option<&Value>) -> crate::Result<Value> {
        let url = self.url(path)?;
        log::debug!("{method} {url}");
        let mut request = self
            .client
            .request(method, url)
            .timeout(self.request_timeout);
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request.send().await?.error_for_status()?;
        let text = response.text().await?;
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&text)?)
    }

    /// Opens a server-sent event stream. The request carries no overall
    /// timeout; idle detection is up to the consumer.
    pub fn event_source(&self, path: &str) -> crate::Result<EventSource> {
        let request = self
            .client
            .request(Method::GET, self.url(path)?)
            .header(reqwest::header::ACCEPT, "text/event-stream");
        let mut event_source = EventSource::new(request)
            .map_err(|_| HueError::protocol_err("event stream request cannot be cloned"))?;
        // reconnects are driven by the caller, which also refreshes the caches
        event_source.set_retry_policy(Box::new(reqwest_eventsource::retry::Never));
        Ok(event_source)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get(&self, path: &str) -> crate::Result<Value> {
        self.send(Method::GET, path, None).await
    }

    async fn put(&self, path: &str, body: &Value) -> crate::Result<Value> {
        self.send(Method::PUT, path, Some(body)).await
    }

    async fn post(&self, path: &str, body: &Value) -> crate::Result<Value> {
        self.send(Method::POST, path, Some(body)).await
    }
}
