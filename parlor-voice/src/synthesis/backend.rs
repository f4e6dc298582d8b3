//! Synthesis backends
//!
//! A backend turns text into an encoded audio payload. Backends are
//! registered by descriptor and tried in priority order by the pipeline.

use crate::error::{Error, Result};
use async_trait::async_trait;
use parlor_common::Channel;
use serde::{Deserialize, Serialize};
use tracing::debug;

fn default_enabled() -> bool {
    true
}

/// Registered backend descriptor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendDescriptor {
    /// Unique identifier
    pub id: String,
    /// Lower is preferred
    pub priority: u32,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Base URL for HTTP backends
    #[serde(default)]
    pub base_url: String,
    /// Channels this backend is preferred for; None serves every channel
    #[serde(default)]
    pub channels: Option<Vec<Channel>>,
}

impl BackendDescriptor {
    pub fn new(id: impl Into<String>, priority: u32, base_url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            priority,
            enabled: true,
            base_url: base_url.into(),
            channels: None,
        }
    }

    pub fn with_channels(mut self, channels: Vec<Channel>) -> Self {
        self.channels = Some(channels);
        self
    }

    /// Backend has an affinity list that names `channel`
    pub fn prefers(&self, channel: Channel) -> bool {
        match &self.channels {
            Some(channels) => channels.contains(&channel),
            None => true,
        }
    }
}

/// Request body sent to a backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthesisRequest {
    pub text: String,
    pub lang: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speaker: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed: Option<f32>,
}

/// Text-to-speech backend
///
/// Implementations do not bound their own latency; the pipeline wraps every
/// call in a timeout and drops the future when it expires.
#[async_trait]
pub trait SynthesisBackend: Send + Sync {
    /// Health probe; `Ok(false)` and `Err` both count as unhealthy
    async fn check_health(&self) -> Result<bool>;

    /// Synthesize `request` into an encoded audio payload
    async fn synthesize(&self, request: &SynthesisRequest) -> Result<Vec<u8>>;
}

#[derive(Debug, Deserialize)]
struct HealthResponse {
    status: String,
}

/// Backend speaking the HTTP synthesis protocol
///
/// - `GET {base_url}/health` → `{"status": "ok"}`
/// - `POST {base_url}/synthesize` with a JSON [`SynthesisRequest`] → audio bytes
pub struct HttpBackend {
    base_url: String,
    client: reqwest::Client,
}

impl HttpBackend {
    pub fn new(base_url: &str) -> Result<Self> {
        let base_url = base_url.trim().trim_end_matches('/');
        if base_url.is_empty() {
            return Err(Error::Config("backend base_url is empty".to_string()));
        }

        let client = reqwest::Client::builder()
            .user_agent(concat!("parlor-voice/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            base_url: base_url.to_string(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl SynthesisBackend for HttpBackend {
    async fn check_health(&self) -> Result<bool> {
        let url = format!("{}/health", self.base_url);
        let response = self.client.get(&url).send().await?;

        if !response.status().is_success() {
            debug!("Health probe {} returned {}", url, response.status());
            return Ok(false);
        }

        let body: HealthResponse = response
            .json()
            .await
            .map_err(|e| Error::Backend(format!("invalid health response: {}", e)))?;

        Ok(body.status.eq_ignore_ascii_case("ok"))
    }

    async fn synthesize(&self, request: &SynthesisRequest) -> Result<Vec<u8>> {
        let url = format!("{}/synthesize", self.base_url);
        let response = self.client.post(&url).json(request).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Backend(format!("{} returned {}", url, status)));
        }

        let audio = response.bytes().await?;
        if audio.is_empty() {
            return Err(Error::Backend(format!("{} returned no audio", url)));
        }

        Ok(audio.to_vec())
    }
}
