//! HTTP client for the tunnel backend.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::wire::{self, StartRequest};
use crate::error::{Result, TunnelError};
use crate::types::{Ack, TunnelSettings, TunnelStatus};

/// The three round trips the controller needs from a tunnel backend.
///
/// Implementations perform exactly one request per call and never retry;
/// retry cadence is the poll scheduler's job.
pub trait TunnelBackend: Send + Sync + 'static {
    fn request_start(&self, settings: &TunnelSettings) -> impl Future<Output = Result<Ack>> + Send;

    fn request_status(&self) -> impl Future<Output = Result<TunnelStatus>> + Send;

    fn request_stop(&self) -> impl Future<Output = Result<Ack>> + Send;
}

impl<T: TunnelBackend> TunnelBackend for Arc<T> {
    fn request_start(&self, settings: &TunnelSettings) -> impl Future<Output = Result<Ack>> + Send {
        (**self).request_start(settings)
    }

    fn request_status(&self) -> impl Future<Output = Result<TunnelStatus>> + Send {
        (**self).request_status()
    }

    fn request_stop(&self) -> impl Future<Output = Result<Ack>> + Send {
        (**self).request_stop()
    }
}

/// Where the backend lives and how long a single round trip may take.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Base URL of the backend (e.g. `http://127.0.0.1:5000`).
    pub base_url: String,
    pub connect_timeout_ms: u64,
    pub request_timeout_ms: u64,
}

impl Default for BackendConfig {
    /// - base_url: `http://127.0.0.1:5000`
    /// - connect_timeout: 3 s
    /// - request_timeout: 10 s
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:5000".to_string(),
            connect_timeout_ms: 3_000,
            request_timeout_ms: 10_000,
        }
    }
}

impl BackendConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// reqwest-backed [`TunnelBackend`]. Use [`StatusClientBuilder`] for construction.
#[derive(Debug, Clone)]
pub struct StatusClient {
    config: BackendConfig,
    client: reqwest::Client,
}

impl StatusClient {
    /// Start building a client aimed at `base_url`.
    pub fn builder(base_url: impl Into<String>) -> StatusClientBuilder {
        StatusClientBuilder::new(base_url)
    }

    pub fn from_config(config: BackendConfig) -> Self {
        StatusClientBuilder { config }.build()
    }

    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    /// Send a prepared request and collect `(status code, body)`.
    ///
    /// Transport failures, including a body that cannot be read to the end,
    /// map to [`TunnelError::BackendUnreachable`].
    async fn round_trip(&self, url: &str, req: reqwest::RequestBuilder) -> Result<(u16, Vec<u8>)> {
        let resp = req.send().await.map_err(|e| TunnelError::BackendUnreachable {
            url: url.to_string(),
            detail: e.to_string(),
        })?;

        let code = resp.status().as_u16();
        let bytes = resp.bytes().await.map_err(|e| TunnelError::BackendUnreachable {
            url: url.to_string(),
            detail: e.to_string(),
        })?;

        debug!(url, code, len = bytes.len(), "tunnel backend replied");
        Ok((code, bytes.to_vec()))
    }
}

impl TunnelBackend for StatusClient {
    async fn request_start(&self, settings: &TunnelSettings) -> Result<Ack> {
        let url = self.endpoint(wire::START_PATH);
        let body = StartRequest::from(settings);
        let (code, bytes) = self.round_trip(&url, self.client.post(&url).json(&body)).await?;
        wire::parse_action(code, &bytes)
    }

    async fn request_status(&self) -> Result<TunnelStatus> {
        let url = self.endpoint(wire::STATUS_PATH);
        let (code, bytes) = self.round_trip(&url, self.client.get(&url)).await?;
        wire::parse_status(code, &bytes)
    }

    async fn request_stop(&self) -> Result<Ack> {
        let url = self.endpoint(wire::STOP_PATH);
        let (code, bytes) = self.round_trip(&url, self.client.post(&url)).await?;
        wire::parse_action(code, &bytes)
    }
}

/// Builder for [`StatusClient`].
///
/// # Example
/// ```rust,ignore
/// let client = StatusClient::builder("http://127.0.0.1:5000")
///     .request_timeout(Duration::from_secs(5))
///     .build();
/// ```
#[derive(Debug, Clone)]
pub struct StatusClientBuilder {
    config: BackendConfig,
}

impl StatusClientBuilder {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            config: BackendConfig::new(base_url),
        }
    }

    /// Override the TCP connect timeout (default 3 s).
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Override the per-request timeout (default 10 s).
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn build(self) -> StatusClient {
        // reqwest::Client::builder() can fail in extreme environments, but
        // unwrap_or_default() falls back to a default client instead of panicking.
        let client = reqwest::Client::builder()
            .connect_timeout(self.config.connect_timeout())
            .timeout(self.config.request_timeout())
            .build()
            .unwrap_or_default();

        StatusClient {
            config: self.config,
            client,
        }
    }
}
