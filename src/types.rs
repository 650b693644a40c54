//! Core value types shared by the controller, the backend adapter and the
//! settings store.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// Port the local web app listens on by default; also the default tunnel target.
pub const DEFAULT_LOCAL_PORT: u16 = 5000;

// ---------------------------------------------------------------------------
// Controller state
// ---------------------------------------------------------------------------

/// Lifecycle state owned by [`TunnelController`](crate::controller::TunnelController).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TunnelState {
    #[default]
    Idle,
    Starting,
    Running,
    Stopping,
    Errored,
}

impl TunnelState {
    /// States in which a poll session may be active.
    pub fn is_live(self) -> bool {
        matches!(self, TunnelState::Starting | TunnelState::Running)
    }
}

impl std::fmt::Display for TunnelState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TunnelState::Idle     => "idle",
            TunnelState::Starting => "starting",
            TunnelState::Running  => "running",
            TunnelState::Stopping => "stopping",
            TunnelState::Errored  => "errored",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// Backend status snapshot
// ---------------------------------------------------------------------------

/// Tunnel state as reported by the backend's status endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendState {
    Running,
    Stopped,
}

/// One status snapshot returned by the backend.
///
/// `url` stays `None` while the provider has not yet published a public
/// endpoint; that is a normal condition for a freshly started tunnel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunnelStatus {
    pub state: BackendState,
    pub provider: Option<String>,
    pub local_port: Option<u16>,
    pub url: Option<String>,
}

impl TunnelStatus {
    pub fn stopped() -> Self {
        Self {
            state: BackendState::Stopped,
            provider: None,
            local_port: None,
            url: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.state == BackendState::Running
    }

    /// Running with a published public URL.
    pub fn has_public_url(&self) -> bool {
        self.is_running() && self.url.is_some()
    }
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// Tunnel provider understood by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TunnelProvider {
    #[default]
    None,
    Cloudflare,
    Pinggy,
}

impl TunnelProvider {
    pub fn as_str(self) -> &'static str {
        match self {
            TunnelProvider::None       => "none",
            TunnelProvider::Cloudflare => "cloudflare",
            TunnelProvider::Pinggy     => "pinggy",
        }
    }
}

impl std::fmt::Display for TunnelProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Input to a tunnel start; the persisted copy lives in the settings store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TunnelSettings {
    pub provider: TunnelProvider,
    pub local_port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pinggy_token: Option<String>,
}

impl Default for TunnelSettings {
    fn default() -> Self {
        Self {
            provider: TunnelProvider::None,
            local_port: DEFAULT_LOCAL_PORT,
            pinggy_token: None,
        }
    }
}

impl TunnelSettings {
    pub fn new(provider: TunnelProvider, local_port: u16) -> Self {
        Self {
            provider,
            local_port,
            pinggy_token: None,
        }
    }

    pub fn with_pinggy_token(mut self, token: impl Into<String>) -> Self {
        self.pinggy_token = Some(token.into());
        self
    }

    /// Token to send with a start request. Only Pinggy uses one.
    pub fn token_for_request(&self) -> Option<&str> {
        match self.provider {
            TunnelProvider::Pinggy => self.pinggy_token.as_deref(),
            _ => None,
        }
    }
}

/// Successful acknowledgement from the backend, with its optional message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ack {
    pub message: Option<String>,
}

impl Ack {
    pub fn with_message(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
        }
    }
}
