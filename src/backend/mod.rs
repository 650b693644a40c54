//! # Tunnel backend adapter
//!
//! Boundary between the controller and the process that actually runs the
//! tunnel. The controller only sees the [`TunnelBackend`] trait:
//!
//! 1. **Start**: `POST /api/tunnel/start` with provider, port and token.
//! 2. **Status**: `GET /api/tunnel/status`, parsed into a [`TunnelStatus`](crate::types::TunnelStatus).
//! 3. **Stop**: `POST /api/tunnel/stop`.
//!
//! [`StatusClient`] is the reqwest implementation.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let client = StatusClient::builder("http://127.0.0.1:5000")
//!     .request_timeout(Duration::from_secs(5))
//!     .build();
//! let status = client.request_status().await?;
//! ```

pub mod client;
pub mod wire;

pub use client::{BackendConfig, StatusClient, StatusClientBuilder, TunnelBackend};
