//! # tunnelctl
//!
//! Lifecycle controller for a public tunnel (Cloudflare, Pinggy, ...) run by
//! a local tunnel backend. The backend does the tunnelling; this crate
//! decides when to ask it to start or stop, polls it until a public URL
//! shows up, and exposes one race-free view of the tunnel's state.
//!
//! ```rust,ignore
//! let client = StatusClient::builder("http://127.0.0.1:5000").build();
//! let controller = TunnelController::new(client, TomlSettingsStore::new("tunnelctl.toml"));
//! let mut events = controller.subscribe();
//!
//! controller
//!     .start(TunnelSettings::new(TunnelProvider::Pinggy, 5000).with_pinggy_token("abc"))
//!     .await?;
//! while let Ok(event) = events.recv().await {
//!     println!("{}", render::describe(event.state, event.status.as_ref()));
//! }
//! ```

pub mod backend;
pub mod cli;
pub mod config;
pub mod controller;
pub mod error;
pub mod logging;
pub mod poll;
pub mod render;
pub mod types;

pub use backend::{BackendConfig, StatusClient, StatusClientBuilder, TunnelBackend};
pub use config::{AppConfig, MemorySettingsStore, SettingsStore, TomlSettingsStore};
pub use controller::{ControllerSnapshot, StatusChanged, TunnelController, TunnelControllerBuilder};
pub use error::{ErrorKind, Result, TunnelError};
pub use poll::{PollConfig, PollMode, Scheduler, TokioScheduler};
pub use types::{Ack, BackendState, TunnelProvider, TunnelSettings, TunnelState, TunnelStatus};
