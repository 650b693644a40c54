use std::path::PathBuf;

use clap::{Parser, Subcommand};
use clap_complete::Shell;

use crate::config::DEFAULT_CONFIG_FILE;
use crate::types::{TunnelProvider, TunnelSettings};

#[derive(Debug, Parser)]
#[command(name = "tunnelctl")]
#[command(version)]
#[command(about = "Start, stop and watch a public tunnel through the local tunnel backend")]
pub struct Args {
    /// Settings file (created on first save)
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,

    /// Tunnel backend base URL; overrides `[backend] base_url`
    #[arg(long, global = true)]
    pub backend: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start a tunnel and wait for its public URL
    Start {
        #[command(flatten)]
        overrides: SettingsArgs,

        /// Return as soon as the backend accepts the request
        #[arg(long)]
        no_wait: bool,
    },
    /// Stop the running tunnel
    Stop,
    /// Show tunnel status
    Status {
        /// Keep polling until a URL appears or the tunnel stops
        #[arg(long, short)]
        watch: bool,
    },
    /// Show or edit stored tunnel settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Print shell completions
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Debug, Subcommand)]
pub enum ConfigAction {
    /// Print the stored settings
    Show,
    /// Update the stored settings
    Set {
        #[command(flatten)]
        overrides: SettingsArgs,
    },
}

/// Per-invocation settings overrides.
#[derive(Debug, Clone, Default, clap::Args)]
pub struct SettingsArgs {
    /// Tunnel provider
    #[arg(long, value_enum)]
    pub provider: Option<TunnelProvider>,

    /// Local port to expose
    #[arg(long)]
    pub port: Option<u16>,

    /// Pinggy access token
    #[arg(long)]
    pub pinggy_token: Option<String>,
}

impl SettingsArgs {
    /// Layer the flags that were given over `base`.
    pub fn apply(&self, base: TunnelSettings) -> TunnelSettings {
        TunnelSettings {
            provider: self.provider.unwrap_or(base.provider),
            local_port: self.port.unwrap_or(base.local_port),
            pinggy_token: self.pinggy_token.clone().or(base.pinggy_token),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.provider.is_none() && self.port.is_none() && self.pinggy_token.is_none()
    }
}
