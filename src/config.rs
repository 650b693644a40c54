//! Persisted configuration.
//!
//! One TOML file holds everything the binary needs:
//!
//! ```toml
//! [tunnel]
//! provider = "pinggy"
//! local_port = 5000
//! pinggy_token = "abc"
//!
//! [backend]
//! base_url = "http://127.0.0.1:5000"
//!
//! [polling]
//! max_attempts = 30
//! ```
//!
//! The controller only touches the `[tunnel]` table, through [`SettingsStore`].

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};

use crate::backend::BackendConfig;
use crate::error::Result;
use crate::poll::PollConfig;
use crate::types::{Ack, TunnelSettings};

/// Default config file name, resolved against the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "tunnelctl.toml";

const TUNNEL_TABLE: &str = "tunnel";

/// Load/save contract for tunnel settings.
pub trait SettingsStore: Send + Sync + 'static {
    fn load_settings(&self) -> Result<TunnelSettings>;

    fn save_settings(&self, settings: &TunnelSettings) -> Result<Ack>;
}

impl<T: SettingsStore> SettingsStore for Arc<T> {
    fn load_settings(&self) -> Result<TunnelSettings> {
        (**self).load_settings()
    }

    fn save_settings(&self, settings: &TunnelSettings) -> Result<Ack> {
        (**self).save_settings(settings)
    }
}

/// Whole config file. Every table and key is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub tunnel: TunnelSettings,
    pub backend: BackendConfig,
    pub polling: PollConfig,
}

impl AppConfig {
    /// Read `path`, falling back to defaults when the file does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(content) => Self::from_toml_str(&content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }
}

// ---------------------------------------------------------------------------
// File-backed store
// ---------------------------------------------------------------------------

/// [`SettingsStore`] over the `[tunnel]` table of a TOML file.
///
/// Saving rewrites only that table; `[backend]`, `[polling]` and any unknown
/// tables survive.
#[derive(Debug, Clone)]
pub struct TomlSettingsStore {
    path: PathBuf,
}

impl TomlSettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_table(&self) -> Result<toml::Table> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) => Ok(content.parse::<toml::Table>()?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(toml::Table::new()),
            Err(e) => Err(e.into()),
        }
    }
}

impl SettingsStore for TomlSettingsStore {
    fn load_settings(&self) -> Result<TunnelSettings> {
        Ok(AppConfig::load(&self.path)?.tunnel)
    }

    fn save_settings(&self, settings: &TunnelSettings) -> Result<Ack> {
        let mut table = self.read_table()?;
        table.insert(TUNNEL_TABLE.to_string(), toml::Value::try_from(settings)?);

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, toml::to_string_pretty(&table)?)?;

        Ok(Ack::with_message(format!(
            "Tunnel settings saved to {}. They will be used next time a tunnel is started.",
            self.path.display()
        )))
    }
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

/// [`SettingsStore`] kept in memory, for embedding and tests.
#[derive(Debug, Default)]
pub struct MemorySettingsStore {
    settings: Mutex<TunnelSettings>,
    saves: AtomicUsize,
}

impl MemorySettingsStore {
    pub fn new(settings: TunnelSettings) -> Self {
        Self {
            settings: Mutex::new(settings),
            saves: AtomicUsize::new(0),
        }
    }

    /// Number of successful saves so far.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

impl SettingsStore for MemorySettingsStore {
    fn load_settings(&self) -> Result<TunnelSettings> {
        let guard = self.settings.lock().unwrap_or_else(|p| p.into_inner());
        Ok(guard.clone())
    }

    fn save_settings(&self, settings: &TunnelSettings) -> Result<Ack> {
        *self.settings.lock().unwrap_or_else(|p| p.into_inner()) = settings.clone();
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(Ack::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::types::TunnelProvider;
    use proptest::prelude::*;

    #[test]
    fn test_missing_file_loads_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = TomlSettingsStore::new(dir.path().join("absent.toml"));
        assert_eq!(store.load_settings().unwrap(), TunnelSettings::default());
    }

    #[test]
    fn test_full_config_parses() {
        let config = AppConfig::from_toml_str(
            r#"
            [tunnel]
            provider = "pinggy"
            local_port = 8080
            pinggy_token = "abc"

            [backend]
            base_url = "http://10.0.0.5:5000"
            request_timeout_ms = 2500

            [polling]
            max_attempts = 12
            "#,
        )
        .unwrap();
        assert_eq!(config.tunnel.provider, TunnelProvider::Pinggy);
        assert_eq!(config.tunnel.pinggy_token.as_deref(), Some("abc"));
        assert_eq!(config.backend.base_url, "http://10.0.0.5:5000");
        assert_eq!(config.backend.request_timeout_ms, 2500);
        assert_eq!(config.backend.connect_timeout_ms, 3000);
        assert_eq!(config.polling.max_attempts, 12);
        assert_eq!(config.polling.grace_delay_ms, 3000);
    }

    #[test]
    fn test_unknown_provider_is_a_settings_error() {
        let err = AppConfig::from_toml_str("[tunnel]\nprovider = \"ngrok\"\n").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Settings);
    }

    #[test]
    fn test_save_keeps_other_tables() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tunnelctl.toml");
        std::fs::write(
            &path,
            "[backend]\nbase_url = \"http://192.168.1.10:5000\"\n\n[extra]\nkeep = true\n",
        )
        .unwrap();

        let store = TomlSettingsStore::new(&path);
        let settings = TunnelSettings::new(TunnelProvider::Cloudflare, 7000);
        let ack = store.save_settings(&settings).unwrap();
        assert!(ack.message.unwrap().contains("tunnelctl.toml"));

        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config.tunnel, settings);
        assert_eq!(config.backend.base_url, "http://192.168.1.10:5000");
        let raw: toml::Table = std::fs::read_to_string(&path).unwrap().parse().unwrap();
        assert_eq!(raw["extra"]["keep"].as_bool(), Some(true));
    }

    #[test]
    fn test_save_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("conf").join("tunnelctl.toml");
        let store = TomlSettingsStore::new(&path);
        store.save_settings(&TunnelSettings::default()).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_memory_store_counts_saves() {
        let store = MemorySettingsStore::default();
        let settings = TunnelSettings::new(TunnelProvider::Pinggy, 5000).with_pinggy_token("t");
        store.save_settings(&settings).unwrap();
        assert_eq!(store.save_count(), 1);
        assert_eq!(store.load_settings().unwrap(), settings);
    }

    fn provider_strategy() -> impl Strategy<Value = TunnelProvider> {
        prop_oneof![
            Just(TunnelProvider::None),
            Just(TunnelProvider::Cloudflare),
            Just(TunnelProvider::Pinggy),
        ]
    }

    proptest! {
        #[test]
        fn prop_save_then_load_round_trips(
            provider in provider_strategy(),
            local_port in 1u16..=u16::MAX,
            token in proptest::option::of("[A-Za-z0-9+_.-]{0,24}"),
        ) {
            let dir = tempfile::tempdir().unwrap();
            let store = TomlSettingsStore::new(dir.path().join("tunnelctl.toml"));
            let settings = TunnelSettings { provider, local_port, pinggy_token: token };
            store.save_settings(&settings).unwrap();
            prop_assert_eq!(store.load_settings().unwrap(), settings);
        }
    }
}
