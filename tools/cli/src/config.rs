//! CLI configuration file.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};

use notesync_storage::{GDriveConfig, ProviderKind};
use notesync_sync::SyncConfig;

/// Contents of `<config_dir>/notesync/config.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Account whose records are synced.
    pub user: String,
    pub provider: ProviderKind,
    /// Provider-specific settings, passed to the registry as-is.
    pub provider_config: Value,
    /// SQLite database holding the records.
    pub database: Option<PathBuf>,
    /// Directory for sync metadata and the offline queue.
    pub state_dir: Option<PathBuf>,
    /// Encrypt uploaded snapshots with a passphrase.
    pub encrypt: bool,
    pub sync: SyncConfig,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            user: "default".to_string(),
            provider: ProviderKind::Local,
            provider_config: Value::Null,
            database: None,
            state_dir: None,
            encrypt: false,
            sync: SyncConfig::default(),
        }
    }
}

/// Base directory for everything the CLI stores.
pub fn base_dir() -> Result<PathBuf> {
    dirs::config_dir()
        .map(|dir| dir.join("notesync"))
        .context("Could not determine the config directory")
}

pub fn default_config_path() -> Result<PathBuf> {
    Ok(base_dir()?.join("config.json"))
}

impl CliConfig {
    /// Load from `path`; a missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self> {
        match std::fs::read(path) {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .with_context(|| format!("Invalid config file {}", path.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
        }
    }

    pub fn database_path(&self, base: &Path) -> PathBuf {
        self.database
            .clone()
            .unwrap_or_else(|| base.join("notesync.db"))
    }

    pub fn state_path(&self, base: &Path) -> PathBuf {
        self.state_dir.clone().unwrap_or_else(|| base.join("state"))
    }

    /// Provider configuration with CLI defaults filled in.
    pub fn resolved_provider_config(&self, base: &Path) -> Value {
        let mut config = match &self.provider_config {
            Value::Object(map) => map.clone(),
            _ => serde_json::Map::new(),
        };

        match self.provider {
            ProviderKind::Local => {
                config
                    .entry("root")
                    .or_insert_with(|| Value::from(base.join("snapshots").display().to_string()));
            }
            ProviderKind::GoogleDrive => {
                if let Some(path) = GDriveConfig::default_token_path() {
                    config
                        .entry("token_path")
                        .or_insert_with(|| Value::from(path.display().to_string()));
                }
            }
            ProviderKind::Memory => {}
        }

        Value::Object(config)
    }
}
