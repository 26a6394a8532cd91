//! Configuration management for the fleet master.
//!
//! This module handles loading, validation, and conversion of the master's
//! configuration from a TOML file and command-line arguments.

use anyhow::Context;
use fleet_master::{CascadePolicy, MasterConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

/// Application configuration loaded from TOML file.
///
/// Every section may be omitted; missing values take their defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub master: MasterSettings,
    pub queue: QueueSettings,
    pub ports: PortSettings,
    pub players: PlayerSettings,
    pub storage: StorageSettings,
    pub logging: LoggingSettings,
}

/// Network identity of the master.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MasterSettings {
    /// Node name groups created on this master are placed on
    pub node_name: String,
    /// Network address nodes connect to (e.g., "127.0.0.1:7000")
    pub bind_address: String,
    /// Host advertised for services
    pub default_host: String,
    /// Largest accepted packet payload in bytes
    pub max_frame_size: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueSettings {
    pub enabled: bool,
}

/// Port ranges handed to new services.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortSettings {
    pub proxy_start: u16,
    pub server_start: u16,
    pub range: u16,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerSettings {
    /// Which player references a removed service evicts
    pub cascade: CascadePolicy,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    /// One JSON document per group in `directory`
    #[default]
    Json,
    /// Groups live in memory and are lost on exit
    Memory,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub kind: StorageKind,
    pub directory: String,
}

/// Logging system configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Log level filter (trace, debug, info, warn, error)
    pub level: String,
    /// Whether to output logs in JSON format
    pub json_format: bool,
}

impl Default for MasterSettings {
    fn default() -> Self {
        let defaults = MasterConfig::default();
        Self {
            node_name: defaults.node_name,
            bind_address: defaults.bind_address.to_string(),
            default_host: defaults.default_host,
            max_frame_size: defaults.max_frame_len,
        }
    }
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl Default for PortSettings {
    fn default() -> Self {
        let defaults = MasterConfig::default();
        Self {
            proxy_start: defaults.proxy_port_start,
            server_start: defaults.server_port_start,
            range: defaults.port_range,
        }
    }
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            kind: StorageKind::Json,
            directory: "groups".to_string(),
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

impl AppConfig {
    /// Loads configuration from a TOML file.
    ///
    /// If the file doesn't exist, writes the default configuration to `path`
    /// and returns it.
    pub async fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        if tokio::fs::try_exists(path).await.unwrap_or(false) {
            let content = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("reading {}", path.display()))?;
            let config = toml::from_str(&content)
                .with_context(|| format!("parsing {}", path.display()))?;
            Ok(config)
        } else {
            let default_config = AppConfig::default();
            let toml_content = toml::to_string_pretty(&default_config)?;
            tokio::fs::write(path, toml_content)
                .await
                .with_context(|| format!("writing {}", path.display()))?;
            info!("Created default configuration file: {}", path.display());
            Ok(default_config)
        }
    }

    /// Translates the file settings into the master's runtime configuration.
    pub fn to_master_config(&self) -> anyhow::Result<MasterConfig> {
        Ok(MasterConfig {
            node_name: self.master.node_name.clone(),
            bind_address: self
                .master
                .bind_address
                .parse()
                .with_context(|| format!("invalid bind address '{}'", self.master.bind_address))?,
            default_host: self.master.default_host.clone(),
            max_frame_len: self.master.max_frame_size,
            queue_enabled: self.queue.enabled,
            proxy_port_start: self.ports.proxy_start,
            server_port_start: self.ports.server_start,
            port_range: self.ports.range,
            cascade_policy: self.players.cascade,
        })
    }

    pub fn storage_directory(&self) -> PathBuf {
        PathBuf::from(&self.storage.directory)
    }

    /// Validates the configuration for consistency and correctness.
    pub fn validate(&self) -> Result<(), String> {
        if self.master.bind_address.parse::<std::net::SocketAddr>().is_err() {
            return Err(format!("Invalid bind address: {}", &self.master.bind_address));
        }

        if self.master.node_name.trim().is_empty() {
            return Err("Node name cannot be empty".to_string());
        }

        if self.master.max_frame_size == 0 {
            return Err("Max frame size must be greater than zero".to_string());
        }

        if self.ports.range == 0 {
            return Err("Port range must be greater than zero".to_string());
        }
        let proxy_end = u32::from(self.ports.proxy_start) + u32::from(self.ports.range);
        let server_end = u32::from(self.ports.server_start) + u32::from(self.ports.range);
        if proxy_end > 65536 || server_end > 65536 {
            return Err("Port ranges must end at or below 65535".to_string());
        }
        let (low, high) = if self.ports.proxy_start <= self.ports.server_start {
            (self.ports.proxy_start, self.ports.server_start)
        } else {
            (self.ports.server_start, self.ports.proxy_start)
        };
        if u32::from(low) + u32::from(self.ports.range) > u32::from(high) {
            return Err("Proxy and server port ranges overlap".to_string());
        }

        if self.storage.kind == StorageKind::Json && self.storage.directory.is_empty() {
            return Err("Storage directory cannot be empty".to_string());
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(format!(
                "Invalid log level: {}. Must be one of: {valid_levels:?}",
                &self.logging.level
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_config_default() {
        let config = AppConfig::default();
        assert_eq!(config.master.node_name, "Master");
        assert_eq!(config.master.bind_address, "127.0.0.1:7000");
        assert!(config.queue.enabled);
        assert_eq!(config.ports.server_start, 30000);
        assert_eq!(config.players.cascade, CascadePolicy::ProxyOnly);
        assert_eq!(config.storage.kind, StorageKind::Json);
        assert!(config.validate().is_ok());
    }

    #[tokio::test]
    async fn test_load_from_nonexistent_file_writes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fleet.toml");

        let config = AppConfig::load_from_file(&path).await.unwrap();
        assert_eq!(config, AppConfig::default());
        assert!(path.exists());

        // the written file loads back to the same configuration
        let reloaded = AppConfig::load_from_file(&path).await.unwrap();
        assert_eq!(reloaded, config);
    }

    #[tokio::test]
    async fn test_load_from_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fleet.toml");
        tokio::fs::write(
            &path,
            r#"
[master]
node_name = "Master-EU"
bind_address = "0.0.0.0:7100"

[queue]
enabled = false

[players]
cascade = "proxy_and_game"

[storage]
kind = "memory"

[logging]
level = "debug"
"#,
        )
        .await
        .unwrap();

        let config = AppConfig::load_from_file(&path).await.unwrap();
        assert_eq!(config.master.node_name, "Master-EU");
        assert_eq!(config.master.default_host, "127.0.0.1");
        assert!(!config.queue.enabled);
        assert_eq!(config.players.cascade, CascadePolicy::ProxyAndGame);
        assert_eq!(config.storage.kind, StorageKind::Memory);
        assert_eq!(config.ports, PortSettings::default());
        assert_eq!(config.logging.level, "debug");
    }

    #[tokio::test]
    async fn test_load_rejects_malformed_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fleet.toml");
        tokio::fs::write(&path, "[master\nnode_name = ").await.unwrap();
        assert!(AppConfig::load_from_file(&path).await.is_err());
    }

    #[test]
    fn test_to_master_config_conversion() {
        let mut config = AppConfig::default();
        config.master.bind_address = "0.0.0.0:7100".to_string();
        config.ports.range = 50;
        config.players.cascade = CascadePolicy::ProxyAndGame;

        let master = config.to_master_config().unwrap();
        assert_eq!(master.bind_address.port(), 7100);
        assert_eq!(master.port_range, 50);
        assert_eq!(master.cascade_policy, CascadePolicy::ProxyAndGame);
        assert!(master.queue_enabled);
    }

    #[test]
    fn test_validation_failures() {
        let mut config = AppConfig::default();
        config.master.bind_address = "not-an-address".to_string();
        assert!(config.validate().unwrap_err().contains("Invalid bind address"));

        let mut config = AppConfig::default();
        config.logging.level = "verbose".to_string();
        assert!(config.validate().unwrap_err().contains("Invalid log level"));

        let mut config = AppConfig::default();
        config.ports.proxy_start = 30000;
        config.ports.server_start = 30500;
        assert!(config.validate().unwrap_err().contains("overlap"));

        let mut config = AppConfig::default();
        config.ports.server_start = 65000;
        assert!(config.validate().unwrap_err().contains("65535"));

        let mut config = AppConfig::default();
        config.storage.directory.clear();
        assert!(config.validate().is_err());
        config.storage.kind = StorageKind::Memory;
        assert!(config.validate().is_ok());
    }
}
