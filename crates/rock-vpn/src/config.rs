//! Client Configuration
//!
//! Loaded from TOML (or JSON, chosen by file extension). Every field has a
//! default so an empty file is valid.
//!
//! ```toml
//! credentials_path = "~/.config/rockvpn/credentials.json"
//!
//! [router]
//! base_url = "https://router.example.com"
//! timeout_secs = 10
//! heartbeat_secs = 30
//!
//! [tunnel]
//! socks_port = 10808
//! provider_bundle_id = "com.theholylabs.network.PacketTunnelProvider"
//!
//! [[servers]]
//! id = "de-1"
//! protocol = "ipsec"
//! ...
//! ```

use crate::catalog::{ServerCatalog, ServerProfile};
use crate::manager::ManagerSettings;
use crate::platform::DEFAULT_PROVIDER_BUNDLE_ID;
use crate::xray::DEFAULT_SOCKS_PORT;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Unsupported config format: {0}")]
    UnsupportedFormat(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Config file format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Toml,
    Json,
}

impl ConfigFormat {
    /// Pick the format from a file extension
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        match ext.to_ascii_lowercase().as_str() {
            "toml" => Ok(ConfigFormat::Toml),
            "json" => Ok(ConfigFormat::Json),
            other => Err(ConfigError::UnsupportedFormat(other.to_string())),
        }
    }
}

/// Proxy router backend settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouterSettings {
    /// Base URL of the router service
    #[serde(default)]
    pub base_url: Option<String>,
    /// Per-request timeout
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Heartbeat interval
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_heartbeat_secs() -> u64 {
    30
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout_secs: default_timeout_secs(),
            heartbeat_secs: default_heartbeat_secs(),
        }
    }
}

impl RouterSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs)
    }
}

/// Tunnel settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TunnelOptions {
    /// Local XRay SOCKS port
    #[serde(default = "default_socks_port")]
    pub socks_port: u16,
    /// Packet-tunnel extension bundle id
    #[serde(default = "default_provider_bundle_id")]
    pub provider_bundle_id: String,
    /// Connectivity probe timeout
    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,
}

fn default_socks_port() -> u16 {
    DEFAULT_SOCKS_PORT
}

fn default_provider_bundle_id() -> String {
    DEFAULT_PROVIDER_BUNDLE_ID.to_string()
}

fn default_probe_timeout_secs() -> u64 {
    5
}

impl Default for TunnelOptions {
    fn default() -> Self {
        Self {
            socks_port: default_socks_port(),
            provider_bundle_id: default_provider_bundle_id(),
            probe_timeout_secs: default_probe_timeout_secs(),
        }
    }
}

/// Complete client configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RockConfig {
    /// Where the file credential store lives
    #[serde(default)]
    pub credentials_path: Option<PathBuf>,
    #[serde(default)]
    pub router: RouterSettings,
    #[serde(default)]
    pub tunnel: TunnelOptions,
    #[serde(default)]
    pub servers: Vec<ServerProfile>,
}

impl RockConfig {
    /// Load from a file, format chosen by extension
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;
        let config = Self::from_str_with(&content, ConfigFormat::from_path(path)?)?;
        info!(
            "Loaded config from {} ({} servers)",
            path.display(),
            config.servers.len()
        );
        Ok(config)
    }

    /// Load from a string
    pub fn from_str_with(content: &str, format: ConfigFormat) -> Result<Self, ConfigError> {
        let config = match format {
            ConfigFormat::Toml => Self::from_toml(content)?,
            ConfigFormat::Json => Self::from_json(content)?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Load from TOML string
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Load from JSON string
    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Export as TOML
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Reject values no component can work with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tunnel.socks_port == 0 {
            return Err(ConfigError::Invalid("tunnel.socks_port must be non-zero".into()));
        }
        if self.router.timeout_secs == 0 {
            return Err(ConfigError::Invalid("router.timeout_secs must be non-zero".into()));
        }
        if self.router.heartbeat_secs == 0 {
            return Err(ConfigError::Invalid("router.heartbeat_secs must be non-zero".into()));
        }

        let mut seen = std::collections::HashSet::new();
        for server in &self.servers {
            if !seen.insert(server.id.as_str()) {
                return Err(ConfigError::Invalid(format!("duplicate server id: {}", server.id)));
            }
        }
        Ok(())
    }

    /// Servers as a catalog
    pub fn catalog(&self) -> ServerCatalog {
        ServerCatalog::new(self.servers.clone())
    }

    /// Manager tunables derived from the tunnel section
    pub fn manager_settings(&self) -> ManagerSettings {
        ManagerSettings {
            provider_bundle_id: self.tunnel.provider_bundle_id.clone(),
            socks_port: self.tunnel.socks_port,
            probe_timeout: Duration::from_secs(self.tunnel.probe_timeout_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Protocol;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = RockConfig::from_toml("").unwrap();
        assert_eq!(config.router.timeout_secs, 10);
        assert_eq!(config.router.heartbeat_secs, 30);
        assert_eq!(config.tunnel.socks_port, 10808);
        assert_eq!(config.tunnel.provider_bundle_id, DEFAULT_PROVIDER_BUNDLE_ID);
        assert!(config.servers.is_empty());
        assert!(config.credentials_path.is_none());
    }

    #[test]
    fn test_full_toml() {
        let toml = r#"
            credentials_path = "/tmp/rock/credentials.json"

            [router]
            base_url = "http://127.0.0.1:8080"
            heartbeat_secs = 15

            [tunnel]
            socks_port = 1086

            [[servers]]
            id = "de-1"
            protocol = "ipsec"
            server_address = "de.example"
            username = "u"
            password = "p"
            shared_secret = "s"

            [[servers]]
            id = "nl-1"
            protocol = "vless"
            enabled = false
            vless_uri = "vless://id@nl.example:443"
        "#;

        let config = RockConfig::from_str_with(toml, ConfigFormat::Toml).unwrap();
        assert_eq!(config.router.base_url.as_deref(), Some("http://127.0.0.1:8080"));
        assert_eq!(config.router.heartbeat_interval(), Duration::from_secs(15));
        assert_eq!(config.router.timeout(), Duration::from_secs(10));
        assert_eq!(config.manager_settings().socks_port, 1086);
        assert_eq!(config.servers[1].protocol, Protocol::Vless);
        assert_eq!(config.catalog().enabled().count(), 1);
    }

    #[test]
    fn test_json_config() {
        let json = r#"{"tunnel": {"socks_port": 2080}, "servers": []}"#;
        let config = RockConfig::from_str_with(json, ConfigFormat::Json).unwrap();
        assert_eq!(config.tunnel.socks_port, 2080);
        assert_eq!(config.router.heartbeat_secs, 30);
    }

    #[test]
    fn test_validation() {
        let zero_port = "[tunnel]\nsocks_port = 0\n";
        assert!(matches!(
            RockConfig::from_str_with(zero_port, ConfigFormat::Toml),
            Err(ConfigError::Invalid(_))
        ));

        let duplicate = r#"
            [[servers]]
            id = "a"
            protocol = "vless"
            [[servers]]
            id = "a"
            protocol = "ipsec"
        "#;
        assert!(matches!(
            RockConfig::from_str_with(duplicate, ConfigFormat::Toml),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rock.toml");
        std::fs::write(&path, "[router]\ntimeout_secs = 3\n").unwrap();

        let config = RockConfig::from_file(&path).unwrap();
        assert_eq!(config.router.timeout_secs, 3);

        let yaml = dir.path().join("rock.yaml");
        std::fs::write(&yaml, "").unwrap();
        assert!(matches!(
            RockConfig::from_file(&yaml),
            Err(ConfigError::UnsupportedFormat(_))
        ));

        let round = RockConfig::from_toml(&config.to_toml().unwrap()).unwrap();
        assert_eq!(round, config);
    }
}
